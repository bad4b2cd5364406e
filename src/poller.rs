use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::executor::WorkflowResult;
use crate::history::{ChatMessage, HistoryStore};
use crate::interpret::ChatContext;
use crate::platform::{ChatTransport, Envelope, IncomingMessage};
use crate::trigger::{Trigger, TriggerDetector};
use crate::workflow::MessageHandler;

pub const FALLBACK_REPLY: &str = "Sorry, something went wrong processing that command.";

/// Stops a running [`Poller`] from any task or thread.
#[derive(Clone)]
pub struct PollerHandle {
    running: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl PollerHandle {
    /// No new cycle starts after this; a cycle already in progress finishes.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.wake.notify_one();
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// The single worker: retrieve, record, dispatch, reply, sleep.
pub struct Poller {
    transport: Arc<dyn ChatTransport>,
    handler: Arc<dyn MessageHandler>,
    detector: TriggerDetector,
    history: HistoryStore,
    allowed_groups: HashSet<String>,
    interval: Duration,
    running: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl Poller {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        handler: Arc<dyn MessageHandler>,
        detector: TriggerDetector,
        history: HistoryStore,
        allowed_groups: impl IntoIterator<Item = String>,
        interval: Duration,
    ) -> Self {
        Self {
            transport,
            handler,
            detector,
            history,
            allowed_groups: allowed_groups.into_iter().collect(),
            interval,
            running: Arc::new(AtomicBool::new(true)),
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn handle(&self) -> PollerHandle {
        PollerHandle {
            running: self.running.clone(),
            wake: self.wake.clone(),
        }
    }

    #[cfg(test)]
    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Poll until stopped. The interval is waited out after each cycle
    /// finishes, so slow cycles slow the polling down.
    pub async fn run(mut self) -> Self {
        info!(
            "Polling every {:?} for {} group(s), keeping {} messages of history",
            self.interval,
            self.allowed_groups.len(),
            self.history.capacity()
        );

        while self.running.load(Ordering::SeqCst) {
            self.poll_once().await;

            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.wake.notified() => {}
            }
        }

        info!(
            "Polling stopped ({} group(s) with history)",
            self.history.groups().count()
        );
        self
    }

    /// One cycle: fetch a batch and handle it envelope by envelope.
    pub async fn poll_once(&mut self) {
        let envelopes = match self.transport.retrieve().await {
            Ok(envelopes) => envelopes,
            Err(e) => {
                error!("Failed to retrieve messages: {:#}", e);
                return;
            }
        };

        if !envelopes.is_empty() {
            debug!("Received {} envelope(s)", envelopes.len());
        }

        for envelope in &envelopes {
            if let Err(e) = self.process(envelope).await {
                error!("Failed to process message: {:#}", e);
            }
        }
    }

    async fn process(&mut self, envelope: &Envelope) -> Result<()> {
        let Some(message) = envelope.normalize() else {
            return Ok(());
        };

        if !self.allowed_groups.contains(&message.group_id) {
            debug!("Ignoring message from group {}", message.group_id);
            return Ok(());
        }

        let trigger = self.detector.detect(&message.text);
        self.history.record(
            &message.group_id,
            ChatMessage {
                sender: message.sender_name.clone(),
                text: message.text.clone(),
                timestamp: message.timestamp,
                was_trigger: trigger.matched(),
            },
        );

        let Trigger::Command(command_text) = trigger else {
            return Ok(());
        };

        info!(
            "Triggered by {} in {}: {}",
            message.sender_name, message.group_id, command_text
        );

        let context = ChatContext {
            recent: self.history.snapshot(&message.group_id),
            triggered: IncomingMessage {
                text: command_text,
                ..message
            },
        };

        let group_id = context.triggered.group_id.clone();
        match self.handler.on_triggered(&context).await {
            Ok(result) => self.reply(&group_id, result).await,
            Err(e) => {
                error!("Workflow failed: {:#}", e);
                self.send_fallback(&group_id).await
            }
        }
    }

    async fn reply(&self, group_id: &str, result: WorkflowResult) -> Result<()> {
        let images = result.board_image.as_slice();
        match self.transport.send(group_id, &result.text, images).await {
            Ok(()) => {
                debug!(
                    "Replied to {} ({} chars, {} image(s))",
                    group_id,
                    result.text.len(),
                    images.len()
                );
                Ok(())
            }
            Err(e) => {
                warn!("Failed to send reply: {:#}", e);
                self.send_fallback(group_id).await
            }
        }
    }

    async fn send_fallback(&self, group_id: &str) -> Result<()> {
        self.transport
            .send(group_id, FALLBACK_REPLY, &[])
            .await
            .context("Fallback reply also failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    struct Sent {
        group: String,
        text: String,
        images: usize,
    }

    /// Serves queued batches and records sends; the first `fail_sends` sends fail.
    #[derive(Default)]
    struct FakeTransport {
        batches: Mutex<VecDeque<Result<Vec<Envelope>, String>>>,
        sent: Mutex<Vec<Sent>>,
        fail_sends: Mutex<usize>,
    }

    impl FakeTransport {
        fn with_batches(batches: Vec<Result<Vec<Envelope>, String>>) -> Self {
            Self {
                batches: Mutex::new(batches.into()),
                ..Default::default()
            }
        }

        fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatTransport for FakeTransport {
        async fn retrieve(&self) -> Result<Vec<Envelope>> {
            match self.batches.lock().unwrap().pop_front() {
                Some(Ok(batch)) => Ok(batch),
                Some(Err(e)) => Err(anyhow::anyhow!(e)),
                None => Ok(Vec::new()),
            }
        }

        async fn send(&self, group_id: &str, text: &str, images: &[Vec<u8>]) -> Result<()> {
            self.sent.lock().unwrap().push(Sent {
                group: group_id.to_string(),
                text: text.to_string(),
                images: images.len(),
            });
            let mut failures = self.fail_sends.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                anyhow::bail!("signal api down");
            }
            Ok(())
        }
    }

    /// Echoes the command text and keeps every context it saw.
    #[derive(Default)]
    struct RecordingHandler {
        seen: Mutex<Vec<ChatContext>>,
        fail: bool,
        image: bool,
    }

    #[async_trait]
    impl MessageHandler for RecordingHandler {
        async fn on_triggered(&self, context: &ChatContext) -> Result<WorkflowResult> {
            self.seen.lock().unwrap().push(context.clone());
            if self.fail {
                anyhow::bail!("interpreter exploded");
            }
            Ok(WorkflowResult {
                text: format!("ok: {}", context.triggered.text),
                board_image: self.image.then(|| vec![1, 2, 3]),
            })
        }
    }

    fn poller(transport: Arc<FakeTransport>, handler: Arc<RecordingHandler>, capacity: usize) -> Poller {
        Poller::new(
            transport,
            handler,
            TriggerDetector::new(vec!["@bot".to_string(), "/b".to_string()]),
            HistoryStore::new(capacity),
            vec!["G".to_string()],
            Duration::from_millis(10),
        )
    }

    fn msg(group: &str, sender: &str, text: &str, ts: i64) -> Envelope {
        Envelope::group_text(group, sender, text, ts)
    }

    #[tokio::test]
    async fn test_non_allowlisted_group_is_never_recorded() {
        let transport = Arc::new(FakeTransport::with_batches(vec![Ok(vec![
            msg("OTHER", "mallory", "@bot list", 1),
            msg("G", "alice", "hello", 2),
        ])]));
        let handler = Arc::new(RecordingHandler::default());
        let mut p = poller(transport.clone(), handler.clone(), 10);

        p.poll_once().await;

        assert!(p.history().snapshot("OTHER").is_empty());
        assert_eq!(p.history().snapshot("G").len(), 1);
        assert!(handler.seen.lock().unwrap().is_empty());
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_batch_history_is_visible_to_later_triggers() {
        let transport = Arc::new(FakeTransport::with_batches(vec![Ok(vec![
            msg("G", "alice", "login keeps timing out", 1),
            msg("G", "bob", "@BOT create a bug", 2),
            msg("G", "carol", "thanks", 3),
        ])]));
        let handler = Arc::new(RecordingHandler::default());
        let mut p = poller(transport.clone(), handler.clone(), 10);

        p.poll_once().await;

        let seen = handler.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].triggered.text, "create a bug");
        assert_eq!(seen[0].triggered.sender_name, "bob");
        let texts: Vec<&str> = seen[0].recent.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["login keeps timing out", "@BOT create a bug"]);
        assert!(seen[0].recent[1].was_trigger);

        // The context is a copy; later messages only land in the live store.
        assert_eq!(p.history().snapshot("G").len(), 3);
        assert_eq!(
            transport.sent(),
            vec![Sent {
                group: "G".to_string(),
                text: "ok: create a bug".to_string(),
                images: 0
            }]
        );
    }

    #[tokio::test]
    async fn test_prefix_only_message_is_recorded_but_not_dispatched() {
        let transport = Arc::new(FakeTransport::with_batches(vec![Ok(vec![msg("G", "alice", "@bot   ", 1)])]));
        let handler = Arc::new(RecordingHandler::default());
        let mut p = poller(transport, handler.clone(), 10);

        p.poll_once().await;

        let history = p.history().snapshot("G");
        assert_eq!(history.len(), 1);
        assert!(history[0].was_trigger);
        assert!(handler.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_history_capacity_keeps_latest() {
        let batch = (1..=4).map(|i| msg("G", "alice", &format!("m{}", i), i)).collect();
        let transport = Arc::new(FakeTransport::with_batches(vec![Ok(batch)]));
        let mut p = poller(transport, Arc::new(RecordingHandler::default()), 3);

        p.poll_once().await;

        let texts: Vec<String> = p.history().snapshot("G").into_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_retrieve_failure_skips_cycle() {
        let transport = Arc::new(FakeTransport::with_batches(vec![
            Err("connection refused".to_string()),
            Ok(vec![msg("G", "alice", "/b stats", 1)]),
        ]));
        let handler = Arc::new(RecordingHandler::default());
        let mut p = poller(transport.clone(), handler.clone(), 10);

        p.poll_once().await;
        assert!(transport.sent().is_empty());

        p.poll_once().await;
        assert_eq!(transport.sent().len(), 1);
        assert_eq!(transport.sent()[0].text, "ok: stats");
    }

    #[tokio::test]
    async fn test_board_image_is_attached() {
        let transport = Arc::new(FakeTransport::with_batches(vec![Ok(vec![msg("G", "alice", "@bot create x", 1)])]));
        let handler = Arc::new(RecordingHandler {
            image: true,
            ..Default::default()
        });
        let mut p = poller(transport.clone(), handler, 10);

        p.poll_once().await;
        assert_eq!(transport.sent()[0].images, 1);
    }

    #[tokio::test]
    async fn test_send_failure_sends_one_fallback() {
        let transport = Arc::new(FakeTransport::with_batches(vec![Ok(vec![
            msg("G", "alice", "@bot list", 1),
            msg("G", "bob", "@bot stats", 2),
        ])]));
        *transport.fail_sends.lock().unwrap() = 1;
        let mut p = poller(transport.clone(), Arc::new(RecordingHandler::default()), 10);

        p.poll_once().await;

        let texts: Vec<String> = transport.sent().into_iter().map(|s| s.text).collect();
        assert_eq!(texts, vec!["ok: list", FALLBACK_REPLY, "ok: stats"]);
    }

    #[tokio::test]
    async fn test_double_send_failure_is_only_logged() {
        let transport = Arc::new(FakeTransport::with_batches(vec![Ok(vec![
            msg("G", "alice", "@bot list", 1),
            msg("G", "bob", "@bot stats", 2),
        ])]));
        *transport.fail_sends.lock().unwrap() = 2;
        let mut p = poller(transport.clone(), Arc::new(RecordingHandler::default()), 10);

        p.poll_once().await;

        let texts: Vec<String> = transport.sent().into_iter().map(|s| s.text).collect();
        assert_eq!(texts, vec!["ok: list", FALLBACK_REPLY, "ok: stats"]);
    }

    #[tokio::test]
    async fn test_workflow_error_sends_fallback() {
        let transport = Arc::new(FakeTransport::with_batches(vec![Ok(vec![msg("G", "alice", "@bot list", 1)])]));
        let handler = Arc::new(RecordingHandler {
            fail: true,
            ..Default::default()
        });
        let mut p = poller(transport.clone(), handler, 10);

        p.poll_once().await;
        assert_eq!(transport.sent()[0].text, FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn test_stop_ends_loop() {
        let transport = Arc::new(FakeTransport::default());
        let p = poller(transport, Arc::new(RecordingHandler::default()), 10);
        let handle = p.handle();
        assert!(handle.is_running());

        let task = tokio::spawn(p.run());
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.stop();

        let finished = tokio::time::timeout(Duration::from_secs(2), task).await;
        assert!(finished.is_ok());
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn test_stop_before_run_polls_nothing() {
        let transport = Arc::new(FakeTransport::with_batches(vec![Ok(vec![msg("G", "alice", "@bot list", 1)])]));
        let handler = Arc::new(RecordingHandler::default());
        let p = poller(transport.clone(), handler.clone(), 10);
        p.handle().stop();

        let p = p.run().await;
        assert!(p.history().snapshot("G").is_empty());
        assert!(transport.sent().is_empty());
    }
}

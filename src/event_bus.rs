use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};

use crate::types::SubmissionEvent;

/// Capacity of each submission's broadcast channel. A slow/absent SSE
/// subscriber drops frames past this point rather than applying backpressure
/// to the pipeline (spec.md §4.6: streaming is best-effort, not delivery
/// guaranteed).
const CHANNEL_CAPACITY: usize = 10;

/// Per-submission fan-out of [`SubmissionEvent`] frames. Generalizes the
/// teacher's single `broadcast::channel` held by `ReviewState`/`GradeState`
/// into a map keyed by submission id, since this crate serves many
/// concurrently-streaming submissions from one process rather than one
/// review at a time.
pub struct EventBus {
    channels: RwLock<HashMap<String, broadcast::Sender<SubmissionEvent>>>,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            channels: RwLock::new(HashMap::new()),
        })
    }

    async fn sender_for(&self, submission_id: &str) -> broadcast::Sender<SubmissionEvent> {
        if let Some(tx) = self.channels.read().await.get(submission_id) {
            return tx.clone();
        }
        let mut guard = self.channels.write().await;
        guard
            .entry(submission_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Non-blocking broadcast. No subscribers is not an error: the event is
    /// simply dropped, matching `broadcast::Sender::send`'s semantics.
    pub async fn publish(&self, submission_id: &str, event: SubmissionEvent) {
        let tx = self.sender_for(submission_id).await;
        let _ = tx.send(event);
    }

    pub async fn subscribe(&self, submission_id: &str) -> broadcast::Receiver<SubmissionEvent> {
        self.sender_for(submission_id).await.subscribe()
    }

    /// Drops the channel once nobody holds a sender or receiver, so the map
    /// doesn't grow unboundedly across a long-running process.
    pub async fn unsubscribe_if_idle(&self, submission_id: &str) {
        let mut guard = self.channels.write().await;
        if let Some(tx) = guard.get(submission_id) {
            if tx.receiver_count() == 0 {
                guard.remove(submission_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProcessingStatus;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe("sub-1").await;
        bus.publish(
            "sub-1",
            SubmissionEvent::StatusChanged {
                status: ProcessingStatus::OcrProcessing,
                message: "extracting text".into(),
            },
        )
        .await;

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, SubmissionEvent::StatusChanged { .. }));
    }

    #[tokio::test]
    async fn test_publish_without_subscriber_does_not_panic() {
        let bus = EventBus::new();
        bus.publish("sub-none", SubmissionEvent::Connected).await;
    }

    #[tokio::test]
    async fn test_independent_submissions_do_not_cross_talk() {
        let bus = EventBus::new();
        let mut rx_a = bus.subscribe("sub-a").await;
        let _rx_b = bus.subscribe("sub-b").await;

        bus.publish("sub-a", SubmissionEvent::Connected).await;

        let event = tokio::time::timeout(std::time::Duration::from_millis(50), rx_a.recv())
            .await
            .expect("expected an event on sub-a")
            .unwrap();
        assert!(matches!(event, SubmissionEvent::Connected));
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::PipelineError;
use crate::types::FeedbackEvent;

/// Append-only capture of teacher overrides (spec.md §3 "FeedbackEvent").
/// The rubric-refinement loop that consumes this data is out of scope per
/// spec.md §1; this crate's obligation ends at durably recording the
/// correction.
#[async_trait]
pub trait FeedbackStore: Send + Sync {
    async fn record(&self, event: FeedbackEvent) -> Result<(), PipelineError>;
    async fn list_for_question(&self, question_id: &str) -> Result<Vec<FeedbackEvent>, PipelineError>;
}

pub struct InMemoryFeedbackStore {
    inner: RwLock<Vec<FeedbackEvent>>,
}

impl InMemoryFeedbackStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(Vec::new()),
        })
    }
}

#[async_trait]
impl FeedbackStore for InMemoryFeedbackStore {
    async fn record(&self, event: FeedbackEvent) -> Result<(), PipelineError> {
        self.inner.write().await.push(event);
        Ok(())
    }

    async fn list_for_question(&self, question_id: &str) -> Result<Vec<FeedbackEvent>, PipelineError> {
        Ok(self
            .inner
            .read()
            .await
            .iter()
            .filter(|e| e.question_id == question_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(question_id: &str) -> FeedbackEvent {
        FeedbackEvent {
            id: uuid::Uuid::new_v4().to_string(),
            question_id: question_id.to_string(),
            submission_id: "sub-1".into(),
            ai_score: 6.0,
            teacher_score: 8.0,
            delta: 2.0,
            ai_reasoning: "moderate variance".into(),
            teacher_reason: "gave credit for partial diagram".into(),
            timestamp: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_record_is_append_only_and_filterable() {
        let store = InMemoryFeedbackStore::new();
        store.record(event("q1")).await.unwrap();
        store.record(event("q2")).await.unwrap();

        let q1_events = store.list_for_question("q1").await.unwrap();
        assert_eq!(q1_events.len(), 1);
        assert_eq!(q1_events[0].delta, 2.0);
    }
}

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use crate::audit::{AuditEntry, AuditStore};
use crate::error::{PipelineError, VisionError};
use crate::event_bus::EventBus;
use crate::image_store::ImageStore;
use crate::retry::{with_retry, RetryConfig, GEMINI_BACKOFF_SCHEDULE_MS};
use crate::store::SubmissionRepository;
use crate::types::{ActorType, OcrResult, ProcessingStatus, SubmissionEvent};
use crate::vision::VisionProvider;

fn mime_type_for(image_key: &str) -> &'static str {
    if image_key.ends_with(".pdf") {
        "application/pdf"
    } else if image_key.ends_with(".jpg") || image_key.ends_with(".jpeg") {
        "image/jpeg"
    } else {
        "image/png"
    }
}

/// Per-submission OCR procedure (spec §4.3), orchestrated under a 25-second
/// deadline. Grounded on `GeminiOCRProcessor.ExtractText`'s retry ladder and
/// `GradingService`'s status-transition discipline, generalized across
/// pages.
pub struct OcrStage {
    store: Arc<dyn SubmissionRepository>,
    audit: Arc<dyn AuditStore>,
    events: Arc<EventBus>,
    images: Arc<dyn ImageStore>,
    vision: Arc<dyn VisionProvider>,
    deadline: std::time::Duration,
}

impl OcrStage {
    pub fn new(
        store: Arc<dyn SubmissionRepository>,
        audit: Arc<dyn AuditStore>,
        events: Arc<EventBus>,
        images: Arc<dyn ImageStore>,
        vision: Arc<dyn VisionProvider>,
        deadline_secs: u64,
    ) -> Self {
        Self {
            store,
            audit,
            events,
            images,
            vision,
            deadline: std::time::Duration::from_secs(deadline_secs),
        }
    }

    /// Returns `Ok(should_chain_to_grading)`. A submission that fails
    /// terminally (`ocr_failed`) is not chained; one that times out
    /// (`ocr_timeout`) still is, per spec §4.3 step 4.
    pub async fn process_submission(&self, submission_id: &str) -> Result<bool, PipelineError> {
        self.store
            .update_status(submission_id, ProcessingStatus::OcrProcessing)
            .await
            .or_else(|e| match e {
                PipelineError::StatusNotApplied => Ok(()),
                other => Err(other),
            })?;
        self.audit
            .append(AuditEntry {
                entity_type: "submission".to_string(),
                entity_id: submission_id.to_string(),
                event_type: "ocr_processing".to_string(),
                actor_type: ActorType::System,
                actor_id: None,
                changes: json!({ "status": "ocr_processing" }),
            })
            .await?;
        self.events
            .publish(
                submission_id,
                SubmissionEvent::StatusChanged {
                    status: ProcessingStatus::OcrProcessing,
                    message: "extracting text from pages".to_string(),
                },
            )
            .await;

        let timed_out = match self.run_extraction(submission_id).await {
            Ok(timed_out) => timed_out,
            Err(e) => {
                warn!(submission_id, error = %e, "OCR stage hit an unexpected error, marking ocr_failed");
                self.store
                    .update_status(submission_id, ProcessingStatus::OcrFailed)
                    .await
                    .or_else(|e| match e {
                        PipelineError::StatusNotApplied => Ok(()),
                        other => Err(other),
                    })?;
                self.audit
                    .append(AuditEntry {
                        entity_type: "submission".to_string(),
                        entity_id: submission_id.to_string(),
                        event_type: "ocr_failed".to_string(),
                        actor_type: ActorType::System,
                        actor_id: None,
                        changes: json!({ "status": "ocr_failed", "error": e.to_string() }),
                    })
                    .await?;
                self.events
                    .publish(
                        submission_id,
                        SubmissionEvent::StatusChanged {
                            status: ProcessingStatus::OcrFailed,
                            message: "OCR stage failed unexpectedly".to_string(),
                        },
                    )
                    .await;
                return Ok(false);
            }
        };

        let final_status = if timed_out {
            ProcessingStatus::OcrTimeout
        } else {
            ProcessingStatus::OcrDone
        };

        self.store
            .update_status(submission_id, final_status)
            .await
            .or_else(|e| match e {
                PipelineError::StatusNotApplied => Ok(()),
                other => Err(other),
            })?;

        self.audit
            .append(AuditEntry {
                entity_type: "submission".to_string(),
                entity_id: submission_id.to_string(),
                event_type: format!("{:?}", final_status).to_lowercase(),
                actor_type: ActorType::System,
                actor_id: None,
                changes: json!({ "status": final_status }),
            })
            .await?;

        self.events
            .publish(
                submission_id,
                SubmissionEvent::StatusChanged {
                    status: final_status,
                    message: if timed_out {
                        "OCR deadline exceeded, proceeding with partial results".to_string()
                    } else {
                        "OCR complete".to_string()
                    },
                },
            )
            .await;

        info!(submission_id, status = ?final_status, "OCR stage finished");

        Ok(true)
    }

    /// Walks every page under the deadline, substituting sentinels for
    /// per-page failures. Returns whether the deadline was hit. A
    /// propagated `Err` here means something outside per-page OCR itself
    /// went wrong (e.g. a storage write failing); the caller treats that
    /// as the "unexpected error" case in spec §4.3 step 5 and moves the
    /// submission to `ocr_failed` without chaining to grading.
    async fn run_extraction(&self, submission_id: &str) -> Result<bool, PipelineError> {
        let submission = self.store.get(submission_id).await?;
        let deadline_at = tokio::time::Instant::now() + self.deadline;

        let mut timed_out = false;
        for page in &submission.pages {
            let remaining = deadline_at.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                timed_out = true;
                break;
            }

            let result = tokio::time::timeout(remaining, self.extract_page(submission_id, page.page_index, &page.image_key)).await;

            match result {
                Ok(Ok(ocr_result)) => {
                    self.store.save_ocr_result(submission_id, ocr_result).await?;
                }
                Ok(Err(_terminal_error)) => {
                    self.store
                        .save_ocr_result(submission_id, OcrResult::sentinel(page.page_index))
                        .await?;
                }
                Err(_elapsed) => {
                    timed_out = true;
                    break;
                }
            }
        }

        Ok(timed_out)
    }

    /// Fetches one page's bytes and calls the vision provider with the
    /// 15s/30s/60s rate-limit retry ladder. Any other error is terminal for
    /// the page, and the caller substitutes a sentinel result.
    async fn extract_page(
        &self,
        submission_id: &str,
        page_index: u32,
        image_key: &str,
    ) -> Result<OcrResult, VisionError> {
        let bytes = self
            .images
            .get(image_key)
            .await
            .map_err(|_| VisionError::Unavailable {
                provider: "image_store".to_string(),
            })?;
        let mime = mime_type_for(image_key);

        let config = RetryConfig::fixed_schedule(&GEMINI_BACKOFF_SCHEDULE_MS);
        let vision = self.vision.clone();
        let extraction = with_retry(&config, || {
            let vision = vision.clone();
            let bytes = bytes.clone();
            async move { vision.extract_text(&bytes, mime).await }
        })
        .await;

        match extraction {
            Ok(extraction) => Ok(OcrResult {
                page_index,
                raw_text: extraction.raw_text,
                confidence: extraction.confidence,
                corrected_text: None,
            }),
            Err(e) => {
                warn!(submission_id, page_index, error = %e, "OCR page extraction failed terminally");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditStore;
    use crate::image_store::InMemoryImageStore;
    use crate::store::InMemorySubmissionStore;
    use crate::types::{Page, Submission};
    use crate::vision::OcrExtraction;
    use async_trait::async_trait;

    struct StubVision {
        confidence: f32,
    }

    #[async_trait]
    impl VisionProvider for StubVision {
        async fn extract_text(&self, _bytes: &[u8], _mime: &str) -> Result<OcrExtraction, VisionError> {
            Ok(OcrExtraction {
                raw_text: "hello world".to_string(),
                confidence: self.confidence,
            })
        }
    }

    struct AlwaysFailsVision;

    #[async_trait]
    impl VisionProvider for AlwaysFailsVision {
        async fn extract_text(&self, _bytes: &[u8], _mime: &str) -> Result<OcrExtraction, VisionError> {
            Err(VisionError::InvalidResponse("malformed".to_string()))
        }
    }

    async fn seeded_submission(store: &InMemorySubmissionStore, images: &InMemoryImageStore) -> String {
        let submission = Submission::new(
            "tenant".into(),
            "exam".into(),
            "student".into(),
            vec![Page {
                page_index: 0,
                image_key: "page-0.png".into(),
            }],
        );
        let id = submission.id.clone();
        images.put("page-0.png".to_string(), vec![1, 2, 3]).await.unwrap();
        store.create(submission).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_successful_ocr_advances_to_ocr_done() {
        let store = InMemorySubmissionStore::new();
        let images = InMemoryImageStore::new();
        let id = seeded_submission(&store, &images).await;

        let stage = OcrStage::new(
            store.clone(),
            InMemoryAuditStore::new(),
            EventBus::new(),
            images,
            Arc::new(StubVision { confidence: 0.9 }),
            25,
        );

        stage.process_submission(&id).await.unwrap();
        let submission = store.get(&id).await.unwrap();
        assert_eq!(submission.processing_status, ProcessingStatus::OcrDone);
        assert_eq!(submission.ocr_results.len(), 1);
        assert_eq!(submission.ocr_results[0].raw_text, "hello world");
    }

    #[tokio::test]
    async fn test_terminal_page_failure_substitutes_sentinel_but_still_completes() {
        let store = InMemorySubmissionStore::new();
        let images = InMemoryImageStore::new();
        let id = seeded_submission(&store, &images).await;

        let stage = OcrStage::new(
            store.clone(),
            InMemoryAuditStore::new(),
            EventBus::new(),
            images,
            Arc::new(AlwaysFailsVision),
            25,
        );

        stage.process_submission(&id).await.unwrap();
        let submission = store.get(&id).await.unwrap();
        assert_eq!(submission.processing_status, ProcessingStatus::OcrDone);
        assert_eq!(submission.ocr_results.len(), 1);
        assert_eq!(
            submission.ocr_results[0].raw_text,
            crate::types::OCR_UNAVAILABLE_SENTINEL
        );
    }

    #[tokio::test]
    async fn test_deadline_exceeded_advances_to_ocr_timeout() {
        let store = InMemorySubmissionStore::new();
        let images = InMemoryImageStore::new();
        let id = seeded_submission(&store, &images).await;

        let stage = OcrStage::new(
            store.clone(),
            InMemoryAuditStore::new(),
            EventBus::new(),
            images,
            Arc::new(StubVision { confidence: 0.9 }),
            0,
        );

        stage.process_submission(&id).await.unwrap();
        let submission = store.get(&id).await.unwrap();
        assert_eq!(submission.processing_status, ProcessingStatus::OcrTimeout);
    }

    /// Wraps an [`InMemorySubmissionStore`] but fails `save_ocr_result`,
    /// standing in for a storage-layer fault that isn't one of the
    /// per-page provider errors the sentinel path already covers.
    struct FailingOnSaveStore {
        inner: std::sync::Arc<InMemorySubmissionStore>,
    }

    #[async_trait]
    impl SubmissionRepository for FailingOnSaveStore {
        async fn create(&self, submission: Submission) -> Result<(), PipelineError> {
            self.inner.create(submission).await
        }
        async fn get(&self, id: &str) -> Result<Submission, PipelineError> {
            self.inner.get(id).await
        }
        async fn update_status(&self, id: &str, status: ProcessingStatus) -> Result<(), PipelineError> {
            self.inner.update_status(id, status).await
        }
        async fn save_ocr_result(&self, _id: &str, _result: OcrResult) -> Result<(), PipelineError> {
            Err(PipelineError::Storage("disk full".to_string()))
        }
        async fn save_answers(&self, id: &str, answers: Vec<crate::types::AnswerSegment>) -> Result<(), PipelineError> {
            self.inner.save_answers(id, answers).await
        }
        async fn save_grade(&self, grade: crate::types::FinalGrade) -> Result<(), PipelineError> {
            self.inner.save_grade(grade).await
        }
        async fn get_grade(
            &self,
            submission_id: &str,
            question_id: &str,
        ) -> Result<Option<crate::types::FinalGrade>, PipelineError> {
            self.inner.get_grade(submission_id, question_id).await
        }
        async fn list_grades(&self, submission_id: &str) -> Result<Vec<crate::types::FinalGrade>, PipelineError> {
            self.inner.list_grades(submission_id).await
        }
        async fn save_escalation(&self, case: crate::types::EscalationCase) -> Result<(), PipelineError> {
            self.inner.save_escalation(case).await
        }
        async fn list_pending_reviews(&self, tenant_id: &str) -> Result<Vec<Submission>, PipelineError> {
            self.inner.list_pending_reviews(tenant_id).await
        }
        async fn sweep_stuck(&self) -> Result<Vec<String>, PipelineError> {
            self.inner.sweep_stuck().await
        }
    }

    #[tokio::test]
    async fn test_unexpected_storage_error_advances_to_ocr_failed_and_does_not_chain() {
        let inner = InMemorySubmissionStore::new();
        let images = InMemoryImageStore::new();
        let id = seeded_submission(&inner, &images).await;
        let store: Arc<dyn SubmissionRepository> = Arc::new(FailingOnSaveStore { inner: inner.clone() });

        let stage = OcrStage::new(
            store.clone(),
            InMemoryAuditStore::new(),
            EventBus::new(),
            images,
            Arc::new(StubVision { confidence: 0.9 }),
            25,
        );

        let should_chain = stage.process_submission(&id).await.unwrap();
        assert!(!should_chain);
        let submission = inner.get(&id).await.unwrap();
        assert_eq!(submission.processing_status, ProcessingStatus::OcrFailed);
    }
}

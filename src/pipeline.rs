use std::sync::Arc;

use serde_json::json;
use tokio::sync::broadcast;
use tracing::info;

use crate::audit::{AuditEntry, AuditStore};
use crate::error::PipelineError;
use crate::event_bus::EventBus;
use crate::exam::ExamRepository;
use crate::feedback::FeedbackStore;
use crate::grading::GradingEngine;
use crate::ocr::OcrStage;
use crate::store::SubmissionRepository;
use crate::types::{
    ActorType, Exam, FeedbackEvent, FinalGrade, GradeStatus, Page, Submission, SubmissionEvent,
};
use crate::worker::jobs::{submit_grading_job, OcrJob};
use crate::worker::WorkerPool;

/// Top-level façade the HTTP layer talks to. Wires the six components
/// (store, audit, event bus, worker pool, OCR stage, grading engine) the
/// way the teacher's `ReviewStore`/`GradeStore` wire their own git-clone +
/// checker + AI-reviewer pipeline, generalized into a multi-stage pipeline
/// with an explicit worker pool instead of one `tokio::spawn` per request.
#[derive(Clone)]
pub struct PipelineService {
    store: Arc<dyn SubmissionRepository>,
    exams: Arc<dyn ExamRepository>,
    audit: Arc<dyn AuditStore>,
    events: Arc<EventBus>,
    feedback: Arc<dyn FeedbackStore>,
    pool: Arc<WorkerPool>,
    ocr_stage: Arc<OcrStage>,
    grading_engine: Arc<GradingEngine>,
}

impl PipelineService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn SubmissionRepository>,
        exams: Arc<dyn ExamRepository>,
        audit: Arc<dyn AuditStore>,
        events: Arc<EventBus>,
        feedback: Arc<dyn FeedbackStore>,
        pool: Arc<WorkerPool>,
        ocr_stage: Arc<OcrStage>,
        grading_engine: Arc<GradingEngine>,
    ) -> Self {
        Self {
            store,
            exams,
            audit,
            events,
            feedback,
            pool,
            ocr_stage,
            grading_engine,
        }
    }

    /// Registers an exam. Delegated straight to `ExamRepository::create`,
    /// which validates every question's rubric before storing it.
    pub async fn create_exam(&self, exam: Exam) -> Result<(), PipelineError> {
        self.exams.create(exam).await
    }

    /// Creates a submission in `queued` and enqueues its `OcrJob`. The HTTP
    /// handler outside this core is responsible for having already stored
    /// the page images the `image_key`s reference (spec §4.3 "Trigger").
    pub async fn create_submission(
        &self,
        tenant_id: String,
        exam_id: String,
        student_id: String,
        pages: Vec<Page>,
    ) -> Result<String, PipelineError> {
        let submission = Submission::new(tenant_id, exam_id, student_id, pages);
        let id = submission.id.clone();
        self.store.create(submission).await?;

        self.audit
            .append(AuditEntry {
                entity_type: "submission".to_string(),
                entity_id: id.clone(),
                event_type: "queued".to_string(),
                actor_type: ActorType::System,
                actor_id: None,
                changes: json!({ "status": "queued" }),
            })
            .await?;

        let job = Arc::new(OcrJob {
            submission_id: id.clone(),
            ocr_stage: self.ocr_stage.clone(),
            store: self.store.clone(),
            audit: self.audit.clone(),
            exams: self.exams.clone(),
            engine: self.grading_engine.clone(),
            pool: self.pool.clone(),
        });
        self.pool
            .submit(job)
            .await
            .map_err(|_| PipelineError::QueueClosed)?;

        info!(submission_id = %id, "submission queued");
        Ok(id)
    }

    pub async fn get_submission(&self, id: &str) -> Result<Submission, PipelineError> {
        self.store.get(id).await
    }

    pub async fn list_grades(&self, submission_id: &str) -> Result<Vec<FinalGrade>, PipelineError> {
        self.store.list_grades(submission_id).await
    }

    pub async fn list_pending_reviews(&self, tenant_id: &str) -> Result<Vec<Submission>, PipelineError> {
        self.store.list_pending_reviews(tenant_id).await
    }

    pub async fn subscribe(&self, submission_id: &str) -> broadcast::Receiver<SubmissionEvent> {
        self.events.subscribe(submission_id).await
    }

    /// Manually retriggers grading for a submission stuck in a non-terminal
    /// status (e.g. after an operator fixes an upstream issue). Goes
    /// through the same dedup guard the auto-chain uses.
    pub async fn retrigger_grading(&self, submission_id: &str) -> Result<(), PipelineError> {
        submit_grading_job(
            submission_id,
            &self.store,
            &self.audit,
            &self.exams,
            &self.grading_engine,
            &self.pool,
        )
        .await
        .map_err(PipelineError::Storage)
    }

    /// Teacher override loop (spec §3 "FeedbackEvent", §1 "feeds corrections
    /// back to refine rubrics"): records the correction and marks the grade
    /// `overridden`. Refining the rubric from accumulated feedback is out of
    /// scope here; this crate's obligation ends at durable capture.
    pub async fn submit_feedback(
        &self,
        submission_id: &str,
        question_id: &str,
        teacher_score: f32,
        teacher_reason: String,
    ) -> Result<FeedbackEvent, PipelineError> {
        let grade = self
            .store
            .get_grade(submission_id, question_id)
            .await?
            .ok_or_else(|| PipelineError::Storage(format!("no grade for {}/{}", submission_id, question_id)))?;

        let ai_score = grade.ai_score.unwrap_or(grade.final_score);
        let delta = teacher_score - ai_score;

        let feedback = FeedbackEvent {
            id: uuid::Uuid::new_v4().to_string(),
            question_id: question_id.to_string(),
            submission_id: submission_id.to_string(),
            ai_score,
            teacher_score,
            delta,
            ai_reasoning: grade.reasoning.clone(),
            teacher_reason,
            timestamp: chrono::Utc::now(),
        };

        let mut updated = grade;
        updated.teacher_score = Some(teacher_score);
        updated.final_score = teacher_score;
        updated.status = GradeStatus::Overridden;
        updated.updated_at = chrono::Utc::now();
        self.store.save_grade(updated).await?;

        self.audit
            .append(AuditEntry {
                entity_type: "grade".to_string(),
                entity_id: format!("{}:{}", submission_id, question_id),
                event_type: "teacher_override".to_string(),
                actor_type: ActorType::Human,
                actor_id: None,
                changes: json!({ "teacher_score": teacher_score, "delta": delta }),
            })
            .await?;

        self.feedback.record(feedback.clone()).await?;

        Ok(feedback)
    }

    /// Run once at startup (spec §4.1 "Crash recovery"): anything left
    /// mid-pipeline from a prior process is swept to `failed`.
    pub async fn recover(&self) -> Result<Vec<String>, PipelineError> {
        self.store.sweep_stuck().await
    }
}

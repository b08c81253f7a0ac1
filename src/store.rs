use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::PipelineError;
use crate::types::{
    AnswerSegment, EscalationCase, FinalGrade, GradeStatus, OcrResult, ProcessingStatus, Submission,
};

/// Persistence seam for submissions, grades, and escalations (spec.md
/// §4.1). The in-memory implementation below is what's actually wired up
/// and tested; a Postgres/Mongo-backed implementation (see
/// `db::MongoSubmissionRepository`) would swap in the conditional
/// `UPDATE ... WHERE rank(...) < rank(...)` form for `update_status`
/// instead of the `RwLock` compare-and-set done here.
#[async_trait]
pub trait SubmissionRepository: Send + Sync {
    async fn create(&self, submission: Submission) -> Result<(), PipelineError>;
    async fn get(&self, id: &str) -> Result<Submission, PipelineError>;
    async fn update_status(&self, id: &str, status: ProcessingStatus) -> Result<(), PipelineError>;
    async fn save_ocr_result(&self, id: &str, result: OcrResult) -> Result<(), PipelineError>;
    async fn save_answers(&self, id: &str, answers: Vec<AnswerSegment>) -> Result<(), PipelineError>;
    /// Upserts on `(submission_id, question_id)` (spec.md §4.1 failure modes).
    async fn save_grade(&self, grade: FinalGrade) -> Result<(), PipelineError>;
    async fn get_grade(
        &self,
        submission_id: &str,
        question_id: &str,
    ) -> Result<Option<FinalGrade>, PipelineError>;
    async fn list_grades(&self, submission_id: &str) -> Result<Vec<FinalGrade>, PipelineError>;
    async fn save_escalation(&self, case: EscalationCase) -> Result<(), PipelineError>;
    /// Submissions under `tenant_id` that have at least one grade with
    /// `status = review`.
    async fn list_pending_reviews(&self, tenant_id: &str) -> Result<Vec<Submission>, PipelineError>;
    /// Crash-recovery sweep: anything left in a non-terminal, in-flight
    /// status after a restart is forced to `failed` since its worker is gone.
    async fn sweep_stuck(&self) -> Result<Vec<String>, PipelineError>;
}

pub struct InMemorySubmissionStore {
    inner: RwLock<HashMap<String, Submission>>,
    grades: RwLock<HashMap<(String, String), FinalGrade>>,
    escalations: RwLock<HashMap<String, EscalationCase>>,
}

impl InMemorySubmissionStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(HashMap::new()),
            grades: RwLock::new(HashMap::new()),
            escalations: RwLock::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl SubmissionRepository for InMemorySubmissionStore {
    async fn create(&self, submission: Submission) -> Result<(), PipelineError> {
        let mut guard = self.inner.write().await;
        guard.insert(submission.id.clone(), submission);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Submission, PipelineError> {
        let guard = self.inner.read().await;
        guard
            .get(id)
            .cloned()
            .ok_or_else(|| PipelineError::SubmissionNotFound(id.to_string()))
    }

    async fn update_status(&self, id: &str, status: ProcessingStatus) -> Result<(), PipelineError> {
        let mut guard = self.inner.write().await;
        let submission = guard
            .get_mut(id)
            .ok_or_else(|| PipelineError::SubmissionNotFound(id.to_string()))?;

        if status.rank() <= submission.processing_status.rank() {
            return Err(PipelineError::StatusNotApplied);
        }
        submission.processing_status = status;
        Ok(())
    }

    async fn save_ocr_result(&self, id: &str, result: OcrResult) -> Result<(), PipelineError> {
        let mut guard = self.inner.write().await;
        let submission = guard
            .get_mut(id)
            .ok_or_else(|| PipelineError::SubmissionNotFound(id.to_string()))?;
        submission
            .ocr_results
            .retain(|r| r.page_index != result.page_index);
        submission.ocr_results.push(result);
        Ok(())
    }

    async fn save_answers(&self, id: &str, answers: Vec<AnswerSegment>) -> Result<(), PipelineError> {
        let mut guard = self.inner.write().await;
        let submission = guard
            .get_mut(id)
            .ok_or_else(|| PipelineError::SubmissionNotFound(id.to_string()))?;
        submission.answers = answers;
        Ok(())
    }

    async fn save_grade(&self, grade: FinalGrade) -> Result<(), PipelineError> {
        let key = (grade.submission_id.clone(), grade.question_id.clone());
        self.grades.write().await.insert(key, grade);
        Ok(())
    }

    async fn get_grade(
        &self,
        submission_id: &str,
        question_id: &str,
    ) -> Result<Option<FinalGrade>, PipelineError> {
        let key = (submission_id.to_string(), question_id.to_string());
        Ok(self.grades.read().await.get(&key).cloned())
    }

    async fn list_grades(&self, submission_id: &str) -> Result<Vec<FinalGrade>, PipelineError> {
        Ok(self
            .grades
            .read()
            .await
            .values()
            .filter(|g| g.submission_id == submission_id)
            .cloned()
            .collect())
    }

    async fn save_escalation(&self, case: EscalationCase) -> Result<(), PipelineError> {
        self.escalations.write().await.insert(case.id.clone(), case);
        Ok(())
    }

    async fn list_pending_reviews(&self, tenant_id: &str) -> Result<Vec<Submission>, PipelineError> {
        let submissions = self.inner.read().await;
        let grades = self.grades.read().await;
        Ok(submissions
            .values()
            .filter(|s| s.tenant_id == tenant_id)
            .filter(|s| {
                grades
                    .values()
                    .any(|g| g.submission_id == s.id && g.status == GradeStatus::Review)
            })
            .cloned()
            .collect())
    }

    async fn sweep_stuck(&self) -> Result<Vec<String>, PipelineError> {
        let mut guard = self.inner.write().await;
        let mut swept = Vec::new();
        for submission in guard.values_mut() {
            if !submission.processing_status.is_terminal() {
                warn!(
                    submission_id = %submission.id,
                    status = ?submission.processing_status,
                    "sweeping stuck submission to failed on startup"
                );
                submission.processing_status = ProcessingStatus::Failed;
                swept.push(submission.id.clone());
            }
        }
        Ok(swept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Page;

    fn new_submission() -> Submission {
        Submission::new(
            "tenant-1".into(),
            "exam-1".into(),
            "student-1".into(),
            vec![Page {
                page_index: 0,
                image_key: "key-0".into(),
            }],
        )
    }

    #[tokio::test]
    async fn test_update_status_rejects_non_forward_transition() {
        let store = InMemorySubmissionStore::new();
        let submission = new_submission();
        let id = submission.id.clone();
        store.create(submission).await.unwrap();

        store
            .update_status(&id, ProcessingStatus::OcrProcessing)
            .await
            .unwrap();

        let result = store.update_status(&id, ProcessingStatus::Queued).await;
        assert!(matches!(result, Err(PipelineError::StatusNotApplied)));
    }

    #[tokio::test]
    async fn test_update_status_rejects_tie_rank() {
        let store = InMemorySubmissionStore::new();
        let submission = new_submission();
        let id = submission.id.clone();
        store.create(submission).await.unwrap();

        store
            .update_status(&id, ProcessingStatus::OcrProcessing)
            .await
            .unwrap();
        store.update_status(&id, ProcessingStatus::OcrDone).await.unwrap();

        let result = store.update_status(&id, ProcessingStatus::OcrFailed).await;
        assert!(matches!(result, Err(PipelineError::StatusNotApplied)));
    }

    #[tokio::test]
    async fn test_sweep_stuck_forces_failed() {
        let store = InMemorySubmissionStore::new();
        let submission = new_submission();
        let id = submission.id.clone();
        store.create(submission).await.unwrap();
        store
            .update_status(&id, ProcessingStatus::OcrProcessing)
            .await
            .unwrap();

        let swept = store.sweep_stuck().await.unwrap();
        assert_eq!(swept, vec![id.clone()]);
        assert_eq!(store.get(&id).await.unwrap().processing_status, ProcessingStatus::Failed);
    }

    #[tokio::test]
    async fn test_get_missing_submission_errors() {
        let store = InMemorySubmissionStore::new();
        let result = store.get("nonexistent").await;
        assert!(matches!(result, Err(PipelineError::SubmissionNotFound(_))));
    }

    fn grade(submission_id: &str, question_id: &str, status: GradeStatus) -> FinalGrade {
        FinalGrade {
            id: uuid::Uuid::new_v4().to_string(),
            submission_id: submission_id.to_string(),
            question_id: question_id.to_string(),
            final_score: 8.0,
            ai_score: Some(8.0),
            teacher_score: None,
            max_score: 10.0,
            confidence: 0.9,
            reasoning: "test".to_string(),
            status,
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_save_grade_upserts_on_submission_and_question() {
        let store = InMemorySubmissionStore::new();
        store
            .save_grade(grade("sub-1", "q1", GradeStatus::AutoGraded))
            .await
            .unwrap();
        store
            .save_grade(grade("sub-1", "q1", GradeStatus::Review))
            .await
            .unwrap();

        let grades = store.list_grades("sub-1").await.unwrap();
        assert_eq!(grades.len(), 1);
        assert_eq!(grades[0].status, GradeStatus::Review);
    }

    #[tokio::test]
    async fn test_list_pending_reviews_filters_by_tenant_and_review_status() {
        let store = InMemorySubmissionStore::new();
        let mut reviewed = new_submission();
        reviewed.tenant_id = "tenant-1".into();
        let reviewed_id = reviewed.id.clone();
        store.create(reviewed).await.unwrap();
        store
            .save_grade(grade(&reviewed_id, "q1", GradeStatus::Review))
            .await
            .unwrap();

        let mut auto_graded = new_submission();
        auto_graded.tenant_id = "tenant-1".into();
        let auto_graded_id = auto_graded.id.clone();
        store.create(auto_graded).await.unwrap();
        store
            .save_grade(grade(&auto_graded_id, "q1", GradeStatus::AutoGraded))
            .await
            .unwrap();

        let mut other_tenant = new_submission();
        other_tenant.tenant_id = "tenant-2".into();
        let other_tenant_id = other_tenant.id.clone();
        store.create(other_tenant).await.unwrap();
        store
            .save_grade(grade(&other_tenant_id, "q1", GradeStatus::Review))
            .await
            .unwrap();

        let pending = store.list_pending_reviews("tenant-1").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, reviewed_id);
    }
}

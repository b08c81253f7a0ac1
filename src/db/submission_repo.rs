use async_trait::async_trait;
use bson::doc;
use mongodb::Collection;

use crate::db::MongoClient;
use crate::error::PipelineError;
use crate::store::SubmissionRepository;
use crate::types::{AnswerSegment, EscalationCase, FinalGrade, GradeStatus, OcrResult, ProcessingStatus, Submission};

fn storage_err(e: mongodb::error::Error) -> PipelineError {
    PipelineError::Storage(e.to_string())
}

fn bson_err(e: bson::ser::Error) -> PipelineError {
    PipelineError::Storage(e.to_string())
}

/// Mongo-backed `SubmissionRepository` (spec.md §9's DB-side CASE-expression
/// resolution for `update_status`). Grounded on `db::GradeRepository`'s
/// typed-`Collection<T>` + `bson::to_document`/`bson::to_bson` idiom,
/// generalized from one job-status document to the pipeline's three
/// collections (`submissions`, `grades`, `escalations`). `update_status`
/// does the compare-and-set the `RwLock` in-memory store gets for free by
/// filtering on the previously-read status and treating zero `modified_count`
/// as a lost race, not an error, the same "no-op is not a failure" contract
/// spec.md §4.1 describes.
pub struct MongoSubmissionRepository {
    client: MongoClient,
}

impl MongoSubmissionRepository {
    pub fn new(client: MongoClient) -> Self {
        Self { client }
    }

    fn submissions(&self) -> Collection<Submission> {
        self.client.database().collection("submissions")
    }

    fn grades(&self) -> Collection<FinalGrade> {
        self.client.database().collection("grades")
    }

    fn escalations(&self) -> Collection<EscalationCase> {
        self.client.database().collection("escalations")
    }
}

#[async_trait]
impl SubmissionRepository for MongoSubmissionRepository {
    async fn create(&self, submission: Submission) -> Result<(), PipelineError> {
        self.submissions()
            .insert_one(&submission)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Submission, PipelineError> {
        self.submissions()
            .find_one(doc! { "id": id })
            .await
            .map_err(storage_err)?
            .ok_or_else(|| PipelineError::SubmissionNotFound(id.to_string()))
    }

    async fn update_status(&self, id: &str, status: ProcessingStatus) -> Result<(), PipelineError> {
        let current = self.get(id).await?;
        if status.rank() <= current.processing_status.rank() {
            return Err(PipelineError::StatusNotApplied);
        }

        let current_bson = bson::to_bson(&current.processing_status).map_err(bson_err)?;
        let next_bson = bson::to_bson(&status).map_err(bson_err)?;

        let result = self
            .submissions()
            .update_one(
                doc! { "id": id, "processing_status": current_bson },
                doc! { "$set": { "processing_status": next_bson } },
            )
            .await
            .map_err(storage_err)?;

        if result.modified_count == 0 {
            return Err(PipelineError::StatusNotApplied);
        }
        Ok(())
    }

    async fn save_ocr_result(&self, id: &str, result: OcrResult) -> Result<(), PipelineError> {
        let mut submission = self.get(id).await?;
        submission.ocr_results.retain(|r| r.page_index != result.page_index);
        submission.ocr_results.push(result);
        let results_bson = bson::to_bson(&submission.ocr_results).map_err(bson_err)?;

        self.submissions()
            .update_one(doc! { "id": id }, doc! { "$set": { "ocr_results": results_bson } })
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn save_answers(&self, id: &str, answers: Vec<AnswerSegment>) -> Result<(), PipelineError> {
        let answers_bson = bson::to_bson(&answers).map_err(bson_err)?;
        self.submissions()
            .update_one(doc! { "id": id }, doc! { "$set": { "answers": answers_bson } })
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn save_grade(&self, grade: FinalGrade) -> Result<(), PipelineError> {
        self.grades()
            .replace_one(
                doc! { "submission_id": &grade.submission_id, "question_id": &grade.question_id },
                &grade,
            )
            .upsert(true)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn get_grade(
        &self,
        submission_id: &str,
        question_id: &str,
    ) -> Result<Option<FinalGrade>, PipelineError> {
        self.grades()
            .find_one(doc! { "submission_id": submission_id, "question_id": question_id })
            .await
            .map_err(storage_err)
    }

    async fn list_grades(&self, submission_id: &str) -> Result<Vec<FinalGrade>, PipelineError> {
        use futures::stream::TryStreamExt;
        self.grades()
            .find(doc! { "submission_id": submission_id })
            .await
            .map_err(storage_err)?
            .try_collect()
            .await
            .map_err(storage_err)
    }

    async fn save_escalation(&self, case: EscalationCase) -> Result<(), PipelineError> {
        self.escalations()
            .replace_one(doc! { "id": &case.id }, &case)
            .upsert(true)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn list_pending_reviews(&self, tenant_id: &str) -> Result<Vec<Submission>, PipelineError> {
        use futures::stream::TryStreamExt;

        let submissions: Vec<Submission> = self
            .submissions()
            .find(doc! { "tenant_id": tenant_id })
            .await
            .map_err(storage_err)?
            .try_collect()
            .await
            .map_err(storage_err)?;

        let review_status = bson::to_bson(&GradeStatus::Review).map_err(bson_err)?;
        let reviewed_grades: Vec<FinalGrade> = self
            .grades()
            .find(doc! { "status": review_status })
            .await
            .map_err(storage_err)?
            .try_collect()
            .await
            .map_err(storage_err)?;

        Ok(submissions
            .into_iter()
            .filter(|s| reviewed_grades.iter().any(|g| g.submission_id == s.id))
            .collect())
    }

    async fn sweep_stuck(&self) -> Result<Vec<String>, PipelineError> {
        use futures::stream::TryStreamExt;

        let in_flight_statuses: Vec<bson::Bson> = [ProcessingStatus::OcrProcessing, ProcessingStatus::Grading]
            .iter()
            .map(|s| bson::to_bson(s).map_err(bson_err))
            .collect::<Result<_, _>>()?;

        let stuck: Vec<Submission> = self
            .submissions()
            .find(doc! { "processing_status": { "$in": in_flight_statuses } })
            .await
            .map_err(storage_err)?
            .try_collect()
            .await
            .map_err(storage_err)?;

        let failed_bson = bson::to_bson(&ProcessingStatus::Failed).map_err(bson_err)?;
        self.submissions()
            .update_many(
                doc! { "id": { "$in": stuck.iter().map(|s| s.id.clone()).collect::<Vec<_>>() } },
                doc! { "$set": { "processing_status": failed_bson } },
            )
            .await
            .map_err(storage_err)?;

        Ok(stuck.into_iter().map(|s| s.id).collect())
    }
}

use actix_web::{web, Responder};
use actix_web_lab::sse::{self, Event, Sse};
use futures::stream::StreamExt;
use std::time::Duration;

use crate::error::ApiError;
use crate::pipeline::PipelineService;
use crate::types::{
    CreateExamRequest, CreateSubmissionRequest, CreateSubmissionResponse, Exam, FeedbackRequest,
    PendingReviewsResponse, SubmissionEvent, SubmissionResponse,
};

pub async fn health() -> impl Responder {
    web::Json(serde_json::json!({"status": "ok"}))
}

pub async fn create_exam(
    body: web::Json<CreateExamRequest>,
    pipeline: web::Data<PipelineService>,
) -> Result<impl Responder, ApiError> {
    let exam: Exam = body.into_inner().into();
    pipeline.create_exam(exam.clone()).await?;
    Ok(web::Json(serde_json::json!({"exam_id": exam.id})))
}

pub async fn create_submission(
    body: web::Json<CreateSubmissionRequest>,
    pipeline: web::Data<PipelineService>,
) -> Result<impl Responder, ApiError> {
    let request = body.into_inner();

    if request.pages.is_empty() {
        return Err(ApiError::BadRequest("pages cannot be empty".to_string()));
    }

    let pages = request.pages.into_iter().map(Into::into).collect();
    let submission_id = pipeline
        .create_submission(request.tenant_id, request.exam_id, request.student_id, pages)
        .await?;

    let submission = pipeline.get_submission(&submission_id).await?;
    Ok(web::Json(CreateSubmissionResponse {
        submission_id,
        status: submission.processing_status,
    }))
}

pub async fn get_submission(
    path: web::Path<String>,
    pipeline: web::Data<PipelineService>,
) -> Result<impl Responder, ApiError> {
    let submission_id = path.into_inner();

    let submission = pipeline
        .get_submission(&submission_id)
        .await
        .map_err(|_| ApiError::NotFound(format!("submission {} not found", submission_id)))?;
    let grades = pipeline.list_grades(&submission_id).await?;

    Ok(web::Json(SubmissionResponse { submission, grades }))
}

pub async fn stream_submission(
    path: web::Path<String>,
    pipeline: web::Data<PipelineService>,
) -> Result<impl Responder, ApiError> {
    let submission_id = path.into_inner();

    // Subscribing never fails on a missing submission_id (the event bus
    // lazily opens a channel per id), so check existence up front.
    pipeline
        .get_submission(&submission_id)
        .await
        .map_err(|_| ApiError::NotFound(format!("submission {} not found", submission_id)))?;

    let receiver = pipeline.subscribe(&submission_id).await;
    let stream = tokio_stream::wrappers::BroadcastStream::new(receiver).filter_map(|result| async move {
        match result {
            Ok(event) => {
                let data = serde_json::to_string(&event).ok()?;
                Some(Ok::<_, std::convert::Infallible>(Event::Data(
                    sse::Data::new(data),
                )))
            }
            Err(_) => None,
        }
    });

    let connected = futures::stream::once(async {
        let data = serde_json::to_string(&SubmissionEvent::Connected).unwrap();
        Ok::<_, std::convert::Infallible>(Event::Data(sse::Data::new(data)))
    });

    Ok(Sse::from_stream(connected.chain(stream)).with_keep_alive(Duration::from_secs(15)))
}

pub async fn retrigger_grading(
    path: web::Path<String>,
    pipeline: web::Data<PipelineService>,
) -> Result<impl Responder, ApiError> {
    let submission_id = path.into_inner();
    pipeline.retrigger_grading(&submission_id).await?;
    Ok(web::Json(serde_json::json!({"status": "retriggered"})))
}

pub async fn list_pending_reviews(
    path: web::Path<String>,
    pipeline: web::Data<PipelineService>,
) -> Result<impl Responder, ApiError> {
    let tenant_id = path.into_inner();
    let submissions = pipeline.list_pending_reviews(&tenant_id).await?;
    Ok(web::Json(PendingReviewsResponse { submissions }))
}

pub async fn submit_feedback(
    path: web::Path<(String, String)>,
    body: web::Json<FeedbackRequest>,
    pipeline: web::Data<PipelineService>,
) -> Result<impl Responder, ApiError> {
    let (submission_id, question_id) = path.into_inner();
    let request = body.into_inner();

    let feedback = pipeline
        .submit_feedback(&submission_id, &question_id, request.teacher_score, request.teacher_reason)
        .await?;

    Ok(web::Json(feedback))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(health))
            .route("/exams", web::post().to(create_exam))
            .route("/submissions", web::post().to(create_submission))
            .route("/submissions/{id}", web::get().to(get_submission))
            .route("/submissions/{id}/stream", web::get().to(stream_submission))
            .route("/submissions/{id}/retrigger", web::post().to(retrigger_grading))
            .route(
                "/submissions/{submission_id}/questions/{question_id}/feedback",
                web::post().to(submit_feedback),
            )
            .route("/tenants/{tenant_id}/pending-reviews", web::get().to(list_pending_reviews)),
    );
}

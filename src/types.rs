use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::PipelineError;

/// Forward-only processing status for a submission. Ranks are defined by
/// [`ProcessingStatus::rank`]; the store rejects any transition whose
/// target rank is not strictly greater than the current rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Queued,
    OcrProcessing,
    OcrDone,
    OcrFailed,
    OcrTimeout,
    Grading,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn rank(self) -> u8 {
        match self {
            Self::Queued => 1,
            Self::OcrProcessing => 2,
            Self::OcrDone | Self::OcrFailed | Self::OcrTimeout => 3,
            Self::Grading => 4,
            Self::Completed | Self::Failed => 5,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 5
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub page_index: u32,
    pub image_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrResult {
    pub page_index: u32,
    pub raw_text: String,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrected_text: Option<String>,
}

pub const OCR_UNAVAILABLE_SENTINEL: &str = "OCR Unavailable: Processing failed.";

impl OcrResult {
    /// The per-page placeholder inserted when a single page's provider call
    /// fails terminally, so one bad page doesn't fail the whole submission.
    pub fn sentinel(page_index: u32) -> Self {
        Self {
            page_index,
            raw_text: OCR_UNAVAILABLE_SENTINEL.to_string(),
            confidence: 0.0,
            corrected_text: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerSegment {
    pub id: String,
    pub submission_id: String,
    pub question_id: String,
    pub text: String,
    pub page_indices: Vec<u32>,
    pub diagram_refs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: String,
    pub tenant_id: String,
    pub exam_id: String,
    pub student_id: String,
    pub uploaded_at: chrono::DateTime<chrono::Utc>,
    pub processing_status: ProcessingStatus,
    pub pages: Vec<Page>,
    pub ocr_results: Vec<OcrResult>,
    pub answers: Vec<AnswerSegment>,
}

impl Submission {
    pub fn new(tenant_id: String, exam_id: String, student_id: String, pages: Vec<Page>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id,
            exam_id,
            student_id,
            uploaded_at: chrono::Utc::now(),
            processing_status: ProcessingStatus::Queued,
            pages,
            ocr_results: Vec::new(),
            answers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullCreditCriterion {
    pub id: String,
    pub description: String,
    pub points: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialCreditRule {
    pub id: String,
    pub points: f32,
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommonMistake {
    pub id: String,
    pub description: String,
    pub penalty: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rubric {
    pub full_credit_criteria: Vec<FullCreditCriterion>,
    pub partial_credit_rules: Vec<PartialCreditRule>,
    pub common_mistakes: Vec<CommonMistake>,
}

impl Rubric {
    /// Validates the two structural invariants spec.md places on a rubric:
    /// every `dependencies` entry names a criterion that exists, and the
    /// three ID spaces (criteria, rules, mistakes) are collision-free when
    /// unioned, since `criteria_met` addresses all three through one flat
    /// set of strings.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let criterion_ids: HashSet<&str> = self
            .full_credit_criteria
            .iter()
            .map(|c| c.id.as_str())
            .collect();

        for rule in &self.partial_credit_rules {
            for dep in &rule.dependencies {
                if !criterion_ids.contains(dep.as_str()) {
                    return Err(PipelineError::InvalidRubric(format!(
                        "rule {} depends on unknown criterion {}",
                        rule.id, dep
                    )));
                }
            }
        }

        let mut seen = HashSet::new();
        for id in criterion_ids
            .iter()
            .copied()
            .chain(self.partial_credit_rules.iter().map(|r| r.id.as_str()))
            .chain(self.common_mistakes.iter().map(|m| m.id.as_str()))
        {
            if !seen.insert(id) {
                return Err(PipelineError::InvalidRubric(format!(
                    "id {} is not unique across criteria/rules/mistakes",
                    id
                )));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub question_text: String,
    pub points: f32,
    pub rubric: Option<Rubric>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exam {
    pub id: String,
    pub tenant_id: String,
    pub title: String,
    pub subject: String,
    pub questions: Vec<Question>,
}

impl Exam {
    pub fn question(&self, question_id: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == question_id)
    }
}

/// A single evaluator persona's verdict on one answer, before rubric
/// rescoring replaces `score` with the deterministic recomputation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingResult {
    pub evaluator_id: String,
    pub score: f32,
    pub max_score: f32,
    pub confidence: f32,
    pub criteria_met: Vec<String>,
    pub reasoning: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradeStatus {
    Pending,
    AutoGraded,
    Review,
    Overridden,
    Final,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalGrade {
    pub id: String,
    pub submission_id: String,
    pub question_id: String,
    pub final_score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teacher_score: Option<f32>,
    pub max_score: f32,
    pub confidence: f32,
    pub reasoning: String,
    pub status: GradeStatus,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStatus {
    Pending,
    Resolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationCase {
    pub id: String,
    pub submission_id: String,
    pub question_id: String,
    pub all_evaluations: Vec<GradingResult>,
    pub variance: f32,
    pub escalated_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    pub status: EscalationStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    System,
    Ai,
    Human,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub event_type: String,
    pub actor_type: ActorType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    pub changes: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub hash: String,
    pub prev_hash: String,
}

/// A teacher's correction of an AI-produced grade. Append-only; this crate
/// only captures the data, per spec.md's "out of scope" boundary around the
/// refinement loop itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEvent {
    pub id: String,
    pub question_id: String,
    pub submission_id: String,
    pub ai_score: f32,
    pub teacher_score: f32,
    pub delta: f32,
    pub ai_reasoning: String,
    pub teacher_reason: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Live status-stream frames emitted by the Event Bus (§4.6), one per
/// submission status transition, plus the initial handshake frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubmissionEvent {
    Connected,
    StatusChanged {
        status: ProcessingStatus,
        message: String,
    },
    GradeRecorded {
        question_id: String,
        final_score: f32,
        status: GradeStatus,
    },
    Escalated {
        question_id: String,
        variance: f32,
    },
}

// --- HTTP request/response DTOs (out of scope per spec.md §1, kept thin
// so the core types above stay the wire format teachers and the pipeline
// both read) ---

#[derive(Debug, Clone, Deserialize)]
pub struct PageInput {
    pub page_index: u32,
    pub image_key: String,
}

impl From<PageInput> for Page {
    fn from(input: PageInput) -> Self {
        Page {
            page_index: input.page_index,
            image_key: input.image_key,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSubmissionRequest {
    pub tenant_id: String,
    pub exam_id: String,
    pub student_id: String,
    pub pages: Vec<PageInput>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateSubmissionResponse {
    pub submission_id: String,
    pub status: ProcessingStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmissionResponse {
    pub submission: Submission,
    pub grades: Vec<FinalGrade>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateExamRequest {
    pub id: String,
    pub tenant_id: String,
    pub title: String,
    pub subject: String,
    pub questions: Vec<Question>,
}

impl From<CreateExamRequest> for Exam {
    fn from(request: CreateExamRequest) -> Self {
        Exam {
            id: request.id,
            tenant_id: request.tenant_id,
            title: request.title,
            subject: request.subject,
            questions: request.questions,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedbackRequest {
    pub teacher_score: f32,
    pub teacher_reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingReviewsResponse {
    pub submissions: Vec<Submission>,
}

pub mod gemini;

use async_trait::async_trait;

use crate::error::LlmError;

/// One evaluator persona's request to grade a single answer. Mirrors
/// `ai::graders::GradeContext` in shape (task + submitted content), but
/// carries the rubric and persona framing the exam-grading domain needs
/// instead of a repo diff.
#[derive(Debug, Clone)]
pub struct EvaluationRequest {
    pub question_text: String,
    pub rubric_summary: String,
    pub answer_text: String,
    pub subject_bias: String,
}

#[derive(Debug, Clone)]
pub struct EvaluationResponse {
    pub score: f32,
    pub confidence: f32,
    pub criteria_met: Vec<String>,
    pub reasoning: String,
}

/// The seam an evaluator persona calls through. `system_prompt` and
/// `temperature` are supplied per-call so one client instance serves all
/// three personas in the registry.
#[async_trait]
pub trait LlmEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        request: &EvaluationRequest,
        system_prompt: &str,
        temperature: f32,
    ) -> Result<EvaluationResponse, LlmError>;
}

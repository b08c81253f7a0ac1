pub mod personas;
pub mod scorer;

use std::sync::Arc;

use futures::future::join_all;
use serde_json::json;
use tracing::{info, warn};

use crate::audit::{AuditEntry, AuditStore};
use crate::error::PipelineError;
use crate::event_bus::EventBus;
use crate::llm::{EvaluationRequest, LlmEvaluator};
use crate::store::SubmissionRepository;
use crate::types::{
    ActorType, AnswerSegment, EscalationCase, EscalationStatus, Exam, FinalGrade, GradeStatus,
    GradingResult, ProcessingStatus, Submission, SubmissionEvent,
};

/// `should_escalate = variance > 0.15·max_score OR confidence < 0.7` (spec §4.4 step 5).
const VARIANCE_ESCALATION_FACTOR: f32 = 0.15;
const CONFIDENCE_ESCALATION_THRESHOLD: f32 = 0.7;

pub struct GradingEngine {
    store: Arc<dyn SubmissionRepository>,
    audit: Arc<dyn AuditStore>,
    events: Arc<EventBus>,
    evaluator: Arc<dyn LlmEvaluator>,
}

impl GradingEngine {
    pub fn new(
        store: Arc<dyn SubmissionRepository>,
        audit: Arc<dyn AuditStore>,
        events: Arc<EventBus>,
        evaluator: Arc<dyn LlmEvaluator>,
    ) -> Self {
        Self {
            store,
            audit,
            events,
            evaluator,
        }
    }

    /// Top-level per-submission orchestration, grounded on
    /// `GradingService.GradeSubmission` in the original implementation:
    /// fetch the submission, resolve its answers, grade each one, then
    /// advance the submission to `completed`.
    pub async fn grade_submission(
        &self,
        submission_id: &str,
        exam: &Exam,
    ) -> Result<(), PipelineError> {
        let submission = self.store.get(submission_id).await?;

        let answers = self.resolve_answers(&submission, exam);
        if answers.is_empty() {
            warn!(submission_id, "no answers to grade, no questions resolvable");
        }

        for answer in &answers {
            let Some(question) = exam.question(&answer.question_id) else {
                warn!(submission_id, question_id = %answer.question_id, "answer references unknown question, skipping");
                continue;
            };
            let Some(rubric) = &question.rubric else {
                return Err(PipelineError::MissingRubric(question.id.clone()));
            };

            let evaluations = self
                .fan_out_evaluators(&exam.subject, question, rubric, answer)
                .await?;

            let outcome = self.build_consensus(submission_id, &answer.question_id, rubric, evaluations);

            self.store.save_grade(outcome.grade.clone()).await?;

            self.audit
                .append(AuditEntry {
                    entity_type: "grade".to_string(),
                    entity_id: outcome.grade.id.clone(),
                    event_type: "ai_graded".to_string(),
                    actor_type: ActorType::Ai,
                    actor_id: None,
                    changes: json!({
                        "final_score": outcome.grade.final_score,
                        "status": outcome.grade.status,
                    }),
                })
                .await?;

            self.events
                .publish(
                    submission_id,
                    SubmissionEvent::GradeRecorded {
                        question_id: answer.question_id.clone(),
                        final_score: outcome.grade.final_score,
                        status: outcome.grade.status,
                    },
                )
                .await;

            if outcome.should_escalate {
                let case = EscalationCase {
                    id: uuid::Uuid::new_v4().to_string(),
                    submission_id: submission_id.to_string(),
                    question_id: answer.question_id.clone(),
                    all_evaluations: outcome.evaluations.clone(),
                    variance: outcome.variance,
                    escalated_at: chrono::Utc::now(),
                    assigned_to: None,
                    status: EscalationStatus::Pending,
                };
                self.store.save_escalation(case).await?;

                self.events
                    .publish(
                        submission_id,
                        SubmissionEvent::Escalated {
                            question_id: answer.question_id.clone(),
                            variance: outcome.variance,
                        },
                    )
                    .await;
            }

            info!(submission_id, question_id = %answer.question_id, score = outcome.grade.final_score, "graded answer");
        }

        self.store
            .update_status(submission_id, ProcessingStatus::Completed)
            .await
            .or_else(|e| match e {
                PipelineError::StatusNotApplied => Ok(()),
                other => Err(other),
            })?;

        self.audit
            .append(AuditEntry {
                entity_type: "submission".to_string(),
                entity_id: submission_id.to_string(),
                event_type: "completed".to_string(),
                actor_type: ActorType::System,
                actor_id: None,
                changes: json!({ "status": "completed" }),
            })
            .await?;

        self.events
            .publish(
                submission_id,
                SubmissionEvent::StatusChanged {
                    status: ProcessingStatus::Completed,
                    message: "grading complete".to_string(),
                },
            )
            .await;

        Ok(())
    }

    /// If `answers` is empty but OCR text exists, synthesize one answer for
    /// the first question from all page text concatenated. This is the
    /// fallback spec §4.4 requires so an `ocr_timeout` submission still
    /// gets graded.
    fn resolve_answers(&self, submission: &Submission, exam: &Exam) -> Vec<AnswerSegment> {
        if !submission.answers.is_empty() {
            return submission.answers.clone();
        }
        if submission.ocr_results.is_empty() {
            return Vec::new();
        }
        let Some(first_question) = exam.questions.first() else {
            return Vec::new();
        };

        let mut ordered = submission.ocr_results.clone();
        ordered.sort_by_key(|r| r.page_index);
        let text = ordered
            .iter()
            .map(|r| r.raw_text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        vec![AnswerSegment {
            id: uuid::Uuid::new_v4().to_string(),
            submission_id: submission.id.clone(),
            question_id: first_question.id.clone(),
            text,
            page_indices: ordered.iter().map(|r| r.page_index).collect(),
            diagram_refs: Vec::new(),
        }]
    }

    /// Launches all three evaluator personas concurrently and waits for all
    /// to complete, failing fast if any errors terminally. This is the
    /// structured concurrency shape spec §9 calls for, replacing the
    /// original implementation's sequential loop (mislabeled "parallel
    /// evaluation").
    async fn fan_out_evaluators(
        &self,
        subject: &str,
        question: &crate::types::Question,
        rubric: &crate::types::Rubric,
        answer: &AnswerSegment,
    ) -> Result<Vec<GradingResult>, PipelineError> {
        let subject_bias = personas::subject_bias(subject);
        let rubric_summary = serde_json::to_string(rubric).unwrap_or_default();

        let calls = personas::EVALUATOR_REGISTRY.iter().map(|profile| {
            let request = EvaluationRequest {
                question_text: question.question_text.clone(),
                rubric_summary: rubric_summary.clone(),
                answer_text: answer.text.clone(),
                subject_bias: subject_bias.to_string(),
            };
            let evaluator = self.evaluator.clone();
            async move {
                evaluator
                    .evaluate(&request, profile.system_prompt, profile.temperature)
                    .await
                    .map(|response| (profile.id, response))
            }
        });

        let outcomes = join_all(calls).await;

        let mut evaluations = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            let (evaluator_id, response) = outcome?;
            let (rescored_score, applied) = scorer::score(rubric, &response.criteria_met);
            let max_score: f32 = rubric
                .full_credit_criteria
                .iter()
                .map(|c| c.points)
                .sum::<f32>()
                + rubric.partial_credit_rules.iter().map(|r| r.points).sum::<f32>();

            evaluations.push(GradingResult {
                evaluator_id: evaluator_id.to_string(),
                score: rescored_score,
                max_score,
                confidence: response.confidence,
                criteria_met: applied,
                reasoning: response.reasoning,
            });
        }

        Ok(evaluations)
    }

    /// Consensus math from spec §4.4 steps 4-6: computes the population
    /// variance across evaluator scores, folds it into a variance-penalized
    /// confidence, and reduces the scores to a confidence-weighted mean.
    fn build_consensus(
        &self,
        submission_id: &str,
        question_id: &str,
        _rubric: &crate::types::Rubric,
        evaluations: Vec<GradingResult>,
    ) -> ConsensusOutcome {
        let n = evaluations.len() as f32;
        let max_score = evaluations.first().map(|r| r.max_score).unwrap_or(0.0);

        let mean = evaluations.iter().map(|r| r.score).sum::<f32>() / n.max(1.0);
        let variance = if evaluations.len() < 2 {
            0.0
        } else {
            evaluations.iter().map(|r| (r.score - mean).powi(2)).sum::<f32>() / n
        };
        let avg_self_confidence = evaluations.iter().map(|r| r.confidence).sum::<f32>() / n.max(1.0);
        let variance_penalty = (1.0 - variance / 10.0).max(0.0);
        let confidence = 0.6 * avg_self_confidence + 0.4 * variance_penalty;

        let confidence_sum: f32 = evaluations.iter().map(|r| r.confidence).sum();
        let consensus = if confidence_sum > 0.0 {
            evaluations.iter().map(|r| r.score * r.confidence).sum::<f32>() / confidence_sum
        } else {
            0.0
        };

        let should_escalate =
            variance > VARIANCE_ESCALATION_FACTOR * max_score || confidence < CONFIDENCE_ESCALATION_THRESHOLD;

        let reasoning = if variance < 1.0 {
            format!("All evaluators agree (variance: {:.2}). High confidence in consensus.", variance)
        } else if confidence < CONFIDENCE_ESCALATION_THRESHOLD {
            "Low overall confidence due to high variance between evaluators. Escalating for review.".to_string()
        } else {
            format!("Moderate variance ({:.2}). Consensus reached through weighted average.", variance)
        };

        let status = if should_escalate {
            GradeStatus::Review
        } else {
            GradeStatus::AutoGraded
        };

        let grade = FinalGrade {
            id: uuid::Uuid::new_v4().to_string(),
            submission_id: submission_id.to_string(),
            question_id: question_id.to_string(),
            final_score: consensus,
            ai_score: Some(consensus),
            teacher_score: None,
            max_score,
            confidence,
            reasoning,
            status,
            updated_at: chrono::Utc::now(),
        };

        ConsensusOutcome {
            grade,
            should_escalate,
            variance,
            evaluations,
        }
    }
}

/// Everything the caller needs after consensus: the persisted grade, the
/// escalation decision, and (only used when escalating) the raw variance
/// and evaluator outputs an [`EscalationCase`] records.
struct ConsensusOutcome {
    grade: FinalGrade,
    should_escalate: bool,
    variance: f32,
    evaluations: Vec<GradingResult>,
}

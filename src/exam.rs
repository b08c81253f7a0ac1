use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::PipelineError;
use crate::types::Exam;

/// Persistence seam for exams/questions/rubrics (spec.md §3). Out of scope
/// per spec.md's external-collaborator boundary beyond the grading engine's
/// read access; this crate only needs `create`/`get`, the way a real
/// curriculum-authoring service would sit behind this same trait.
#[async_trait]
pub trait ExamRepository: Send + Sync {
    async fn create(&self, exam: Exam) -> Result<(), PipelineError>;
    async fn get(&self, id: &str) -> Result<Exam, PipelineError>;
}

pub struct InMemoryExamStore {
    inner: RwLock<HashMap<String, Exam>>,
}

impl InMemoryExamStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl ExamRepository for InMemoryExamStore {
    async fn create(&self, exam: Exam) -> Result<(), PipelineError> {
        for question in &exam.questions {
            if let Some(rubric) = &question.rubric {
                rubric.validate()?;
            }
        }
        self.inner.write().await.insert(exam.id.clone(), exam);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Exam, PipelineError> {
        self.inner
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| PipelineError::Storage(format!("exam {} not found", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FullCreditCriterion, Question, Rubric};

    fn sample_exam() -> Exam {
        Exam {
            id: "exam-1".into(),
            tenant_id: "tenant-1".into(),
            title: "Midterm".into(),
            subject: "mathematics".into(),
            questions: vec![Question {
                id: "q1".into(),
                question_text: "What is 2+2?".into(),
                points: 5.0,
                rubric: Some(Rubric {
                    full_credit_criteria: vec![FullCreditCriterion {
                        id: "c1".into(),
                        description: "correct answer".into(),
                        points: 5.0,
                    }],
                    partial_credit_rules: vec![],
                    common_mistakes: vec![],
                }),
            }],
        }
    }

    #[tokio::test]
    async fn test_create_then_get_roundtrips() {
        let store = InMemoryExamStore::new();
        store.create(sample_exam()).await.unwrap();
        let exam = store.get("exam-1").await.unwrap();
        assert_eq!(exam.title, "Midterm");
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_rubric() {
        let store = InMemoryExamStore::new();
        let mut exam = sample_exam();
        exam.questions[0].rubric.as_mut().unwrap().partial_credit_rules.push(
            crate::types::PartialCreditRule {
                id: "r1".into(),
                points: 1.0,
                dependencies: vec!["missing".into()],
            },
        );
        let result = store.create(exam).await;
        assert!(matches!(result, Err(PipelineError::InvalidRubric(_))));
    }

    #[tokio::test]
    async fn test_get_missing_exam_errors() {
        let store = InMemoryExamStore::new();
        let result = store.get("nonexistent").await;
        assert!(result.is_err());
    }
}

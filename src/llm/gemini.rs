use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::json_extract::extract_json;
use crate::llm::{EvaluationRequest, EvaluationResponse, LlmEvaluator};

const GEMINI_MODEL: &str = "gemini-1.5-flash";

/// Evaluator-persona-facing Gemini client. Grounded on the REST shape of
/// `ai/gemini/client.go::Grade` in the original implementation, rebuilt on
/// `reqwest` the way `llm/anthropic.rs` talks to its provider rather than
/// through a provider SDK, since this codebase has no generated Gemini
/// client to bind against.
pub struct GeminiEvaluatorClient {
    http: reqwest::Client,
    api_key: SecretString,
}

impl GeminiEvaluatorClient {
    pub fn new(api_key: SecretString, timeout_secs: u64) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self { http, api_key }
    }

    fn endpoint(&self) -> String {
        format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            GEMINI_MODEL,
            self.api_key.expose_secret()
        )
    }
}

#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct EvaluationPayload {
    score: f32,
    confidence: f32,
    #[serde(default)]
    criteria_met: Vec<String>,
    #[serde(default)]
    reasoning: String,
}

fn build_prompt(request: &EvaluationRequest, system_prompt: &str) -> String {
    format!(
        "{system}\n\n## Subject focus\n{bias}\n\n## Question\n{question}\n\n## Rubric\n{rubric}\n\n## Student answer\n{answer}\n\nRespond ONLY with JSON: {{\"score\": number, \"confidence\": 0.0-1.0, \"criteria_met\": [\"id\", ...], \"reasoning\": \"string\"}}",
        system = system_prompt,
        bias = request.subject_bias,
        question = request.question_text,
        rubric = request.rubric_summary,
        answer = request.answer_text,
    )
}

#[async_trait::async_trait]
impl LlmEvaluator for GeminiEvaluatorClient {
    async fn evaluate(
        &self,
        request: &EvaluationRequest,
        system_prompt: &str,
        temperature: f32,
    ) -> Result<EvaluationResponse, LlmError> {
        let body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: build_prompt(request, system_prompt),
                }],
            }],
            generation_config: GenerationConfig { temperature },
        };

        let response = self
            .http
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(LlmError::Network)?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimited {
                retry_after_ms: 15_000,
            });
        }
        if response.status() == reqwest::StatusCode::UNAUTHORIZED
            || response.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Err(LlmError::AuthenticationFailed(format!(
                "gemini returned {}",
                response.status()
            )));
        }
        if !response.status().is_success() {
            return Err(LlmError::Unavailable {
                provider: "gemini".to_string(),
            });
        }

        let parsed: GenerateContentResponse = response.json().await.map_err(LlmError::Network)?;
        let text = parsed
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.clone())
            .ok_or_else(|| LlmError::InvalidResponse("empty response from gemini".to_string()))?;

        let json_str = extract_json(&text);
        let payload: EvaluationPayload = serde_json::from_str(&json_str).map_err(|e| {
            tracing::warn!(error = %e, raw = %text, "failed to parse evaluator response");
            LlmError::InvalidResponse(format!("json parse error: {}", e))
        })?;

        Ok(EvaluationResponse {
            score: payload.score.max(0.0),
            confidence: payload.confidence.clamp(0.0, 1.0),
            criteria_met: payload.criteria_met,
            reasoning: payload.reasoning,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_prompt_includes_all_sections() {
        let request = EvaluationRequest {
            question_text: "What is 2+2?".to_string(),
            rubric_summary: "full credit for '4'".to_string(),
            answer_text: "four".to_string(),
            subject_bias: "favor numeric precision".to_string(),
        };
        let prompt = build_prompt(&request, "You are a strict grader.");
        assert!(prompt.contains("What is 2+2?"));
        assert!(prompt.contains("favor numeric precision"));
        assert!(prompt.contains("four"));
    }
}

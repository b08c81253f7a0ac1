use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::VisionError;
use crate::vision::{OcrExtraction, VisionProvider};

const GEMINI_MODEL: &str = "gemini-1.5-flash";
const OCR_PROMPT: &str = "Transcribe the handwritten or printed text in this exam page exactly as it appears. Do not correct spelling. Return only the transcribed text.";
const OCR_TEMPERATURE: f32 = 0.1;

/// Gemini-backed OCR transcription, one page image per call. Grounded on
/// `ocr.GeminiOCRProcessor.ExtractText`: same low-temperature transcription
/// prompt, same hardcoded confidence (Gemini's text API doesn't expose
/// token-level confidence), rebuilt on `reqwest` multipart JSON the way
/// `llm::gemini` talks to the evaluator endpoint.
pub struct GeminiVisionClient {
    http: reqwest::Client,
    api_key: SecretString,
}

/// Gemini doesn't return per-token confidence for plain text responses;
/// the original implementation defaults to a fixed value rather than
/// fabricating one, and this client keeps that choice.
const FIXED_CONFIDENCE: f32 = 0.90;

impl GeminiVisionClient {
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
#[serde(untagged)]
enum Part {
    Text { text: String },
    InlineData { #[serde(rename = "inlineData")] inline_data: InlineData },
}

#[derive(Serialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
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

#[async_trait::async_trait]
impl VisionProvider for GeminiVisionClient {
    async fn extract_text(
        &self,
        image_bytes: &[u8],
        mime_type: &str,
    ) -> Result<OcrExtraction, VisionError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image_bytes);

        let body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Text {
                        text: OCR_PROMPT.to_string(),
                    },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: mime_type.to_string(),
                            data: encoded,
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig {
                temperature: OCR_TEMPERATURE,
            },
        };

        let response = self
            .http
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(VisionError::Network)?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(VisionError::RateLimited {
                retry_after_ms: 15_000,
            });
        }
        if !response.status().is_success() {
            return Err(VisionError::Unavailable {
                provider: "gemini".to_string(),
            });
        }

        let parsed: GenerateContentResponse = response.json().await.map_err(VisionError::Network)?;
        let text = parsed
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.trim().to_string())
            .ok_or_else(|| VisionError::InvalidResponse("empty response from gemini ocr".to_string()))?;

        Ok(OcrExtraction {
            raw_text: text,
            confidence: FIXED_CONFIDENCE,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_data_serializes_with_camel_case_fields() {
        let part = Part::InlineData {
            inline_data: InlineData {
                mime_type: "image/png".to_string(),
                data: "Zm9v".to_string(),
            },
        };
        let json = serde_json::to_string(&part).unwrap();
        assert!(json.contains("\"mimeType\":\"image/png\""));
        assert!(json.contains("\"data\":\"Zm9v\""));
    }
}

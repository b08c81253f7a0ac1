/// Pulls a JSON payload out of an LLM response that may or may not be
/// wrapped in a markdown code fence. Grounded on `ai/graders.rs::extract_json`
/// in the teacher repo; used by both the evaluator and vision clients since
/// Gemini's text responses follow the same "mostly JSON, sometimes fenced"
/// shape the teacher's grader responses did.
pub fn extract_json(response: &str) -> String {
    let trimmed = response.trim();

    if let Some(start) = trimmed.find("```json") {
        if let Some(end) = trimmed[start + 7..].find("```") {
            return trimmed[start + 7..start + 7 + end].trim().to_string();
        }
    }
    if let Some(start) = trimmed.find("```") {
        if let Some(end) = trimmed[start + 3..].find("```") {
            return trimmed[start + 3..start + 3 + end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find('{') {
        if let Some(end) = trimmed.rfind('}') {
            if end > start {
                return trimmed[start..=end].to_string();
            }
        }
    }
    if let Some(start) = trimmed.find('[') {
        if let Some(end) = trimmed.rfind(']') {
            if end > start {
                return trimmed[start..=end].to_string();
            }
        }
    }

    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_raw_object() {
        let input = r#"{"score": 8, "confidence": 0.9}"#;
        assert_eq!(extract_json(input), input);
    }

    #[test]
    fn test_extract_json_markdown_fence() {
        let input = "Here is my evaluation:\n```json\n{\"score\": 8}\n```\n";
        assert_eq!(extract_json(input), r#"{"score": 8}"#);
    }

    #[test]
    fn test_extract_json_unfenced_prose_wrapper() {
        let input = "Sure, here you go: {\"score\": 5} -- hope that helps";
        assert_eq!(extract_json(input), r#"{"score": 5}"#);
    }
}

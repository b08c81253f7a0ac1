pub mod gemini;

use async_trait::async_trait;

use crate::error::VisionError;

#[derive(Debug, Clone)]
pub struct OcrExtraction {
    pub raw_text: String,
    pub confidence: f32,
}

/// The seam the OCR stage calls through for one page image. Modeled on
/// `ocr.GeminiOCRProcessor.ExtractText` in the original implementation;
/// narrowed to text-in/text-out so the stage doesn't need to know the
/// provider is multimodal.
#[async_trait]
pub trait VisionProvider: Send + Sync {
    async fn extract_text(
        &self,
        image_bytes: &[u8],
        mime_type: &str,
    ) -> Result<OcrExtraction, VisionError>;
}

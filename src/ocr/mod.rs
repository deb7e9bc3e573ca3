//! OCR engines and the helpers around them.
//!
//! ## OCR Backends
//!
//! - **Tesseract**: local binary, tried across image variants, languages
//!   and page segmentation modes (CPU)
//! - **PaddleOCR**: remote specialized OCR service, best on Vietnamese forms
//! - **Vision**: multimodal model behind an OpenAI-compatible API
//!
//! Also includes the document rasterizer, the image enhancement client and
//! post-OCR text cleanup.

mod api_backend;
mod backend;
pub mod cleanup;
mod model_utils;
mod paddle_backend;
pub mod pdf_utils;
pub mod preprocess;
mod tesseract;
mod vision;

use std::sync::Arc;

pub use backend::{
    build_ocr_result, BoundingBox, ConfidenceScale, OcrBackend, OcrBackendType, OcrError,
    OcrOutput, OcrResult,
};
pub use model_utils::check_binary;
pub use paddle_backend::PaddleBackend;
pub use tesseract::{length_confidence, TesseractBackend, Variant};
pub use vision::VisionBackend;

use crate::config::Config;

/// Construct the backend for an engine type from configuration.
pub fn build_backend(
    backend_type: OcrBackendType,
    config: &Config,
) -> Result<Arc<dyn OcrBackend>, OcrError> {
    Ok(match backend_type {
        OcrBackendType::Tesseract => Arc::new(TesseractBackend::new(config.tesseract.clone())),
        OcrBackendType::PaddleOcr => Arc::new(PaddleBackend::new(config.paddle.clone())?),
        OcrBackendType::Vision => Arc::new(VisionBackend::new(config.vision.clone())?),
    })
}

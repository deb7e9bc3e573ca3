//! OCR backend abstraction shared by every text-extraction engine.
//!
//! Supports multiple OCR backends:
//! - Tesseract: local binary, tried across a matrix of variants (CPU)
//! - PaddleOCR: remote specialized OCR service (HTTP)
//! - Vision: remote multimodal model behind an OpenAI-compatible API (HTTP)
//!
//! Every backend reports confidence on a 0-100 scale. Backends whose
//! underlying engine reports a 0-1 fraction are rescaled here, at the
//! adapter boundary, so results from different engines stay comparable.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from OCR backends.
///
/// All of these are recoverable at page level: the fallback chain logs them
/// and moves on to the next engine.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("Backend not available: {0}")]
    BackendNotAvailable(String),

    #[error("{backend} timed out after {secs}s")]
    Timeout { backend: OcrBackendType, secs: u64 },

    #[error("OCR failed: {0}")]
    OcrFailed(String),

    #[error("{0} returned no usable text")]
    NoText(OcrBackendType),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    ImageError(String),
}

/// A recognized text region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub text: String,
    /// Region confidence, 0-100.
    pub confidence: f32,
    /// Axis-aligned box as `[x, y, width, height]`.
    pub bbox: [f32; 4],
}

impl BoundingBox {
    /// Build an axis-aligned box from the corner points of a quadrilateral.
    pub fn from_quad(text: String, confidence: f32, points: &[[f32; 2]]) -> Self {
        let (mut min_x, mut min_y) = (f32::MAX, f32::MAX);
        let (mut max_x, mut max_y) = (f32::MIN, f32::MIN);
        for [x, y] in points {
            min_x = min_x.min(*x);
            min_y = min_y.min(*y);
            max_x = max_x.max(*x);
            max_y = max_y.max(*y);
        }
        let bbox = if points.is_empty() {
            [0.0; 4]
        } else {
            [min_x, min_y, max_x - min_x, max_y - min_y]
        };
        Self {
            text,
            confidence,
            bbox,
        }
    }
}

/// How an engine expresses confidence before normalization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceScale {
    /// Already a percentage (0-100).
    #[default]
    Percent,
    /// A fraction (0-1) that must be multiplied by 100.
    Fraction,
}

impl ConfidenceScale {
    /// Convert a raw engine confidence to the 0-100 scale.
    ///
    /// Non-finite values become 0 and the result is clamped into range.
    pub fn normalize(self, raw: f32) -> f32 {
        if !raw.is_finite() {
            return 0.0;
        }
        let scaled = match self {
            ConfidenceScale::Percent => raw,
            ConfidenceScale::Fraction => raw * 100.0,
        };
        scaled.clamp(0.0, 100.0)
    }
}

/// Raw output of one engine call, before timing and normalization.
#[derive(Debug, Clone, Default)]
pub struct OcrOutput {
    pub text: String,
    /// Confidence in the engine's own scale (see [`OcrBackend::confidence_scale`]).
    pub confidence: f32,
    pub bounding_boxes: Vec<BoundingBox>,
    /// Which internal path produced the text (e.g. `tesseract_otsu_vie_psm6`).
    pub method: Option<String>,
}

/// Result of OCR processing.
#[derive(Debug, Clone)]
pub struct OcrResult {
    /// Extracted text content.
    pub text: String,
    /// Confidence score (0-100).
    pub confidence: f32,
    /// Recognized regions, if the engine reports them.
    pub bounding_boxes: Vec<BoundingBox>,
    /// Which backend produced this result.
    pub backend: OcrBackendType,
    /// Which model was used (vision backends only).
    pub model: Option<String>,
    /// Engine-internal path that produced the text.
    pub method: Option<String>,
    /// Processing time in milliseconds.
    pub processing_time_ms: u64,
}

/// Available OCR backend types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrBackendType {
    /// Tesseract OCR via command-line.
    Tesseract,
    /// PaddleOCR HTTP service.
    #[serde(rename = "paddleocr", alias = "paddle")]
    PaddleOcr,
    /// Multimodal model behind an OpenAI-compatible API.
    Vision,
}

impl OcrBackendType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OcrBackendType::Tesseract => "tesseract",
            OcrBackendType::PaddleOcr => "paddleocr",
            OcrBackendType::Vision => "vision",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "tesseract" => Some(OcrBackendType::Tesseract),
            "paddleocr" | "paddle" => Some(OcrBackendType::PaddleOcr),
            "vision" | "multimodal" => Some(OcrBackendType::Vision),
            _ => None,
        }
    }
}

impl std::fmt::Display for OcrBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Trait for OCR backends.
#[async_trait]
pub trait OcrBackend: Send + Sync {
    /// Get the backend type.
    fn backend_type(&self) -> OcrBackendType;

    /// Check if this backend is available (binary installed, endpoint configured).
    fn is_available(&self) -> bool;

    /// Get a description of what's needed to make this backend available.
    fn availability_hint(&self) -> String;

    /// Upper bound for a single `ocr_image` call.
    fn timeout(&self) -> Duration;

    /// Scale of the confidence values this engine reports.
    fn confidence_scale(&self) -> ConfidenceScale {
        ConfidenceScale::Percent
    }

    /// Model name for this backend, if applicable.
    fn model_name(&self) -> Option<String> {
        None
    }

    /// Core OCR: extract text from an image file.
    async fn run_ocr(&self, image_path: &Path) -> Result<OcrOutput, OcrError>;

    /// Probe the engine and describe its state.
    async fn health(&self) -> Result<String, OcrError> {
        if self.is_available() {
            Ok(self.availability_hint())
        } else {
            Err(OcrError::BackendNotAvailable(self.availability_hint()))
        }
    }

    /// Run OCR on an image file under this backend's timeout, returning a
    /// timed result with confidence normalized to 0-100.
    async fn ocr_image(&self, image_path: &Path) -> Result<OcrResult, OcrError> {
        let start = Instant::now();
        let limit = self.timeout();
        let output = tokio::time::timeout(limit, self.run_ocr(image_path))
            .await
            .map_err(|_| OcrError::Timeout {
                backend: self.backend_type(),
                secs: limit.as_secs(),
            })??;
        Ok(build_ocr_result(
            output,
            self.backend_type(),
            self.confidence_scale(),
            self.model_name(),
            start,
        ))
    }
}

/// Build an OcrResult from raw engine output and timing info.
pub fn build_ocr_result(
    output: OcrOutput,
    backend: OcrBackendType,
    scale: ConfidenceScale,
    model: Option<String>,
    start: Instant,
) -> OcrResult {
    let bounding_boxes = output
        .bounding_boxes
        .into_iter()
        .map(|b| BoundingBox {
            confidence: scale.normalize(b.confidence),
            ..b
        })
        .collect();
    OcrResult {
        confidence: if output.text.trim().is_empty() {
            0.0
        } else {
            scale.normalize(output.confidence)
        },
        text: output.text,
        bounding_boxes,
        backend,
        model,
        method: output.method,
        processing_time_ms: start.elapsed().as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraction_confidence_is_rescaled() {
        assert_eq!(ConfidenceScale::Fraction.normalize(0.91), 91.0);
        assert_eq!(ConfidenceScale::Percent.normalize(91.0), 91.0);
    }

    #[test]
    fn test_confidence_is_clamped() {
        assert_eq!(ConfidenceScale::Percent.normalize(140.0), 100.0);
        assert_eq!(ConfidenceScale::Percent.normalize(-3.0), 0.0);
        assert_eq!(ConfidenceScale::Fraction.normalize(f32::NAN), 0.0);
    }

    #[test]
    fn test_quad_to_rect() {
        let quad = [[10.0, 10.0], [450.0, 10.0], [450.0, 35.0], [10.0, 35.0]];
        let b = BoundingBox::from_quad("line".to_string(), 89.2, &quad);
        assert_eq!(b.bbox, [10.0, 10.0, 440.0, 25.0]);
    }

    #[test]
    fn test_empty_text_has_zero_confidence() {
        let output = OcrOutput {
            text: "   ".to_string(),
            confidence: 0.8,
            ..Default::default()
        };
        let result = build_ocr_result(
            output,
            OcrBackendType::PaddleOcr,
            ConfidenceScale::Fraction,
            None,
            Instant::now(),
        );
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_backend_type_names() {
        assert_eq!(
            OcrBackendType::from_str("paddle"),
            Some(OcrBackendType::PaddleOcr)
        );
        assert_eq!(OcrBackendType::from_str("TESSERACT").map(|b| b.as_str()), Some("tesseract"));
        assert_eq!(OcrBackendType::from_str("ocrs"), None);
    }
}

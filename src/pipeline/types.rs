//! Data types flowing through a single document run.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::PipelineError;
use crate::ocr::{BoundingBox, OcrBackendType};

/// Enhancement tag carried by pages that fell to the degraded tier.
pub const DEGRADED_MARKER: &str = "degraded";

/// Supported input formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Image,
}

/// A document handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub path: PathBuf,
    pub mime_type: String,
    pub format: DocumentFormat,
}

impl SourceDocument {
    /// Classify a file by extension, then confirm by sniffing its content.
    ///
    /// Unsupported extensions fail before the file is touched. A supported
    /// extension on a missing file is a conversion failure.
    pub fn from_path(path: &Path) -> Result<Self, PipelineError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let (format, mime_type) = match ext.as_str() {
            "pdf" => (DocumentFormat::Pdf, "application/pdf"),
            "png" => (DocumentFormat::Image, "image/png"),
            "jpg" | "jpeg" => (DocumentFormat::Image, "image/jpeg"),
            "" => {
                return Err(PipelineError::UnsupportedType(format!(
                    "{} has no file extension",
                    path.display()
                )))
            }
            other => return Err(PipelineError::UnsupportedType(format!(".{}", other))),
        };

        if !path.is_file() {
            return Err(PipelineError::conversion(
                format!("source not readable: {}", path.display()),
                String::new(),
            ));
        }

        // Content that is positively something else is rejected; unknown
        // content is left for the converter to judge.
        if let Ok(Some(kind)) = infer::get_from_path(path) {
            let sniffed = kind.mime_type();
            let compatible = match format {
                DocumentFormat::Pdf => sniffed == "application/pdf",
                DocumentFormat::Image => sniffed == "image/png" || sniffed == "image/jpeg",
            };
            if !compatible {
                return Err(PipelineError::UnsupportedType(format!(
                    "{} (content is {})",
                    path.display(),
                    sniffed
                )));
            }
            return Ok(Self {
                path: path.to_path_buf(),
                mime_type: sniffed.to_string(),
                format,
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            mime_type: mime_type.to_string(),
            format,
        })
    }
}

/// One rasterized page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    /// 1-based, contiguous.
    pub page_number: u32,
    pub path: PathBuf,
}

/// Which tier produced a page's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageEngine {
    Ocr(OcrBackendType),
    Degraded,
}

impl PageEngine {
    pub fn label(&self) -> &'static str {
        match self {
            PageEngine::Ocr(backend) => backend.as_str(),
            PageEngine::Degraded => DEGRADED_MARKER,
        }
    }
}

impl std::fmt::Display for PageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Result for one page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageOutcome {
    pub page_number: u32,
    /// Possibly empty, never absent.
    pub text: String,
    /// 0-100; 0 when there is no text.
    pub confidence: f32,
    pub bounding_boxes: Vec<BoundingBox>,
    pub enhancements_applied: BTreeSet<String>,
    pub engine_used: PageEngine,
}

impl PageOutcome {
    /// Placeholder for a page no engine could read.
    pub fn degraded(page_number: u32, confidence: f32) -> Self {
        Self {
            page_number,
            text: format!("[Page {}: no text could be extracted]", page_number),
            confidence: confidence.clamp(0.0, 100.0),
            bounding_boxes: Vec::new(),
            enhancements_applied: BTreeSet::from([DEGRADED_MARKER.to_string()]),
            engine_used: PageEngine::Degraded,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.engine_used == PageEngine::Degraded
    }
}

/// A region tagged with the page it was found on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageBoundingBox {
    pub page_number: u32,
    #[serde(flatten)]
    pub region: BoundingBox,
}

/// Document-level result handed back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedResult {
    pub extracted_text: String,
    /// Mean of page confidences, 0-100.
    pub confidence: f32,
    pub page_count: u32,
    pub processing_method: String,
    pub processing_time_ms: u64,
    pub bounding_boxes: Vec<PageBoundingBox>,
    pub enhancements: BTreeSet<String>,
    #[serde(default)]
    pub degraded_pages: Vec<u32>,
}

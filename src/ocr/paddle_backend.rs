//! PaddleOCR service backend.
//!
//! Sends a page image to the PaddleOCR microservice (`POST /paddle-ocr`) and
//! reads back text, confidence and per-line regions. The service reports
//! regions either as 4-point quadrilaterals or as `[x, y, w, h]`; both are
//! normalized to axis-aligned `[x, y, w, h]` boxes here.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::Form;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::api_backend::{create_http_client, ensure_success, image_part};
use super::backend::{
    BoundingBox, ConfidenceScale, OcrBackend, OcrBackendType, OcrError, OcrOutput,
};
use super::model_utils::endpoint_url;
use crate::config::PaddleConfig;

/// PaddleOCR HTTP service backend.
pub struct PaddleBackend {
    config: PaddleConfig,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct PaddleResponse {
    success: bool,
    #[serde(default)]
    text: String,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    bounding_boxes: Vec<PaddleBox>,
    #[serde(default)]
    processing_method: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaddleBox {
    #[serde(default)]
    text: String,
    #[serde(default)]
    confidence: f32,
    bbox: PaddleBbox,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PaddleBbox {
    Quad(Vec<[f32; 2]>),
    Rect([f32; 4]),
}

impl PaddleBox {
    fn into_bounding_box(self) -> BoundingBox {
        match self.bbox {
            PaddleBbox::Quad(points) => BoundingBox::from_quad(self.text, self.confidence, &points),
            PaddleBbox::Rect(bbox) => BoundingBox {
                text: self.text,
                confidence: self.confidence,
                bbox,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct PaddleHealth {
    status: String,
    #[serde(default)]
    paddle_ocr_available: bool,
}

impl PaddleBackend {
    /// Create a new PaddleOCR backend from its service configuration.
    pub fn new(config: PaddleConfig) -> Result<Self, OcrError> {
        let client = create_http_client("paddleocr", Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, client })
    }

    async fn run_paddle(&self, image_path: &Path) -> Result<OcrOutput, OcrError> {
        let url = endpoint_url(&self.config.url, "paddle-ocr")?;
        let form = Form::new()
            .part("file", image_part(image_path).await?)
            .text("language", self.config.language.clone())
            .text("use_angle_cls", self.config.use_angle_cls.to_string())
            .text(
                "confidence_threshold",
                self.config.confidence_threshold.to_string(),
            );

        let response = self.client.post(url).multipart(form).send().await?;
        let response = ensure_success("PaddleOCR", response).await?;
        let parsed: PaddleResponse = response.json().await?;

        if !parsed.success {
            return Err(OcrError::OcrFailed(format!(
                "PaddleOCR reported failure: {}",
                parsed.error.as_deref().unwrap_or("unknown error")
            )));
        }

        debug!(
            "PaddleOCR returned {} chars, {} regions ({})",
            parsed.text.len(),
            parsed.bounding_boxes.len(),
            parsed.processing_method.as_deref().unwrap_or("unknown")
        );

        Ok(OcrOutput {
            text: parsed.text,
            confidence: parsed.confidence,
            bounding_boxes: parsed
                .bounding_boxes
                .into_iter()
                .map(PaddleBox::into_bounding_box)
                .collect(),
            method: parsed.processing_method,
        })
    }
}

#[async_trait]
impl OcrBackend for PaddleBackend {
    fn backend_type(&self) -> OcrBackendType {
        OcrBackendType::PaddleOcr
    }

    fn is_available(&self) -> bool {
        !self.config.url.trim().is_empty()
    }

    fn availability_hint(&self) -> String {
        if self.is_available() {
            format!("PaddleOCR service at {}", self.config.url)
        } else {
            "PaddleOCR service URL not configured (set DOCINTAKE_PADDLE_URL)".to_string()
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    fn confidence_scale(&self) -> ConfidenceScale {
        self.config.confidence_scale
    }

    async fn run_ocr(&self, image_path: &Path) -> Result<OcrOutput, OcrError> {
        self.run_paddle(image_path).await
    }

    async fn health(&self) -> Result<String, OcrError> {
        let url = endpoint_url(&self.config.url, "health")?;
        let response = self.client.get(url).send().await?;
        let health: PaddleHealth = ensure_success("PaddleOCR", response).await?.json().await?;
        if health.paddle_ocr_available {
            Ok(format!("PaddleOCR {} at {}", health.status, self.config.url))
        } else {
            Ok(format!(
                "PaddleOCR {} at {} (service is running on mock results)",
                health.status, self.config.url
            ))
        }
    }
}

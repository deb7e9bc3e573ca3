//! Client for the image enhancement service.
//!
//! The service takes a page image and writes an enhanced copy (contrast,
//! denoise, sharpen, deskew, resize) to a path it reports back. The service
//! and the pipeline are expected to share a filesystem; a reported path that
//! does not exist locally is treated as a failed enhancement.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::multipart::Form;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::api_backend::{create_http_client, image_part};
use super::backend::OcrError;
use super::model_utils::endpoint_url;
use crate::config::PreprocessConfig;

/// Errors from the enhancement service. Never fatal to a page.
#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("Preprocessing service error: {0}")]
    Service(String),

    #[error("Preprocessing service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Processed image not found at {0}")]
    MissingOutput(PathBuf),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Client(#[from] OcrError),
}

/// Image to feed the engines plus the enhancements that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Enhanced {
    pub processed_image_path: PathBuf,
    pub enhancements_applied: Vec<String>,
}

impl Enhanced {
    /// The untouched input, with no enhancements.
    pub fn original(image_path: &Path) -> Self {
        Self {
            processed_image_path: image_path.to_path_buf(),
            enhancements_applied: Vec::new(),
        }
    }

    /// Whether the service produced a distinct file.
    pub fn is_enhanced(&self, original: &Path) -> bool {
        self.processed_image_path != original
    }
}

#[derive(Debug, Deserialize)]
struct ProcessImageResponse {
    success: bool,
    #[serde(default)]
    processed_image_path: Option<PathBuf>,
    #[serde(default)]
    enhancements_applied: Vec<String>,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP client for `POST /process-image`.
pub struct PreprocessClient {
    config: PreprocessConfig,
    client: Client,
}

impl PreprocessClient {
    pub fn new(config: PreprocessConfig) -> Result<Self, OcrError> {
        let client =
            create_http_client("preprocess", Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, client })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled && !self.config.url.trim().is_empty()
    }

    pub fn base_url(&self) -> &str {
        &self.config.url
    }

    fn form_flags(&self, form: Form) -> Form {
        let c = &self.config;
        form.text("enhance_contrast", c.enhance_contrast.to_string())
            .text("denoise", c.denoise.to_string())
            .text("sharpen", c.sharpen.to_string())
            .text("binarize", c.binarize.to_string())
            .text("deskew", c.deskew.to_string())
            .text("resize_factor", c.resize_factor.to_string())
    }

    /// Send an image for enhancement.
    pub async fn enhance(&self, image_path: &Path) -> Result<Enhanced, PreprocessError> {
        let url = endpoint_url(&self.config.url, "process-image")?;
        let form = self.form_flags(Form::new().part("file", image_part(image_path).await?));

        let response = self.client.post(url).multipart(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PreprocessError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ProcessImageResponse = response.json().await?;
        if !parsed.success {
            return Err(PreprocessError::Service(
                parsed.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }

        let processed = parsed.processed_image_path.ok_or_else(|| {
            PreprocessError::Service("response has no processed_image_path".to_string())
        })?;
        if !tokio::fs::try_exists(&processed).await.unwrap_or(false) {
            return Err(PreprocessError::MissingOutput(processed));
        }

        debug!(
            "Enhanced {} -> {} ({})",
            image_path.display(),
            processed.display(),
            parsed.enhancements_applied.join(", ")
        );

        Ok(Enhanced {
            processed_image_path: processed,
            enhancements_applied: parsed.enhancements_applied,
        })
    }

    /// Enhance an image, falling back to the original on any failure.
    pub async fn enhance_or_original(&self, image_path: &Path) -> Enhanced {
        if !self.is_enabled() {
            return Enhanced::original(image_path);
        }
        match self.enhance(image_path).await {
            Ok(enhanced) => enhanced,
            Err(e) => {
                warn!(
                    "Preprocessing failed for {}, using original: {}",
                    image_path.display(),
                    e
                );
                Enhanced::original(image_path)
            }
        }
    }
}

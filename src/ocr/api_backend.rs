//! Shared infrastructure for HTTP-backed engines (PaddleOCR, vision,
//! preprocessing).
//!
//! Provides common helpers for client construction, image upload and
//! status checking.

use std::path::Path;
use std::time::Duration;

use base64::Engine;
use reqwest::multipart::Part;
use reqwest::{Client, Response};

use super::backend::OcrError;

/// Shared OCR prompt for vision API backends.
pub const VISION_OCR_PROMPT: &str = "Extract all text from this image. Return only the extracted text, preserving the original layout and formatting as much as possible. Do not add any explanations or commentary.";

/// User agent sent to every service.
pub const USER_AGENT: &str = concat!("docintake/", env!("CARGO_PKG_VERSION"));

/// Create an HTTP client bounded by `timeout`.
pub fn create_http_client(service_name: &str, timeout: Duration) -> Result<Client, OcrError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| {
            OcrError::OcrFailed(format!(
                "Failed to create HTTP client for {}: {}",
                service_name, e
            ))
        })
}

/// MIME type for an image path, by extension.
pub fn image_mime_type(image_path: &Path) -> &'static str {
    match image_path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        _ => "image/jpeg",
    }
}

/// Read an image file into a multipart `file` part.
pub async fn image_part(image_path: &Path) -> Result<Part, OcrError> {
    let bytes = tokio::fs::read(image_path).await?;
    let file_name = image_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "page.png".to_string());
    Part::bytes(bytes)
        .file_name(file_name)
        .mime_str(image_mime_type(image_path))
        .map_err(OcrError::Http)
}

/// Read an image file and encode it as base64, returning (base64_data, mime_type).
pub async fn encode_image_base64(image_path: &Path) -> Result<(String, &'static str), OcrError> {
    let image_bytes = tokio::fs::read(image_path).await?;
    let base64_data = base64::engine::general_purpose::STANDARD.encode(&image_bytes);
    Ok((base64_data, image_mime_type(image_path)))
}

/// Turn a non-success response into an error carrying the body.
pub async fn ensure_success(service: &str, response: Response) -> Result<Response, OcrError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(OcrError::OcrFailed(format!(
        "{} returned {}: {}",
        service,
        status,
        truncate(&body, 200)
    )))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

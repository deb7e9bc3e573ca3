//! Shared utilities for OCR backends.
//!
//! Provides common functionality for:
//! - Checking for CLI tool availability
//! - Building service endpoint URLs

use std::path::Path;

use url::Url;

use super::backend::OcrError;

/// Check if a binary is available, either as an existing path or in PATH.
pub fn check_binary(name: &str) -> bool {
    let path = Path::new(name);
    if path.components().count() > 1 {
        return path.is_file();
    }
    which::which(name).is_ok()
}

/// Join a service base URL and a route, tolerating trailing slashes.
pub fn endpoint_url(base: &str, route: &str) -> Result<Url, OcrError> {
    let joined = format!(
        "{}/{}",
        base.trim_end_matches('/'),
        route.trim_start_matches('/')
    );
    Url::parse(&joined).map_err(|e| OcrError::BackendNotAvailable(format!("invalid URL {}: {}", joined, e)))
}

//! Tesseract OCR backend implementation.
//!
//! Uses Tesseract OCR via command-line for text extraction. Scanned
//! government forms vary a lot in quality, so a single invocation is rarely
//! enough: the backend tries a matrix of preprocessing variants, languages
//! and page segmentation modes and keeps the longest text.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, GrayImage};
use tokio::process::Command;
use tokio::time::Instant;
use tracing::debug;

use super::backend::{OcrBackend, OcrBackendType, OcrError, OcrOutput};
use super::model_utils::check_binary;
use crate::config::TesseractConfig;

/// Locally rendered copy of the input image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Original,
    Grayscale,
    Equalized,
    Otsu,
    Contrast,
}

impl Variant {
    pub const ALL: [Variant; 5] = [
        Variant::Original,
        Variant::Grayscale,
        Variant::Equalized,
        Variant::Otsu,
        Variant::Contrast,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Original => "original",
            Variant::Grayscale => "grayscale",
            Variant::Equalized => "equalized",
            Variant::Otsu => "otsu",
            Variant::Contrast => "contrast",
        }
    }

    /// Render this variant. `None` for `Original`, which is used as-is.
    fn render(&self, gray: &GrayImage) -> Option<GrayImage> {
        match self {
            Variant::Original => None,
            Variant::Grayscale => Some(gray.clone()),
            Variant::Equalized => Some(imageproc::contrast::equalize_histogram(gray)),
            Variant::Otsu => {
                let level = imageproc::contrast::otsu_level(gray);
                let mut out = gray.clone();
                for pixel in out.pixels_mut() {
                    pixel.0[0] = if pixel.0[0] > level { 255 } else { 0 };
                }
                Some(out)
            }
            Variant::Contrast => Some(image::imageops::contrast(gray, 40.0)),
        }
    }
}

/// Slack on top of the matrix budget before the outer engine timeout fires.
const MATRIX_GRACE: Duration = Duration::from_secs(5);

/// Heuristic confidence from text length.
///
/// Tesseract's stdout mode reports no confidence, so this is an
/// approximation that favours longer readings, not a calibrated probability.
pub fn length_confidence(len: usize) -> f32 {
    (50 + len / 2).min(95) as f32
}

/// Tesseract OCR backend.
pub struct TesseractBackend {
    config: TesseractConfig,
}

struct Attempt {
    text: String,
    len: usize,
    method: String,
}

impl TesseractBackend {
    pub fn new(config: TesseractConfig) -> Self {
        Self { config }
    }

    /// Languages to try: the configured one, then English.
    fn languages(&self) -> Vec<String> {
        let mut langs = vec![self.config.language.clone()];
        if self.config.language != "eng" {
            langs.push("eng".to_string());
        }
        langs
    }

    /// Write the variant images into `workdir`.
    ///
    /// Undecodable input yields only the original, leaving tesseract to
    /// make what it can of it.
    async fn render_variants(
        image_path: &Path,
        workdir: &Path,
    ) -> Result<Vec<(Variant, PathBuf)>, OcrError> {
        let source = image_path.to_path_buf();
        let dir = workdir.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let mut variants = vec![(Variant::Original, source.clone())];
            let img: DynamicImage = match image::open(&source) {
                Ok(img) => img,
                Err(e) => {
                    debug!("Cannot decode {} for variants: {}", source.display(), e);
                    return Ok(variants);
                }
            };
            let gray = img.to_luma8();
            for variant in Variant::ALL {
                if let Some(rendered) = variant.render(&gray) {
                    let path = dir.join(format!("{}.png", variant.as_str()));
                    rendered
                        .save(&path)
                        .map_err(|e| OcrError::ImageError(e.to_string()))?;
                    variants.push((variant, path));
                }
            }
            Ok(variants)
        })
        .await
        .map_err(|e| OcrError::ImageError(format!("variant rendering panicked: {}", e)))?
    }

    /// Run one tesseract invocation bounded by `limit`. `Ok(None)` for a
    /// failed or timed-out call.
    async fn run_tesseract(
        &self,
        image_path: &Path,
        lang: &str,
        psm: u8,
        limit: Duration,
    ) -> Result<Option<String>, OcrError> {
        let call = Command::new(&self.config.binary)
            .arg(image_path)
            .arg("stdout")
            .args(["-l", lang, "--psm", &psm.to_string()])
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(limit, call).await {
            Err(_) => {
                debug!("tesseract -l {} --psm {} timed out", lang, psm);
                Ok(None)
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(OcrError::BackendNotAvailable(
                    "tesseract not found (install tesseract-ocr)".to_string(),
                ))
            }
            Ok(Err(e)) => Err(OcrError::Io(e)),
            Ok(Ok(output)) if output.status.success() => {
                Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()))
            }
            Ok(Ok(output)) => {
                debug!(
                    "tesseract -l {} --psm {} failed: {}",
                    lang,
                    psm,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                Ok(None)
            }
        }
    }

    /// Try the whole matrix within `timeout_secs`, keeping the longest text.
    ///
    /// Running out of budget ends the matrix early; whatever was found so far
    /// still counts.
    async fn run_matrix(&self, image_path: &Path) -> Result<OcrOutput, OcrError> {
        let deadline = Instant::now() + Duration::from_secs(self.config.timeout_secs);
        let call_timeout = Duration::from_secs(self.config.call_timeout_secs);

        let workdir = tempfile::Builder::new()
            .prefix("docintake-tesseract-")
            .tempdir()?;
        let variants = Self::render_variants(image_path, workdir.path()).await?;

        let mut best: Option<Attempt> = None;
        'matrix: for (variant, path) in &variants {
            for lang in self.languages() {
                for &psm in &self.config.psm_modes {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        debug!("tesseract matrix budget spent, keeping best so far");
                        break 'matrix;
                    }
                    let limit = call_timeout.min(remaining);
                    let Some(raw) = self.run_tesseract(path, &lang, psm, limit).await? else {
                        continue;
                    };
                    let text = raw.trim().to_string();
                    let len = text.chars().count();
                    if best.as_ref().map_or(true, |b| len > b.len) {
                        best = Some(Attempt {
                            text,
                            len,
                            method: format!("tesseract_{}_{}_psm{}", variant.as_str(), lang, psm),
                        });
                    }
                    if len > self.config.good_enough_len {
                        break 'matrix;
                    }
                }
            }
        }
        // Variant files go with the directory
        drop(workdir);

        match best {
            Some(attempt) if attempt.len >= self.config.min_text_len => {
                debug!("tesseract best: {} ({} chars)", attempt.method, attempt.len);
                Ok(OcrOutput {
                    confidence: length_confidence(attempt.len),
                    text: attempt.text,
                    bounding_boxes: Vec::new(),
                    method: Some(attempt.method),
                })
            }
            _ => Err(OcrError::NoText(OcrBackendType::Tesseract)),
        }
    }
}

impl Default for TesseractBackend {
    fn default() -> Self {
        Self::new(TesseractConfig::default())
    }
}

#[async_trait]
impl OcrBackend for TesseractBackend {
    fn backend_type(&self) -> OcrBackendType {
        OcrBackendType::Tesseract
    }

    fn is_available(&self) -> bool {
        check_binary(&self.config.binary)
    }

    fn availability_hint(&self) -> String {
        if !self.is_available() {
            "Tesseract not installed. Install with: apt install tesseract-ocr".to_string()
        } else {
            format!(
                "Tesseract is available ({}, eng; psm {:?})",
                self.config.language, self.config.psm_modes
            )
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs) + MATRIX_GRACE
    }

    async fn run_ocr(&self, image_path: &Path) -> Result<OcrOutput, OcrError> {
        self.run_matrix(image_path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_length_confidence_caps_at_95() {
        assert_eq!(length_confidence(0), 50.0);
        assert_eq!(length_confidence(20), 60.0);
        assert_eq!(length_confidence(500), 95.0);
    }

    #[test]
    fn test_languages_deduplicated() {
        let backend = TesseractBackend::new(TesseractConfig {
            language: "eng".to_string(),
            ..TesseractConfig::default()
        });
        assert_eq!(backend.languages(), vec!["eng"]);

        let backend = TesseractBackend::new(TesseractConfig {
            language: "vie".to_string(),
            ..TesseractConfig::default()
        });
        assert_eq!(backend.languages(), vec!["vie", "eng"]);
    }

    #[test]
    fn test_outer_timeout_leaves_room_for_matrix_budget() {
        let backend = TesseractBackend::new(TesseractConfig {
            timeout_secs: 90,
            ..TesseractConfig::default()
        });
        assert!(backend.timeout() > Duration::from_secs(90));
    }

    #[test]
    fn test_otsu_variant_is_binary() {
        let gray = GrayImage::from_fn(8, 8, |x, _| Luma([(x * 30) as u8]));
        let out = Variant::Otsu.render(&gray).unwrap();
        assert!(out.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
        assert!(Variant::Original.render(&gray).is_none());
    }

    #[tokio::test]
    async fn test_variants_written_for_decodable_image() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("page.png");
        GrayImage::from_fn(16, 16, |x, y| Luma([((x + y) * 8) as u8]))
            .save(&source)
            .unwrap();
        let work = tempfile::tempdir().unwrap();

        let variants = TesseractBackend::render_variants(&source, work.path())
            .await
            .unwrap();
        assert_eq!(variants.len(), Variant::ALL.len());
        assert_eq!(variants[0], (Variant::Original, source));
        assert!(variants[1..].iter().all(|(_, p)| p.exists()));
    }

    #[tokio::test]
    async fn test_undecodable_image_uses_original_only() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("page.png");
        std::fs::write(&source, b"garbage").unwrap();
        let variants = TesseractBackend::render_variants(&source, dir.path())
            .await
            .unwrap();
        assert_eq!(variants, vec![(Variant::Original, source)]);
    }
}

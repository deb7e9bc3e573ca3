//! Configuration for the intake pipeline.
//!
//! Configuration is discovered with `prefer` (docintake.toml, .yaml, .json in
//! the standard locations) or given explicitly, and parsed with serde based on
//! the file extension. Every section falls back to its `Default`, and the
//! defaults pick up environment overrides so a bare `.env` file is enough to
//! point the pipeline at its services.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::ocr::{ConfidenceScale, OcrBackendType};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where processed results are persisted (supports `~`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_dir: Option<String>,
    pub conversion: ConversionConfig,
    pub preprocess: PreprocessConfig,
    pub tesseract: TesseractConfig,
    pub paddle: PaddleConfig,
    pub vision: VisionConfig,
    pub pipeline: PipelineConfig,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

/// External rasterizer used for PDF input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rasterizer {
    /// Poppler's `pdftoppm`.
    #[default]
    Pdftoppm,
    /// ImageMagick's `magick`, flattening alpha onto white.
    Imagemagick,
}

impl Rasterizer {
    pub fn default_binary(&self) -> &'static str {
        match self {
            Rasterizer::Pdftoppm => "pdftoppm",
            Rasterizer::Imagemagick => "magick",
        }
    }

    pub fn install_hint(&self) -> &'static str {
        match self {
            Rasterizer::Pdftoppm => "pdftoppm not found (install poppler-utils)",
            Rasterizer::Imagemagick => "magick not found (install imagemagick)",
        }
    }
}

/// PDF rasterization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    pub rasterizer: Rasterizer,
    /// Override the rasterizer binary (name in PATH or absolute path).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,
    /// Render density in DPI.
    pub density: u32,
    pub timeout_secs: u64,
}

impl ConversionConfig {
    pub fn binary(&self) -> &str {
        self.binary
            .as_deref()
            .unwrap_or_else(|| self.rasterizer.default_binary())
    }
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            rasterizer: std::env::var("DOCINTAKE_RASTERIZER")
                .ok()
                .and_then(|v| match v.to_lowercase().as_str() {
                    "imagemagick" | "magick" => Some(Rasterizer::Imagemagick),
                    "pdftoppm" => Some(Rasterizer::Pdftoppm),
                    _ => None,
                })
                .unwrap_or_default(),
            binary: None,
            density: 200,
            timeout_secs: 120,
        }
    }
}

/// Image enhancement service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    pub enabled: bool,
    pub url: String,
    pub timeout_secs: u64,
    pub enhance_contrast: bool,
    pub denoise: bool,
    pub sharpen: bool,
    pub binarize: bool,
    pub deskew: bool,
    pub resize_factor: f32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: std::env::var("DOCINTAKE_PREPROCESS_URL")
                .unwrap_or_else(|_| "http://localhost:8003".to_string()),
            timeout_secs: 30,
            enhance_contrast: true,
            denoise: true,
            sharpen: true,
            binarize: false,
            deskew: true,
            resize_factor: 1.5,
        }
    }
}

/// Local tesseract engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TesseractConfig {
    pub binary: String,
    /// Primary language; `eng` is always tried after it.
    pub language: String,
    pub psm_modes: Vec<u8>,
    /// Bound on a single tesseract invocation.
    pub call_timeout_secs: u64,
    /// Bound on the whole variant matrix.
    pub timeout_secs: u64,
    /// Results shorter than this are treated as no text.
    pub min_text_len: usize,
    /// Stop trying variants once a result is longer than this.
    pub good_enough_len: usize,
}

impl Default for TesseractConfig {
    fn default() -> Self {
        Self {
            binary: std::env::var("TESSERACT_BIN").unwrap_or_else(|_| "tesseract".to_string()),
            language: std::env::var("DOCINTAKE_OCR_LANGUAGE").unwrap_or_else(|_| "vie".to_string()),
            psm_modes: vec![3, 6, 7, 8],
            call_timeout_secs: 8,
            timeout_secs: 90,
            min_text_len: 2,
            good_enough_len: 100,
        }
    }
}

/// PaddleOCR service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaddleConfig {
    pub url: String,
    /// Model language; the Chinese model handles Vietnamese well.
    pub language: String,
    pub use_angle_cls: bool,
    pub confidence_threshold: f32,
    pub timeout_secs: u64,
    pub confidence_scale: ConfidenceScale,
}

impl Default for PaddleConfig {
    fn default() -> Self {
        Self {
            url: std::env::var("DOCINTAKE_PADDLE_URL")
                .unwrap_or_else(|_| "http://localhost:8002".to_string()),
            language: "ch".to_string(),
            use_angle_cls: true,
            confidence_threshold: 0.6,
            timeout_secs: 30,
            confidence_scale: ConfidenceScale::Percent,
        }
    }
}

/// Multimodal vision model settings (OpenAI-compatible API).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub endpoint: String,
    pub model: String,
    /// API key; read from `VISION_API_KEY`, never written back out.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    /// Confidence assigned to vision output, which reports none of its own.
    pub confidence: f32,
    pub max_tokens: u32,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            endpoint: std::env::var("DOCINTAKE_VISION_ENDPOINT")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            model: std::env::var("DOCINTAKE_VISION_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            api_key: std::env::var("VISION_API_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            timeout_secs: 30,
            confidence: 85.0,
            max_tokens: 4096,
        }
    }
}

/// One tier of the per-page fallback chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineTierConfig {
    pub engine: OcrBackendType,
    /// Whether this tier reads the enhanced image from the preprocessing step.
    #[serde(default)]
    pub preprocessed: bool,
}

impl EngineTierConfig {
    /// Parse `name` or `name:enhanced`.
    pub fn parse(entry: &str) -> Option<Self> {
        let (name, flag) = match entry.split_once(':') {
            Some((name, flag)) => (name, Some(flag.trim())),
            None => (entry, None),
        };
        let engine = OcrBackendType::from_str(name)?;
        let preprocessed = matches!(flag, Some("enhanced") | Some("preprocessed"));
        Some(Self {
            engine,
            preprocessed,
        })
    }
}

fn default_chain() -> Vec<EngineTierConfig> {
    if let Ok(val) = std::env::var("DOCINTAKE_OCR_CHAIN") {
        let chain: Vec<EngineTierConfig> = val
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(|s| {
                let tier = EngineTierConfig::parse(s);
                if tier.is_none() {
                    warn!("DOCINTAKE_OCR_CHAIN: unknown engine '{}'", s);
                }
                tier
            })
            .collect();
        if !chain.is_empty() {
            return chain;
        }
    }

    vec![
        EngineTierConfig {
            engine: OcrBackendType::PaddleOcr,
            preprocessed: true,
        },
        EngineTierConfig {
            engine: OcrBackendType::Tesseract,
            preprocessed: false,
        },
    ]
}

/// Orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_concurrent_pages: usize,
    /// Pages unfinished after this many seconds degrade. `None` disables it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_timeout_secs: Option<u64>,
    pub degraded_confidence: f32,
    /// Base directory for per-document scratch directories.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<PathBuf>,
    /// Normalize dates and ID numbers in extracted text.
    pub normalize_text: bool,
    /// Engines tried per page, highest priority first. The degraded
    /// placeholder is always the implicit final tier.
    pub chain: Vec<EngineTierConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_pages: 4,
            document_timeout_secs: Some(300),
            degraded_confidence: 0.0,
            scratch_dir: None,
            normalize_text: false,
            chain: default_chain(),
        }
    }
}

impl Config {
    /// Load configuration using prefer crate for discovery.
    /// Automatically discovers docintake config files in standard locations.
    pub async fn load() -> Self {
        match prefer::load("docintake").await {
            Ok(pref_config) => {
                if let Some(path) = pref_config.source_path() {
                    match Self::load_from_path(path).await {
                        Ok(config) => config,
                        Err(e) => {
                            warn!("{}", e);
                            Self::default()
                        }
                    }
                } else {
                    Self::default()
                }
            }
            Err(_) => {
                debug!("No docintake config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Load configuration from a specific file path.
    /// Supports JSON, TOML and YAML based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
        let mut config = Self::parse(&contents, ext)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Parse configuration text in the given format.
    pub fn parse(contents: &str, ext: &str) -> Result<Self, String> {
        match ext {
            "toml" => toml::from_str(contents)
                .map_err(|e| format!("Failed to parse TOML config: {}", e)),
            "yaml" | "yml" => serde_yaml::from_str(contents)
                .map_err(|e| format!("Failed to parse YAML config: {}", e)),
            _ => serde_json::from_str(contents)
                .map_err(|e| format!("Failed to parse JSON config: {}", e)),
        }
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, String> {
        toml::to_string_pretty(self).map_err(|e| format!("Failed to render config: {}", e))
    }

    /// Get the base directory for resolving relative paths.
    pub fn base_dir(&self) -> PathBuf {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Resolve a path that may be relative to the config file.
    pub fn resolve_path(&self, path_str: &str) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir().join(path)
        }
    }

    /// Directory holding persisted results.
    pub fn storage_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.storage_dir {
            return self.resolve_path(dir);
        }
        if let Ok(dir) = std::env::var("DOCINTAKE_STORAGE_DIR") {
            return self.resolve_path(&dir);
        }
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("docintake")
            .join("results")
    }
}

//! Document intake pipeline.
//!
//! `DocumentProcessor::process_document` classifies a source document,
//! rasterizes it into a private scratch directory, runs every page through
//! the engine fallback chain concurrently and combines the page outcomes.
//!
//! Only conversion failures and unsupported input escape as errors; engine
//! failures degrade single pages instead.

mod aggregate;
mod fallback;
mod types;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{Config, ConversionConfig, PipelineConfig};
use crate::ocr::pdf_utils::convert_document;
use crate::ocr::preprocess::PreprocessClient;
use crate::ocr::{build_backend, OcrError};

pub use aggregate::{aggregate, dispatch_pages};
pub use fallback::{EngineTier, PageRun, PageRunner};
pub use types::{
    CombinedResult, DocumentFormat, PageBoundingBox, PageEngine, PageImage, PageOutcome,
    SourceDocument, DEGRADED_MARKER,
};

/// Errors that abort a whole document.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Conversion failed: {reason}")]
    Conversion { reason: String, diagnostics: String },

    #[error("Unsupported document type: {0}")]
    UnsupportedType(String),
}

impl PipelineError {
    pub fn conversion(reason: impl Into<String>, diagnostics: impl Into<String>) -> Self {
        PipelineError::Conversion {
            reason: reason.into(),
            diagnostics: diagnostics.into(),
        }
    }

    /// Tool output attached to a conversion failure, if any.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            PipelineError::Conversion { diagnostics, .. } if !diagnostics.is_empty() => {
                Some(diagnostics)
            }
            _ => None,
        }
    }
}

/// Long-lived entry point. One instance serves any number of documents.
pub struct DocumentProcessor {
    conversion: ConversionConfig,
    settings: PipelineConfig,
    chain: Arc<[EngineTier]>,
    preprocess: Option<Arc<PreprocessClient>>,
}

impl DocumentProcessor {
    /// Build a processor with an explicit engine chain and no preprocessing.
    pub fn new(conversion: ConversionConfig, settings: PipelineConfig, chain: Vec<EngineTier>) -> Self {
        Self {
            conversion,
            settings,
            chain: chain.into(),
            preprocess: None,
        }
    }

    /// Build the configured chain of engines.
    pub fn from_config(config: &Config) -> Result<Self, OcrError> {
        let chain = config
            .pipeline
            .chain
            .iter()
            .map(|tier| -> Result<EngineTier, OcrError> {
                Ok(EngineTier::new(
                    build_backend(tier.engine, config)?,
                    tier.preprocessed,
                ))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let processor = Self::new(config.conversion.clone(), config.pipeline.clone(), chain);
        if config.preprocess.enabled {
            Ok(processor.with_preprocess(PreprocessClient::new(config.preprocess.clone())?))
        } else {
            Ok(processor)
        }
    }

    pub fn with_preprocess(mut self, client: PreprocessClient) -> Self {
        self.preprocess = Some(Arc::new(client));
        self
    }

    pub fn chain(&self) -> &[EngineTier] {
        &self.chain
    }

    pub fn preprocess_client(&self) -> Option<&PreprocessClient> {
        self.preprocess.as_deref()
    }

    fn scratch_dir(&self) -> Result<TempDir, PipelineError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("docintake-");
        let dir = match &self.settings.scratch_dir {
            Some(base) => std::fs::create_dir_all(base).and_then(|_| builder.tempdir_in(base)),
            None => builder.tempdir(),
        };
        dir.map_err(|e| PipelineError::conversion("cannot create scratch directory", e.to_string()))
    }

    /// Run the full pipeline on one document.
    pub async fn process_document(&self, path: &Path) -> Result<CombinedResult, PipelineError> {
        let start = Instant::now();
        let deadline = self
            .settings
            .document_timeout_secs
            .map(|secs| tokio::time::Instant::now() + Duration::from_secs(secs));

        let source = SourceDocument::from_path(path)?;
        info!("Processing {} ({})", path.display(), source.mime_type);

        let scratch = self.scratch_dir()?;
        let pages = convert_document(&source, scratch.path(), &self.conversion).await?;
        info!("{} page(s) to OCR", pages.len());

        let runner = PageRunner::new(
            self.chain.clone(),
            self.preprocess.clone(),
            self.settings.degraded_confidence,
            self.settings.normalize_text,
        );
        let outcomes = dispatch_pages(
            pages,
            &runner,
            self.settings.max_concurrent_pages,
            deadline,
            scratch.path(),
        )
        .await;

        let result = aggregate(outcomes, start.elapsed())?;

        if let Err(e) = scratch.close() {
            warn!("Failed to remove scratch directory: {}", e);
        }

        info!(
            "Processed {}: {} page(s), {:.1}% confidence via {} in {}ms",
            path.display(),
            result.page_count,
            result.confidence,
            result.processing_method,
            result.processing_time_ms
        );
        Ok(result)
    }
}

//! Document intake service.
//!
//! Runs a document through the pipeline and records its status in a
//! `DocumentStore` along the way: processing, then completed or failed.
//! Separated from UI concerns so the CLI and an embedding web layer share it.

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::pipeline::{CombinedResult, DocumentProcessor, PipelineError};
use crate::storage::{DocumentId, DocumentStore, StoreError};

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Cannot read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
}

/// Service gluing the processor to a store.
pub struct IntakeService {
    processor: Arc<DocumentProcessor>,
    store: Arc<dyn DocumentStore>,
}

impl IntakeService {
    pub fn new(processor: Arc<DocumentProcessor>, store: Arc<dyn DocumentStore>) -> Self {
        Self { processor, store }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Process a document, persisting its status and result.
    ///
    /// Unsupported files are rejected before anything is recorded.
    pub async fn submit(&self, path: &Path) -> Result<(DocumentId, CombinedResult), IntakeError> {
        crate::pipeline::SourceDocument::from_path(path)?;

        let id = DocumentId::from_file(path)
            .await
            .map_err(|source| IntakeError::Read {
                path: path.display().to_string(),
                source,
            })?;
        let source = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        self.store.mark_processing(&id, &source).await?;
        info!("Submitted {} as {}", source, id.short());

        match self.processor.process_document(path).await {
            Ok(result) => {
                self.store.write_result(&id, &result).await?;
                Ok((id, result))
            }
            Err(e) => {
                warn!("Processing {} failed: {}", id.short(), e);
                self.store.mark_failed(&id, &e.to_string()).await?;
                Err(e.into())
            }
        }
    }
}

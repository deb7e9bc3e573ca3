//! Persistence for processing status and results.
//!
//! The pipeline itself keeps nothing between runs; callers record progress
//! through a `DocumentStore`. Documents are keyed by the SHA-256 of their
//! content, so resubmitting the same file addresses the same record.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::pipeline::CombinedResult;

/// Errors from a document store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid document id: {0}")]
    InvalidId(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Content address of a submitted document (hex SHA-256).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Hash a file's contents.
    pub async fn from_file(path: &Path) -> std::io::Result<Self> {
        crate::ocr::pdf_utils::compute_file_hash(path)
            .await
            .map(DocumentId)
    }

    /// Accept a user-supplied id, which must be 64 hex characters.
    pub fn parse(s: &str) -> StoreResult<Self> {
        let s = s.trim().to_ascii_lowercase();
        if s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(DocumentId(s))
        } else {
            Err(StoreError::InvalidId(s))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 characters, for display.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a document is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProcessingStatus {
    Unknown,
    Processing,
    Completed {
        page_count: u32,
        confidence: f32,
        processing_method: String,
    },
    Failed {
        error: String,
    },
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Unknown => "unknown",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed { .. } => "completed",
            ProcessingStatus::Failed { .. } => "failed",
        }
    }
}

/// A stored record: latest status plus the result once there is one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: DocumentId,
    pub source: String,
    pub status: ProcessingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CombinedResult>,
    pub updated_at: DateTime<Utc>,
}

impl StoredDocument {
    fn new(id: &DocumentId, source: &str, status: ProcessingStatus) -> Self {
        Self {
            id: id.clone(),
            source: source.to_string(),
            status,
            result: None,
            updated_at: Utc::now(),
        }
    }
}

/// Persistence the pipeline's callers need: write a result, read a status.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn mark_processing(&self, id: &DocumentId, source: &str) -> StoreResult<()>;

    async fn write_result(&self, id: &DocumentId, result: &CombinedResult) -> StoreResult<()>;

    async fn mark_failed(&self, id: &DocumentId, error: &str) -> StoreResult<()>;

    async fn read(&self, id: &DocumentId) -> StoreResult<Option<StoredDocument>>;

    async fn read_status(&self, id: &DocumentId) -> StoreResult<ProcessingStatus> {
        Ok(self
            .read(id)
            .await?
            .map(|doc| doc.status)
            .unwrap_or(ProcessingStatus::Unknown))
    }
}

fn completed(result: &CombinedResult) -> ProcessingStatus {
    ProcessingStatus::Completed {
        page_count: result.page_count,
        confidence: result.confidence,
        processing_method: result.processing_method.clone(),
    }
}

/// In-process store.
#[derive(Default)]
pub struct MemoryStore {
    docs: RwLock<HashMap<DocumentId, StoredDocument>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn mark_processing(&self, id: &DocumentId, source: &str) -> StoreResult<()> {
        self.docs.write().await.insert(
            id.clone(),
            StoredDocument::new(id, source, ProcessingStatus::Processing),
        );
        Ok(())
    }

    async fn write_result(&self, id: &DocumentId, result: &CombinedResult) -> StoreResult<()> {
        let mut docs = self.docs.write().await;
        let doc = docs
            .entry(id.clone())
            .or_insert_with(|| StoredDocument::new(id, "", ProcessingStatus::Unknown));
        doc.status = completed(result);
        doc.result = Some(result.clone());
        doc.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_failed(&self, id: &DocumentId, error: &str) -> StoreResult<()> {
        let mut docs = self.docs.write().await;
        let doc = docs
            .entry(id.clone())
            .or_insert_with(|| StoredDocument::new(id, "", ProcessingStatus::Unknown));
        doc.status = ProcessingStatus::Failed {
            error: error.to_string(),
        };
        doc.result = None;
        doc.updated_at = Utc::now();
        Ok(())
    }

    async fn read(&self, id: &DocumentId) -> StoreResult<Option<StoredDocument>> {
        Ok(self.docs.read().await.get(id).cloned())
    }
}

/// One JSON file per document.
///
/// Uses a two-level directory structure based on id prefix:
/// `{dir}/{id[0..2]}/{id}.json`
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self, id: &DocumentId) -> PathBuf {
        let id = id.as_str();
        self.dir.join(&id[..2]).join(format!("{}.json", id))
    }

    async fn save(&self, doc: &StoredDocument) -> StoreResult<()> {
        let path = self.record_path(&doc.id);
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.dir.clone());
        tokio::fs::create_dir_all(&parent).await?;

        // Readers never see a half-written record
        let tmp = parent.join(format!(".{}.tmp", doc.id));
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(doc)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn update(
        &self,
        id: &DocumentId,
        apply: impl FnOnce(&mut StoredDocument) + Send,
    ) -> StoreResult<()> {
        let mut doc = self
            .read(id)
            .await?
            .unwrap_or_else(|| StoredDocument::new(id, "", ProcessingStatus::Unknown));
        apply(&mut doc);
        doc.updated_at = Utc::now();
        self.save(&doc).await
    }
}

#[async_trait]
impl DocumentStore for JsonFileStore {
    async fn mark_processing(&self, id: &DocumentId, source: &str) -> StoreResult<()> {
        self.save(&StoredDocument::new(id, source, ProcessingStatus::Processing))
            .await
    }

    async fn write_result(&self, id: &DocumentId, result: &CombinedResult) -> StoreResult<()> {
        self.update(id, |doc| {
            doc.status = completed(result);
            doc.result = Some(result.clone());
        })
        .await
    }

    async fn mark_failed(&self, id: &DocumentId, error: &str) -> StoreResult<()> {
        self.update(id, |doc| {
            doc.status = ProcessingStatus::Failed {
                error: error.to_string(),
            };
            doc.result = None;
        })
        .await
    }

    async fn read(&self, id: &DocumentId) -> StoreResult<Option<StoredDocument>> {
        match tokio::fs::read(self.record_path(id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

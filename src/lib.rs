//! docintake - scanned document intake and OCR orchestration.
//!
//! Rasterizes scanned PDFs and images, runs every page through a chain of
//! OCR engines with per-page fallback, and combines the pages into one
//! result with an overall confidence score.

pub mod config;
pub mod ocr;
pub mod pipeline;
pub mod services;
pub mod storage;

pub use config::Config;
pub use pipeline::{CombinedResult, DocumentProcessor, PipelineError};

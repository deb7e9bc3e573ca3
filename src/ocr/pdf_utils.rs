//! Document rasterization.
//!
//! Turns a source document into an ordered list of page images. Images pass
//! through untouched; PDFs are rendered by an external rasterizer into the
//! run's scratch directory.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use sha2::{Digest, Sha256};
use tokio::process::Command;
use tracing::debug;

use crate::config::{ConversionConfig, Rasterizer};
use crate::pipeline::{DocumentFormat, PageImage, PipelineError, SourceDocument};

/// Page index embedded in rasterizer output names (`page-1.png`, `page-01.png`).
static PAGE_INDEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-(\d+)\.png$").unwrap());

/// Compute SHA-256 hash of a file.
pub async fn compute_file_hash(path: &Path) -> std::io::Result<String> {
    let content = tokio::fs::read(path).await?;
    let mut hasher = Sha256::new();
    hasher.update(&content);
    Ok(hex::encode(hasher.finalize()))
}

/// Produce page images for a document.
pub async fn convert_document(
    source: &SourceDocument,
    scratch_dir: &Path,
    config: &ConversionConfig,
) -> Result<Vec<PageImage>, PipelineError> {
    match source.format {
        DocumentFormat::Image => Ok(vec![PageImage {
            page_number: 1,
            path: source.path.clone(),
        }]),
        DocumentFormat::Pdf => rasterize_pdf(&source.path, scratch_dir, config).await,
    }
}

fn rasterizer_command(pdf_path: &Path, scratch_dir: &Path, config: &ConversionConfig) -> Command {
    let density = config.density.to_string();
    let mut cmd = Command::new(config.binary());
    match config.rasterizer {
        Rasterizer::Pdftoppm => {
            cmd.args(["-png", "-r", &density])
                .arg(pdf_path)
                .arg(scratch_dir.join("page"));
        }
        Rasterizer::Imagemagick => {
            cmd.args(["-density", &density])
                .arg(pdf_path)
                .args([
                    "-background",
                    "white",
                    "-alpha",
                    "remove",
                    "-alpha",
                    "off",
                    "-quality",
                    "100",
                ])
                .arg(scratch_dir.join("page-%d.png"));
        }
    }
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

async fn rasterize_pdf(
    pdf_path: &Path,
    scratch_dir: &Path,
    config: &ConversionConfig,
) -> Result<Vec<PageImage>, PipelineError> {
    let limit = Duration::from_secs(config.timeout_secs);
    let output = rasterizer_command(pdf_path, scratch_dir, config).output();

    let output = match tokio::time::timeout(limit, output).await {
        Err(_) => {
            return Err(PipelineError::conversion(
                format!("{} timed out after {}s", config.binary(), limit.as_secs()),
                String::new(),
            ))
        }
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PipelineError::conversion(
                config.rasterizer.install_hint(),
                e.to_string(),
            ))
        }
        Ok(Err(e)) => {
            return Err(PipelineError::conversion(
                format!("failed to run {}", config.binary()),
                e.to_string(),
            ))
        }
        Ok(Ok(output)) => output,
    };

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if !output.status.success() {
        return Err(PipelineError::conversion(
            format!("{} exited with {}", config.binary(), output.status),
            stderr,
        ));
    }

    let pages = collect_pages(scratch_dir).await.map_err(|e| {
        PipelineError::conversion("failed to list rasterized pages", e.to_string())
    })?;
    if pages.is_empty() {
        return Err(PipelineError::conversion(
            format!("{} produced no pages", config.binary()),
            stderr,
        ));
    }

    debug!("Rasterized {} into {} pages", pdf_path.display(), pages.len());
    Ok(pages)
}

/// Find rendered pages in `dir`, ordered by embedded index and renumbered 1..N.
pub async fn collect_pages(dir: &Path) -> std::io::Result<Vec<PageImage>> {
    let mut found: Vec<(u64, PathBuf)> = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with("page") {
            continue;
        }
        if let Some(index) = PAGE_INDEX
            .captures(name)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok())
        {
            found.push((index, path));
        }
    }
    found.sort_by_key(|(index, _)| *index);

    Ok(found
        .into_iter()
        .enumerate()
        .map(|(i, (_, path))| PageImage {
            page_number: i as u32 + 1,
            path,
        })
        .collect())
}

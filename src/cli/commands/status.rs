//! Stored status lookup.

use console::style;

use crate::cli::icons::{arrow, error, success, warning};
use docintake::storage::{DocumentId, DocumentStore, JsonFileStore, ProcessingStatus};
use docintake::Config;

/// Show the stored status of a document.
pub async fn cmd_status(config: &Config, id: &str) -> anyhow::Result<()> {
    let id = DocumentId::parse(id)?;
    let store = JsonFileStore::new(config.storage_dir());

    let Some(doc) = store.read(&id).await? else {
        println!("{} No record for {}", warning(), id.short());
        println!("  {} Store: {}", arrow(), store.dir().display());
        return Ok(());
    };

    match &doc.status {
        ProcessingStatus::Completed {
            page_count,
            confidence,
            processing_method,
        } => {
            println!("{} {} completed", success(), style(&doc.source).bold());
            println!("  {} Pages: {}", arrow(), page_count);
            println!("  {} Confidence: {:.1}%", arrow(), confidence);
            println!("  {} Method: {}", arrow(), processing_method);
        }
        ProcessingStatus::Failed { error: message } => {
            println!("{} {} failed", error(), style(&doc.source).bold());
            println!("  {} {}", arrow(), message);
        }
        other => {
            println!("{} {} {}", warning(), style(&doc.source).bold(), other.as_str());
        }
    }
    println!(
        "  {} Updated: {}",
        arrow(),
        doc.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    Ok(())
}

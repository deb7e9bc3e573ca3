//! Document processing command.

use std::path::Path;
use std::sync::Arc;

use console::style;

use crate::cli::icons::{arrow, error, success, warning};
use docintake::pipeline::{CombinedResult, DocumentProcessor, PipelineError};
use docintake::services::{IntakeError, IntakeService};
use docintake::storage::JsonFileStore;
use docintake::Config;

/// Process one document and print the result.
pub async fn cmd_process(
    config: &Config,
    file: &Path,
    json: bool,
    no_store: bool,
) -> anyhow::Result<()> {
    let processor = Arc::new(DocumentProcessor::from_config(config)?);

    let outcome = if no_store {
        processor
            .process_document(file)
            .await
            .map(|result| (None, result))
            .map_err(IntakeError::from)
    } else {
        let store = Arc::new(JsonFileStore::new(config.storage_dir()));
        IntakeService::new(processor, store)
            .submit(file)
            .await
            .map(|(id, result)| (Some(id), result))
    };

    let (id, result) = match outcome {
        Ok(done) => done,
        Err(e) => {
            eprintln!("{} {}", error(), e);
            if let IntakeError::Pipeline(ref pipeline_err) = e {
                if let Some(diagnostics) = pipeline_err.diagnostics() {
                    eprintln!("  {} {}", arrow(), style(diagnostics).dim());
                }
                if matches!(pipeline_err, PipelineError::UnsupportedType(_)) {
                    eprintln!("  {} Supported: .pdf, .png, .jpg, .jpeg", arrow());
                }
            }
            std::process::exit(1);
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    print_summary(file, id.as_ref().map(|id| id.as_str()), &result);
    Ok(())
}

fn print_summary(file: &Path, id: Option<&str>, result: &CombinedResult) {
    println!(
        "{} {} ({} page{}, {:.1}% confidence)",
        success(),
        style(file.display()).bold(),
        result.page_count,
        if result.page_count == 1 { "" } else { "s" },
        result.confidence
    );
    if let Some(id) = id {
        println!("  {} Id: {}", arrow(), id);
    }
    println!("  {} Method: {}", arrow(), result.processing_method);
    println!("  {} Time: {}ms", arrow(), result.processing_time_ms);
    if !result.enhancements.is_empty() {
        let tags: Vec<&str> = result.enhancements.iter().map(String::as_str).collect();
        println!("  {} Enhancements: {}", arrow(), tags.join(", "));
    }
    if !result.degraded_pages.is_empty() {
        let pages: Vec<String> = result.degraded_pages.iter().map(u32::to_string).collect();
        println!(
            "{} No text could be extracted from page(s) {}",
            warning(),
            pages.join(", ")
        );
    }
    println!();
    println!("{}", result.extracted_text);
}

//! Page dispatch and result aggregation.
//!
//! Pages run as independent tasks, at most `max_concurrent_pages` at a time.
//! Each task owns exactly one output slot, and slots are reassembled by page
//! number, so completion order never leaks into the combined text.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::ocr::preprocess::Enhanced;

use super::fallback::PageRunner;
use super::types::{CombinedResult, PageBoundingBox, PageImage, PageOutcome};
use super::PipelineError;

/// Run every page through the fallback chain and collect outcomes in page
/// order.
///
/// Pages still unfinished at `deadline` degrade. Page images inside
/// `scratch_dir` are deleted once their outcome is captured.
pub async fn dispatch_pages(
    pages: Vec<PageImage>,
    runner: &PageRunner,
    max_concurrent_pages: usize,
    deadline: Option<Instant>,
    scratch_dir: &Path,
) -> Vec<PageOutcome> {
    let semaphore = Arc::new(Semaphore::new(max_concurrent_pages.max(1)));
    let mut slots = Vec::with_capacity(pages.len());

    for page in pages {
        let semaphore = semaphore.clone();
        let runner = runner.clone();
        let scratch_dir = scratch_dir.to_path_buf();
        let page_number = page.page_number;

        let handle = tokio::spawn(async move {
            // Outlives the timed future so a late page's enhanced image is
            // still cleaned up. A deadline hit while the enhancement request
            // is in flight loses the path the service would have returned.
            let mut enhanced = Enhanced::original(&page.path);
            let work = async {
                let _permit = semaphore.acquire().await;
                runner.run_with(&page, &mut enhanced).await
            };
            let run = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, work).await.ok(),
                None => Some(work.await),
            };

            if enhanced.is_enhanced(&page.path) {
                if let Err(e) = tokio::fs::remove_file(&enhanced.processed_image_path).await {
                    debug!(
                        "Could not remove {}: {}",
                        enhanced.processed_image_path.display(),
                        e
                    );
                }
            }

            let outcome = match run {
                Some(outcome) => outcome,
                None => {
                    warn!("Page {} missed the document deadline", page.page_number);
                    PageOutcome::degraded(page.page_number, runner.degraded_confidence())
                }
            };

            if page.path.starts_with(&scratch_dir) {
                if let Err(e) = tokio::fs::remove_file(&page.path).await {
                    debug!("Could not remove {}: {}", page.path.display(), e);
                }
            }
            outcome
        });
        slots.push((page_number, handle));
    }

    let (numbers, handles): (Vec<u32>, Vec<_>) = slots.into_iter().unzip();
    let joined = futures::future::join_all(handles).await;

    let mut outcomes: Vec<PageOutcome> = numbers
        .into_iter()
        .zip(joined)
        .map(|(page_number, joined)| match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Page {} task failed: {}", page_number, e);
                PageOutcome::degraded(page_number, runner.degraded_confidence())
            }
        })
        .collect();
    outcomes.sort_by_key(|o| o.page_number);
    outcomes
}

/// Label of the engine used by the most pages; ties go to the earliest page.
fn dominant_method(outcomes: &[PageOutcome]) -> String {
    let mut counts: HashMap<&'static str, usize> = HashMap::new();
    for outcome in outcomes {
        *counts.entry(outcome.engine_used.label()).or_default() += 1;
    }
    let max = counts.values().copied().max().unwrap_or(0);
    outcomes
        .iter()
        .map(|o| o.engine_used.label())
        .find(|label| counts.get(label) == Some(&max))
        .unwrap_or_default()
        .to_string()
}

/// Combine page outcomes into the document result.
pub fn aggregate(
    mut outcomes: Vec<PageOutcome>,
    elapsed: Duration,
) -> Result<CombinedResult, PipelineError> {
    if outcomes.is_empty() {
        return Err(PipelineError::conversion(
            "document produced no pages",
            String::new(),
        ));
    }
    outcomes.sort_by_key(|o| o.page_number);

    let page_count = outcomes.len() as u32;
    let confidence = (outcomes
        .iter()
        .map(|o| o.confidence.clamp(0.0, 100.0) as f64)
        .sum::<f64>()
        / outcomes.len() as f64) as f32;

    let extracted_text = outcomes
        .iter()
        .map(|o| o.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let processing_method = dominant_method(&outcomes);

    let degraded_pages = outcomes
        .iter()
        .filter(|o| o.is_degraded())
        .map(|o| o.page_number)
        .collect();

    let mut enhancements = BTreeSet::new();
    let mut bounding_boxes = Vec::new();
    for outcome in outcomes {
        enhancements.extend(outcome.enhancements_applied);
        bounding_boxes.extend(outcome.bounding_boxes.into_iter().map(|region| PageBoundingBox {
            page_number: outcome.page_number,
            region,
        }));
    }

    Ok(CombinedResult {
        extracted_text,
        confidence,
        page_count,
        processing_method,
        processing_time_ms: elapsed.as_millis() as u64,
        bounding_boxes,
        enhancements,
        degraded_pages,
    })
}

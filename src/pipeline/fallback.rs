//! Per-page fallback chain.
//!
//! Each page walks an explicit state machine: enhance the image, try the
//! primary engine, then each fallback engine in priority order, and finally
//! fall to a degraded placeholder. Engine errors never escape a page.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, warn};

use super::types::{PageEngine, PageImage, PageOutcome};
use crate::ocr::cleanup::{normalize_fields, normalize_page_text};
use crate::ocr::preprocess::{Enhanced, PreprocessClient};
use crate::ocr::OcrBackend;

/// One engine in the chain.
#[derive(Clone)]
pub struct EngineTier {
    pub backend: Arc<dyn OcrBackend>,
    /// Read the enhanced image rather than the original.
    pub preprocessed: bool,
}

impl EngineTier {
    pub fn new(backend: Arc<dyn OcrBackend>, preprocessed: bool) -> Self {
        Self {
            backend,
            preprocessed,
        }
    }
}

impl std::fmt::Debug for EngineTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineTier")
            .field("backend", &self.backend.backend_type())
            .field("preprocessed", &self.preprocessed)
            .finish()
    }
}

#[derive(Debug)]
enum PageState {
    Preprocess,
    OcrPrimary,
    OcrFallback { tier: usize },
    Degraded,
    Done(PageOutcome),
}

/// What a page run leaves behind.
#[derive(Debug)]
pub struct PageRun {
    pub outcome: PageOutcome,
    pub enhanced: Enhanced,
}

/// Runs the fallback chain for single pages. Cheap to clone into tasks.
#[derive(Clone)]
pub struct PageRunner {
    chain: Arc<[EngineTier]>,
    preprocess: Option<Arc<PreprocessClient>>,
    degraded_confidence: f32,
    normalize_fields: bool,
}

impl PageRunner {
    pub fn new(
        chain: Arc<[EngineTier]>,
        preprocess: Option<Arc<PreprocessClient>>,
        degraded_confidence: f32,
        normalize_fields: bool,
    ) -> Self {
        Self {
            chain,
            preprocess,
            degraded_confidence,
            normalize_fields,
        }
    }

    pub fn degraded_confidence(&self) -> f32 {
        self.degraded_confidence
    }

    fn wants_enhanced_image(&self) -> bool {
        self.chain.iter().any(|tier| tier.preprocessed)
    }

    /// Walk the chain for one page. Always produces an outcome.
    pub async fn run(&self, page: &PageImage) -> PageRun {
        let mut enhanced = Enhanced::original(&page.path);
        let outcome = self.run_with(page, &mut enhanced).await;
        PageRun { outcome, enhanced }
    }

    /// Like [`run`](Self::run), but the enhanced image lands in a slot the
    /// caller owns, so it is known even if this future is dropped midway.
    pub async fn run_with(&self, page: &PageImage, enhanced: &mut Enhanced) -> PageOutcome {
        let mut state = PageState::Preprocess;

        loop {
            state = match state {
                PageState::Preprocess => {
                    if let Some(client) = self.preprocess.as_deref() {
                        if self.wants_enhanced_image() {
                            *enhanced = client.enhance_or_original(&page.path).await;
                        }
                    }
                    PageState::OcrPrimary
                }
                PageState::OcrPrimary => match self.chain.first() {
                    Some(tier) => match self.try_tier(tier, page, enhanced).await {
                        Some(outcome) => PageState::Done(outcome),
                        None => PageState::OcrFallback { tier: 1 },
                    },
                    None => PageState::Degraded,
                },
                PageState::OcrFallback { tier } => match self.chain.get(tier) {
                    Some(next) => match self.try_tier(next, page, enhanced).await {
                        Some(outcome) => PageState::Done(outcome),
                        None => PageState::OcrFallback { tier: tier + 1 },
                    },
                    None => PageState::Degraded,
                },
                PageState::Degraded => {
                    warn!(
                        "Page {}: every engine failed, emitting placeholder",
                        page.page_number
                    );
                    PageState::Done(PageOutcome::degraded(
                        page.page_number,
                        self.degraded_confidence,
                    ))
                }
                PageState::Done(outcome) => return outcome,
            };
        }
    }

    /// One engine attempt. `None` moves the page to the next tier.
    async fn try_tier(
        &self,
        tier: &EngineTier,
        page: &PageImage,
        enhanced: &Enhanced,
    ) -> Option<PageOutcome> {
        let backend = &tier.backend;
        let kind = backend.backend_type();
        if !backend.is_available() {
            debug!(
                "Page {}: skipping {} ({})",
                page.page_number,
                kind,
                backend.availability_hint()
            );
            return None;
        }

        let image = if tier.preprocessed {
            &enhanced.processed_image_path
        } else {
            &page.path
        };

        let result = match backend.ocr_image(image).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Page {}: {} failed: {}", page.page_number, kind, e);
                return None;
            }
        };

        let mut text = normalize_page_text(&result.text);
        if self.normalize_fields {
            text = normalize_fields(&text);
        }
        if text.is_empty() {
            warn!("Page {}: {} returned no text", page.page_number, kind);
            return None;
        }

        debug!(
            "Page {}: {} succeeded ({:.1}%, {}ms, {})",
            page.page_number,
            kind,
            result.confidence,
            result.processing_time_ms,
            result.method.as_deref().unwrap_or("-")
        );

        let enhancements_applied = if tier.preprocessed && enhanced.is_enhanced(&page.path) {
            enhanced.enhancements_applied.iter().cloned().collect()
        } else {
            BTreeSet::new()
        };

        Some(PageOutcome {
            page_number: page.page_number,
            text,
            confidence: result.confidence.clamp(0.0, 100.0),
            bounding_boxes: result.bounding_boxes,
            enhancements_applied,
            engine_used: PageEngine::Ocr(kind),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::{OcrBackendType, OcrError, OcrOutput};
    use crate::pipeline::types::DEGRADED_MARKER;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Scripted {
        kind: OcrBackendType,
        available: bool,
        reply: Result<&'static str, &'static str>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(kind: OcrBackendType, reply: Result<&'static str, &'static str>) -> Arc<Self> {
            Arc::new(Self {
                kind,
                available: true,
                reply,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl OcrBackend for Scripted {
        fn backend_type(&self) -> OcrBackendType {
            self.kind
        }
        fn is_available(&self) -> bool {
            self.available
        }
        fn availability_hint(&self) -> String {
            "scripted".to_string()
        }
        fn timeout(&self) -> Duration {
            Duration::from_secs(5)
        }
        async fn run_ocr(&self, _image_path: &Path) -> Result<OcrOutput, OcrError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.reply {
                Ok(text) => Ok(OcrOutput {
                    text: text.to_string(),
                    confidence: 80.0,
                    ..Default::default()
                }),
                Err(msg) => Err(OcrError::OcrFailed(msg.to_string())),
            }
        }
    }

    fn page() -> PageImage {
        PageImage {
            page_number: 2,
            path: PathBuf::from("/scratch/page-2.png"),
        }
    }

    fn runner(chain: Vec<EngineTier>) -> PageRunner {
        PageRunner::new(chain.into(), None, 0.0, false)
    }

    #[tokio::test]
    async fn test_primary_success_stops_chain() {
        let primary = Scripted::new(OcrBackendType::PaddleOcr, Ok("Họ và tên"));
        let fallback = Scripted::new(OcrBackendType::Tesseract, Ok("unused"));
        let run = runner(vec![
            EngineTier::new(primary.clone(), true),
            EngineTier::new(fallback.clone(), false),
        ])
        .run(&page())
        .await;

        assert_eq!(run.outcome.text, "Họ và tên");
        assert_eq!(run.outcome.engine_used, PageEngine::Ocr(OcrBackendType::PaddleOcr));
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_blank_primary_falls_through() {
        let primary = Scripted::new(OcrBackendType::PaddleOcr, Ok("  \n "));
        let fallback = Scripted::new(OcrBackendType::Tesseract, Ok("Số CCCD"));
        let run = runner(vec![
            EngineTier::new(primary, true),
            EngineTier::new(fallback, false),
        ])
        .run(&page())
        .await;

        assert_eq!(run.outcome.text, "Số CCCD");
        assert_eq!(run.outcome.engine_used, PageEngine::Ocr(OcrBackendType::Tesseract));
        assert!(run.outcome.enhancements_applied.is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_engine_skipped() {
        let offline = Arc::new(Scripted {
            kind: OcrBackendType::Vision,
            available: false,
            reply: Ok("never"),
            calls: AtomicUsize::new(0),
        });
        let fallback = Scripted::new(OcrBackendType::Tesseract, Ok("text"));
        let run = runner(vec![
            EngineTier::new(offline.clone(), false),
            EngineTier::new(fallback, false),
        ])
        .run(&page())
        .await;

        assert_eq!(offline.calls.load(Ordering::SeqCst), 0);
        assert_eq!(run.outcome.engine_used, PageEngine::Ocr(OcrBackendType::Tesseract));
    }

    #[tokio::test]
    async fn test_all_failures_degrade() {
        let run = runner(vec![
            EngineTier::new(Scripted::new(OcrBackendType::PaddleOcr, Err("boom")), true),
            EngineTier::new(Scripted::new(OcrBackendType::Tesseract, Err("boom")), false),
        ])
        .run(&page())
        .await;

        assert_eq!(run.outcome.engine_used, PageEngine::Degraded);
        assert_eq!(run.outcome.confidence, 0.0);
        assert_eq!(run.outcome.text, "[Page 2: no text could be extracted]");
        assert!(run.outcome.enhancements_applied.contains(DEGRADED_MARKER));
    }

    #[tokio::test]
    async fn test_empty_chain_degrades() {
        let run = runner(Vec::new()).run(&page()).await;
        assert!(run.outcome.is_degraded());
    }
}

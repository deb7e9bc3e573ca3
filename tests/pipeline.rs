//! End-to-end pipeline tests.
//!
//! Engines are stubs keyed on the page image name; PDF rasterization is a
//! shell script standing in for pdftoppm, so these run on unix only.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use docintake::config::{ConversionConfig, PipelineConfig, Rasterizer};
use docintake::ocr::{OcrBackend, OcrBackendType, OcrError, OcrOutput};
use docintake::pipeline::{DocumentProcessor, EngineTier, PipelineError, DEGRADED_MARKER};
use docintake::services::{IntakeError, IntakeService};
use docintake::storage::{DocumentId, DocumentStore, MemoryStore, ProcessingStatus};

type Reply = Box<dyn Fn(u32) -> Result<(String, f32), OcrError> + Send + Sync>;

/// Engine whose answer depends only on the page number in the image name.
struct PageStub {
    kind: OcrBackendType,
    reply: Reply,
    delay: fn(u32) -> Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl PageStub {
    fn new(
        kind: OcrBackendType,
        reply: impl Fn(u32) -> Result<(String, f32), OcrError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            reply: Box::new(reply),
            delay: |_| Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    fn with_delay(mut self, delay: fn(u32) -> Duration) -> Self {
        self.delay = delay;
        self
    }
}

fn page_number_of(path: &Path) -> u32 {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.rsplit('-').next())
        .and_then(|n| n.parse().ok())
        .unwrap_or(1)
}

#[async_trait]
impl OcrBackend for PageStub {
    fn backend_type(&self) -> OcrBackendType {
        self.kind
    }
    fn is_available(&self) -> bool {
        true
    }
    fn availability_hint(&self) -> String {
        "stub".to_string()
    }
    fn timeout(&self) -> Duration {
        Duration::from_secs(10)
    }
    async fn run_ocr(&self, image_path: &Path) -> Result<OcrOutput, OcrError> {
        let page = page_number_of(image_path);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep((self.delay)(page)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let (text, confidence) = (self.reply)(page)?;
        Ok(OcrOutput {
            text,
            confidence,
            ..Default::default()
        })
    }
}

struct Fixture {
    dir: TempDir,
    scratch_base: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let scratch_base = dir.path().join("scratch");
        std::fs::create_dir(&scratch_base).unwrap();
        Self { dir, scratch_base }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn png(&self, name: &str) -> PathBuf {
        let path = self.path(name);
        image::RgbImage::from_pixel(8, 8, image::Rgb([255, 255, 255]))
            .save(&path)
            .unwrap();
        path
    }

    fn pdf(&self, name: &str) -> PathBuf {
        let path = self.path(name);
        std::fs::write(&path, b"%PDF-1.4\n% scanned form\n").unwrap();
        path
    }

    fn script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.path(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    /// A pdftoppm stand-in writing `pages` copies of a PNG as `<prefix>-N.png`.
    fn fake_pdftoppm(&self, pages: u32) -> PathBuf {
        let sample = self.png("sample.png");
        self.script(
            "pdftoppm",
            &format!(
                r#"prefix="$5"
i=1
while [ $i -le {pages} ]; do
  cp "{sample}" "$prefix-$i.png"
  i=$((i+1))
done"#,
                pages = pages,
                sample = sample.display()
            ),
        )
    }

    fn conversion(&self, binary: &Path) -> ConversionConfig {
        ConversionConfig {
            rasterizer: Rasterizer::Pdftoppm,
            binary: Some(binary.display().to_string()),
            density: 200,
            timeout_secs: 10,
        }
    }

    fn settings(&self) -> PipelineConfig {
        PipelineConfig {
            max_concurrent_pages: 4,
            document_timeout_secs: Some(60),
            degraded_confidence: 0.0,
            scratch_dir: Some(self.scratch_base.clone()),
            normalize_text: false,
            chain: Vec::new(),
        }
    }

    fn scratch_is_empty(&self) -> bool {
        std::fs::read_dir(&self.scratch_base).unwrap().count() == 0
    }
}

fn tier(stub: PageStub) -> EngineTier {
    EngineTier::new(Arc::new(stub), false)
}

#[tokio::test]
async fn test_page_order_survives_out_of_order_completion() {
    let fx = Fixture::new();
    let pdftoppm = fx.fake_pdftoppm(10);
    let engine = PageStub::new(OcrBackendType::PaddleOcr, |page| {
        Ok((format!("page {}", page), 80.0))
    })
    // Later pages finish first
    .with_delay(|page| Duration::from_millis(20 * (11 - page as u64)));

    let processor = DocumentProcessor::new(fx.conversion(&pdftoppm), fx.settings(), vec![tier(engine)]);
    let result = processor.process_document(&fx.pdf("form.pdf")).await.unwrap();

    let expected: Vec<String> = (1..=10).map(|n| format!("page {}", n)).collect();
    assert_eq!(result.page_count, 10);
    assert_eq!(result.extracted_text, expected.join("\n\n"));
    assert_eq!(result.extracted_text.matches("\n\n").count(), 9);
    assert_eq!(result.processing_method, "paddleocr");
    assert!(fx.scratch_is_empty());
}

#[tokio::test]
async fn test_concurrency_is_capped() {
    let fx = Fixture::new();
    let pdftoppm = fx.fake_pdftoppm(6);
    let engine = Arc::new(
        PageStub::new(OcrBackendType::Tesseract, |_| Ok(("text".to_string(), 70.0)))
            .with_delay(|_| Duration::from_millis(50)),
    );
    let mut settings = fx.settings();
    settings.max_concurrent_pages = 2;

    let processor = DocumentProcessor::new(
        fx.conversion(&pdftoppm),
        settings,
        vec![EngineTier::new(engine.clone(), false)],
    );
    processor.process_document(&fx.pdf("form.pdf")).await.unwrap();

    assert!(engine.peak.load(Ordering::SeqCst) <= 2);
    assert!(engine.peak.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_single_image_primary_success() {
    let fx = Fixture::new();
    let image = fx.png("invoice.png");
    let paddle = PageStub::new(OcrBackendType::PaddleOcr, |_| {
        Ok(("INVOICE #123".to_string(), 91.0))
    });
    let tesseract = PageStub::new(OcrBackendType::Tesseract, |_| {
        Ok(("should not run".to_string(), 60.0))
    });

    let processor = DocumentProcessor::new(
        fx.conversion(Path::new("pdftoppm")),
        fx.settings(),
        vec![tier(paddle), tier(tesseract)],
    );
    let result = processor.process_document(&image).await.unwrap();

    assert_eq!(result.page_count, 1);
    assert_eq!(result.confidence, 91.0);
    assert_eq!(result.extracted_text, "INVOICE #123");
    assert!(result.degraded_pages.is_empty());
    // The caller's image is never deleted
    assert!(image.exists());
    assert!(fx.scratch_is_empty());
}

#[tokio::test]
async fn test_failed_page_degrades_without_failing_document() {
    let fx = Fixture::new();
    let pdftoppm = fx.fake_pdftoppm(2);
    let primary = PageStub::new(OcrBackendType::PaddleOcr, |page| match page {
        1 => Ok(("Giấy chứng nhận".to_string(), 90.0)),
        _ => Err(OcrError::OcrFailed("model crashed".to_string())),
    });
    let fallback = PageStub::new(OcrBackendType::Tesseract, |_| Ok(("   ".to_string(), 60.0)));

    let processor = DocumentProcessor::new(
        fx.conversion(&pdftoppm),
        fx.settings(),
        vec![tier(primary), tier(fallback)],
    );
    let result = processor.process_document(&fx.pdf("two-pages.pdf")).await.unwrap();

    assert_eq!(result.page_count, 2);
    assert_eq!(result.confidence, 45.0);
    assert_eq!(result.degraded_pages, vec![2]);
    assert!(result.enhancements.contains(DEGRADED_MARKER));
    assert_eq!(
        result.extracted_text,
        "Giấy chứng nhận\n\n[Page 2: no text could be extracted]"
    );
}

#[tokio::test]
async fn test_confidence_stays_in_range() {
    let fx = Fixture::new();
    let pdftoppm = fx.fake_pdftoppm(3);
    let engine = PageStub::new(OcrBackendType::PaddleOcr, |page| match page {
        1 => Ok(("over".to_string(), 140.0)),
        2 => Ok(("under".to_string(), -5.0)),
        _ => Ok(("nan".to_string(), f32::NAN)),
    });

    let processor = DocumentProcessor::new(fx.conversion(&pdftoppm), fx.settings(), vec![tier(engine)]);
    let result = processor.process_document(&fx.pdf("form.pdf")).await.unwrap();

    assert!((0.0..=100.0).contains(&result.confidence));
    assert!((result.confidence - 100.0 / 3.0).abs() < 0.01);
}

#[tokio::test]
async fn test_document_deadline_degrades_slow_pages() {
    let fx = Fixture::new();
    let pdftoppm = fx.fake_pdftoppm(2);
    let engine = PageStub::new(OcrBackendType::PaddleOcr, |page| {
        Ok((format!("page {}", page), 88.0))
    })
    .with_delay(|page| {
        if page == 2 {
            Duration::from_secs(5)
        } else {
            Duration::ZERO
        }
    });
    let mut settings = fx.settings();
    settings.document_timeout_secs = Some(1);

    let processor = DocumentProcessor::new(fx.conversion(&pdftoppm), settings, vec![tier(engine)]);
    let result = processor.process_document(&fx.pdf("form.pdf")).await.unwrap();

    assert_eq!(result.degraded_pages, vec![2]);
    assert!(result.extracted_text.starts_with("page 1\n\n"));
    assert!(fx.scratch_is_empty());
}

#[tokio::test]
async fn test_unsupported_type_rejected_before_scratch() {
    let fx = Fixture::new();
    let docx = fx.path("form.docx");
    std::fs::write(&docx, b"PK\x03\x04").unwrap();
    let engine = Arc::new(PageStub::new(OcrBackendType::PaddleOcr, |_| {
        Ok(("x".to_string(), 1.0))
    }));

    let processor = DocumentProcessor::new(
        fx.conversion(Path::new("pdftoppm")),
        fx.settings(),
        vec![EngineTier::new(engine.clone(), false)],
    );
    let err = processor.process_document(&docx).await.unwrap_err();

    assert!(matches!(err, PipelineError::UnsupportedType(_)));
    assert!(fx.scratch_is_empty());
    assert_eq!(engine.peak.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_rasterizer_failure_carries_stderr() {
    let fx = Fixture::new();
    let broken = fx.script("pdftoppm", "echo 'Syntax Error: broken xref' >&2\nexit 1");
    let engine = PageStub::new(OcrBackendType::PaddleOcr, |_| Ok(("x".to_string(), 1.0)));

    let processor = DocumentProcessor::new(fx.conversion(&broken), fx.settings(), vec![tier(engine)]);
    let err = processor.process_document(&fx.pdf("bad.pdf")).await.unwrap_err();

    assert!(matches!(err, PipelineError::Conversion { .. }));
    assert_eq!(err.diagnostics(), Some("Syntax Error: broken xref"));
    assert!(fx.scratch_is_empty());
}

#[tokio::test]
async fn test_rasterizer_producing_nothing_fails() {
    let fx = Fixture::new();
    let silent = fx.script("pdftoppm", "exit 0");
    let engine = PageStub::new(OcrBackendType::PaddleOcr, |_| Ok(("x".to_string(), 1.0)));

    let processor = DocumentProcessor::new(fx.conversion(&silent), fx.settings(), vec![tier(engine)]);
    let err = processor.process_document(&fx.pdf("empty.pdf")).await.unwrap_err();

    assert!(matches!(err, PipelineError::Conversion { .. }));
    assert!(fx.scratch_is_empty());
}

#[tokio::test]
async fn test_intake_records_lifecycle() {
    let fx = Fixture::new();
    let image = fx.png("receipt.png");
    let engine = PageStub::new(OcrBackendType::Vision, |_| Ok(("Biên lai".to_string(), 85.0)));
    let processor = Arc::new(DocumentProcessor::new(
        fx.conversion(Path::new("pdftoppm")),
        fx.settings(),
        vec![tier(engine)],
    ));
    let store = Arc::new(MemoryStore::new());
    let intake = IntakeService::new(processor, store.clone());

    let (id, result) = intake.submit(&image).await.unwrap();
    assert_eq!(id, DocumentId::from_file(&image).await.unwrap());
    assert_eq!(
        store.read_status(&id).await.unwrap(),
        ProcessingStatus::Completed {
            page_count: 1,
            confidence: 85.0,
            processing_method: "vision".to_string(),
        }
    );
    assert_eq!(result.extracted_text, "Biên lai");
}

#[tokio::test]
async fn test_intake_records_failure() {
    let fx = Fixture::new();
    let broken = fx.script("pdftoppm", "exit 3");
    let engine = PageStub::new(OcrBackendType::PaddleOcr, |_| Ok(("x".to_string(), 1.0)));
    let processor = Arc::new(DocumentProcessor::new(
        fx.conversion(&broken),
        fx.settings(),
        vec![tier(engine)],
    ));
    let store = Arc::new(MemoryStore::new());
    let intake = IntakeService::new(processor, store.clone());

    let pdf = fx.pdf("bad.pdf");
    let err = intake.submit(&pdf).await.unwrap_err();
    assert!(matches!(err, IntakeError::Pipeline(PipelineError::Conversion { .. })));

    let id = DocumentId::from_file(&pdf).await.unwrap();
    assert!(matches!(
        store.read_status(&id).await.unwrap(),
        ProcessingStatus::Failed { .. }
    ));
}

//! End-to-end batch runs over synthetic page scans with mock OCR backends.

use async_trait::async_trait;
use hanscan::engine::{EngineParams, EngineStack, OcrEngine};
use hanscan::{ExtractionResult, Orchestrator, PipelineConfig, Result, Stage};
use image::GrayImage;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

struct CountingEngine {
    id: &'static str,
    text: &'static str,
    confidence: f32,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl OcrEngine for CountingEngine {
    fn id(&self) -> &'static str {
        self.id
    }

    async fn probe(&self) -> bool {
        true
    }

    async fn extract(&self, _image: &GrayImage, _params: &EngineParams) -> Result<ExtractionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ExtractionResult {
            text: self.text.to_string(),
            confidence: self.confidence,
            engine_id: self.id.to_string(),
        })
    }
}

fn mock_stack(calls: Arc<AtomicUsize>) -> EngineStack {
    let engine = Arc::new(CountingEngine {
        id: "mock",
        text: "페이지 본문 텍스트입니다.",
        confidence: 0.95,
        calls,
    });
    EngineStack::from_engines(
        vec![engine],
        EngineParams {
            languages: "kor+eng".to_string(),
            use_gpu: false,
        },
        Duration::from_secs(30),
        0.7,
    )
}

/// White page with rows of word-like dashes; passes the quality gate and
/// keeps each band's ink density in the text range (solid bars would be
/// classified as figures). Dashes are staggered per row so no full-height
/// blank column looks like a column gutter.
fn sharp_page() -> GrayImage {
    let mut img = GrayImage::from_pixel(400, 300, image::Luma([255u8]));
    for band in 0..8u32 {
        let top = 20 + band * 34;
        let offset = (band % 4) * 6;
        let mut x = 30 + offset;
        while x + 8 <= 370 {
            for y in top..top + 16 {
                for dx in 0..8 {
                    img.put_pixel(x + dx, y, image::Luma([10u8]));
                }
            }
            x += 24;
        }
    }
    img
}

/// Uniform gray page; fails both the sharpness and contrast floors.
fn degraded_page() -> GrayImage {
    GrayImage::from_pixel(400, 300, image::Luma([200u8]))
}

/// Three pages with page 2 degraded below the quality floors.
fn write_book(dir: &Path) {
    sharp_page().save(dir.join("page_0001.png")).unwrap();
    degraded_page().save(dir.join("page_0002.png")).unwrap();
    sharp_page().save(dir.join("page_0003.png")).unwrap();
}

fn config(dir: &Path) -> PipelineConfig {
    PipelineConfig::new(dir)
}

#[tokio::test]
async fn test_three_page_batch_flags_degraded_page() {
    let dir = TempDir::new().unwrap();
    write_book(dir.path());

    let calls = Arc::new(AtomicUsize::new(0));
    let orchestrator = Orchestrator::with_stack(
        config(dir.path()),
        Arc::new(AtomicBool::new(false)),
        mock_stack(calls.clone()),
    )
    .unwrap();
    let summary = orchestrator.run().await.unwrap();

    assert_eq!(summary.pages_total, 3);
    assert_eq!(summary.pages_processed, 3);
    assert_eq!(summary.failed_pages, Vec::<u32>::new());
    assert_eq!(summary.flagged_pages, vec![2]);
    assert!(!summary.interrupted);
    assert!(calls.load(Ordering::SeqCst) >= 3);

    let book_path = summary.document.expect("document should be assembled");
    let book = std::fs::read_to_string(&book_path).unwrap();
    assert!(book.contains("<!-- page 1 -->"));
    assert!(book.contains("<!-- page 2 -->"));
    assert!(book.contains("<!-- page 3 -->"));
    // The degraded page still carries its best-effort text plus the marker.
    assert!(book.contains("<!-- review: page 2 -->"));
    assert!(book.contains("페이지 본문 텍스트입니다."));

    let metadata = std::fs::read_to_string(dir.path().join("ocr_output/book_metadata.json")).unwrap();
    let metadata: serde_json::Value = serde_json::from_str(&metadata).unwrap();
    assert_eq!(metadata["flagged_pages"], serde_json::json!([2]));
    assert_eq!(metadata["total_pages"], 3);
}

#[tokio::test]
async fn test_resume_performs_zero_engine_calls() {
    let dir = TempDir::new().unwrap();
    write_book(dir.path());

    let first_calls = Arc::new(AtomicUsize::new(0));
    let orchestrator = Orchestrator::with_stack(
        config(dir.path()),
        Arc::new(AtomicBool::new(false)),
        mock_stack(first_calls.clone()),
    )
    .unwrap();
    let first = orchestrator.run().await.unwrap();
    assert!(first_calls.load(Ordering::SeqCst) > 0);
    let first_book = std::fs::read_to_string(first.document.unwrap()).unwrap();

    let mut resumed_config = config(dir.path());
    resumed_config.resume = true;
    let second_calls = Arc::new(AtomicUsize::new(0));
    let orchestrator = Orchestrator::with_stack(
        resumed_config,
        Arc::new(AtomicBool::new(false)),
        mock_stack(second_calls.clone()),
    )
    .unwrap();
    let second = orchestrator.run().await.unwrap();

    assert_eq!(second_calls.load(Ordering::SeqCst), 0, "resume must not call any engine");
    assert_eq!(second.pages_skipped, 3);
    assert_eq!(second.pages_processed, 0);

    // Assembly from identical records is byte-identical.
    let second_book = std::fs::read_to_string(second.document.unwrap()).unwrap();
    assert_eq!(first_book, second_book);
}

#[tokio::test]
async fn test_force_recomputes_resumed_pages() {
    let dir = TempDir::new().unwrap();
    write_book(dir.path());

    let orchestrator = Orchestrator::with_stack(
        config(dir.path()),
        Arc::new(AtomicBool::new(false)),
        mock_stack(Arc::new(AtomicUsize::new(0))),
    )
    .unwrap();
    orchestrator.run().await.unwrap();

    let mut forced = config(dir.path());
    forced.resume = true;
    forced.force = true;
    let calls = Arc::new(AtomicUsize::new(0));
    let orchestrator = Orchestrator::with_stack(
        forced,
        Arc::new(AtomicBool::new(false)),
        mock_stack(calls.clone()),
    )
    .unwrap();
    let summary = orchestrator.run().await.unwrap();

    assert_eq!(summary.pages_skipped, 0);
    assert_eq!(summary.pages_processed, 3);
    assert!(calls.load(Ordering::SeqCst) >= 3);
}

#[tokio::test]
async fn test_quality_check_only_stops_after_preprocess() {
    let dir = TempDir::new().unwrap();
    write_book(dir.path());

    let mut cfg = config(dir.path());
    cfg.quality_check_only = true;
    let orchestrator = Orchestrator::new(cfg, Arc::new(AtomicBool::new(false))).unwrap();
    let summary = orchestrator.run().await.unwrap();

    assert_eq!(summary.pages_total, 3);
    assert_eq!(summary.flagged_pages, vec![2]);
    assert!(summary.document.is_none());
    assert!(!dir.path().join("ocr_output/book.md").exists());
    // No crops are written in this mode, so no images directory either.
    assert!(!dir.path().join("ocr_output/images").exists());

    // The persisted stage satisfies a later quality-only resume.
    let mut resumed = config(dir.path());
    resumed.quality_check_only = true;
    resumed.resume = true;
    let orchestrator = Orchestrator::new(resumed, Arc::new(AtomicBool::new(false))).unwrap();
    let summary = orchestrator.run().await.unwrap();
    assert_eq!(summary.pages_skipped, 3);
}

#[tokio::test]
async fn test_page_range_limits_scope() {
    let dir = TempDir::new().unwrap();
    write_book(dir.path());

    let mut cfg = config(dir.path());
    cfg.page_start = 1;
    cfg.page_end = 2;
    let orchestrator = Orchestrator::with_stack(
        cfg,
        Arc::new(AtomicBool::new(false)),
        mock_stack(Arc::new(AtomicUsize::new(0))),
    )
    .unwrap();
    let summary = orchestrator.run().await.unwrap();

    assert_eq!(summary.pages_total, 2);
    let book = std::fs::read_to_string(summary.document.unwrap()).unwrap();
    assert!(book.contains("<!-- page 1 -->"));
    assert!(book.contains("<!-- page 2 -->"));
    assert!(!book.contains("<!-- page 3 -->"));
}

/// Raises the shutdown flag from inside its first call, like an operator
/// hitting ctrl-c while a page is mid-OCR.
struct InterruptingEngine {
    flag: Arc<AtomicBool>,
}

#[async_trait]
impl OcrEngine for InterruptingEngine {
    fn id(&self) -> &'static str {
        "mock"
    }

    async fn probe(&self) -> bool {
        true
    }

    async fn extract(&self, _image: &GrayImage, _params: &EngineParams) -> Result<ExtractionResult> {
        self.flag.store(true, Ordering::SeqCst);
        Ok(ExtractionResult {
            text: "중단 직전의 본문입니다.".to_string(),
            confidence: 0.95,
            engine_id: "mock".to_string(),
        })
    }
}

#[tokio::test]
async fn test_interrupt_finishes_current_page_checkpoint() {
    let dir = TempDir::new().unwrap();
    write_book(dir.path());

    let shutdown = Arc::new(AtomicBool::new(false));
    let stack = EngineStack::from_engines(
        vec![Arc::new(InterruptingEngine {
            flag: shutdown.clone(),
        })],
        EngineParams {
            languages: "kor+eng".to_string(),
            use_gpu: false,
        },
        Duration::from_secs(30),
        0.7,
    );
    let orchestrator = Orchestrator::with_stack(config(dir.path()), shutdown, stack).unwrap();
    let summary = orchestrator.run().await.unwrap();

    assert!(summary.interrupted);
    assert_eq!(summary.pages_processed, 1);
    assert!(summary.document.is_none());

    // The in-flight page's checkpoint was completed before stopping.
    let store = hanscan::CheckpointStore::open(
        &config(dir.path()).checkpoint_dir(),
        config(dir.path()).fingerprint(),
    )
    .unwrap();
    let record = store.load(1).expect("interrupted run must persist the in-flight page");
    assert_eq!(record.stage, Stage::Done);
    assert!(!record.text.is_empty());
    assert!(store.load(2).is_none());

    // Resume finishes the remaining pages without revisiting page 1.
    let mut resumed = config(dir.path());
    resumed.resume = true;
    let calls = Arc::new(AtomicUsize::new(0));
    let orchestrator = Orchestrator::with_stack(
        resumed,
        Arc::new(AtomicBool::new(false)),
        mock_stack(calls.clone()),
    )
    .unwrap();
    let summary = orchestrator.run().await.unwrap();

    assert!(!summary.interrupted);
    assert_eq!(summary.pages_skipped, 1);
    assert_eq!(summary.pages_processed, 2);
    assert!(summary.document.is_some());
}

#[tokio::test]
async fn test_failed_page_is_contained() {
    let dir = TempDir::new().unwrap();
    write_book(dir.path());
    // Page 4 exists but is not a decodable image.
    std::fs::write(dir.path().join("page_0004.png"), b"not a png").unwrap();

    let orchestrator = Orchestrator::with_stack(
        config(dir.path()),
        Arc::new(AtomicBool::new(false)),
        mock_stack(Arc::new(AtomicUsize::new(0))),
    )
    .unwrap();
    let summary = orchestrator.run().await.unwrap();

    assert_eq!(summary.pages_total, 4);
    assert_eq!(summary.failed_pages, vec![4]);
    // Failed pages are flagged and the document is still produced.
    assert!(summary.flagged_pages.contains(&4));
    let book = std::fs::read_to_string(summary.document.unwrap()).unwrap();
    assert!(book.contains("<!-- page 4 -->"));
}

#[tokio::test]
async fn test_done_records_satisfy_resume_stage() {
    let dir = TempDir::new().unwrap();
    write_book(dir.path());

    let orchestrator = Orchestrator::with_stack(
        config(dir.path()),
        Arc::new(AtomicBool::new(false)),
        mock_stack(Arc::new(AtomicUsize::new(0))),
    )
    .unwrap();
    orchestrator.run().await.unwrap();

    let store = hanscan::CheckpointStore::open(
        &config(dir.path()).checkpoint_dir(),
        config(dir.path()).fingerprint(),
    )
    .unwrap();
    for page in [1u32, 2, 3] {
        let record = store.load(page).expect("record should exist");
        assert_eq!(record.stage, Stage::Done);
        assert!(!record.text.is_empty());
    }
}

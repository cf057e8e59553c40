//! Batch orchestration: the per-page state machine and the run loop.
//!
//! Preprocessing and layout are CPU-bound and run ahead of the OCR stage
//! through a bounded channel, so the next page is already prepared while
//! the current one sits in a backend call. OCR itself is sequential per
//! page; the [`EngineStack`] additionally serializes accelerator-bound
//! backends.
//!
//! Per-page failures never abort the batch. Only an unreadable input
//! directory or a checkpoint write failure is fatal. An external interrupt
//! (the shutdown flag) takes effect after the current page's checkpoint
//! save completes, so the store never sees a torn record.

use crate::assemble;
use crate::checkpoint::CheckpointStore;
use crate::config::PipelineConfig;
use crate::engine::EngineStack;
use crate::error::{HanscanError, Result};
use crate::pages::{self, PageSource};
use crate::postprocess;
use crate::preprocess;
use crate::types::{CheckpointRecord, QualityReport, Region, Stage, Verdict};
use crate::layout;
use image::GrayImage;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Outcome of one batch run.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    pub pages_total: usize,
    pub pages_processed: usize,
    pub pages_skipped: usize,
    pub failed_pages: Vec<u32>,
    pub flagged_pages: Vec<u32>,
    pub gaps: Vec<u32>,
    pub mean_confidence: f32,
    /// Path of the written document, when assembly ran.
    pub document: Option<PathBuf>,
    /// True when the run stopped early on the shutdown flag.
    pub interrupted: bool,
}

/// Result of the CPU-bound stages for one page, handed to the OCR loop.
struct PreparedPage {
    source: PageSource,
    outcome: Result<Prepared>,
}

struct Prepared {
    image: GrayImage,
    quality: QualityReport,
    regions: Vec<Region>,
}

pub struct Orchestrator {
    config: PipelineConfig,
    shutdown: Arc<AtomicBool>,
    stack: Option<Arc<EngineStack>>,
}

impl Orchestrator {
    pub fn new(config: PipelineConfig, shutdown: Arc<AtomicBool>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            shutdown,
            stack: None,
        })
    }

    /// Use an already-assembled engine stack instead of probing the
    /// configured backends at startup.
    pub fn with_stack(
        config: PipelineConfig,
        shutdown: Arc<AtomicBool>,
        stack: EngineStack,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            shutdown,
            stack: Some(Arc::new(stack)),
        })
    }

    /// Run the batch to completion (or until the shutdown flag is raised).
    pub async fn run(&self) -> Result<BatchSummary> {
        let pages = pages::discover_pages(
            &self.config.input_dir,
            self.config.page_start,
            self.config.page_end,
        )?;
        if pages.is_empty() {
            return Err(HanscanError::validation(format!(
                "No page images found in {}",
                self.config.input_dir.display()
            )));
        }
        let gaps = pages::find_gaps(&pages);
        if !gaps.is_empty() {
            tracing::warn!(?gaps, "missing page indices in input directory");
        }

        // Quality-only runs never write crops, so no images directory.
        if !self.config.quality_check_only {
            std::fs::create_dir_all(self.config.images_dir())?;
        }
        let store = CheckpointStore::open(&self.config.checkpoint_dir(), self.config.fingerprint())?;

        let min_stage = if self.config.quality_check_only {
            Stage::Preprocessed
        } else {
            Stage::Done
        };

        let satisfied = self.satisfied_pages(&store, &pages, min_stage)?;
        let work: Vec<PageSource> = pages
            .iter()
            .filter(|p| !satisfied.contains(&p.index))
            .cloned()
            .collect();
        tracing::info!(
            total = pages.len(),
            skipped = satisfied.len(),
            to_process = work.len(),
            "batch starting"
        );

        let stack: Option<Arc<EngineStack>> = if self.config.quality_check_only || work.is_empty() {
            None
        } else if let Some(stack) = &self.stack {
            Some(stack.clone())
        } else {
            let stack = EngineStack::for_config(&self.config).await?;
            tracing::info!(engines = ?stack.engine_ids(), "fallback chain assembled");
            Some(Arc::new(stack))
        };

        let mut processed = 0usize;
        let mut interrupted = false;

        let mut rx = self.spawn_preparer(work);
        while let Some(prepared) = rx.recv().await {
            let page_index = prepared.source.index;
            let record = match prepared.outcome {
                Ok(page) => self.process_page(page_index, page, stack.as_deref()).await,
                Err(e) => {
                    tracing::warn!(page = page_index, error = %e, "page failed before OCR");
                    CheckpointRecord::new(page_index, Stage::Failed)
                }
            };

            // A write failure here is the one per-page error that is fatal.
            store.save(&record)?;
            processed += 1;

            if self.shutdown.load(Ordering::SeqCst) {
                tracing::info!(page = page_index, "shutdown requested, stopping after this page");
                interrupted = true;
                break;
            }
        }
        drop(rx);

        if let Some(stack) = &stack {
            tracing::info!(usage = ?stack.usage(), "engine usage for this run");
        }

        self.finish(&store, &pages, gaps, min_stage, processed, satisfied.len(), interrupted)
    }

    /// Pages whose checkpoints already satisfy the requested stage. Forced
    /// runs clear those records instead; non-resume runs recompute but keep
    /// the old records until overwritten.
    fn satisfied_pages(
        &self,
        store: &CheckpointStore,
        pages: &[PageSource],
        min_stage: Stage,
    ) -> Result<BTreeSet<u32>> {
        if self.config.force {
            for page in pages {
                store.remove(page.index)?;
            }
            return Ok(BTreeSet::new());
        }
        if !self.config.resume {
            return Ok(BTreeSet::new());
        }
        let mut satisfied = store.list_completed(min_stage)?;
        satisfied.retain(|index| pages.iter().any(|p| p.index == *index));
        Ok(satisfied)
    }

    /// Producer task: decode, assess, correct, and lay out pages ahead of
    /// the OCR loop, bounded by `prefetch_pages`.
    fn spawn_preparer(&self, work: Vec<PageSource>) -> mpsc::Receiver<PreparedPage> {
        let (tx, rx) = mpsc::channel(self.config.prefetch_pages.max(1));
        let config = self.config.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            for source in work {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                let page = source.clone();
                let cfg = config.clone();
                let outcome = tokio::task::spawn_blocking(move || prepare_page(&page, &cfg))
                    .await
                    .unwrap_or_else(|e| {
                        Err(HanscanError::Other(format!("preprocessing task panicked: {e}")))
                    });

                if tx.send(PreparedPage { source, outcome }).await.is_err() {
                    break;
                }
            }
        });

        rx
    }

    /// OCR, postprocess, and build the checkpoint record for one prepared
    /// page. Failures are contained: the page comes back `Failed`.
    async fn process_page(
        &self,
        page_index: u32,
        page: Prepared,
        stack: Option<&EngineStack>,
    ) -> CheckpointRecord {
        let mut record = CheckpointRecord::new(page_index, Stage::Preprocessed);
        record.quality = Some(page.quality.clone());

        if self.config.quality_check_only {
            tracing::debug!(page = page_index, verdict = ?page.quality.verdict, "quality check only");
            return record;
        }

        let Some(stack) = stack else {
            // Unreachable in practice; the stack exists whenever OCR runs.
            record.stage = Stage::Failed;
            return record;
        };

        let mut regions = page.regions;
        record.stage = Stage::LaidOut;

        for region in &mut regions {
            if region.kind.is_textual() {
                let crop = crop_region(&page.image, region);
                let result = stack.extract(&crop).await;
                region.text = result.text;
                region.confidence = result.confidence;
                region.engine_id = result.engine_id;
            } else if let Err(e) = self.extract_crop_image(&page.image, page_index, region) {
                tracing::warn!(page = page_index, region = region.index, error = %e, "figure crop not saved");
            }
        }
        record.stage = Stage::OcrDone;

        let page_text = postprocess::correct_page(&mut regions, self.config.confidence_floor);
        record.regions = regions;
        record.text = page_text.text;
        record.confidence = page_text.confidence;
        record.discarded = page_text.discarded;
        record.needs_review = page_text.needs_review || page.quality.verdict == Verdict::Fail;
        record.stage = Stage::Done;

        tracing::info!(
            page = page_index,
            confidence = record.confidence,
            needs_review = record.needs_review,
            "page done"
        );
        record
    }

    /// Save a figure/table crop under the images directory and point the
    /// region at it with a document-relative path.
    fn extract_crop_image(
        &self,
        image: &GrayImage,
        page_index: u32,
        region: &mut Region,
    ) -> Result<()> {
        let filename = format!("page_{page_index:04}_region_{}.png", region.index);
        let path = self.config.images_dir().join(&filename);
        crop_region(image, region)
            .save_with_format(&path, image::ImageFormat::Png)
            .map_err(|e| {
                HanscanError::image_processing_with_source(
                    format!("Failed to save crop {}", path.display()),
                    e,
                )
            })?;
        region.extracted_image = Some(format!("images/{filename}"));
        Ok(())
    }

    /// Assemble and write the document when every in-scope page is
    /// terminal; otherwise report what was done.
    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        store: &CheckpointStore,
        pages: &[PageSource],
        gaps: Vec<u32>,
        min_stage: Stage,
        processed: usize,
        skipped: usize,
        interrupted: bool,
    ) -> Result<BatchSummary> {
        let mut records = Vec::with_capacity(pages.len());
        for page in pages {
            match store.load(page.index) {
                Some(record) if record.stage.satisfies(min_stage) => records.push(record),
                _ => {}
            }
        }
        let all_terminal = records.len() == pages.len();

        let mut summary = BatchSummary {
            pages_total: pages.len(),
            pages_processed: processed,
            pages_skipped: skipped,
            failed_pages: records
                .iter()
                .filter(|r| r.stage == Stage::Failed)
                .map(|r| r.page_index)
                .collect(),
            flagged_pages: Vec::new(),
            gaps,
            mean_confidence: 0.0,
            document: None,
            interrupted,
        };

        if self.config.quality_check_only {
            summary.flagged_pages = records
                .iter()
                .filter(|r| r.verdict() == Some(Verdict::Fail))
                .map(|r| r.page_index)
                .collect();
            return Ok(summary);
        }

        if !all_terminal {
            tracing::warn!(
                terminal = records.len(),
                total = pages.len(),
                "not all pages terminal, skipping document assembly"
            );
            return Ok(summary);
        }

        let mut document = assemble::assemble(
            &records,
            &self.config.input_dir,
            summary.gaps.clone(),
            self.config.confidence_floor,
        );
        document.metadata.created_at_epoch = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let book_path = self.config.output_dir().join("book.md");
        std::fs::write(&book_path, &document.markdown)?;
        let metadata_path = self.config.output_dir().join("book_metadata.json");
        std::fs::write(&metadata_path, serde_json::to_vec_pretty(&document.metadata)?)?;
        tracing::info!(path = %book_path.display(), "document written");

        summary.flagged_pages = document.metadata.flagged_pages.clone();
        summary.mean_confidence = document.metadata.mean_confidence;
        summary.document = Some(book_path);
        Ok(summary)
    }
}

/// CPU-bound half of the page state machine: decode, assess, correct,
/// and analyze layout.
fn prepare_page(source: &PageSource, config: &PipelineConfig) -> Result<Prepared> {
    let image = image::open(&source.path)
        .map_err(|e| {
            HanscanError::image_processing_with_source(
                format!("Failed to decode {}", source.path.display()),
                e,
            )
        })?
        .into_luma8();

    let quality = preprocess::assess(&image, &config.quality);
    tracing::debug!(
        page = source.index,
        verdict = ?quality.verdict,
        sharpness = quality.sharpness,
        "quality assessed"
    );

    if config.quality_check_only {
        return Ok(Prepared {
            image,
            quality,
            regions: Vec::new(),
        });
    }

    let corrected = preprocess::correct(image, &quality, &config.quality);
    let regions = layout::analyze(&corrected);

    Ok(Prepared {
        image: corrected,
        quality,
        regions,
    })
}

/// Crop a region's bounding box out of the page image.
fn crop_region(image: &GrayImage, region: &Region) -> GrayImage {
    let bbox = &region.bbox;
    let x = bbox.x.min(image.width().saturating_sub(1));
    let y = bbox.y.min(image.height().saturating_sub(1));
    let width = bbox.width.min(image.width() - x).max(1);
    let height = bbox.height.min(image.height() - y).max(1);
    image::imageops::crop_imm(image, x, y, width, height).to_image()
}

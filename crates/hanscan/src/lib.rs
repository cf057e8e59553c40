//! Hanscan - Checkpointed OCR Pipeline for Korean Book Scans
//!
//! Hanscan turns a directory of captured page images (`page_NNNN.png`) into
//! one corrected, reading-order markdown document plus a metadata record.
//! Every page's progress is checkpointed atomically, so an interrupted run
//! resumes without repeating any OCR work.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use hanscan::{Orchestrator, PipelineConfig};
//! use std::sync::Arc;
//! use std::sync::atomic::AtomicBool;
//!
//! # #[tokio::main]
//! # async fn main() -> hanscan::Result<()> {
//! let config = PipelineConfig::new("/scans/mybook");
//! let orchestrator = Orchestrator::new(config, Arc::new(AtomicBool::new(false)))?;
//! let summary = orchestrator.run().await?;
//! println!("{} pages, {} flagged", summary.pages_total, summary.flagged_pages.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **Preprocessor** (`preprocess`): quality gating (sharpness, contrast,
//!   brightness, skew) plus corrective transforms
//! - **LayoutAnalyzer** (`layout`): region detection and reading order
//! - **OCREngine** (`engine`): subprocess backends (Tesseract, EasyOCR)
//!   behind an ordered fallback stack with per-call timeouts
//! - **Postprocessor** (`postprocess`): Korean jamo repair, wrapped-line
//!   merge, confidence grading
//! - **CheckpointStore** (`checkpoint`): atomic per-page JSON records
//! - **MarkdownBuilder** (`assemble`): idempotent document assembly
//! - **Orchestrator** (`pipeline`): the batch loop, execution modes, and
//!   cancellation

#![deny(unsafe_code)]

pub mod assemble;
pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod error;
pub mod layout;
pub mod pages;
pub mod pipeline;
pub mod postprocess;
pub mod preprocess;
pub mod types;

pub use checkpoint::CheckpointStore;
pub use config::{PipelineConfig, QualityConfig};
pub use engine::{EngineStack, OcrEngine};
pub use error::{HanscanError, Result};
pub use pipeline::{BatchSummary, Orchestrator};
pub use types::*;

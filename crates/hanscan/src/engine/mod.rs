//! OCR backend abstraction.
//!
//! Backends are external programs driven over a subprocess boundary, so a
//! missing backend is a configuration fact discovered by [`OcrEngine::probe`]
//! at startup, never a runtime surprise. The [`EngineStack`] owns the
//! ordered fallback chain, per-call timeouts, and accelerator serialization.

pub mod easyocr;
pub mod stack;
pub mod tesseract;

pub use easyocr::EasyOcrEngine;
pub use stack::EngineStack;
pub use tesseract::TesseractEngine;

use crate::error::{HanscanError, Result};
use crate::types::ExtractionResult;
use async_trait::async_trait;
use image::GrayImage;
use tempfile::NamedTempFile;

/// Per-call parameters shared by all backends.
#[derive(Debug, Clone)]
pub struct EngineParams {
    /// Language spec in Tesseract notation, e.g. `"kor+eng"`.
    pub languages: String,
    pub use_gpu: bool,
}

/// One OCR backend.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Stable identifier recorded in checkpoints and metadata.
    fn id(&self) -> &'static str;

    /// Engines holding exclusive accelerator state get one in-flight call
    /// at a time.
    fn accelerator_bound(&self) -> bool {
        false
    }

    /// One-time availability check, run at startup.
    async fn probe(&self) -> bool;

    /// Extract text from one region crop.
    async fn extract(&self, image: &GrayImage, params: &EngineParams) -> Result<ExtractionResult>;
}

/// Write a region crop to a temp PNG for a subprocess backend. The file is
/// removed when the returned handle drops.
pub(crate) fn write_crop(image: &GrayImage) -> Result<NamedTempFile> {
    let file = tempfile::Builder::new()
        .prefix("hanscan-region-")
        .suffix(".png")
        .tempfile()
        .map_err(|e| HanscanError::engine_with_source("Failed to create temp crop file", e))?;
    image
        .save_with_format(file.path(), image::ImageFormat::Png)
        .map_err(|e| HanscanError::engine_with_source("Failed to write temp crop file", e))?;
    Ok(file)
}

//! Pipeline configuration.
//!
//! Configuration is an explicit immutable value passed into the orchestrator
//! at construction, never ambient state. It can be loaded from a TOML file or
//! assembled programmatically (the CLI does the latter). Every field has a
//! documented default so partial files and partial flag sets work.

use crate::error::{HanscanError, Result};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_true() -> bool {
    true
}

fn default_output_subdir() -> String {
    "ocr_output".to_string()
}

fn default_primary_engine() -> String {
    "tesseract".to_string()
}

fn default_fallback_engines() -> Vec<String> {
    vec!["easyocr".to_string()]
}

fn default_languages() -> String {
    "kor+eng".to_string()
}

fn default_confidence_floor() -> f32 {
    0.7
}

fn default_engine_timeout_secs() -> u64 {
    120
}

fn default_page_start() -> u32 {
    1
}

fn default_prefetch_pages() -> usize {
    2
}

fn default_sharpness_floor() -> f64 {
    100.0
}

fn default_contrast_floor() -> f64 {
    20.0
}

fn default_brightness_min() -> f64 {
    50.0
}

fn default_brightness_max() -> f64 {
    230.0
}

fn default_max_skew_degrees() -> f32 {
    3.0
}

/// Image quality thresholds and corrective-transform switches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Laplacian-variance sharpness below this is `Borderline`; below half
    /// of it, `Fail`.
    #[serde(default = "default_sharpness_floor")]
    pub sharpness_floor: f64,

    /// Grayscale standard deviation below this is `Borderline`; below half
    /// of it, `Fail`.
    #[serde(default = "default_contrast_floor")]
    pub contrast_floor: f64,

    /// Mean brightness outside [min, max] adds a warning.
    #[serde(default = "default_brightness_min")]
    pub brightness_min: f64,
    #[serde(default = "default_brightness_max")]
    pub brightness_max: f64,

    /// Run skew estimation and deskew on borderline pages.
    #[serde(default = "default_true")]
    pub deskew: bool,

    /// Half-width of the skew search window in degrees.
    #[serde(default = "default_max_skew_degrees")]
    pub max_skew_degrees: f32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            sharpness_floor: default_sharpness_floor(),
            contrast_floor: default_contrast_floor(),
            brightness_min: default_brightness_min(),
            brightness_max: default_brightness_max(),
            deskew: true,
            max_skew_degrees: default_max_skew_degrees(),
        }
    }
}

/// Full pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directory containing `page_NNNN.png` captures.
    pub input_dir: PathBuf,

    /// Output directory name, created under `input_dir`.
    #[serde(default = "default_output_subdir")]
    pub output_subdir: String,

    /// First engine to try for every region.
    #[serde(default = "default_primary_engine")]
    pub primary_engine: String,

    /// Ordered fallback chain after the primary.
    #[serde(default = "default_fallback_engines")]
    pub fallback_engines: Vec<String>,

    /// Tesseract-style language spec handed to the backends.
    #[serde(default = "default_languages")]
    pub languages: String,

    /// Include accelerator-bound engines in the stack.
    #[serde(default = "default_true")]
    pub use_gpu: bool,

    /// A result below this confidence triggers fallback to the next engine.
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f32,

    /// Per-engine-call timeout; an elapsed timeout is treated as a failure
    /// and fallback proceeds.
    #[serde(default = "default_engine_timeout_secs")]
    pub engine_timeout_secs: u64,

    /// Inclusive page range; `page_end == 0` means open-ended.
    #[serde(default = "default_page_start")]
    pub page_start: u32,
    #[serde(default)]
    pub page_end: u32,

    /// Resume from existing checkpoints instead of recomputing.
    #[serde(default)]
    pub resume: bool,

    /// Stop every page after the `Preprocessed` stage.
    #[serde(default)]
    pub quality_check_only: bool,

    /// Recompute pages even when a satisfying checkpoint exists.
    #[serde(default)]
    pub force: bool,

    /// How many pages of preprocessing/layout may run ahead of the
    /// serialized OCR stage.
    #[serde(default = "default_prefetch_pages")]
    pub prefetch_pages: usize,

    #[serde(default)]
    pub quality: QualityConfig,
}

impl PipelineConfig {
    pub fn new(input_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_subdir: default_output_subdir(),
            primary_engine: default_primary_engine(),
            fallback_engines: default_fallback_engines(),
            languages: default_languages(),
            use_gpu: true,
            confidence_floor: default_confidence_floor(),
            engine_timeout_secs: default_engine_timeout_secs(),
            page_start: default_page_start(),
            page_end: 0,
            resume: false,
            quality_check_only: false,
            force: false,
            prefetch_pages: default_prefetch_pages(),
            quality: QualityConfig::default(),
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: PipelineConfig = toml::from_str(&content)
            .map_err(|e| HanscanError::validation_with_source("invalid TOML configuration", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_start < 1 {
            return Err(HanscanError::validation("page_start must be >= 1"));
        }
        if self.page_end != 0 && self.page_end < self.page_start {
            return Err(HanscanError::validation(format!(
                "page range is empty: {}-{}",
                self.page_start, self.page_end
            )));
        }
        if !(0.0..=1.0).contains(&self.confidence_floor) {
            return Err(HanscanError::validation(format!(
                "confidence_floor must be in [0, 1], got {}",
                self.confidence_floor
            )));
        }
        if self.engine_timeout_secs == 0 {
            return Err(HanscanError::validation("engine_timeout_secs must be > 0"));
        }
        if self.prefetch_pages == 0 {
            return Err(HanscanError::validation("prefetch_pages must be > 0"));
        }
        if self.primary_engine.trim().is_empty() {
            return Err(HanscanError::validation("primary_engine must not be empty"));
        }
        Ok(())
    }

    /// Ordered engine chain: primary first, then fallbacks, duplicates
    /// removed.
    pub fn engine_order(&self) -> Vec<String> {
        let mut order = vec![self.primary_engine.clone()];
        for name in &self.fallback_engines {
            if !order.contains(name) {
                order.push(name.clone());
            }
        }
        order
    }

    pub fn output_dir(&self) -> PathBuf {
        self.input_dir.join(&self.output_subdir)
    }

    pub fn images_dir(&self) -> PathBuf {
        self.output_dir().join("images")
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.output_dir().join("checkpoints")
    }

    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_timeout_secs)
    }

    /// Fingerprint of the engine-affecting fields, stored in checkpoint
    /// records so a resumed run can report a configuration drift.
    pub fn fingerprint(&self) -> String {
        let mut hasher = ahash::AHasher::default();
        self.primary_engine.hash(&mut hasher);
        self.fallback_engines.hash(&mut hasher);
        self.languages.hash(&mut hasher);
        self.use_gpu.hash(&mut hasher);
        self.confidence_floor.to_bits().hash(&mut hasher);
        self.quality.sharpness_floor.to_bits().hash(&mut hasher);
        self.quality.contrast_floor.to_bits().hash(&mut hasher);
        self.quality.deskew.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }
}

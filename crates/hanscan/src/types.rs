//! Core data model shared across pipeline stages.
//!
//! Everything that crosses a stage boundary or a process restart lives here:
//! quality verdicts, layout regions, pipeline stages, per-page checkpoint
//! records, and the assembled document. All persisted types are
//! forward-compatible: unknown fields are ignored on load and missing fields
//! take their serde defaults, so records written by an older pipeline version
//! survive a resumed run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Current checkpoint record schema version.
pub const SCHEMA_VERSION: u32 = 2;

/// Categorical quality judgment for a page image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Image is clean; proceeds unmodified.
    Pass,
    /// Degraded but recoverable; corrective transforms run before layout.
    Borderline,
    /// Below hard floors. The page is flagged but still carried through the
    /// whole pipeline best-effort, never discarded.
    Fail,
}

/// A page's position in the pipeline state machine.
///
/// Monotonic: a page never regresses except on explicit forced recompute.
/// `Failed` is terminal and reachable from any stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Pending,
    Preprocessed,
    LaidOut,
    OcrDone,
    Postprocessed,
    Done,
    Failed,
}

impl Stage {
    fn rank(self) -> u8 {
        match self {
            Stage::Pending => 0,
            Stage::Preprocessed => 1,
            Stage::LaidOut => 2,
            Stage::OcrDone => 3,
            Stage::Postprocessed => 4,
            Stage::Done => 5,
            Stage::Failed => 6,
        }
    }

    /// Whether a page persisted at this stage satisfies the requested
    /// minimum stage. `Failed` is terminal and satisfies any minimum: the
    /// page was concluded, and only a forced recompute revisits it.
    pub fn satisfies(self, min: Stage) -> bool {
        self == Stage::Failed || self.rank() >= min.rank()
    }

    /// Terminal stages end a page's lifecycle for the current run.
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }
}

/// Axis-aligned bounding box in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn x_max(&self) -> u32 {
        self.x + self.width
    }

    pub fn y_max(&self) -> u32 {
        self.y + self.height
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Intersection-over-union of the projections of two boxes on one axis.
    fn projection_overlap(min1: u32, max1: u32, min2: u32, max2: u32) -> f32 {
        let intersection = max1.min(max2).saturating_sub(min1.max(min2)) as f32;
        let union = (max1.max(max2) - min1.min(min2)) as f32;
        if union > 0.0 { intersection / union } else { 0.0 }
    }

    pub fn horizontal_overlap(&self, other: &BoundingBox) -> f32 {
        Self::projection_overlap(self.x, self.x_max(), other.x, other.x_max())
    }

    pub fn vertical_overlap(&self, other: &BoundingBox) -> f32 {
        Self::projection_overlap(self.y, self.y_max(), other.y, other.y_max())
    }
}

/// Classified role of a layout region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionKind {
    #[default]
    Text,
    Heading,
    Figure,
    Table,
    Footer,
}

impl RegionKind {
    /// Only textual regions are handed to an OCR engine; figures and tables
    /// are cropped out and referenced from the markdown instead.
    pub fn is_textual(self) -> bool {
        !matches!(self, RegionKind::Figure | RegionKind::Table)
    }
}

/// A bounded text area on a page with a position in reading order.
///
/// Per page, `index` is strictly increasing from 0 with no gaps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub index: usize,
    pub bbox: BoundingBox,
    #[serde(default)]
    pub kind: RegionKind,
    /// Corrected OCR text (empty until the OCR stage runs).
    #[serde(default)]
    pub text: String,
    /// Identifier of the engine that produced `text`; `"none"` when every
    /// backend was exhausted.
    #[serde(default)]
    pub engine_id: String,
    /// Confidence in [0, 1].
    #[serde(default)]
    pub confidence: f32,
    /// Relative path of an extracted figure crop under the images directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_image: Option<String>,
}

impl Region {
    pub fn new(index: usize, bbox: BoundingBox, kind: RegionKind) -> Self {
        Self {
            index,
            bbox,
            kind,
            text: String::new(),
            engine_id: String::new(),
            confidence: 0.0,
            extracted_image: None,
        }
    }
}

/// Per-page quality metrics and the resulting verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    /// Variance of the Laplacian response; higher is sharper.
    pub sharpness: f64,
    /// Grayscale standard deviation.
    pub contrast: f64,
    /// Mean grayscale value in [0, 255].
    pub brightness: f64,
    /// Estimated skew in degrees (positive = clockwise).
    pub skew_degrees: f32,
    pub verdict: Verdict,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Result of one OCR engine call for one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub text: String,
    /// Confidence in [0, 1]; 0.0 when every backend was exhausted.
    pub confidence: f32,
    pub engine_id: String,
}

impl ExtractionResult {
    /// The empty result returned after the whole fallback chain is exhausted.
    pub fn exhausted() -> Self {
        Self {
            text: String::new(),
            confidence: 0.0,
            engine_id: "none".to_string(),
        }
    }
}

/// Lower-confidence text dropped when two regions overlapped; kept in the
/// record instead of being silently discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscardedText {
    pub region_index: usize,
    pub text: String,
    pub engine_id: String,
    pub confidence: f32,
}

/// Durable snapshot of one page's pipeline progress.
///
/// A record at stage [`Stage::Done`] contains everything needed to rebuild
/// the page's markdown contribution without rerunning any engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    #[serde(default)]
    pub schema_version: u32,
    pub page_index: u32,
    pub stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityReport>,
    #[serde(default)]
    pub regions: Vec<Region>,
    /// Final corrected page text (plain, reading order).
    #[serde(default)]
    pub text: String,
    /// Mean region confidence for the page.
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub needs_review: bool,
    #[serde(default)]
    pub discarded: Vec<DiscardedText>,
    /// Fingerprint of the engine-affecting configuration the record was
    /// produced under; a mismatch on resume is reported, not fatal.
    #[serde(default)]
    pub config_fingerprint: String,
    /// Unix timestamp of the last save.
    #[serde(default)]
    pub updated_at_epoch: u64,
}

impl CheckpointRecord {
    pub fn new(page_index: u32, stage: Stage) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            page_index,
            stage,
            quality: None,
            regions: Vec::new(),
            text: String::new(),
            confidence: 0.0,
            needs_review: false,
            discarded: Vec::new(),
            config_fingerprint: String::new(),
            updated_at_epoch: 0,
        }
    }

    pub fn verdict(&self) -> Option<Verdict> {
        self.quality.as_ref().map(|q| q.verdict)
    }
}

/// Aggregate metadata for an assembled document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub source_dir: PathBuf,
    pub total_pages: usize,
    /// Pages annotated for human review (quality failure or low confidence).
    pub flagged_pages: Vec<u32>,
    /// Pages that ended in the `Failed` stage.
    pub failed_pages: Vec<u32>,
    /// Expected page indices missing from the input directory.
    pub gaps: Vec<u32>,
    pub mean_confidence: f32,
    pub engine_usage: BTreeMap<String, u64>,
    /// Unix timestamp; written by the pipeline, never part of the document
    /// body, so assembly stays byte-identical across runs.
    #[serde(default)]
    pub created_at_epoch: u64,
}

/// The assembled output: one markdown document plus its metadata record.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub markdown: String,
    pub metadata: DocumentMetadata,
}

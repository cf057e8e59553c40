//! Tesseract backend, driven over its CLI in TSV output mode.

use super::{EngineParams, OcrEngine, write_crop};
use crate::error::{HanscanError, Result};
use crate::types::ExtractionResult;
use async_trait::async_trait;
use image::GrayImage;
use tokio::process::Command;

const TSV_MIN_FIELDS: usize = 12;
/// TSV hierarchy level for individual words.
const TSV_WORD_LEVEL: u32 = 5;

/// CPU-only backend; the usual primary for printed Korean book pages.
#[derive(Debug, Default)]
pub struct TesseractEngine;

impl TesseractEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    fn id(&self) -> &'static str {
        "tesseract"
    }

    async fn probe(&self) -> bool {
        Command::new("tesseract")
            .arg("--version")
            .output()
            .await
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    async fn extract(&self, image: &GrayImage, params: &EngineParams) -> Result<ExtractionResult> {
        let crop = write_crop(image)?;

        let child = Command::new("tesseract")
            .arg(crop.path())
            .arg("stdout")
            .arg("-l")
            .arg(&params.languages)
            .arg("--psm")
            .arg("6")
            .arg("tsv")
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            // A timed-out call drops this future; the process dies with it.
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HanscanError::engine_with_source("Failed to execute tesseract", e))?;

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| HanscanError::engine_with_source("Failed to wait for tesseract", e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HanscanError::engine(format!(
                "Tesseract exited with {}: {}",
                output.status, stderr
            )));
        }

        let tsv = String::from_utf8_lossy(&output.stdout);
        Ok(parse_tsv(&tsv))
    }
}

/// Assemble words from Tesseract TSV into line-broken text plus a mean word
/// confidence in [0, 1]. Words with negative confidence are layout
/// artifacts and are skipped.
fn parse_tsv(tsv: &str) -> ExtractionResult {
    let mut lines: Vec<String> = Vec::new();
    let mut current_key: Option<(u32, u32, u32)> = None;
    let mut confidence_sum = 0.0f32;
    let mut words = 0u32;

    for (line_num, line) in tsv.lines().enumerate() {
        if line_num == 0 {
            continue;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < TSV_MIN_FIELDS {
            continue;
        }

        let level = fields[0].parse::<u32>().unwrap_or(0);
        if level != TSV_WORD_LEVEL {
            continue;
        }

        let conf = fields[10].parse::<f32>().unwrap_or(-1.0);
        if conf < 0.0 {
            continue;
        }

        let text = fields[11].trim();
        if text.is_empty() {
            continue;
        }

        // block, paragraph, line numbers identify the source text line.
        let key = (
            fields[2].parse().unwrap_or(0),
            fields[3].parse().unwrap_or(0),
            fields[4].parse().unwrap_or(0),
        );

        if current_key == Some(key) {
            if let Some(last) = lines.last_mut() {
                last.push(' ');
                last.push_str(text);
            }
        } else {
            lines.push(text.to_string());
            current_key = Some(key);
        }

        confidence_sum += conf / 100.0;
        words += 1;
    }

    let confidence = if words == 0 {
        0.0
    } else {
        confidence_sum / words as f32
    };

    ExtractionResult {
        text: lines.join("\n"),
        confidence,
        engine_id: "tesseract".to_string(),
    }
}

//! EasyOCR backend, driven over its CLI.
//!
//! EasyOCR prints one detection tuple per line in `--detail 1` mode:
//! `([[x1, y1], ...], 'text', 0.987)`. Only the text and the trailing
//! confidence are consumed; region geometry is already decided upstream.

use super::{EngineParams, OcrEngine, write_crop};
use crate::error::{HanscanError, Result};
use crate::types::ExtractionResult;
use async_trait::async_trait;
use image::GrayImage;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;

static DETECTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"['"](?<text>.*)['"],\s*(?<conf>[0-9]*\.?[0-9]+)\)\s*$"#)
        .expect("Detection regex pattern is valid and should compile")
});

/// Neural fallback backend. Holds exclusive accelerator state when GPU
/// mode is on, so the stack serializes its calls.
#[derive(Debug)]
pub struct EasyOcrEngine {
    use_gpu: bool,
}

impl EasyOcrEngine {
    pub fn new(use_gpu: bool) -> Self {
        Self { use_gpu }
    }
}

/// Map a Tesseract-style language spec (`"kor+eng"`) to EasyOCR codes.
fn language_codes(languages: &str) -> Vec<&'static str> {
    let mut codes = Vec::new();
    for lang in languages.split('+') {
        let code = match lang.trim() {
            "kor" => "ko",
            "eng" => "en",
            "jpn" => "ja",
            "chi_sim" => "ch_sim",
            _ => continue,
        };
        if !codes.contains(&code) {
            codes.push(code);
        }
    }
    if codes.is_empty() {
        codes.push("ko");
        codes.push("en");
    }
    codes
}

#[async_trait]
impl OcrEngine for EasyOcrEngine {
    fn id(&self) -> &'static str {
        "easyocr"
    }

    fn accelerator_bound(&self) -> bool {
        self.use_gpu
    }

    async fn probe(&self) -> bool {
        Command::new("easyocr")
            .arg("-h")
            .output()
            .await
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    async fn extract(&self, image: &GrayImage, params: &EngineParams) -> Result<ExtractionResult> {
        let crop = write_crop(image)?;

        let mut command = Command::new("easyocr");
        command.arg("-l");
        for code in language_codes(&params.languages) {
            command.arg(code);
        }
        command
            .arg("-f")
            .arg(crop.path())
            .arg("--detail")
            .arg("1")
            .arg("--gpu")
            .arg(if self.use_gpu && params.use_gpu { "True" } else { "False" })
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            // A timed-out call drops this future; the process dies with it
            // instead of holding the accelerator.
            .kill_on_drop(true);

        let child = command
            .spawn()
            .map_err(|e| HanscanError::engine_with_source("Failed to execute easyocr", e))?;

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| HanscanError::engine_with_source("Failed to wait for easyocr", e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HanscanError::engine(format!(
                "EasyOCR exited with {}: {}",
                output.status, stderr
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_detections(&stdout))
    }
}

fn parse_detections(stdout: &str) -> ExtractionResult {
    let mut lines = Vec::new();
    let mut confidence_sum = 0.0f32;
    let mut detections = 0u32;

    for line in stdout.lines() {
        let Some(captures) = DETECTION.captures(line.trim()) else {
            continue;
        };
        let text = captures["text"].trim();
        if text.is_empty() {
            continue;
        }
        let conf = captures["conf"].parse::<f32>().unwrap_or(0.0);
        lines.push(text.to_string());
        confidence_sum += conf.clamp(0.0, 1.0);
        detections += 1;
    }

    let confidence = if detections == 0 {
        0.0
    } else {
        confidence_sum / detections as f32
    };

    ExtractionResult {
        text: lines.join("\n"),
        confidence,
        engine_id: "easyocr".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_detections() {
        let stdout = "([[10, 10], [200, 10], [200, 40], [10, 40]], '첫 번째 줄', 0.93)\n\
                      ([[10, 50], [180, 50], [180, 80], [10, 80]], '둘째 줄', 0.81)\n";
        let result = parse_detections(stdout);
        assert_eq!(result.text, "첫 번째 줄\n둘째 줄");
        assert!((result.confidence - 0.87).abs() < 1e-5);
        assert_eq!(result.engine_id, "easyocr");
    }

    #[test]
    fn test_parse_detections_ignores_noise_lines() {
        let stdout = "Using CPU. Note: This module is much faster with a GPU.\n\
                      ([[0, 0], [10, 0], [10, 10], [0, 10]], 'ok', 0.99)\n";
        let result = parse_detections(stdout);
        assert_eq!(result.text, "ok");
    }

    #[test]
    fn test_parse_detections_empty() {
        let result = parse_detections("");
        assert!(result.text.is_empty());
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_language_codes() {
        assert_eq!(language_codes("kor+eng"), vec!["ko", "en"]);
        assert_eq!(language_codes("jpn"), vec!["ja"]);
        assert_eq!(language_codes("unknown"), vec!["ko", "en"]);
    }
}

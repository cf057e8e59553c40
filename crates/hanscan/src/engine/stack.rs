//! Ordered fallback chain over the configured OCR backends.

use super::{EasyOcrEngine, EngineParams, OcrEngine, TesseractEngine};
use crate::config::PipelineConfig;
use crate::error::{HanscanError, Result};
use crate::types::ExtractionResult;
use image::GrayImage;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::timeout;

/// Holds the probed, ordered backends for one run.
///
/// Fallback policy: try each backend in order. A backend that errors or
/// times out is skipped. A result below the confidence floor is kept as the
/// best low candidate and only returned if no later backend clears the
/// floor. If every backend errors, the exhausted result (`engine_id =
/// "none"`, confidence 0) comes back and the caller flags the page; the
/// batch never aborts over one region.
pub struct EngineStack {
    engines: Vec<Arc<dyn OcrEngine>>,
    params: EngineParams,
    call_timeout: Duration,
    confidence_floor: f32,
    /// Single in-flight call for accelerator-bound backends.
    accelerator: tokio::sync::Mutex<()>,
    usage: Mutex<BTreeMap<String, u64>>,
}

impl EngineStack {
    /// Probe and assemble the backends named by the configuration. An
    /// unavailable backend is a capability downgrade for the run, logged
    /// and skipped; having no available backend at all is an error.
    pub async fn for_config(config: &PipelineConfig) -> Result<Self> {
        let engines = Self::probe_available(configured_engines(config)?).await;

        if engines.is_empty() {
            return Err(HanscanError::EngineUnavailable(
                "No configured OCR backend is installed".to_string(),
            ));
        }

        Ok(Self::from_engines(
            engines,
            EngineParams {
                languages: config.languages.clone(),
                use_gpu: config.use_gpu,
            },
            config.engine_timeout(),
            config.confidence_floor,
        ))
    }

    /// Drop the backends whose startup probe fails. Unavailability is a
    /// capability downgrade for the run, not an error.
    async fn probe_available(engines: Vec<Arc<dyn OcrEngine>>) -> Vec<Arc<dyn OcrEngine>> {
        let mut available = Vec::with_capacity(engines.len());
        for engine in engines {
            if engine.probe().await {
                tracing::info!(engine = engine.id(), "OCR backend available");
                available.push(engine);
            } else {
                tracing::warn!(
                    engine = engine.id(),
                    "OCR backend not installed, running without it"
                );
            }
        }
        available
    }

    /// Assemble a stack from already-probed backends.
    pub fn from_engines(
        engines: Vec<Arc<dyn OcrEngine>>,
        params: EngineParams,
        call_timeout: Duration,
        confidence_floor: f32,
    ) -> Self {
        Self {
            engines,
            params,
            call_timeout,
            confidence_floor,
            accelerator: tokio::sync::Mutex::new(()),
            usage: Mutex::new(BTreeMap::new()),
        }
    }

    /// Identifiers of the available backends, in fallback order.
    pub fn engine_ids(&self) -> Vec<&'static str> {
        self.engines.iter().map(|e| e.id()).collect()
    }

    /// Run the fallback chain over one region crop.
    pub async fn extract(&self, image: &GrayImage) -> ExtractionResult {
        let mut best_low: Option<ExtractionResult> = None;

        for engine in &self.engines {
            let outcome = if engine.accelerator_bound() {
                let _serialized = self.accelerator.lock().await;
                timeout(self.call_timeout, engine.extract(image, &self.params)).await
            } else {
                timeout(self.call_timeout, engine.extract(image, &self.params)).await
            };

            let result = match outcome {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    tracing::warn!(engine = engine.id(), error = %e, "engine call failed, falling back");
                    continue;
                }
                Err(_) => {
                    tracing::warn!(
                        engine = engine.id(),
                        timeout_secs = self.call_timeout.as_secs(),
                        "engine call timed out, falling back"
                    );
                    continue;
                }
            };

            if result.confidence >= self.confidence_floor {
                self.count_usage(&result.engine_id);
                return result;
            }

            tracing::debug!(
                engine = engine.id(),
                confidence = result.confidence,
                "result below confidence floor, trying next backend"
            );
            if best_low
                .as_ref()
                .is_none_or(|best| result.confidence > best.confidence)
            {
                best_low = Some(result);
            }
        }

        match best_low {
            Some(best) => {
                self.count_usage(&best.engine_id);
                best
            }
            None => {
                let exhausted = ExtractionResult::exhausted();
                self.count_usage(&exhausted.engine_id);
                exhausted
            }
        }
    }

    fn count_usage(&self, engine_id: &str) {
        if let Ok(mut usage) = self.usage.lock() {
            *usage.entry(engine_id.to_string()).or_insert(0) += 1;
        }
    }

    /// Snapshot of how many regions each backend ultimately served.
    pub fn usage(&self) -> BTreeMap<String, u64> {
        self.usage.lock().map(|u| u.clone()).unwrap_or_default()
    }
}

/// Instantiate the backends named by the configuration, in fallback order.
/// When the accelerator is disabled, GPU engines are excluded from the
/// stack entirely rather than downgraded to CPU mode.
fn configured_engines(config: &PipelineConfig) -> Result<Vec<Arc<dyn OcrEngine>>> {
    let mut engines: Vec<Arc<dyn OcrEngine>> = Vec::new();

    for name in config.engine_order() {
        match name.as_str() {
            "tesseract" => engines.push(Arc::new(TesseractEngine::new())),
            "easyocr" => {
                if !config.use_gpu {
                    tracing::info!(
                        engine = "easyocr",
                        "accelerator disabled, GPU engine excluded from the stack"
                    );
                    continue;
                }
                engines.push(Arc::new(EasyOcrEngine::new(true)));
            }
            other => {
                return Err(HanscanError::validation(format!(
                    "Unknown OCR engine '{other}' (supported: tesseract, easyocr)"
                )));
            }
        }
    }

    Ok(engines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedEngine {
        id: &'static str,
        outcome: std::result::Result<(String, f32), String>,
        delay: Option<Duration>,
        calls: AtomicUsize,
    }

    impl FixedEngine {
        fn ok(id: &'static str, text: &str, confidence: f32) -> Self {
            Self {
                id,
                outcome: Ok((text.to_string(), confidence)),
                delay: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing(id: &'static str) -> Self {
            Self {
                id,
                outcome: Err("forced failure".to_string()),
                delay: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn slow(id: &'static str, delay: Duration) -> Self {
            Self {
                id,
                outcome: Ok(("late".to_string(), 0.99)),
                delay: Some(delay),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl OcrEngine for FixedEngine {
        fn id(&self) -> &'static str {
            self.id
        }

        async fn probe(&self) -> bool {
            true
        }

        async fn extract(
            &self,
            _image: &GrayImage,
            _params: &EngineParams,
        ) -> Result<ExtractionResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match &self.outcome {
                Ok((text, confidence)) => Ok(ExtractionResult {
                    text: text.clone(),
                    confidence: *confidence,
                    engine_id: self.id.to_string(),
                }),
                Err(message) => Err(HanscanError::engine(message.clone())),
            }
        }
    }

    fn stack(engines: Vec<Arc<dyn OcrEngine>>) -> EngineStack {
        EngineStack::from_engines(
            engines,
            EngineParams {
                languages: "kor+eng".to_string(),
                use_gpu: false,
            },
            Duration::from_secs(30),
            0.7,
        )
    }

    fn crop() -> GrayImage {
        GrayImage::from_pixel(10, 10, image::Luma([255u8]))
    }

    #[tokio::test]
    async fn test_primary_result_wins_when_above_floor() {
        let s = stack(vec![
            Arc::new(FixedEngine::ok("tesseract", "본문", 0.92)),
            Arc::new(FixedEngine::ok("easyocr", "other", 0.95)),
        ]);
        let result = s.extract(&crop()).await;
        assert_eq!(result.engine_id, "tesseract");
        assert_eq!(result.text, "본문");
    }

    #[tokio::test]
    async fn test_failing_primary_falls_back_to_secondary() {
        let s = stack(vec![
            Arc::new(FixedEngine::failing("tesseract")),
            Arc::new(FixedEngine::ok("easyocr", "복구된 텍스트", 0.9)),
        ]);
        let result = s.extract(&crop()).await;
        assert_eq!(result.engine_id, "easyocr");
        assert!((result.confidence - 0.9).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_below_floor_primary_defers_to_secondary() {
        let s = stack(vec![
            Arc::new(FixedEngine::ok("tesseract", "흐릿한 추측", 0.4)),
            Arc::new(FixedEngine::ok("easyocr", "선명한 결과", 0.88)),
        ]);
        let result = s.extract(&crop()).await;
        assert_eq!(result.engine_id, "easyocr");
    }

    #[tokio::test]
    async fn test_all_below_floor_returns_best_low() {
        let s = stack(vec![
            Arc::new(FixedEngine::ok("tesseract", "worse", 0.3)),
            Arc::new(FixedEngine::ok("easyocr", "better", 0.55)),
        ]);
        let result = s.extract(&crop()).await;
        assert_eq!(result.text, "better");
        assert_eq!(result.engine_id, "easyocr");
    }

    #[tokio::test]
    async fn test_all_failing_returns_exhausted() {
        let s = stack(vec![
            Arc::new(FixedEngine::failing("tesseract")),
            Arc::new(FixedEngine::failing("easyocr")),
        ]);
        let result = s.extract(&crop()).await;
        assert_eq!(result.engine_id, "none");
        assert_eq!(result.confidence, 0.0);
        assert!(result.text.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_triggers_fallback() {
        let slow = Arc::new(FixedEngine::slow("tesseract", Duration::from_secs(600)));
        let s = EngineStack::from_engines(
            vec![slow, Arc::new(FixedEngine::ok("easyocr", "제시간", 0.9))],
            EngineParams {
                languages: "kor+eng".to_string(),
                use_gpu: false,
            },
            Duration::from_secs(5),
            0.7,
        );
        let result = s.extract(&crop()).await;
        assert_eq!(result.engine_id, "easyocr");
    }

    struct MissingEngine;

    #[async_trait]
    impl OcrEngine for MissingEngine {
        fn id(&self) -> &'static str {
            "missing"
        }

        async fn probe(&self) -> bool {
            false
        }

        async fn extract(
            &self,
            _image: &GrayImage,
            _params: &EngineParams,
        ) -> Result<ExtractionResult> {
            Err(HanscanError::engine("not installed"))
        }
    }

    #[test]
    fn test_accelerator_disable_excludes_gpu_engine() {
        let mut config = PipelineConfig::new(".");
        config.use_gpu = false;
        let engines = configured_engines(&config).unwrap();
        let ids: Vec<&str> = engines.iter().map(|e| e.id()).collect();
        assert_eq!(ids, vec!["tesseract"]);

        config.use_gpu = true;
        let engines = configured_engines(&config).unwrap();
        let ids: Vec<&str> = engines.iter().map(|e| e.id()).collect();
        assert_eq!(ids, vec!["tesseract", "easyocr"]);
    }

    #[test]
    fn test_configured_engines_rejects_unknown_name() {
        let mut config = PipelineConfig::new(".");
        config.primary_engine = "paddle".to_string();
        assert!(configured_engines(&config).is_err());
    }

    #[tokio::test]
    async fn test_probe_skips_unavailable_backend() {
        let probed = EngineStack::probe_available(vec![
            Arc::new(MissingEngine),
            Arc::new(FixedEngine::ok("easyocr", "살아남은 결과", 0.9)),
        ])
        .await;
        let ids: Vec<&str> = probed.iter().map(|e| e.id()).collect();
        assert_eq!(ids, vec!["easyocr"]);

        let none = EngineStack::probe_available(vec![Arc::new(MissingEngine)]).await;
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_usage_counts_winning_engine() {
        let primary = Arc::new(FixedEngine::failing("tesseract"));
        let secondary = Arc::new(FixedEngine::ok("easyocr", "텍스트", 0.9));
        let s = stack(vec![primary.clone(), secondary.clone()]);

        s.extract(&crop()).await;
        s.extract(&crop()).await;

        let usage = s.usage();
        assert_eq!(usage.get("easyocr"), Some(&2));
        assert_eq!(usage.get("tesseract"), None);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 2);
    }
}

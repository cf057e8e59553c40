//! `hanscan` - turn a directory of captured book page scans into one
//! corrected markdown document.

use anyhow::Context;
use clap::Parser;
use hanscan::{BatchSummary, Orchestrator, PipelineConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Parser)]
#[command(
    name = "hanscan",
    version,
    about = "Checkpointed OCR pipeline for Korean book scans"
)]
struct Cli {
    /// Directory containing page_NNNN.png captures
    input_dir: PathBuf,

    /// Load settings from a TOML file (flags below still override)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Resume from existing checkpoints instead of recomputing
    #[arg(long)]
    resume: bool,

    /// Recompute pages even when a satisfying checkpoint exists
    #[arg(long)]
    force: bool,

    /// Stop every page after the quality check; no OCR, no document
    #[arg(long)]
    quality_check_only: bool,

    /// Page range to process, e.g. 5-20, 7, or 10- (open-ended)
    #[arg(short = 'p', long, value_name = "A-B", value_parser = parse_pages)]
    pages: Option<PageRange>,

    /// Primary OCR engine
    #[arg(long)]
    engine: Option<String>,

    /// Language spec handed to the backends (Tesseract notation)
    #[arg(long)]
    languages: Option<String>,

    /// Fallback confidence floor in [0, 1]
    #[arg(short = 'c', long, value_name = "FLOOR")]
    confidence: Option<f32>,

    /// Exclude accelerator-bound engines from the fallback chain
    #[arg(long)]
    no_gpu: bool,

    /// Debug-level console output
    #[arg(short, long)]
    verbose: bool,
}

/// Inclusive 1-based page range; `end == 0` means open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PageRange {
    start: u32,
    end: u32,
}

fn parse_pages(value: &str) -> Result<PageRange, String> {
    let value = value.trim();
    let (start, end) = match value.split_once('-') {
        Some((a, b)) => {
            let start = a
                .trim()
                .parse::<u32>()
                .map_err(|_| format!("invalid page number '{a}'"))?;
            let b = b.trim();
            let end = if b.is_empty() {
                0
            } else {
                b.parse::<u32>()
                    .map_err(|_| format!("invalid page number '{b}'"))?
            };
            (start, end)
        }
        None => {
            let page = value
                .parse::<u32>()
                .map_err(|_| format!("invalid page range '{value}'"))?;
            (page, page)
        }
    };

    if start < 1 {
        return Err("page numbers are 1-based".to_string());
    }
    if end != 0 && end < start {
        return Err(format!("empty page range {start}-{end}"));
    }
    Ok(PageRange { start, end })
}

impl Cli {
    fn into_config(self) -> anyhow::Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let mut config = PipelineConfig::from_toml_file(path)
                    .with_context(|| format!("failed to load {}", path.display()))?;
                config.input_dir = self.input_dir;
                config
            }
            None => PipelineConfig::new(self.input_dir),
        };

        config.resume = self.resume || config.resume;
        config.force = self.force || config.force;
        config.quality_check_only = self.quality_check_only || config.quality_check_only;
        if let Some(range) = self.pages {
            config.page_start = range.start;
            config.page_end = range.end;
        }
        if let Some(engine) = self.engine {
            config.primary_engine = engine;
        }
        if let Some(languages) = self.languages {
            config.languages = languages;
        }
        if let Some(floor) = self.confidence {
            config.confidence_floor = floor;
        }
        if self.no_gpu {
            config.use_gpu = false;
        }
        Ok(config)
    }
}

fn print_summary(summary: &BatchSummary) {
    println!();
    println!("{}", "=".repeat(50));
    println!(
        "  pages: {}  processed: {}  skipped: {}",
        summary.pages_total, summary.pages_processed, summary.pages_skipped
    );
    if !summary.gaps.is_empty() {
        println!("  missing page indices: {:?}", summary.gaps);
    }
    if !summary.failed_pages.is_empty() {
        println!("  failed pages: {:?}", summary.failed_pages);
    }
    if !summary.flagged_pages.is_empty() {
        println!(
            "  pages needing review: {} {:?}",
            summary.flagged_pages.len(),
            summary.flagged_pages
        );
    }
    if let Some(path) = &summary.document {
        println!("  mean confidence: {:.2}%", summary.mean_confidence * 100.0);
        println!("  output: {}", path.display());
    }
    if summary.interrupted {
        println!("  interrupted: run again with --resume to continue");
    }
    println!("{}", "=".repeat(50));
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let config = cli.into_config()?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, finishing the current page");
            flag.store(true, Ordering::SeqCst);
        }
    });

    let orchestrator = Orchestrator::new(config, shutdown)?;
    let summary = orchestrator.run().await?;
    print_summary(&summary);

    if summary.interrupted {
        std::process::exit(130);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pages_range() {
        assert_eq!(parse_pages("5-20"), Ok(PageRange { start: 5, end: 20 }));
        assert_eq!(parse_pages("7"), Ok(PageRange { start: 7, end: 7 }));
        assert_eq!(parse_pages("10-"), Ok(PageRange { start: 10, end: 0 }));
    }

    #[test]
    fn test_parse_pages_rejects_bad_input() {
        assert!(parse_pages("0-5").is_err());
        assert!(parse_pages("20-5").is_err());
        assert!(parse_pages("abc").is_err());
        assert!(parse_pages("3-x").is_err());
    }

    #[test]
    fn test_flags_map_onto_config() {
        let cli = Cli::parse_from([
            "hanscan",
            "/scans/book",
            "--resume",
            "--pages",
            "5-20",
            "--confidence",
            "0.6",
            "--no-gpu",
            "--verbose",
        ]);
        assert!(cli.verbose);

        let config = cli.into_config().unwrap();
        assert!(config.resume);
        assert_eq!(config.page_start, 5);
        assert_eq!(config.page_end, 20);
        assert_eq!(config.confidence_floor, 0.6);
        assert!(!config.use_gpu);
    }

    #[test]
    fn test_default_range_is_open_ended() {
        let config = Cli::parse_from(["hanscan", "/scans/book"])
            .into_config()
            .unwrap();
        assert_eq!(config.page_start, 1);
        assert_eq!(config.page_end, 0);
        assert!(config.use_gpu);
    }
}

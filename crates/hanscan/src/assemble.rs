//! Markdown document assembly.
//!
//! Assembly is a pure function of the checkpoint records: given the same
//! records it produces a byte-identical document, so re-running it after a
//! resume costs nothing and changes nothing. Timestamps live only in the
//! metadata record, which the orchestrator stamps when writing it out.

use crate::postprocess::{ConfidenceLevel, SENTENCE_END};
use crate::types::{CheckpointRecord, Document, DocumentMetadata, RegionKind, Stage, Verdict};
use std::collections::BTreeMap;
use std::path::Path;

/// Assemble the full document from terminal-stage records, in page order.
///
/// Flagged pages (quality failure, review-needed, or failed outright) are
/// included with a review marker and listed in the metadata; they are never
/// dropped.
pub fn assemble(
    records: &[CheckpointRecord],
    source_dir: &Path,
    gaps: Vec<u32>,
    confidence_floor: f32,
) -> Document {
    let mut records: Vec<&CheckpointRecord> = records.iter().collect();
    records.sort_by_key(|r| r.page_index);

    let mut pages_md = Vec::with_capacity(records.len());
    let mut flagged_pages = Vec::new();
    let mut failed_pages = Vec::new();
    let mut engine_usage: BTreeMap<String, u64> = BTreeMap::new();
    let mut confidence_sum = 0.0f32;

    for record in &records {
        pages_md.push(page_markdown(record, confidence_floor));
        confidence_sum += record.confidence;

        if record.stage == Stage::Failed {
            failed_pages.push(record.page_index);
        }
        if is_flagged(record) {
            flagged_pages.push(record.page_index);
        }
        for region in &record.regions {
            if region.kind.is_textual() && !region.engine_id.is_empty() {
                *engine_usage.entry(region.engine_id.clone()).or_insert(0) += 1;
            }
        }
    }

    let mean_confidence = if records.is_empty() {
        0.0
    } else {
        confidence_sum / records.len() as f32
    };

    let body = merge_cross_page_paragraphs(pages_md);
    let title = source_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "book".to_string());

    let engines: Vec<&str> = engine_usage.keys().map(String::as_str).collect();
    let front_matter = format!(
        "# {title}\n\n- 페이지 수: {}\n- OCR 엔진: {}\n- 검토 필요 페이지: {}\n\n---\n\n",
        records.len(),
        if engines.is_empty() {
            "-".to_string()
        } else {
            engines.join(", ")
        },
        flagged_pages.len(),
    );

    Document {
        markdown: format!("{front_matter}{body}"),
        metadata: DocumentMetadata {
            source_dir: source_dir.to_path_buf(),
            total_pages: records.len(),
            flagged_pages,
            failed_pages,
            gaps,
            mean_confidence,
            engine_usage,
            created_at_epoch: 0,
        },
    }
}

fn is_flagged(record: &CheckpointRecord) -> bool {
    record.needs_review
        || record.stage == Stage::Failed
        || record.verdict() == Some(Verdict::Fail)
}

/// Render one page's markdown contribution, ending with the page marker.
pub fn page_markdown(record: &CheckpointRecord, confidence_floor: f32) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut figures = 0u32;
    let mut tables = 0u32;

    for region in &record.regions {
        match region.kind {
            RegionKind::Figure => {
                figures += 1;
                match &region.extracted_image {
                    Some(path) => lines.push(format!("![그림 {figures}]({path})")),
                    None => lines.push(format!("![그림 {figures}]")),
                }
                lines.push(String::new());
            }
            RegionKind::Table => {
                tables += 1;
                match &region.extracted_image {
                    Some(path) => lines.push(format!("![표 {tables}]({path})")),
                    None => lines.push(format!("![표 {tables}]")),
                }
                lines.push(String::new());
            }
            RegionKind::Footer => {
                let text = region.text.trim();
                if !text.is_empty() {
                    lines.push(format!("<sub>{text}</sub>"));
                    lines.push(String::new());
                }
            }
            RegionKind::Text | RegionKind::Heading => {
                let text = region.text.trim();
                if text.is_empty() {
                    continue;
                }
                match ConfidenceLevel::classify(region.confidence, confidence_floor) {
                    ConfidenceLevel::Low | ConfidenceLevel::VeryLow => {
                        lines.push(format!("<!-- 불확실: {text} -->"));
                    }
                    _ if region.kind == RegionKind::Heading => {
                        lines.push(format!("## {text}"));
                    }
                    _ => lines.push(text.to_string()),
                }
                lines.push(String::new());
            }
        }
    }

    if is_flagged(record) {
        lines.push(format!("<!-- review: page {} -->", record.page_index));
        lines.push(String::new());
    }
    lines.push(format!("<!-- page {} -->", record.page_index));
    lines.push(String::new());

    lines.join("\n")
}

/// Join paragraphs split across a page boundary: when the previous page's
/// last text line lacks terminal punctuation and the next page opens with a
/// continuing glyph (Hangul syllable or lowercase Latin), the pages are
/// joined with a single space instead of a line break.
fn merge_cross_page_paragraphs(pages: Vec<String>) -> String {
    let mut pages = pages.into_iter();
    let Some(first) = pages.next() else {
        return String::new();
    };

    let mut merged = vec![first];
    for page in pages {
        let should_merge = {
            let prev = merged.last().map(String::as_str).unwrap_or("");
            let last = last_text_line(prev);
            let first_line = first_text_line(&page);
            match (last, first_line) {
                (Some(last), Some(first_line)) => {
                    !SENTENCE_END.is_match(last)
                        && !first_line.starts_with('#')
                        && !first_line.starts_with("![")
                        && starts_with_continuation(first_line)
                }
                _ => false,
            }
        };

        if should_merge {
            if let Some(prev) = merged.last_mut() {
                *prev = format!("{} {}", prev.trim_end(), page.trim_start());
            }
        } else {
            merged.push(page);
        }
    }

    merged.join("\n")
}

/// Last non-empty, non-comment line of a page's markdown.
fn last_text_line(page: &str) -> Option<&str> {
    page.lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with("<!--"))
}

fn first_text_line(page: &str) -> Option<&str> {
    page.lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with("<!--"))
}

/// A Hangul syllable or lowercase Latin start continues a sentence.
fn starts_with_continuation(line: &str) -> bool {
    match line.chars().next() {
        Some(ch) => ('\u{AC00}'..='\u{D7A3}').contains(&ch) || ch.is_lowercase(),
        None => false,
    }
}

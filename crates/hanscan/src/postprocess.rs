//! Post-OCR text correction for Korean book scans.
//!
//! Three passes run over every region that produced usable text:
//!
//! 1. Jamo repair: OCR engines often emit isolated compatibility jamo
//!    (U+3131..U+3163) instead of composed syllable blocks. Consecutive
//!    initial+medial(+final) sequences are recomposed into the precomposed
//!    Hangul syllable range (U+AC00..).
//! 2. Line merge: lines wrapped mid-sentence by the page layout are joined
//!    with a single space. A line ending in terminal punctuation, a bullet
//!    or numbered-list start, or an uppercase Latin start keeps its break.
//! 3. Confidence grading: each region's score is bucketed so downstream
//!    review tooling can filter on it.
//!
//! Overlapping regions (degenerate layout) are resolved by confidence; the
//! losing text is recorded in [`DiscardedText`], never silently dropped.

use crate::types::{DiscardedText, Region};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

/// Regions below this confidence get a placeholder instead of garbage text.
pub const UNUSABLE_FLOOR: f32 = 0.5;

/// Regions at or above this need no human review.
pub const REVIEW_FLOOR: f32 = 0.85;

/// Placeholder for text too unreliable to keep.
pub const UNCLEAR_PLACEHOLDER: &str = "[이미지: 텍스트 불명확]";

pub(crate) static SENTENCE_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?。…]\s*$").expect("Sentence-end regex pattern is valid and should compile"));

static BULLET_START: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*[-•▪▸►●○◆◇※☞·\d]+[.)]\s").expect("Bullet-start regex pattern is valid and should compile")
});

static SPACE_RUNS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t]{2,}").expect("Space-run regex pattern is valid and should compile"));

/// Confidence grade for one region or page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
    VeryLow,
}

impl ConfidenceLevel {
    /// Grade a confidence score. `floor` is the configured medium/low
    /// boundary (the engine fallback threshold).
    pub fn classify(confidence: f32, floor: f32) -> Self {
        if confidence >= REVIEW_FLOOR {
            ConfidenceLevel::High
        } else if confidence >= floor {
            ConfidenceLevel::Medium
        } else if confidence >= UNUSABLE_FLOOR {
            ConfidenceLevel::Low
        } else {
            ConfidenceLevel::VeryLow
        }
    }
}

/// Corrected page text plus the review signals the checkpoint carries.
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    pub text: String,
    /// Mean confidence over textual regions, 0.0 for an empty page.
    pub confidence: f32,
    pub needs_review: bool,
    pub discarded: Vec<DiscardedText>,
}

/// Apply jamo repair, line merge, and confidence grading to a page's
/// regions, resolving overlaps first. Regions are mutated in place; the
/// returned [`PageText`] is what gets persisted alongside them.
pub fn correct_page(regions: &mut Vec<Region>, confidence_floor: f32) -> PageText {
    let discarded = resolve_overlaps(regions);

    let mut needs_review = false;
    let mut textual = 0u32;
    let mut confidence_sum = 0.0f32;
    let mut parts: Vec<String> = Vec::with_capacity(regions.len());

    for region in regions.iter_mut() {
        if !region.kind.is_textual() {
            continue;
        }
        textual += 1;
        confidence_sum += region.confidence;

        let level = ConfidenceLevel::classify(region.confidence, confidence_floor);
        if region.confidence < UNUSABLE_FLOOR {
            region.text = UNCLEAR_PLACEHOLDER.to_string();
            needs_review = true;
        } else {
            let repaired = repair_jamo(&region.text);
            region.text = merge_wrapped_lines(&repaired);
            if region.confidence < REVIEW_FLOOR {
                needs_review = true;
            }
        }
        tracing::trace!(index = region.index, ?level, "region graded");

        if !region.text.is_empty() {
            parts.push(region.text.clone());
        }
    }

    let confidence = if textual == 0 {
        0.0
    } else {
        confidence_sum / textual as f32
    };

    PageText {
        text: parts.join("\n\n"),
        confidence,
        needs_review,
        discarded,
    }
}

/// Fix common Korean OCR artifacts: the Hangul filler (U+3164) becomes a
/// space, the compatibility middle dot (U+318D) becomes U+00B7, space runs
/// collapse, and isolated compatibility jamo sequences are recomposed into
/// syllable blocks. The result is NFC-normalized and trimmed.
pub fn repair_jamo(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let text = text.replace('\u{3164}', " ").replace('\u{318D}', "\u{00B7}");
    let text = SPACE_RUNS.replace_all(&text, " ");
    let composed = compose_jamo(&text);
    composed.nfc().collect::<String>().trim().to_string()
}

/// Compatibility consonant (U+3131..) to syllable initial index.
fn initial_index(ch: char) -> Option<u32> {
    let idx = match ch {
        'ㄱ' => 0,
        'ㄲ' => 1,
        'ㄴ' => 2,
        'ㄷ' => 3,
        'ㄸ' => 4,
        'ㄹ' => 5,
        'ㅁ' => 6,
        'ㅂ' => 7,
        'ㅃ' => 8,
        'ㅅ' => 9,
        'ㅆ' => 10,
        'ㅇ' => 11,
        'ㅈ' => 12,
        'ㅉ' => 13,
        'ㅊ' => 14,
        'ㅋ' => 15,
        'ㅌ' => 16,
        'ㅍ' => 17,
        'ㅎ' => 18,
        _ => return None,
    };
    Some(idx)
}

/// Compatibility vowel (U+314F..U+3163) to syllable medial index.
fn medial_index(ch: char) -> Option<u32> {
    let cp = ch as u32;
    (0x314F..=0x3163).contains(&cp).then(|| cp - 0x314F)
}

/// Compatibility consonant to syllable final index (1-based; 0 means no
/// final consonant).
fn final_index(ch: char) -> Option<u32> {
    let idx = match ch {
        'ㄱ' => 1,
        'ㄲ' => 2,
        'ㄴ' => 4,
        'ㄷ' => 7,
        'ㄹ' => 8,
        'ㅁ' => 16,
        'ㅂ' => 17,
        'ㅅ' => 19,
        'ㅆ' => 20,
        'ㅇ' => 21,
        'ㅈ' => 22,
        'ㅊ' => 23,
        'ㅋ' => 24,
        'ㅌ' => 25,
        'ㅍ' => 26,
        'ㅎ' => 27,
        _ => return None,
    };
    Some(idx)
}

/// Recompose runs of compatibility jamo into precomposed syllables. A
/// trailing consonant is only taken as the final when the character after
/// it is not a vowel (otherwise it is the next syllable's initial).
fn compose_jamo(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        if let Some(initial) = initial_index(chars[i]) {
            if let Some(medial) = i
                .checked_add(1)
                .and_then(|j| chars.get(j))
                .and_then(|&c| medial_index(c))
            {
                let mut fin = 0;
                let mut consumed = 2;
                if let Some(&candidate) = chars.get(i + 2) {
                    if let Some(f) = final_index(candidate) {
                        let next_is_vowel = chars
                            .get(i + 3)
                            .is_some_and(|&c| medial_index(c).is_some());
                        if !next_is_vowel {
                            fin = f;
                            consumed = 3;
                        }
                    }
                }
                let syllable = 0xAC00 + initial * 21 * 28 + medial * 28 + fin;
                // Always in the precomposed Hangul range.
                if let Some(ch) = char::from_u32(syllable) {
                    out.push(ch);
                    i += consumed;
                    continue;
                }
            }
        }
        out.push(chars[i]);
        i += 1;
    }

    out
}

/// Join lines that were wrapped mid-sentence. Paragraph breaks (blank
/// lines) are preserved; within a paragraph, a line is appended to the
/// previous one when the previous line lacks terminal punctuation and the
/// current line is neither a list item nor an uppercase Latin sentence
/// start.
pub fn merge_wrapped_lines(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let mut paragraphs = Vec::new();
    for para in text.split("\n\n") {
        let lines: Vec<&str> = para.split('\n').collect();
        if lines.len() <= 1 {
            paragraphs.push(para.to_string());
            continue;
        }

        let mut merged: Vec<String> = vec![lines[0].to_string()];
        for &line in &lines[1..] {
            let stripped = line.trim();
            if stripped.is_empty() {
                continue;
            }

            let starts_upper = stripped
                .chars()
                .next()
                .is_some_and(|c| c.is_uppercase());
            let continues = match merged.last() {
                Some(prev) => {
                    !SENTENCE_END.is_match(prev) && !BULLET_START.is_match(line) && !starts_upper
                }
                None => false,
            };

            if continues {
                if let Some(prev) = merged.last_mut() {
                    *prev = format!("{} {}", prev.trim_end(), stripped);
                }
            } else {
                merged.push(line.to_string());
            }
        }
        paragraphs.push(merged.join("\n"));
    }

    paragraphs.join("\n\n")
}

/// When two regions substantially overlap (projection overlap above 0.5 on
/// both axes), keep the higher-confidence one and return the loser's text.
/// Surviving regions are renumbered to keep indices gap-free.
pub fn resolve_overlaps(regions: &mut Vec<Region>) -> Vec<DiscardedText> {
    let mut discarded = Vec::new();
    let mut dropped = vec![false; regions.len()];

    for i in 0..regions.len() {
        if dropped[i] {
            continue;
        }
        for j in (i + 1)..regions.len() {
            if dropped[j] {
                continue;
            }
            let a = &regions[i];
            let b = &regions[j];
            let overlapping = a.bbox.horizontal_overlap(&b.bbox) > 0.5
                && a.bbox.vertical_overlap(&b.bbox) > 0.5;
            if !overlapping {
                continue;
            }

            let loser = if a.confidence >= b.confidence { j } else { i };
            dropped[loser] = true;
            let lost = &regions[loser];
            tracing::debug!(
                kept = if loser == j { i } else { j },
                dropped = loser,
                "overlapping regions resolved by confidence"
            );
            discarded.push(DiscardedText {
                region_index: lost.index,
                text: lost.text.clone(),
                engine_id: lost.engine_id.clone(),
                confidence: lost.confidence,
            });
            if dropped[i] {
                break;
            }
        }
    }

    let mut keep = dropped.iter().map(|d| !d);
    regions.retain(|_| keep.next().unwrap_or(true));
    for (index, region) in regions.iter_mut().enumerate() {
        region.index = index;
    }

    discarded
}

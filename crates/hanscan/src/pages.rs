//! Input discovery.
//!
//! The capture collaborator writes `page_NNNN.png` files (fixed-width,
//! zero-padded, 1-based) into a directory; hanscan consumes only that path
//! and naming convention. Missing indices are tolerated but reported as gaps.

use crate::error::Result;
use std::path::{Path, PathBuf};

/// One discovered page image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSource {
    pub index: u32,
    pub path: PathBuf,
}

/// Parse the page index out of a `page_NNNN.png` file name.
pub fn page_index_of(path: &Path) -> Option<u32> {
    let stem = path.file_stem()?.to_str()?;
    let digits = stem.strip_prefix("page_")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Scan `input_dir` for page images within the inclusive range
/// `[page_start, page_end]` (`page_end == 0` means open-ended), sorted by
/// index. Non-matching files are ignored.
///
/// Failure to read the directory itself is batch-fatal and bubbles up.
pub fn discover_pages(input_dir: &Path, page_start: u32, page_end: u32) -> Result<Vec<PageSource>> {
    let mut pages = Vec::new();

    for entry in std::fs::read_dir(input_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("png") {
            continue;
        }
        let Some(index) = page_index_of(&path) else {
            continue;
        };
        if index < page_start {
            continue;
        }
        if page_end > 0 && index > page_end {
            continue;
        }
        pages.push(PageSource { index, path });
    }

    pages.sort_by_key(|p| p.index);
    pages.dedup_by_key(|p| p.index);

    tracing::debug!(count = pages.len(), dir = %input_dir.display(), "discovered page images");
    Ok(pages)
}

/// Indices missing between the first and last discovered page.
pub fn find_gaps(pages: &[PageSource]) -> Vec<u32> {
    let (Some(first), Some(last)) = (pages.first(), pages.last()) else {
        return Vec::new();
    };

    let mut gaps = Vec::new();
    let mut present = pages.iter().map(|p| p.index).peekable();
    for expected in first.index..=last.index {
        if present.peek() == Some(&expected) {
            present.next();
        } else {
            gaps.push(expected);
        }
    }
    gaps
}

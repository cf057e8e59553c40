//! Layout analysis: region detection and reading order.
//!
//! Works on the corrected grayscale page: binarize (Otsu), find text bands
//! via horizontal projection, and detect a multi-column split via a vertical
//! whitespace gutter. Reading order is whole-column first (left to right),
//! then top to bottom, then left to right: a total order with indices
//! `0..n`, no duplicates, no gaps.
//!
//! Degenerate layout (no ink found) degrades to a single region covering the
//! full page rather than failing the page.

use crate::preprocess::otsu_threshold;
use crate::types::{BoundingBox, Region, RegionKind};
use image::GrayImage;

/// Minimum gutter width as a fraction of page width.
const MIN_GUTTER_FRACTION: f32 = 0.02;

/// The gutter must sit within this central portion of the page width.
const GUTTER_SEARCH_LOW: f32 = 0.3;
const GUTTER_SEARCH_HIGH: f32 = 0.7;

/// Bands shorter than this many pixels are noise.
const MIN_BAND_HEIGHT: u32 = 6;

/// Ink density above which a band is treated as a figure.
const FIGURE_DENSITY: f32 = 0.40;

/// Bands fully inside the bottom fraction of the page are footers.
const FOOTER_ZONE: f32 = 0.94;

/// A horizontal strip of ink rows within one column.
#[derive(Debug, Clone, Copy)]
struct Band {
    top: u32,
    bottom: u32, // exclusive
}

impl Band {
    fn height(&self) -> u32 {
        self.bottom - self.top
    }
}

/// Detect regions and assign reading order.
pub fn analyze(image: &GrayImage) -> Vec<Region> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return vec![full_page_region(width.max(1), height.max(1))];
    }

    let threshold = otsu_threshold(image);
    let columns = split_columns(image, threshold);

    let mut regions = Vec::new();
    for (col_start, col_end) in &columns {
        let bands = find_bands(image, threshold, *col_start, *col_end);
        for band in bands {
            if let Some(bbox) = band_bbox(image, threshold, *col_start, *col_end, band) {
                regions.push(bbox);
            }
        }
    }

    if regions.is_empty() {
        tracing::debug!("no text bands found, degrading to whole-page region");
        return vec![full_page_region(width, height)];
    }

    classify_and_order(image, threshold, regions, height)
}

fn full_page_region(width: u32, height: u32) -> Region {
    Region::new(0, BoundingBox::new(0, 0, width, height), RegionKind::Text)
}

/// Split the page into columns at a central whitespace gutter, when one
/// exists. Returns half-open `(start, end)` x ranges, left to right.
fn split_columns(image: &GrayImage, threshold: u8) -> Vec<(u32, u32)> {
    let (width, height) = image.dimensions();

    let mut column_ink = vec![0u32; width as usize];
    for y in 0..height {
        for x in 0..width {
            if image.get_pixel(x, y)[0] < threshold {
                column_ink[x as usize] += 1;
            }
        }
    }

    // Tolerate a couple of stray pixels per column.
    let noise_ceiling = (height / 300).max(1);
    let search_low = (width as f32 * GUTTER_SEARCH_LOW) as u32;
    let search_high = (width as f32 * GUTTER_SEARCH_HIGH) as u32;
    let min_gutter = ((width as f32 * MIN_GUTTER_FRACTION) as u32).max(2);

    let mut best_run: Option<(u32, u32)> = None;
    let mut run_start: Option<u32> = None;
    for x in search_low..=search_high.min(width - 1) {
        let blank = column_ink[x as usize] <= noise_ceiling;
        match (blank, run_start) {
            (true, None) => run_start = Some(x),
            (false, Some(start)) => {
                let run = (start, x);
                if run.1 - run.0 >= min_gutter
                    && best_run.is_none_or(|(s, e)| run.1 - run.0 > e - s)
                {
                    best_run = Some(run);
                }
                run_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = run_start {
        let run = (start, search_high.min(width - 1) + 1);
        if run.1 - run.0 >= min_gutter && best_run.is_none_or(|(s, e)| run.1 - run.0 > e - s) {
            best_run = Some(run);
        }
    }

    match best_run {
        Some((start, end)) => {
            let split = start + (end - start) / 2;
            tracing::debug!(split, "column gutter detected");
            vec![(0, split), (split, width)]
        }
        None => vec![(0, width)],
    }
}

/// Contiguous ink-row runs within one column's x range, with close runs
/// merged into paragraph-level bands.
fn find_bands(image: &GrayImage, threshold: u8, col_start: u32, col_end: u32) -> Vec<Band> {
    let height = image.height();
    let col_width = col_end.saturating_sub(col_start);
    if col_width == 0 {
        return Vec::new();
    }

    let ink_floor = ((col_width as f32 * 0.005) as u32).max(2);

    let mut raw = Vec::new();
    let mut start: Option<u32> = None;
    for y in 0..height {
        let mut ink = 0u32;
        for x in col_start..col_end {
            if image.get_pixel(x, y)[0] < threshold {
                ink += 1;
            }
        }
        let has_ink = ink >= ink_floor;
        match (has_ink, start) {
            (true, None) => start = Some(y),
            (false, Some(top)) => {
                raw.push(Band { top, bottom: y });
                start = None;
            }
            _ => {}
        }
    }
    if let Some(top) = start {
        raw.push(Band { top, bottom: height });
    }

    raw.retain(|b| b.height() >= MIN_BAND_HEIGHT);
    if raw.is_empty() {
        return raw;
    }

    // Line gaps smaller than most of a line height are intra-paragraph.
    let mut heights: Vec<u32> = raw.iter().map(Band::height).collect();
    heights.sort_unstable();
    let median_height = heights[heights.len() / 2];
    let merge_gap = ((median_height as f32) * 0.8) as u32;

    let mut merged: Vec<Band> = Vec::with_capacity(raw.len());
    for band in raw {
        match merged.last_mut() {
            Some(prev) if band.top.saturating_sub(prev.bottom) <= merge_gap => {
                prev.bottom = band.bottom;
            }
            _ => merged.push(band),
        }
    }
    merged
}

/// Trim a band to its ink extent and produce a bounding box.
fn band_bbox(
    image: &GrayImage,
    threshold: u8,
    col_start: u32,
    col_end: u32,
    band: Band,
) -> Option<BoundingBox> {
    let mut min_x = u32::MAX;
    let mut max_x = 0u32;
    for y in band.top..band.bottom {
        for x in col_start..col_end {
            if image.get_pixel(x, y)[0] < threshold {
                min_x = min_x.min(x);
                max_x = max_x.max(x);
            }
        }
    }
    if min_x > max_x {
        return None;
    }
    Some(BoundingBox::new(
        min_x,
        band.top,
        max_x - min_x + 1,
        band.height(),
    ))
}

/// Classify band kinds and assign the final reading order, numbering
/// regions `0..n`.
fn classify_and_order(
    image: &GrayImage,
    threshold: u8,
    boxes: Vec<BoundingBox>,
    page_height: u32,
) -> Vec<Region> {
    let mut heights: Vec<u32> = boxes.iter().map(|b| b.height).collect();
    heights.sort_unstable();
    let median_height = heights[heights.len() / 2].max(1);

    let footer_top = (page_height as f32 * FOOTER_ZONE) as u32;

    let mut regions: Vec<Region> = boxes
        .into_iter()
        .map(|bbox| {
            let density = ink_density(image, threshold, &bbox);
            let kind = if density > FIGURE_DENSITY {
                RegionKind::Figure
            } else if has_table_rules(image, threshold, &bbox) {
                RegionKind::Table
            } else if bbox.y >= footer_top {
                RegionKind::Footer
            } else if bbox.height >= median_height.saturating_mul(17) / 10
                && heights.len() > 1
            {
                RegionKind::Heading
            } else {
                RegionKind::Text
            };
            Region::new(0, bbox, kind)
        })
        .collect();

    regions = order_column_major(regions);

    for (index, region) in regions.iter_mut().enumerate() {
        region.index = index;
    }
    regions
}

/// Group regions into columns by horizontal overlap, order columns left to
/// right, and regions within a column top to bottom (left to right on a tie).
fn order_column_major(mut regions: Vec<Region>) -> Vec<Region> {
    regions.sort_by_key(|r| r.bbox.x);

    let mut columns: Vec<Vec<Region>> = Vec::new();
    for region in regions {
        let slot = columns.iter_mut().find(|col| {
            col.iter()
                .any(|other| other.bbox.horizontal_overlap(&region.bbox) > 0.3)
        });
        match slot {
            Some(col) => col.push(region),
            None => columns.push(vec![region]),
        }
    }

    columns.sort_by_key(|col| col.iter().map(|r| r.bbox.x).min().unwrap_or(0));
    for col in &mut columns {
        col.sort_by(|a, b| (a.bbox.y, a.bbox.x).cmp(&(b.bbox.y, b.bbox.x)));
    }

    columns.into_iter().flatten().collect()
}

fn ink_density(image: &GrayImage, threshold: u8, bbox: &BoundingBox) -> f32 {
    let mut ink = 0u64;
    for y in bbox.y..bbox.y_max().min(image.height()) {
        for x in bbox.x..bbox.x_max().min(image.width()) {
            if image.get_pixel(x, y)[0] < threshold {
                ink += 1;
            }
        }
    }
    ink as f32 / bbox.area().max(1) as f32
}

/// Ruled tables show several near-full-height vertical ink lines.
fn has_table_rules(image: &GrayImage, threshold: u8, bbox: &BoundingBox) -> bool {
    if bbox.height < MIN_BAND_HEIGHT * 3 {
        return false;
    }

    let mut rules = 0u32;
    let mut previous_was_rule = false;
    for x in bbox.x..bbox.x_max().min(image.width()) {
        let mut ink = 0u32;
        for y in bbox.y..bbox.y_max().min(image.height()) {
            if image.get_pixel(x, y)[0] < threshold {
                ink += 1;
            }
        }
        let is_rule = ink as f32 >= bbox.height as f32 * 0.8;
        if is_rule && !previous_was_rule {
            rules += 1;
        }
        previous_was_rule = is_rule;
    }
    rules >= 3
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank(width: u32, height: u32) -> GrayImage {
        GrayImage::from_pixel(width, height, image::Luma([255u8]))
    }

    fn fill(img: &mut GrayImage, x0: u32, y0: u32, x1: u32, y1: u32, value: u8) {
        for y in y0..y1 {
            for x in x0..x1 {
                img.put_pixel(x, y, image::Luma([value]));
            }
        }
    }

    /// Draw a paragraph of text-like lines: `lines` bars of height 10 with
    /// 6px gaps.
    fn draw_paragraph(img: &mut GrayImage, x0: u32, x1: u32, top: u32, lines: u32) -> u32 {
        let mut y = top;
        for _ in 0..lines {
            fill(img, x0, x1, y, y + 10, 0);
            y += 16;
        }
        y
    }

    fn assert_total_order(regions: &[Region]) {
        for (i, region) in regions.iter().enumerate() {
            assert_eq!(region.index, i, "reading order must be gap-free");
        }
    }

    #[test]
    fn test_blank_page_degrades_to_full_page() {
        let img = blank(400, 300);
        let regions = analyze(&img);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].bbox, BoundingBox::new(0, 0, 400, 300));
        assert_eq!(regions[0].kind, RegionKind::Text);
        assert_total_order(&regions);
    }

    #[test]
    fn test_single_column_paragraphs_top_to_bottom() {
        let mut img = blank(400, 600);
        draw_paragraph(&mut img, 40, 360, 50, 4);
        draw_paragraph(&mut img, 40, 360, 300, 4);

        let regions = analyze(&img);
        assert_eq!(regions.len(), 2, "expected two paragraph blocks: {regions:?}");
        assert!(regions[0].bbox.y < regions[1].bbox.y);
        assert_total_order(&regions);
    }

    #[test]
    fn test_adjacent_lines_merge_into_one_block() {
        let mut img = blank(400, 300);
        draw_paragraph(&mut img, 40, 360, 50, 5);

        let regions = analyze(&img);
        assert_eq!(regions.len(), 1);
        assert_total_order(&regions);
    }

    #[test]
    fn test_two_columns_read_left_column_first() {
        let mut img = blank(600, 500);
        // Left column: two blocks. Right column: two blocks.
        draw_paragraph(&mut img, 30, 270, 60, 3);
        draw_paragraph(&mut img, 30, 270, 280, 3);
        draw_paragraph(&mut img, 330, 570, 60, 3);
        draw_paragraph(&mut img, 330, 570, 280, 3);

        let regions = analyze(&img);
        assert_eq!(regions.len(), 4, "{regions:?}");
        assert_total_order(&regions);

        // Whole left column precedes the right column.
        assert!(regions[0].bbox.x < 300 && regions[1].bbox.x < 300);
        assert!(regions[2].bbox.x >= 300 && regions[3].bbox.x >= 300);
        // Within a column, top to bottom.
        assert!(regions[0].bbox.y < regions[1].bbox.y);
        assert!(regions[2].bbox.y < regions[3].bbox.y);
    }

    #[test]
    fn test_solid_block_classified_as_figure() {
        let mut img = blank(400, 600);
        draw_paragraph(&mut img, 40, 360, 60, 3);
        fill(&mut img, 80, 300, 320, 480, 0);

        let regions = analyze(&img);
        assert!(
            regions.iter().any(|r| r.kind == RegionKind::Figure),
            "{regions:?}"
        );
        assert_total_order(&regions);
    }

    #[test]
    fn test_reading_order_total_for_many_blocks() {
        let mut img = blank(400, 900);
        let mut top = 30;
        for _ in 0..6 {
            top = draw_paragraph(&mut img, 40, 360, top, 2) + 30;
        }

        let regions = analyze(&img);
        assert!(regions.len() >= 2);
        assert_total_order(&regions);
        // Strictly descending page position.
        for pair in regions.windows(2) {
            assert!(pair[0].bbox.y < pair[1].bbox.y);
        }
    }
}

//! Per-page quality assessment and corrective transforms.
//!
//! [`assess`] measures sharpness (Laplacian variance), contrast (grayscale
//! standard deviation), brightness, and skew, and turns them into a
//! [`Verdict`]. [`correct`] applies deskew and contrast stretching to
//! borderline and failed pages. The source file is never mutated; both
//! functions work on in-memory images only, and a `Fail` verdict flags the
//! page without discarding it.

use crate::config::QualityConfig;
use crate::types::{QualityReport, Verdict};
use image::GrayImage;
use image::imageops::FilterType;
use imageproc::geometric_transformations::{Interpolation, rotate_about_center};

/// Skew below this magnitude (degrees) is treated as zero.
const SKEW_EPSILON_DEGREES: f32 = 0.5;

/// Width the image is downsampled to for skew estimation.
const SKEW_ESTIMATE_WIDTH: u32 = 512;

/// Assess image quality and emit a verdict.
///
/// `Fail` means the metrics fell below half the configured floors (the page
/// is still carried forward, flagged); `Borderline` means corrective
/// transforms should run before layout; `Pass` proceeds unmodified.
pub fn assess(image: &GrayImage, config: &QualityConfig) -> QualityReport {
    let sharpness = laplacian_variance(image);
    let (brightness, contrast) = mean_and_stddev(image);
    let skew_degrees = if config.deskew {
        estimate_skew(image, config.max_skew_degrees)
    } else {
        0.0
    };

    let mut warnings = Vec::new();
    if sharpness < config.sharpness_floor {
        warnings.push(format!(
            "image is blurry (sharpness={sharpness:.1}, floor={})",
            config.sharpness_floor
        ));
    }
    if contrast < config.contrast_floor {
        warnings.push(format!(
            "contrast is low (contrast={contrast:.1}, floor={})",
            config.contrast_floor
        ));
    }
    if brightness < config.brightness_min {
        warnings.push(format!("image is too dark (brightness={brightness:.1})"));
    }
    if brightness > config.brightness_max {
        warnings.push(format!("image is too bright (brightness={brightness:.1})"));
    }

    let verdict = if sharpness < config.sharpness_floor * 0.5 || contrast < config.contrast_floor * 0.5 {
        Verdict::Fail
    } else if !warnings.is_empty() || skew_degrees.abs() > SKEW_EPSILON_DEGREES {
        Verdict::Borderline
    } else {
        Verdict::Pass
    };

    QualityReport {
        sharpness,
        contrast,
        brightness,
        skew_degrees,
        verdict,
        warnings,
    }
}

/// Apply corrective transforms for `Borderline` and `Fail` pages: deskew
/// (when an angle was detected) followed by a percentile contrast stretch.
/// `Pass` pages are returned unchanged.
pub fn correct(image: GrayImage, report: &QualityReport, config: &QualityConfig) -> GrayImage {
    if report.verdict == Verdict::Pass {
        return image;
    }

    let mut corrected = image;

    if config.deskew && report.skew_degrees.abs() > SKEW_EPSILON_DEGREES {
        tracing::debug!(angle = report.skew_degrees, "deskewing page");
        corrected = rotate_about_center(
            &corrected,
            report.skew_degrees.to_radians(),
            Interpolation::Bilinear,
            image::Luma([255u8]),
        );
    }

    if report.contrast < config.contrast_floor || report.brightness < config.brightness_min {
        corrected = stretch_contrast(&corrected);
    }

    corrected
}

/// Variance of a 3x3 Laplacian response. Higher means sharper edges.
fn laplacian_variance(image: &GrayImage) -> f64 {
    let (width, height) = image.dimensions();
    if width < 3 || height < 3 {
        return 0.0;
    }

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut count = 0u64;

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let center = image.get_pixel(x, y)[0] as i32;
            let up = image.get_pixel(x, y - 1)[0] as i32;
            let down = image.get_pixel(x, y + 1)[0] as i32;
            let left = image.get_pixel(x - 1, y)[0] as i32;
            let right = image.get_pixel(x + 1, y)[0] as i32;

            let response = (4 * center - up - down - left - right) as f64;
            sum += response;
            sum_sq += response * response;
            count += 1;
        }
    }

    let mean = sum / count as f64;
    sum_sq / count as f64 - mean * mean
}

fn mean_and_stddev(image: &GrayImage) -> (f64, f64) {
    let pixels = image.as_raw();
    if pixels.is_empty() {
        return (0.0, 0.0);
    }

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for &p in pixels {
        let v = p as f64;
        sum += v;
        sum_sq += v * v;
    }

    let n = pixels.len() as f64;
    let mean = sum / n;
    let variance = (sum_sq / n - mean * mean).max(0.0);
    (mean, variance.sqrt())
}

/// Otsu's threshold over the grayscale histogram. Shared with the layout
/// analyzer's binarization.
pub(crate) fn otsu_threshold(image: &GrayImage) -> u8 {
    let mut histogram = [0u64; 256];
    for &p in image.as_raw() {
        histogram[p as usize] += 1;
    }

    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return 128;
    }

    let sum_all: f64 = histogram.iter().enumerate().map(|(i, &c)| i as f64 * c as f64).sum();

    let mut sum_background = 0.0f64;
    let mut weight_background = 0u64;
    let mut best_threshold = 128u8;
    let mut best_variance = 0.0f64;

    for (level, &count) in histogram.iter().enumerate() {
        weight_background += count;
        if weight_background == 0 {
            continue;
        }
        let weight_foreground = total - weight_background;
        if weight_foreground == 0 {
            break;
        }

        sum_background += level as f64 * count as f64;
        let mean_background = sum_background / weight_background as f64;
        let mean_foreground = (sum_all - sum_background) / weight_foreground as f64;

        let between = weight_background as f64
            * weight_foreground as f64
            * (mean_background - mean_foreground).powi(2);
        if between > best_variance {
            best_variance = between;
            best_threshold = level as u8;
        }
    }

    best_threshold
}

/// Estimate skew by shearing row projections over a small angle window and
/// keeping the angle that maximizes profile gradient energy. Runs on a
/// downsampled copy.
fn estimate_skew(image: &GrayImage, max_degrees: f32) -> f32 {
    let (width, height) = image.dimensions();
    if width < 32 || height < 32 || max_degrees <= 0.0 {
        return 0.0;
    }

    let small = if width > SKEW_ESTIMATE_WIDTH {
        let scale = SKEW_ESTIMATE_WIDTH as f32 / width as f32;
        image::imageops::resize(
            image,
            SKEW_ESTIMATE_WIDTH,
            ((height as f32 * scale).round() as u32).max(1),
            FilterType::Triangle,
        )
    } else {
        image.clone()
    };

    let threshold = otsu_threshold(&small);
    let (w, h) = small.dimensions();

    let mut dark: Vec<(u32, u32)> = Vec::new();
    for y in 0..h {
        for x in 0..w {
            if small.get_pixel(x, y)[0] < threshold {
                dark.push((x, y));
            }
        }
    }
    if dark.len() < 100 {
        return 0.0;
    }

    let mut best_angle = 0.0f32;
    let mut best_score = f64::MIN;

    let steps = (max_degrees / 0.25).round() as i32;
    for step in -steps..=steps {
        let angle = step as f32 * 0.25;
        let tan = angle.to_radians().tan();

        let mut bins = vec![0u32; h as usize + 1];
        for &(x, y) in &dark {
            let shifted = y as f32 - x as f32 * tan;
            let bin = shifted.round().clamp(0.0, h as f32) as usize;
            bins[bin] += 1;
        }

        let score: f64 = bins
            .windows(2)
            .map(|pair| {
                let d = pair[1] as f64 - pair[0] as f64;
                d * d
            })
            .sum();

        if score > best_score {
            best_score = score;
            best_angle = angle;
        }
    }

    if best_angle.abs() <= SKEW_EPSILON_DEGREES {
        0.0
    } else {
        best_angle
    }
}

/// Linear contrast stretch between the 2nd and 98th brightness percentiles.
fn stretch_contrast(image: &GrayImage) -> GrayImage {
    let mut histogram = [0u64; 256];
    for &p in image.as_raw() {
        histogram[p as usize] += 1;
    }
    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return image.clone();
    }

    let low_target = total / 50;
    let high_target = total - total / 50;

    let mut cumulative = 0u64;
    let mut low = 0u8;
    let mut high = 255u8;
    let mut low_found = false;
    for (level, &count) in histogram.iter().enumerate() {
        cumulative += count;
        if !low_found && cumulative >= low_target {
            low = level as u8;
            low_found = true;
        }
        if cumulative >= high_target {
            high = level as u8;
            break;
        }
    }

    if high <= low {
        return image.clone();
    }

    let range = (high - low) as f32;
    let mut out = image.clone();
    for p in out.pixels_mut() {
        let v = p[0].saturating_sub(low) as f32;
        p[0] = ((v / range) * 255.0).min(255.0) as u8;
    }
    out
}

//! Visual baseline comparison for captured screenshots
//!
//! `capture` steps marked `baseline: true` are compared against a baseline
//! directory: identical file hashes short-circuit, otherwise pixels are
//! diffed and a highlight image is written next to the report.

use std::path::{Path, PathBuf};

use image::{GenericImageView, Rgba, RgbaImage};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{HarnessError, HarnessResult};

/// Result of one baseline comparison.
#[derive(Debug, Clone)]
pub struct VisualDiff {
    pub matches: bool,
    pub diff_percent: f64,
    pub diff_pixels: u64,
    pub total_pixels: u64,
    pub diff_image_path: Option<PathBuf>,
}

/// Configuration for visual comparisons.
#[derive(Debug, Clone)]
pub struct VisualConfig {
    pub baseline_dir: PathBuf,
    /// Allowed differing-pixel percentage (0.0 - 100.0).
    pub threshold: f64,
    /// Adopt the current screenshot when no baseline exists yet.
    pub auto_update: bool,
}

pub struct VisualTester {
    config: VisualConfig,
}

impl VisualTester {
    pub fn new(config: VisualConfig) -> HarnessResult<Self> {
        std::fs::create_dir_all(&config.baseline_dir)?;
        Ok(Self { config })
    }

    /// Compare a captured screenshot against `baseline_dir/<label>.png`.
    ///
    /// Returns the diff on success or [`HarnessError::BaselineMissing`] when
    /// there is no baseline and auto-update is off; an over-threshold diff is
    /// reported via [`HarnessError::VisualMismatch`].
    pub fn compare(&self, actual: &Path, label: &str) -> HarnessResult<VisualDiff> {
        let baseline = self.baseline_path(label);

        if !baseline.exists() {
            if self.config.auto_update {
                info!("Adopting baseline for '{}'", label);
                std::fs::copy(actual, &baseline)?;
                return Ok(VisualDiff {
                    matches: true,
                    diff_percent: 0.0,
                    diff_pixels: 0,
                    total_pixels: 0,
                    diff_image_path: None,
                });
            }
            return Err(HarnessError::BaselineMissing(label.to_string()));
        }

        // Identical bytes need no pixel walk.
        if hash_file(actual)? == hash_file(&baseline)? {
            debug!("Screenshot '{}' matches baseline exactly", label);
            let img = image::open(actual)?;
            let total = (img.width() as u64) * (img.height() as u64);
            return Ok(VisualDiff {
                matches: true,
                diff_percent: 0.0,
                diff_pixels: 0,
                total_pixels: total,
                diff_image_path: None,
            });
        }

        let actual_img = image::open(actual)?.to_rgba8();
        let baseline_img = image::open(&baseline)?.to_rgba8();

        let diff = diff_images(&actual_img, &baseline_img);
        let diff_image_path = if diff.diff_pixels > 0 {
            let path = actual.with_file_name(format!(
                "{}-diff.png",
                actual.file_stem().and_then(|s| s.to_str()).unwrap_or(label)
            ));
            diff.image.save(&path)?;
            Some(path)
        } else {
            None
        };

        let result = VisualDiff {
            matches: diff.percent <= self.config.threshold,
            diff_percent: diff.percent,
            diff_pixels: diff.diff_pixels,
            total_pixels: diff.total_pixels,
            diff_image_path,
        };

        if !result.matches {
            return Err(HarnessError::VisualMismatch {
                label: label.to_string(),
                diff_percent: result.diff_percent,
                threshold: self.config.threshold,
            });
        }

        Ok(result)
    }

    /// Overwrite the baseline for `label` with the given screenshot.
    pub fn update_baseline(&self, actual: &Path, label: &str) -> HarnessResult<()> {
        let baseline = self.baseline_path(label);
        std::fs::copy(actual, &baseline)?;
        info!("Baseline '{}' updated", label);
        Ok(())
    }

    fn baseline_path(&self, label: &str) -> PathBuf {
        self.config.baseline_dir.join(format!("{}.png", label))
    }
}

struct PixelDiff {
    diff_pixels: u64,
    total_pixels: u64,
    percent: f64,
    image: RgbaImage,
}

/// Count differing pixels and paint them red on a dimmed copy of the actual
/// image. Dimension mismatches count every pixel outside the overlap.
fn diff_images(actual: &RgbaImage, baseline: &RgbaImage) -> PixelDiff {
    let width = actual.width().max(baseline.width());
    let height = actual.height().max(baseline.height());
    let total_pixels = (width as u64) * (height as u64);

    let mut image = RgbaImage::new(width, height);
    let mut diff_pixels = 0u64;

    for y in 0..height {
        for x in 0..width {
            let a = pixel_at(actual, x, y);
            let b = pixel_at(baseline, x, y);

            match (a, b) {
                (Some(pa), Some(pb)) if pa == pb => {
                    // Dim matching pixels so differences stand out.
                    let Rgba([r, g, bl, _]) = pa;
                    image.put_pixel(x, y, Rgba([r / 3, g / 3, bl / 3, 255]));
                }
                _ => {
                    diff_pixels += 1;
                    image.put_pixel(x, y, Rgba([255, 0, 0, 255]));
                }
            }
        }
    }

    let percent = if total_pixels == 0 {
        0.0
    } else {
        (diff_pixels as f64 / total_pixels as f64) * 100.0
    };

    PixelDiff {
        diff_pixels,
        total_pixels,
        percent,
        image,
    }
}

fn pixel_at(img: &RgbaImage, x: u32, y: u32) -> Option<Rgba<u8>> {
    if x < img.width() && y < img.height() {
        Some(*img.get_pixel(x, y))
    } else {
        None
    }
}

fn hash_file(path: &Path) -> HarnessResult<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, color: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba(color))
    }

    fn write_png(dir: &Path, name: &str, img: &RgbaImage) -> PathBuf {
        let path = dir.join(name);
        img.save(&path).unwrap();
        path
    }

    fn tester(dir: &Path, threshold: f64, auto_update: bool) -> VisualTester {
        VisualTester::new(VisualConfig {
            baseline_dir: dir.join("baselines"),
            threshold,
            auto_update,
        })
        .unwrap()
    }

    #[test]
    fn identical_images_match() {
        let tmp = tempfile::tempdir().unwrap();
        let tester = tester(tmp.path(), 0.5, false);

        let img = solid(10, 10, [10, 20, 30, 255]);
        let actual = write_png(tmp.path(), "shot.png", &img);
        tester.update_baseline(&actual, "shot").unwrap();

        let diff = tester.compare(&actual, "shot").unwrap();
        assert!(diff.matches);
        assert_eq!(diff.diff_pixels, 0);
    }

    #[test]
    fn missing_baseline_errors_unless_auto_update() {
        let tmp = tempfile::tempdir().unwrap();
        let img = solid(4, 4, [0, 0, 0, 255]);
        let actual = write_png(tmp.path(), "new.png", &img);

        let strict = tester(tmp.path(), 0.5, false);
        assert!(matches!(
            strict.compare(&actual, "new"),
            Err(HarnessError::BaselineMissing(_))
        ));

        let adopting = tester(tmp.path(), 0.5, true);
        let diff = adopting.compare(&actual, "new").unwrap();
        assert!(diff.matches);
        // Baseline now exists for the strict tester too
        assert!(strict.compare(&actual, "new").unwrap().matches);
    }

    #[test]
    fn over_threshold_diff_is_a_mismatch_error() {
        let tmp = tempfile::tempdir().unwrap();
        let tester = tester(tmp.path(), 1.0, false);

        let baseline_img = solid(10, 10, [0, 0, 0, 255]);
        let baseline_file = write_png(tmp.path(), "base.png", &baseline_img);
        tester.update_baseline(&baseline_file, "panel").unwrap();

        // 25 of 100 pixels differ
        let mut changed = baseline_img.clone();
        for y in 0..5 {
            for x in 0..5 {
                changed.put_pixel(x, y, Rgba([255, 255, 255, 255]));
            }
        }
        let actual = write_png(tmp.path(), "changed.png", &changed);

        match tester.compare(&actual, "panel") {
            Err(HarnessError::VisualMismatch {
                diff_percent,
                threshold,
                ..
            }) => {
                assert!((diff_percent - 25.0).abs() < f64::EPSILON);
                assert!((threshold - 1.0).abs() < f64::EPSILON);
            }
            other => panic!("expected VisualMismatch, got {:?}", other),
        }

        // The diff highlight landed next to the actual screenshot
        assert!(tmp.path().join("changed-diff.png").is_file());
    }

    #[test]
    fn dimension_mismatch_counts_non_overlapping_pixels() {
        let small = solid(2, 2, [5, 5, 5, 255]);
        let large = solid(4, 2, [5, 5, 5, 255]);
        let diff = diff_images(&small, &large);
        assert_eq!(diff.total_pixels, 8);
        assert_eq!(diff.diff_pixels, 4);
    }
}

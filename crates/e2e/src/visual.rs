//! Visual regression testing with screenshot comparison

use std::path::{Path, PathBuf};

use image::{GenericImageView, Pixel, RgbaImage};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};

/// Result of a visual comparison
#[derive(Debug, Clone)]
pub struct VisualDiff {
    /// Whether the images match (within threshold)
    pub matches: bool,

    /// Percentage of pixels that differ
    pub diff_percent: f64,

    /// Number of different pixels
    pub diff_pixels: u64,

    /// Total pixels compared
    pub total_pixels: u64,

    /// Path to the diff image (if generated)
    pub diff_image_path: Option<PathBuf>,

    /// Hash of the actual screenshot
    pub actual_hash: String,

    /// Hash of the baseline screenshot
    pub baseline_hash: String,
}

/// Configuration for visual testing
#[derive(Debug, Clone)]
pub struct VisualConfig {
    pub baseline_dir: PathBuf,
    pub actual_dir: PathBuf,
    pub diff_dir: PathBuf,

    /// Percent of differing pixels above which a comparison fails
    pub threshold: f64,

    /// Absolute differing-pixel cap that passes regardless of percent
    pub max_diff_pixels: u64,

    /// Whether to create missing baselines from the actual screenshot
    pub auto_update: bool,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            baseline_dir: PathBuf::from("test-results/baselines"),
            actual_dir: PathBuf::from("test-results/screenshots"),
            diff_dir: PathBuf::from("test-results/diffs"),
            threshold: 0.5,
            max_diff_pixels: 100,
            auto_update: false,
        }
    }
}

/// Screenshot comparison against per-browser baselines
pub struct VisualTester {
    config: VisualConfig,
}

impl VisualTester {
    pub fn new(config: VisualConfig) -> E2eResult<Self> {
        std::fs::create_dir_all(&config.baseline_dir)?;
        std::fs::create_dir_all(&config.actual_dir)?;
        std::fs::create_dir_all(&config.diff_dir)?;

        Ok(Self { config })
    }

    /// Compare a screenshot against its baseline.
    ///
    /// A comparison passes when the differing-pixel percentage is within
    /// the threshold, or the absolute count stays under the
    /// max-diff-pixels cap.
    pub fn compare(&self, name: &str, threshold: Option<f64>) -> E2eResult<VisualDiff> {
        let threshold = threshold.unwrap_or(self.config.threshold);

        let actual_path = self.config.actual_dir.join(format!("{}.png", name));
        let baseline_path = self.config.baseline_dir.join(format!("{}.png", name));

        if !actual_path.exists() {
            return Err(E2eError::VisualRegression(format!(
                "actual screenshot not found: {}",
                actual_path.display()
            )));
        }

        if !baseline_path.exists() {
            if self.config.auto_update {
                info!("creating baseline for '{}' (auto-update enabled)", name);
                std::fs::copy(&actual_path, &baseline_path)?;

                let actual_hash = hash_file(&actual_path)?;
                return Ok(VisualDiff {
                    matches: true,
                    diff_percent: 0.0,
                    diff_pixels: 0,
                    total_pixels: 0,
                    diff_image_path: None,
                    actual_hash: actual_hash.clone(),
                    baseline_hash: actual_hash,
                });
            }
            return Err(E2eError::BaselineNotFound(
                baseline_path.to_string_lossy().to_string(),
            ));
        }

        let actual_hash = hash_file(&actual_path)?;
        let baseline_hash = hash_file(&baseline_path)?;

        let actual_img = image::open(&actual_path)?;
        let baseline_img = image::open(&baseline_path)?;

        // Fast path: byte-identical screenshots
        if actual_hash == baseline_hash {
            debug!("screenshots match exactly (same hash)");
            return Ok(VisualDiff {
                matches: true,
                diff_percent: 0.0,
                diff_pixels: 0,
                total_pixels: (actual_img.width() as u64) * (actual_img.height() as u64),
                diff_image_path: None,
                actual_hash,
                baseline_hash,
            });
        }

        if actual_img.dimensions() != baseline_img.dimensions() {
            warn!(
                "screenshot dimensions differ: actual {:?} vs baseline {:?}",
                actual_img.dimensions(),
                baseline_img.dimensions()
            );
            // Compare the overlapping region anyway
        }

        let (width, height) = actual_img.dimensions();
        let actual_rgba = actual_img.to_rgba8();
        let baseline_rgba = baseline_img.to_rgba8();

        let mut diff_img = RgbaImage::new(width, height);
        let mut diff_pixels = 0u64;
        let total_pixels = (width as u64) * (height as u64);

        for y in 0..height.min(baseline_img.height()) {
            for x in 0..width.min(baseline_img.width()) {
                let actual_pixel = actual_rgba.get_pixel(x, y);
                let baseline_pixel = baseline_rgba.get_pixel(x, y);

                if pixels_differ(actual_pixel, baseline_pixel) {
                    diff_pixels += 1;
                    // Mark diff pixels in red
                    diff_img.put_pixel(x, y, image::Rgba([255, 0, 0, 255]));
                } else {
                    // Keep the original but dim it
                    let channels = actual_pixel.channels();
                    diff_img.put_pixel(
                        x,
                        y,
                        image::Rgba([channels[0] / 2, channels[1] / 2, channels[2] / 2, 128]),
                    );
                }
            }
        }

        let diff_percent = (diff_pixels as f64 / total_pixels as f64) * 100.0;
        let matches = diff_percent <= threshold || diff_pixels <= self.config.max_diff_pixels;

        let diff_image_path = if diff_pixels > 0 {
            let path = self.config.diff_dir.join(format!("{}-diff.png", name));
            diff_img.save(&path)?;
            Some(path)
        } else {
            None
        };

        if !matches {
            warn!(
                "visual regression in '{}': {:.2}% pixels differ (threshold: {:.2}%, cap: {})",
                name, diff_percent, threshold, self.config.max_diff_pixels
            );
        }

        Ok(VisualDiff {
            matches,
            diff_percent,
            diff_pixels,
            total_pixels,
            diff_image_path,
            actual_hash,
            baseline_hash,
        })
    }

    /// Update the baseline with the actual screenshot
    pub fn update_baseline(&self, name: &str) -> E2eResult<()> {
        let actual_path = self.config.actual_dir.join(format!("{}.png", name));
        let baseline_path = self.config.baseline_dir.join(format!("{}.png", name));

        if !actual_path.exists() {
            return Err(E2eError::VisualRegression(format!(
                "cannot update baseline: actual screenshot not found: {}",
                actual_path.display()
            )));
        }

        std::fs::copy(&actual_path, &baseline_path)?;
        info!("updated baseline for '{}'", name);

        Ok(())
    }

    /// Promote every actual screenshot to a baseline.
    pub fn update_all_baselines(&self) -> E2eResult<usize> {
        let mut updated = 0;

        for entry in std::fs::read_dir(&self.config.actual_dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.extension().map(|e| e == "png").unwrap_or(false) {
                if let Some(name) = path.file_stem() {
                    self.update_baseline(&name.to_string_lossy())?;
                    updated += 1;
                }
            }
        }

        Ok(updated)
    }
}

/// Check if two pixels differ significantly
fn pixels_differ(a: &image::Rgba<u8>, b: &image::Rgba<u8>) -> bool {
    let a_channels = a.channels();
    let b_channels = b.channels();

    // Allow small color differences (anti-aliasing, compression)
    const TOLERANCE: i32 = 5;

    for i in 0..4 {
        let diff = (a_channels[i] as i32 - b_channels[i] as i32).abs();
        if diff > TOLERANCE {
            return true;
        }
    }

    false
}

/// Hash a file using SHA256
fn hash_file(path: &Path) -> E2eResult<String> {
    let data = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(hex::encode(hasher.finalize()))
}

//! Crop validity policies.
//!
//! A crop is judged by the share of its pixels that are non-black, i.e. whose
//! brightest channel, normalized to `[0, 1]`, exceeds the intensity floor.
//! Two policies apply different thresholds to that share:
//!
//! - **Rejection** only throws away empty no-data regions (share > 1%).
//! - **Strict** demands a mostly non-black crop (share > 90%), dropping tiles
//!   that are largely no-data border.
//!
//! Both comparisons are exclusive. A crop is accepted only when the before and
//! after regions pass independently.

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use super::raster::{BoundingBox, CropResult, RasterHandle, RasterPair};
use crate::pipeline::config::CropConfig;

/// Which threshold the filter applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidityMode {
    /// Used by the random sampler.
    Rejection,
    /// Used by the exhaustive tiler.
    Strict,
}

/// Classifies crop regions as usable or degenerate.
#[derive(Debug, Clone, Copy)]
pub struct ValidityFilter {
    intensity_floor: f32,
    rejection_threshold: f64,
    strict_threshold: f64,
}

impl ValidityFilter {
    pub fn new(intensity_floor: f32, rejection_threshold: f64, strict_threshold: f64) -> Self {
        Self {
            intensity_floor,
            rejection_threshold,
            strict_threshold,
        }
    }

    pub fn from_config(config: &CropConfig) -> Self {
        Self::new(
            config.intensity_floor,
            config.rejection_threshold,
            config.strict_threshold,
        )
    }

    /// Ratio the non-black share must exceed under `mode`.
    pub fn threshold(&self, mode: ValidityMode) -> f64 {
        match mode {
            ValidityMode::Rejection => self.rejection_threshold,
            ValidityMode::Strict => self.strict_threshold,
        }
    }

    /// Share of pixels whose brightest channel exceeds the intensity floor.
    ///
    /// Alpha is ignored. An empty sample has a share of zero.
    pub fn non_black_fraction(&self, sample: &DynamicImage) -> f64 {
        let rgb = sample.to_rgb32f();
        let total = rgb.width() as usize * rgb.height() as usize;
        if total == 0 {
            return 0.0;
        }

        let non_black = rgb
            .pixels()
            .filter(|p| p.0.iter().copied().fold(0.0_f32, f32::max) > self.intensity_floor)
            .count();

        non_black as f64 / total as f64
    }

    /// Judges an already extracted sample.
    pub fn is_sample_valid(&self, sample: &DynamicImage, mode: ValidityMode) -> bool {
        self.non_black_fraction(sample) > self.threshold(mode)
    }

    /// Reads `bbox` from `raster` and judges it.
    pub fn is_valid(&self, raster: &RasterHandle, bbox: &BoundingBox, mode: ValidityMode) -> bool {
        self.is_sample_valid(&raster.read_region(bbox), mode)
    }

    /// Extracts `bbox` from both rasters, returning the crop only if both
    /// regions pass. The after region is not read when the before region
    /// already fails.
    pub fn check_pair(
        &self,
        rasters: &RasterPair,
        bbox: BoundingBox,
        mode: ValidityMode,
    ) -> Option<CropResult> {
        let before = rasters.before.read_region(&bbox);
        if !self.is_sample_valid(&before, mode) {
            return None;
        }

        let after = rasters.after.read_region(&bbox);
        if !self.is_sample_valid(&after, mode) {
            return None;
        }

        Some(CropResult {
            bbox,
            before,
            after,
        })
    }
}

impl Default for ValidityFilter {
    fn default() -> Self {
        Self::from_config(&CropConfig::default())
    }
}

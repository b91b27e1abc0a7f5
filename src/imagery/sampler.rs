//! Random crop sampling with a bounded retry budget.
//!
//! Uses a ChaCha8 stream so that a fixed seed reproduces the same sequence of
//! candidate boxes.

use rand::{RngExt, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, trace};

use super::raster::{BoundingBox, CropResult, RasterPair};
use super::validity::{ValidityFilter, ValidityMode};

/// Draws one aligned crop per pair by rejection sampling.
pub struct RandomCropSampler {
    filter: ValidityFilter,
    rng: ChaCha8Rng,
}

impl RandomCropSampler {
    /// Creates a sampler. Without a seed the stream is seeded from the
    /// thread RNG.
    pub fn new(filter: ValidityFilter, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_rng(&mut rand::rng()),
        };
        Self { filter, rng }
    }

    /// Draws a box of side `crop_size` whose top-left corner is uniform over
    /// every position that keeps the box inside a `width x height` raster.
    ///
    /// When the raster is not larger than the crop on an axis, that
    /// coordinate is 0.
    pub fn draw_box(&mut self, width: u32, height: u32, crop_size: u32) -> BoundingBox {
        let left = self.rng.random_range(0..=width.saturating_sub(crop_size));
        let top = self.rng.random_range(0..=height.saturating_sub(crop_size));
        BoundingBox::square(left, top, crop_size)
    }

    /// Tries up to `max_attempts` random boxes and returns the first whose
    /// before and after regions both pass rejection-mode validity.
    ///
    /// `None` means every attempt hit an empty region; for near-fully-black
    /// pairs that is the expected outcome.
    pub fn sample(
        &mut self,
        rasters: &RasterPair,
        crop_size: u32,
        max_attempts: u32,
    ) -> Option<CropResult> {
        let (width, height) = (rasters.width(), rasters.height());

        for attempt in 1..=max_attempts {
            let bbox = self.draw_box(width, height, crop_size);
            if let Some(crop) = self
                .filter
                .check_pair(rasters, bbox, ValidityMode::Rejection)
            {
                debug!(attempt, left = bbox.left, top = bbox.top, "Accepted random crop");
                return Some(crop);
            }
            trace!(attempt, left = bbox.left, top = bbox.top, "Rejected random crop");
        }

        debug!(max_attempts, "Random sampling exhausted its attempts");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imagery::pairing::{DatedCapture, ImagePair};
    use crate::imagery::raster::RasterHandle;
    use image::{DynamicImage, Rgb, RgbImage};

    fn rasters(before: RgbImage, after: RgbImage) -> RasterPair {
        let pair = ImagePair {
            before: DatedCapture::from_path("2020-01-01_a.png").unwrap(),
            after: DatedCapture::from_path("2020-06-15_b.png").unwrap(),
        };
        RasterPair::from_handles(
            pair,
            RasterHandle::from_image("2020-01-01_a.png", DynamicImage::ImageRgb8(before)),
            RasterHandle::from_image("2020-06-15_b.png", DynamicImage::ImageRgb8(after)),
        )
        .unwrap()
    }

    fn filled(width: u32, height: u32, value: u8) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([value, value, value]))
    }

    #[test]
    fn test_draw_box_stays_in_bounds() {
        let mut sampler = RandomCropSampler::new(ValidityFilter::default(), Some(42));
        for _ in 0..1000 {
            let bbox = sampler.draw_box(300, 200, 64);
            assert_eq!(bbox.width(), 64);
            assert_eq!(bbox.height(), 64);
            assert!(bbox.fits_within(300, 200));
        }
    }

    #[test]
    fn test_draw_box_degenerates_to_origin() {
        let mut sampler = RandomCropSampler::new(ValidityFilter::default(), Some(1));
        let bbox = sampler.draw_box(100, 100, 256);
        assert_eq!((bbox.left, bbox.top), (0, 0));

        let exact = sampler.draw_box(256, 256, 256);
        assert_eq!((exact.left, exact.top), (0, 0));
    }

    #[test]
    fn test_seed_is_reproducible() {
        let mut a = RandomCropSampler::new(ValidityFilter::default(), Some(99));
        let mut b = RandomCropSampler::new(ValidityFilter::default(), Some(99));
        for _ in 0..20 {
            assert_eq!(a.draw_box(1000, 1000, 100), b.draw_box(1000, 1000, 100));
        }
    }

    #[test]
    fn test_sample_returns_valid_crop() {
        let pair = rasters(filled(128, 96, 200), filled(128, 96, 180));
        let mut sampler = RandomCropSampler::new(ValidityFilter::default(), Some(3));

        let crop = sampler.sample(&pair, 32, 100).unwrap();
        assert_eq!(crop.bbox.width(), 32);
        assert!(crop.bbox.fits_within(128, 96));
        assert_eq!(crop.before.width(), 32);
        assert_eq!(crop.after.height(), 32);
    }

    #[test]
    fn test_sample_exhausts_on_black_pair() {
        let pair = rasters(filled(64, 64, 0), filled(64, 64, 0));
        let mut sampler = RandomCropSampler::new(ValidityFilter::default(), Some(5));
        assert!(sampler.sample(&pair, 16, 100).is_none());
    }

    #[test]
    fn test_sample_requires_both_rasters() {
        // Before is bright, after is black: nothing may pass
        let pair = rasters(filled(64, 64, 255), filled(64, 64, 0));
        let mut sampler = RandomCropSampler::new(ValidityFilter::default(), Some(8));
        assert!(sampler.sample(&pair, 16, 50).is_none());
    }

    #[test]
    fn test_sample_finds_the_only_lit_quadrant() {
        let mut before = filled(64, 64, 0);
        for y in 32..64 {
            for x in 32..64 {
                before.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        let pair = rasters(before.clone(), before);
        let mut sampler = RandomCropSampler::new(ValidityFilter::default(), Some(11));

        let crop = sampler.sample(&pair, 16, 1000).unwrap();
        // Any accepted box must touch the lit quadrant
        assert!(crop.bbox.right > 32 && crop.bbox.bottom > 32);
    }
}

//! Raster handles, crop boxes and crop results.

use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat, ImageReader};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::pairing::ImagePair;
use crate::error::UnitError;

/// Axis-aligned square pixel region, `right` and `bottom` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl BoundingBox {
    /// Square box of side `size` anchored at `(left, top)`.
    pub fn square(left: u32, top: u32, size: u32) -> Self {
        Self {
            left,
            top,
            right: left + size,
            bottom: top + size,
        }
    }

    pub fn width(&self) -> u32 {
        self.right - self.left
    }

    pub fn height(&self) -> u32 {
        self.bottom - self.top
    }

    /// Returns true if the box lies inside a `width x height` raster.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.right <= width && self.bottom <= height
    }

    /// Returns true if the two boxes share at least one pixel.
    pub fn overlaps(&self, other: &BoundingBox) -> bool {
        self.left < other.right
            && other.left < self.right
            && self.top < other.bottom
            && other.top < self.bottom
    }
}

/// An opened, decoded capture.
///
/// Owned by the unit that opened it; the pixel buffer is released when the
/// handle drops.
#[derive(Debug)]
pub struct RasterHandle {
    path: PathBuf,
    format: Option<ImageFormat>,
    image: DynamicImage,
}

impl RasterHandle {
    /// Opens and decodes the image at `path` with decoder size limits lifted.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, UnitError> {
        let path = path.as_ref();
        let open_err = |source: image::ImageError| UnitError::RasterOpen {
            path: path.to_path_buf(),
            source,
        };

        let mut reader = ImageReader::open(path)
            .and_then(|r| r.with_guessed_format())
            .map_err(|e| open_err(image::ImageError::IoError(e)))?;
        reader.no_limits();
        let format = reader.format();
        let image = reader.decode().map_err(open_err)?;

        debug!(
            path = %path.display(),
            width = image.width(),
            height = image.height(),
            format = ?format,
            "Opened raster"
        );

        Ok(Self {
            path: path.to_path_buf(),
            format,
            image,
        })
    }

    /// Wraps an already decoded image.
    pub fn from_image(path: impl Into<PathBuf>, image: DynamicImage) -> Self {
        Self {
            path: path.into(),
            format: None,
            image,
        }
    }

    /// Records the encoding the pixels were decoded from.
    pub fn with_format(mut self, format: ImageFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Encoding detected from the file contents, if the handle was opened
    /// from disk.
    pub fn format(&self) -> Option<ImageFormat> {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Copies the pixels under `bbox`. Boxes reaching past the raster edge are
    /// clipped to it.
    pub fn read_region(&self, bbox: &BoundingBox) -> DynamicImage {
        self.image
            .crop_imm(bbox.left, bbox.top, bbox.width(), bbox.height())
    }
}

/// Before and after rasters of one location, opened together.
///
/// Construction fails if the two rasters differ in size, so every box that
/// fits one of them fits the other.
#[derive(Debug)]
pub struct RasterPair {
    pub pair: ImagePair,
    pub before: RasterHandle,
    pub after: RasterHandle,
}

impl RasterPair {
    /// Opens both captures of `pair`.
    pub fn open(pair: ImagePair) -> Result<Self, UnitError> {
        let before = RasterHandle::open(&pair.before.path)?;
        let after = RasterHandle::open(&pair.after.path)?;
        Self::from_handles(pair, before, after)
    }

    /// Pairs two handles, checking that their dimensions agree.
    pub fn from_handles(
        pair: ImagePair,
        before: RasterHandle,
        after: RasterHandle,
    ) -> Result<Self, UnitError> {
        if before.width() != after.width() || before.height() != after.height() {
            warn!(
                before = %before.path().display(),
                after = %after.path().display(),
                "Before and after rasters differ in size"
            );
            return Err(UnitError::DimensionMismatch {
                before_width: before.width(),
                before_height: before.height(),
                after_width: after.width(),
                after_height: after.height(),
            });
        }

        Ok(Self {
            pair,
            before,
            after,
        })
    }

    pub fn width(&self) -> u32 {
        self.before.width()
    }

    pub fn height(&self) -> u32 {
        self.before.height()
    }
}

/// An aligned crop from both rasters that passed the validity filter.
#[derive(Debug, Clone)]
pub struct CropResult {
    pub bbox: BoundingBox,
    pub before: DynamicImage,
    pub after: DynamicImage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imagery::pairing::DatedCapture;
    use chrono::NaiveDate;
    use image::{Rgb, RgbImage};

    fn capture(date: &str, name: &str) -> DatedCapture {
        DatedCapture {
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            path: PathBuf::from(name),
        }
    }

    fn handle(name: &str, width: u32, height: u32) -> RasterHandle {
        RasterHandle::from_image(
            name,
            DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([9, 9, 9]))),
        )
    }

    #[test]
    fn test_bounding_box_square() {
        let bbox = BoundingBox::square(256, 0, 256);
        assert_eq!(bbox.right, 512);
        assert_eq!(bbox.bottom, 256);
        assert_eq!(bbox.width(), 256);
        assert_eq!(bbox.height(), 256);
        assert!(bbox.fits_within(512, 512));
        assert!(!bbox.fits_within(511, 512));
    }

    #[test]
    fn test_bounding_box_overlap() {
        let a = BoundingBox::square(0, 0, 10);
        let b = BoundingBox::square(10, 0, 10);
        let c = BoundingBox::square(5, 5, 10);
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(b.overlaps(&c));
    }

    #[test]
    fn test_read_region_dimensions() {
        let raster = handle("a.png", 64, 32);
        let region = raster.read_region(&BoundingBox::square(8, 8, 16));
        assert_eq!(region.width(), 16);
        assert_eq!(region.height(), 16);
    }

    #[test]
    fn test_open_missing_file_is_raster_open_error() {
        let err = RasterHandle::open("/nonexistent/2020-01-01_a.png").unwrap_err();
        assert!(matches!(err, UnitError::RasterOpen { .. }));
    }

    #[test]
    fn test_open_corrupt_file_is_raster_open_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("2020-01-01_a.png");
        std::fs::write(&path, b"definitely not an image").unwrap();

        let err = RasterHandle::open(&path).unwrap_err();
        assert!(matches!(err, UnitError::RasterOpen { .. }));
    }

    #[test]
    fn test_open_detects_format_without_extension() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("2020-01-01_a");
        RgbImage::from_pixel(8, 4, Rgb([30, 60, 90]))
            .save_with_format(&path, ImageFormat::Png)
            .unwrap();

        let opened = RasterHandle::open(&path).unwrap();
        assert_eq!(opened.format(), Some(ImageFormat::Png));
        assert_eq!(opened.path(), path.as_path());
        assert_eq!((opened.width(), opened.height()), (8, 4));
        assert_eq!(handle("a.png", 1, 1).format(), None);
    }

    #[test]
    fn test_pair_rejects_dimension_mismatch() {
        let pair = ImagePair {
            before: capture("2020-01-01", "a.png"),
            after: capture("2020-06-15", "b.png"),
        };
        let err = RasterPair::from_handles(pair, handle("a.png", 64, 64), handle("b.png", 64, 32))
            .unwrap_err();
        assert!(matches!(err, UnitError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_pair_accepts_matching_dimensions() {
        let pair = ImagePair {
            before: capture("2020-01-01", "a.png"),
            after: capture("2020-06-15", "b.png"),
        };
        let opened =
            RasterPair::from_handles(pair, handle("a.png", 48, 32), handle("b.png", 48, 32))
                .unwrap();
        assert_eq!(opened.width(), 48);
        assert_eq!(opened.height(), 32);
    }
}

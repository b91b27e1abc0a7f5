//! Persisting crop pairs into slot directories.

use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};
use tracing::{debug, warn};

use super::registry::{slot_dir_name, OutputRegistry};
use crate::error::OutputError;
use crate::imagery::{CropResult, DatedCapture, ImagePair, RasterHandle, RasterPair};

/// Encoding used when neither the file name nor the source contents name a
/// writable format.
pub const FALLBACK_FORMAT: ImageFormat = ImageFormat::Png;

/// File names and encodings written inside every slot of a pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotNames {
    pub before: String,
    pub after: String,
    pub before_format: ImageFormat,
    pub after_format: ImageFormat,
}

impl SlotNames {
    /// `before_<before basename>` and `after_<after basename>`, encoded as
    /// their extension says or as [`FALLBACK_FORMAT`].
    pub fn for_pair(pair: &ImagePair) -> Result<Self, OutputError> {
        Ok(Self {
            before: format!("before_{}", base_name(&pair.before)?),
            after: format!("after_{}", base_name(&pair.after)?),
            before_format: output_format(&pair.before.path, None),
            after_format: output_format(&pair.after.path, None),
        })
    }

    /// Like [`SlotNames::for_pair`], but a capture whose extension has no
    /// encoder is written in the format its contents were decoded from.
    pub fn for_rasters(rasters: &RasterPair) -> Result<Self, OutputError> {
        let mut names = Self::for_pair(&rasters.pair)?;
        names.before_format = raster_format(&rasters.before);
        names.after_format = raster_format(&rasters.after);
        Ok(names)
    }
}

fn base_name(capture: &DatedCapture) -> Result<&str, OutputError> {
    capture
        .file_name()
        .ok_or_else(|| OutputError::MissingFileName(capture.path.clone()))
}

fn raster_format(raster: &RasterHandle) -> ImageFormat {
    output_format(raster.path(), raster.format())
}

fn output_format(path: &Path, detected: Option<ImageFormat>) -> ImageFormat {
    ImageFormat::from_path(path)
        .ok()
        .filter(ImageFormat::writing_enabled)
        .or(detected.filter(ImageFormat::writing_enabled))
        .unwrap_or(FALLBACK_FORMAT)
}

/// Writes `crop` into slot `id` under `base`.
///
/// The slot directory may already exist (registries create it when claiming
/// the number), so creation is idempotent. If the after image cannot be
/// saved, the before image written by this call is removed again. Returns the
/// slot directory.
pub fn write_slot(
    base: &Path,
    id: u64,
    crop: &CropResult,
    names: &SlotNames,
) -> Result<PathBuf, OutputError> {
    let slot = base.join(slot_dir_name(id));
    std::fs::create_dir_all(&slot).map_err(|e| OutputError::io(&slot, e))?;

    let before = slot.join(&names.before);
    save_image(&crop.before, &before, names.before_format)?;
    if let Err(e) = save_image(&crop.after, &slot.join(&names.after), names.after_format) {
        if let Err(cleanup) = std::fs::remove_file(&before) {
            warn!(path = %before.display(), error = %cleanup, "Could not remove partial crop");
        }
        return Err(e);
    }

    debug!(slot = %slot.display(), left = crop.bbox.left, top = crop.bbox.top, "Wrote crop pair");
    Ok(slot)
}

/// Saves `image` as `format`. JPEG has no alpha channel, so JPEG targets are
/// written as 8-bit RGB.
fn save_image(image: &DynamicImage, path: &Path, format: ImageFormat) -> Result<(), OutputError> {
    let result = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8()).save_with_format(path, format),
        _ => image.save_with_format(path, format),
    };
    result.map_err(|source| OutputError::Save {
        path: path.to_path_buf(),
        source,
    })
}

/// Allocates a slot from `registry`, writes `crop` into it and records it.
///
/// A slot that could not be written is released back to the registry.
pub fn persist_crop(
    registry: &mut dyn OutputRegistry,
    base: &Path,
    crop: &CropResult,
    names: &SlotNames,
) -> Result<u64, OutputError> {
    let id = registry.next_id()?;
    if let Err(e) = write_slot(base, id, crop, names) {
        if let Err(release) = registry.release(id) {
            warn!(slot = id, error = %release, "Could not release slot");
        }
        return Err(e);
    }
    registry.record_written(id)?;
    Ok(id)
}

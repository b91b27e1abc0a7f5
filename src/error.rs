//! Error types for change-forge operations.
//!
//! Defines the error types shared across subsystems:
//! - Per-unit pipeline failures (discovery, raster opening, dimension checks)
//! - Output slot allocation and persistence

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can end the processing of a single (disaster, location) unit.
#[derive(Debug, Error)]
pub enum UnitError {
    /// Fewer than two dated captures were found for the location.
    #[error("No suitable image pair found in '{dir}': {found} dated capture(s)")]
    DiscoveryEmpty { dir: PathBuf, found: usize },

    /// The location directory could not be listed.
    #[error("Failed to list captures in '{dir}': {source}")]
    Discovery {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A capture could not be opened or decoded.
    #[error("Failed to open raster '{path}': {source}")]
    RasterOpen {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Before and after rasters do not share pixel dimensions.
    #[error(
        "Dimension mismatch: before is {before_width}x{before_height}, after is {after_width}x{after_height}"
    )]
    DimensionMismatch {
        before_width: u32,
        before_height: u32,
        after_width: u32,
        after_height: u32,
    },

    /// Writing a crop pair failed.
    #[error("Output error: {0}")]
    Output(#[from] OutputError),
}

impl UnitError {
    /// Returns true if this error means the unit simply had nothing to work
    /// with, as opposed to a fault that aborted it.
    pub fn is_no_output(&self) -> bool {
        matches!(self, UnitError::DiscoveryEmpty { .. })
    }
}

/// Errors that can occur while allocating or writing output slots.
#[derive(Debug, Error)]
pub enum OutputError {
    /// Slot directory could not be created or scanned.
    #[error("IO error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An encoded crop could not be written.
    #[error("Failed to save '{path}': {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// The registry was asked to record an id it never handed out.
    #[error("Slot {0} was not allocated by this registry")]
    UnknownSlot(u64),

    /// A source capture path has no usable file name.
    #[error("Path has no file name: {0}")]
    MissingFileName(PathBuf),
}

impl OutputError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        OutputError::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_empty_is_no_output() {
        let err = UnitError::DiscoveryEmpty {
            dir: PathBuf::from("images/quake/loc"),
            found: 1,
        };
        assert!(err.is_no_output());
        assert!(err.to_string().contains("No suitable image pair"));
    }

    #[test]
    fn test_dimension_mismatch_display() {
        let err = UnitError::DimensionMismatch {
            before_width: 512,
            before_height: 512,
            after_width: 256,
            after_height: 512,
        };
        assert!(!err.is_no_output());
        let msg = err.to_string();
        assert!(msg.contains("512x512"));
        assert!(msg.contains("256x512"));
    }

    #[test]
    fn test_output_error_wraps_into_unit_error() {
        let err: UnitError = OutputError::UnknownSlot(9).into();
        assert!(err.to_string().contains("Slot 9"));
    }
}

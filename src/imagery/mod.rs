//! Pairing and crop extraction for co-registered before/after imagery.
//!
//! - **pairing**: pick the earliest and latest dated capture of a location
//! - **raster**: opened rasters, crop boxes and crop results
//! - **validity**: reject degenerate (empty or mostly blank) crops
//! - **sampler**: one random valid crop per pair, bounded retries
//! - **tiler**: every valid cell of a non-overlapping grid
//!
//! # Example
//!
//! ```rust,ignore
//! use change_forge::imagery::{locate_in, RasterPair, RandomCropSampler, ValidityFilter};
//!
//! let pair = locate_in(Path::new("images/quake/loc_1"))?;
//! let rasters = RasterPair::open(pair)?;
//! let mut sampler = RandomCropSampler::new(ValidityFilter::default(), Some(42));
//! if let Some(crop) = sampler.sample(&rasters, 256, 100) {
//!     println!("crop at {:?}", crop.bbox);
//! }
//! ```

pub mod pairing;
pub mod raster;
pub mod sampler;
pub mod tiler;
pub mod validity;

pub use pairing::{discover, locate, locate_in, DatedCapture, ImagePair};
pub use raster::{BoundingBox, CropResult, RasterHandle, RasterPair};
pub use sampler::RandomCropSampler;
pub use tiler::{ExhaustiveTiler, TileGrid};
pub use validity::{ValidityFilter, ValidityMode};

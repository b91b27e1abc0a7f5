//! Crop pipeline orchestration.
//!
//! - **Config**: crop geometry, validity thresholds, directory layout, worker counts
//! - **Runner**: runs one (disaster, location) unit end to end on the calling thread
//! - **Orchestrator**: acquires missing imagery, fans units out over a
//!   disaster-level pool of location-level pools and aggregates the outcomes
//!
//! ```rust,ignore
//! use change_forge::pipeline::{CropConfig, CropMode, DisasterOrchestrator};
//!
//! let config = CropConfig::from_env()?.with_crop_size(256);
//! let orchestrator = DisasterOrchestrator::new(config, CropMode::Tile);
//! let summary = orchestrator.run_disasters(vec!["turkey-earthquake".into()]).await?;
//! println!("{}/{} units succeeded", summary.successful_units, summary.total_units());
//! ```

pub mod config;
pub mod orchestrator;
pub mod runner;

pub use config::{ConfigError, CropConfig};
pub use orchestrator::{
    discover_disasters, discover_locations, find_downloaded, prepare_disasters,
    DisasterOrchestrator, DisasterTally, RunSummary,
};
pub use runner::{CropMode, UnitRunner};

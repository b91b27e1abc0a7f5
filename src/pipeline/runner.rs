//! Single-unit pipeline execution.
//!
//! Runs one (disaster, location) unit from start to finish on the calling
//! thread: locate the pair, open both rasters, sample or tile, write slots.
//! Every failure is folded into the returned `UnitOutcome`.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::config::CropConfig;
use crate::error::UnitError;
use crate::export::{persist_crop, DirectoryRegistry, OutputRegistry, SlotNames};
use crate::imagery::{
    locate_in, ExhaustiveTiler, RandomCropSampler, RasterPair, ValidityFilter,
};
use crate::scheduler::{Unit, UnitOutcome};

/// Which crop policy a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CropMode {
    /// One random crop per pair, rejection-mode validity.
    Sample,
    /// Every grid cell, strict-mode validity.
    Tile,
}

impl fmt::Display for CropMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CropMode::Sample => write!(f, "sample"),
            CropMode::Tile => write!(f, "tile"),
        }
    }
}

impl FromStr for CropMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sample" | "crop" | "random" => Ok(CropMode::Sample),
            "tile" | "tiles" | "exhaustive" => Ok(CropMode::Tile),
            other => Err(format!(
                "unknown crop mode '{other}': expected 'sample' or 'tile'"
            )),
        }
    }
}

/// Executes units against the configured layout.
#[derive(Debug, Clone)]
pub struct UnitRunner {
    config: CropConfig,
    filter: ValidityFilter,
}

impl UnitRunner {
    pub fn new(config: CropConfig) -> Self {
        let filter = ValidityFilter::from_config(&config);
        Self { config, filter }
    }

    pub fn config(&self) -> &CropConfig {
        &self.config
    }

    /// Runs `unit`, writing slots under its output directory.
    pub fn run(&self, unit: &Unit, mode: CropMode) -> UnitOutcome {
        let mut registry = DirectoryRegistry::new(unit.output_dir(&self.config.output_root));
        self.run_with_registry(unit, mode, &mut registry)
    }

    /// Runs `unit` with slot numbers drawn from `registry`.
    pub fn run_with_registry(
        &self,
        unit: &Unit,
        mode: CropMode,
        registry: &mut dyn OutputRegistry,
    ) -> UnitOutcome {
        let start = Instant::now();
        info!(unit = %unit, mode = %mode, "Processing unit");

        let outcome = match self.execute(unit, mode, registry) {
            Ok(0) => {
                let detail = match mode {
                    CropMode::Sample => format!(
                        "No valid crop found after {} attempts",
                        self.config.max_attempts
                    ),
                    CropMode::Tile => "No valid tiles found".to_string(),
                };
                info!(unit = %unit, "{}", detail);
                UnitOutcome::no_output(unit.clone(), detail)
            }
            Ok(crops) => {
                let output = unit.output_dir(&self.config.output_root);
                let detail = format!("{} valid crop(s) saved in {}", crops, output.display());
                info!(unit = %unit, crops, "Unit completed");
                UnitOutcome::produced(unit.clone(), crops, detail)
            }
            Err(e) if e.is_no_output() => {
                info!(unit = %unit, reason = %e, "Skipping unit");
                UnitOutcome::no_output(unit.clone(), e.to_string())
            }
            Err(e) => {
                warn!(unit = %unit, error = %e, "Unit failed");
                UnitOutcome::failed(unit.clone(), e.to_string())
            }
        };

        outcome.with_duration_ms(start.elapsed().as_millis() as u64)
    }

    /// Runs the pipeline, returning the number of crop pairs written.
    fn execute(
        &self,
        unit: &Unit,
        mode: CropMode,
        registry: &mut dyn OutputRegistry,
    ) -> Result<usize, UnitError> {
        let pair = locate_in(&unit.input_dir(&self.config.images_root))?;
        info!(
            unit = %unit,
            before = %pair.before.path.display(),
            after = %pair.after.path.display(),
            "Located image pair"
        );

        let rasters = RasterPair::open(pair)?;
        let names = SlotNames::for_rasters(&rasters)?;
        let output = unit.output_dir(&self.config.output_root);

        match mode {
            CropMode::Sample => self.sample(&rasters, &output, &names, registry),
            CropMode::Tile => self.tile(&rasters, &output, &names, registry),
        }
    }

    fn sample(
        &self,
        rasters: &RasterPair,
        output: &Path,
        names: &SlotNames,
        registry: &mut dyn OutputRegistry,
    ) -> Result<usize, UnitError> {
        let mut sampler = RandomCropSampler::new(self.filter, self.config.seed);
        match sampler.sample(rasters, self.config.crop_size, self.config.max_attempts) {
            Some(crop) => {
                persist_crop(registry, output, &crop, names)?;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn tile(
        &self,
        rasters: &RasterPair,
        output: &Path,
        names: &SlotNames,
        registry: &mut dyn OutputRegistry,
    ) -> Result<usize, UnitError> {
        let mut tiler = ExhaustiveTiler::new(
            rasters,
            self.filter,
            self.config.crop_size,
            self.config.progress_interval,
        );

        let mut written = 0;
        for crop in tiler.by_ref() {
            persist_crop(registry, output, &crop, names)?;
            written += 1;
        }

        info!(
            examined = tiler.examined(),
            accepted = tiler.accepted(),
            "Total valid crops saved: {}",
            written
        );
        Ok(written)
    }
}

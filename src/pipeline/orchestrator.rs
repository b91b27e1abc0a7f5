//! Multi-disaster orchestration.
//!
//! Two independent fan-out levels, each a bounded [`WorkerPool`]:
//!
//! 1. one job per disaster, which discovers the disaster's locations
//! 2. one job per (disaster, location) unit, run on the blocking thread pool
//!
//! Units share no state and each writes only to its own output directory.
//! A failed or panicking unit is recorded in the summary and never stops its
//! siblings; every submitted unit runs to completion.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use walkdir::WalkDir;

use super::config::CropConfig;
use super::runner::{CropMode, UnitRunner};
use crate::collectors::{acquire_disaster, AcquireOptions, ImageFetcher};
use crate::scheduler::{PoolError, Unit, UnitOutcome, WorkerPool, WorkerPoolConfig};

/// Success tally for one disaster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisasterTally {
    pub successful: usize,
    pub total: usize,
    pub crops: usize,
    /// The disaster-level job itself did not finish.
    #[serde(default)]
    pub aborted: bool,
}

/// Final report of an orchestrated run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub mode: CropMode,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub successful_units: usize,
    pub failed_units: usize,
    pub total_crops: usize,
    pub per_disaster: BTreeMap<String, DisasterTally>,
    pub outcomes: Vec<UnitOutcome>,
}

impl RunSummary {
    /// Tallies `outcomes`.
    pub fn from_outcomes(
        mode: CropMode,
        started_at: DateTime<Utc>,
        elapsed_ms: u64,
        outcomes: Vec<UnitOutcome>,
    ) -> Self {
        let mut per_disaster: BTreeMap<String, DisasterTally> = BTreeMap::new();
        let mut successful_units = 0;
        let mut total_crops = 0;

        for outcome in &outcomes {
            let tally = per_disaster
                .entry(outcome.unit.disaster.clone())
                .or_default();
            tally.total += 1;
            tally.crops += outcome.crops;
            if outcome.is_success() {
                tally.successful += 1;
                successful_units += 1;
            }
            total_crops += outcome.crops;
        }

        Self {
            mode,
            started_at,
            elapsed_ms,
            successful_units,
            failed_units: outcomes.len() - successful_units,
            total_crops,
            per_disaster,
            outcomes,
        }
    }

    pub fn total_units(&self) -> usize {
        self.outcomes.len()
    }
}

/// Lists the location directories of `disaster` under `images_root`.
///
/// A missing disaster directory has no locations.
pub fn discover_locations(images_root: &Path, disaster: &str) -> Vec<String> {
    let disaster_dir = images_root.join(disaster);
    if !disaster_dir.is_dir() {
        warn!(disaster, dir = %disaster_dir.display(), "No image directory found for disaster");
        return Vec::new();
    }

    let mut locations: Vec<String> = WalkDir::new(&disaster_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(disaster, error = %e, "Skipping unreadable location entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_dir())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .collect();
    locations.sort();
    locations
}

/// Lists every disaster directory under `images_root`.
pub fn discover_disasters(images_root: &Path) -> Vec<String> {
    let mut disasters: Vec<String> = WalkDir::new(images_root)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_dir())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .collect();
    disasters.sort();
    disasters
}

fn normalize_disaster(name: &str) -> String {
    name.replace('-', "").to_lowercase()
}

/// Finds an already downloaded disaster directory, matching names without
/// hyphens and case-insensitively. Only directories with at least one
/// location count.
pub fn find_downloaded(images_root: &Path, disaster: &str) -> Option<String> {
    let wanted = normalize_disaster(disaster);
    discover_disasters(images_root)
        .into_iter()
        .filter(|existing| normalize_disaster(existing) == wanted)
        .find(|existing| !discover_locations(images_root, existing).is_empty())
}

/// Maps requested disaster names to their downloaded directories.
///
/// A disaster with no images on disk is acquired through `fetcher` first,
/// when one is given. Disasters that still have no images are left out.
pub async fn prepare_disasters(
    requested: Vec<String>,
    fetcher: Option<Arc<dyn ImageFetcher>>,
    options: &AcquireOptions,
) -> Vec<String> {
    let mut ready = Vec::new();
    for disaster in requested {
        let mut found = find_downloaded(&options.images_root, &disaster);

        if found.is_none() {
            if let Some(fetcher) = &fetcher {
                info!(disaster = %disaster, "No downloaded images, acquiring");
                match acquire_disaster(Arc::clone(fetcher), &disaster, options).await {
                    Ok(_) => found = find_downloaded(&options.images_root, &disaster),
                    Err(e) => warn!(disaster = %disaster, error = %e, "Acquisition failed"),
                }
            }
        }

        match found {
            Some(name) => {
                if name != disaster {
                    info!(requested = %disaster, found = %name, "Using downloaded disaster directory");
                }
                ready.push(name);
            }
            None => warn!(disaster = %disaster, "No images for disaster, skipping"),
        }
    }
    ready
}

/// Drives units for many disasters through the two pool levels.
#[derive(Debug, Clone)]
pub struct DisasterOrchestrator {
    runner: Arc<UnitRunner>,
    mode: CropMode,
}

impl DisasterOrchestrator {
    pub fn new(config: CropConfig, mode: CropMode) -> Self {
        Self {
            runner: Arc::new(UnitRunner::new(config)),
            mode,
        }
    }

    pub fn config(&self) -> &CropConfig {
        self.runner.config()
    }

    /// Runs every location of `disaster` through the location pool.
    pub async fn run_disaster(&self, disaster: &str) -> Result<Vec<UnitOutcome>, PoolError> {
        let images_root = self.config().images_root.clone();
        let name = disaster.to_string();
        let locations = tokio::task::spawn_blocking(move || discover_locations(&images_root, &name))
            .await
            .map_err(|e| PoolError::JobAborted {
                pool: "discovery".to_string(),
                index: 0,
                message: e.to_string(),
            })?;

        if locations.is_empty() {
            warn!(disaster, "No locations found");
            return Ok(Vec::new());
        }

        info!(disaster, locations = locations.len(), "Processing disaster");
        let units = locations
            .into_iter()
            .map(|location| Unit::new(disaster, location))
            .collect();
        self.run_units(units).await
    }

    /// Runs a closed list of units through a location pool.
    pub async fn run_units(&self, units: Vec<Unit>) -> Result<Vec<UnitOutcome>, PoolError> {
        let pool = WorkerPool::new(
            WorkerPoolConfig::new(self.config().location_workers).with_name("locations"),
        )?;

        let runner = Arc::clone(&self.runner);
        let mode = self.mode;
        let submitted = units.clone();

        let results = pool
            .run_all(units, move |unit| {
                let runner = Arc::clone(&runner);
                async move {
                    let fallback = unit.clone();
                    match tokio::task::spawn_blocking(move || runner.run(&unit, mode)).await {
                        Ok(outcome) => outcome,
                        Err(e) => UnitOutcome::failed(fallback, format!("Unit aborted: {e}")),
                    }
                }
            })
            .await;

        Ok(results
            .into_iter()
            .zip(submitted)
            .map(|(result, unit)| {
                result.unwrap_or_else(|e| UnitOutcome::failed(unit, e.to_string()))
            })
            .collect())
    }

    /// Runs every named disaster, or every disaster under the images root
    /// when `disasters` is empty, and tallies the outcomes.
    pub async fn run_disasters(&self, disasters: Vec<String>) -> Result<RunSummary, PoolError> {
        let started_at = Utc::now();
        let start = Instant::now();

        let disasters = if disasters.is_empty() {
            discover_disasters(&self.config().images_root)
        } else {
            disasters
        };
        info!(
            disasters = disasters.len(),
            mode = %self.mode,
            "Starting run"
        );

        let pool = WorkerPool::new(
            WorkerPoolConfig::new(self.config().disaster_workers).with_name("disasters"),
        )?;
        let orchestrator = self.clone();
        let submitted = disasters.clone();

        let results = pool
            .run_all(disasters, move |disaster| {
                let orchestrator = orchestrator.clone();
                async move { orchestrator.run_disaster(&disaster).await }
            })
            .await;

        let mut outcomes = Vec::new();
        let mut aborted = Vec::new();
        for (result, disaster) in results.into_iter().zip(submitted) {
            match result.and_then(|inner| inner) {
                Ok(mut disaster_outcomes) => outcomes.append(&mut disaster_outcomes),
                Err(e) => {
                    warn!(disaster = %disaster, error = %e, "Disaster run aborted");
                    let detail = format!("Disaster run aborted: {e}");
                    outcomes.extend(
                        discover_locations(&self.config().images_root, &disaster)
                            .into_iter()
                            .map(|location| {
                                UnitOutcome::failed(Unit::new(&disaster, location), detail.clone())
                            }),
                    );
                    aborted.push(disaster);
                }
            }
        }

        let mut summary = RunSummary::from_outcomes(
            self.mode,
            started_at,
            start.elapsed().as_millis() as u64,
            outcomes,
        );
        for disaster in aborted {
            summary.per_disaster.entry(disaster).or_default().aborted = true;
        }
        info!(
            successful = summary.successful_units,
            total = summary.total_units(),
            crops = summary.total_crops,
            elapsed_ms = summary.elapsed_ms,
            "Processing completed"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::UnitStatus;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> CropConfig {
        CropConfig::new()
            .with_crop_size(16)
            .with_seed(5)
            .with_workers(2)
            .with_images_root(dir.path().join("images"))
            .with_output_root(dir.path().join("cropped_images"))
    }

    fn capture(dir: &TempDir, disaster: &str, location: &str, name: &str, value: u8) {
        let loc = dir.path().join("images").join(disaster).join(location);
        std::fs::create_dir_all(&loc).unwrap();
        RgbImage::from_pixel(32, 32, Rgb([value, value, value]))
            .save(loc.join(name))
            .unwrap();
    }

    #[test]
    fn test_discover_locations() {
        let dir = TempDir::new().unwrap();
        capture(&dir, "quake", "b_loc", "2020-01-01_a.png", 1);
        capture(&dir, "quake", "a_loc", "2020-01-01_a.png", 1);
        std::fs::write(dir.path().join("images/quake/stray.txt"), b"x").unwrap();

        let root = dir.path().join("images");
        assert_eq!(discover_locations(&root, "quake"), vec!["a_loc", "b_loc"]);
        assert!(discover_locations(&root, "flood").is_empty());
    }

    #[test]
    fn test_find_downloaded_normalizes_names() {
        let dir = TempDir::new().unwrap();
        capture(&dir, "Turkey-Earthquake-22", "loc", "2020-01-01_a.png", 1);
        std::fs::create_dir_all(dir.path().join("images/empty-event")).unwrap();

        let root = dir.path().join("images");
        assert_eq!(
            find_downloaded(&root, "turkeyearthquake22"),
            Some("Turkey-Earthquake-22".to_string())
        );
        assert_eq!(find_downloaded(&root, "empty-event"), None);
        assert_eq!(find_downloaded(&root, "unknown"), None);
    }

    #[test]
    fn test_summary_tallies() {
        let outcomes = vec![
            UnitOutcome::produced(Unit::new("a", "1"), 3, ""),
            UnitOutcome::no_output(Unit::new("a", "2"), ""),
            UnitOutcome::failed(Unit::new("b", "1"), ""),
        ];
        let summary = RunSummary::from_outcomes(CropMode::Tile, Utc::now(), 10, outcomes);

        assert_eq!(summary.successful_units, 2);
        assert_eq!(summary.failed_units, 1);
        assert_eq!(summary.total_crops, 3);
        assert_eq!(summary.total_units(), 3);
        assert_eq!(
            summary.per_disaster["a"],
            DisasterTally {
                successful: 2,
                total: 2,
                crops: 3,
                aborted: false,
            }
        );
        assert_eq!(summary.per_disaster["b"].successful, 0);
    }

    #[tokio::test]
    async fn test_run_disasters_isolates_failures() {
        let dir = TempDir::new().unwrap();
        // Good location: four valid tiles
        capture(&dir, "quake", "good", "2020-01-01_a.png", 200);
        capture(&dir, "quake", "good", "2020-06-15_b.png", 200);
        // Broken location: corrupt after image
        capture(&dir, "quake", "broken", "2020-01-01_a.png", 200);
        std::fs::write(
            dir.path().join("images/quake/broken/2020-06-15_b.png"),
            b"not a png",
        )
        .unwrap();
        // Location with a single capture
        capture(&dir, "flood", "lonely", "2021-01-01_a.png", 200);

        let orchestrator = DisasterOrchestrator::new(config(&dir), CropMode::Tile);
        let summary = orchestrator.run_disasters(Vec::new()).await.unwrap();

        assert_eq!(summary.total_units(), 3);
        assert_eq!(summary.successful_units, 2);
        assert_eq!(summary.failed_units, 1);
        assert_eq!(summary.total_crops, 4);

        let status = |location: &str| {
            summary
                .outcomes
                .iter()
                .find(|o| o.unit.location == location)
                .map(|o| o.status)
                .unwrap()
        };
        assert_eq!(status("good"), UnitStatus::Produced);
        assert_eq!(status("broken"), UnitStatus::Failed);
        assert_eq!(status("lonely"), UnitStatus::NoOutput);
        assert!(dir.path().join("cropped_images/quake/good/pair_4").is_dir());
    }

    #[tokio::test]
    async fn test_run_named_missing_disaster_is_empty() {
        let dir = TempDir::new().unwrap();
        let orchestrator = DisasterOrchestrator::new(config(&dir), CropMode::Sample);
        let summary = orchestrator
            .run_disasters(vec!["nowhere".to_string()])
            .await
            .unwrap();
        assert_eq!(summary.total_units(), 0);
        assert!(summary.per_disaster.is_empty());
    }

    #[tokio::test]
    async fn test_aborted_disaster_counts_its_locations_as_failed() {
        let dir = TempDir::new().unwrap();
        capture(&dir, "quake", "loc_1", "2020-01-01_a.png", 200);
        capture(&dir, "quake", "loc_1", "2020-06-15_b.png", 200);
        capture(&dir, "quake", "loc_2", "2020-01-01_a.png", 200);

        // A location pool without workers cannot be built, so every
        // disaster-level job ends in an error.
        let mut config = config(&dir);
        config.location_workers = 0;
        let orchestrator = DisasterOrchestrator::new(config, CropMode::Tile);
        let summary = orchestrator.run_disasters(Vec::new()).await.unwrap();

        assert_eq!(summary.total_units(), 2);
        assert_eq!(summary.failed_units, 2);
        assert_eq!(summary.successful_units, 0);
        let quake = &summary.per_disaster["quake"];
        assert!(quake.aborted);
        assert_eq!((quake.successful, quake.total), (0, 2));
        assert!(summary
            .outcomes
            .iter()
            .all(|o| o.detail.starts_with("Disaster run aborted")));
    }

    #[tokio::test]
    async fn test_prepare_disasters_acquires_missing_imagery() {
        use crate::collectors::acquire::tests::fetcher;

        let dir = TempDir::new().unwrap();
        capture(&dir, "Flood-Event", "loc", "2020-01-01_a.png", 200);
        let options = AcquireOptions::new(dir.path().join("images"))
            .with_links_dir(dir.path().join("filtered_links"));

        let stub: Arc<dyn ImageFetcher> = fetcher(true);
        let ready = prepare_disasters(
            vec!["quake".to_string(), "floodevent".to_string(), "storm".to_string()],
            Some(stub),
            &options,
        )
        .await;
        assert_eq!(ready, vec!["quake", "Flood-Event"]);
        assert!(dir
            .path()
            .join("filtered_links/quake_filtered_images.txt")
            .is_file());

        let orchestrator = DisasterOrchestrator::new(config(&dir), CropMode::Tile);
        let summary = orchestrator
            .run_disasters(vec!["quake".to_string()])
            .await
            .unwrap();
        assert_eq!(summary.successful_units, 1);
        assert_eq!(summary.total_crops, 1);
        assert!(dir
            .path()
            .join("cropped_images/quake/ard_10_031/pair_1/before_2020-01-01_a-visual.jpg")
            .is_file());
    }

    #[tokio::test]
    async fn test_prepare_disasters_without_fetcher_skips_missing() {
        let dir = TempDir::new().unwrap();
        let options = AcquireOptions::new(dir.path().join("images"));
        let ready = prepare_disasters(vec!["quake".to_string()], None, &options).await;
        assert!(ready.is_empty());
    }
}

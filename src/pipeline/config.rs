//! Configuration for the crop pipeline.
//!
//! Every tunable the pairing, filtering, sampling and tiling stages use lives
//! here, so call sites never restate thresholds or default sizes.

use std::path::PathBuf;
use thiserror::Error;

/// Default side length of a square crop, in pixels.
pub const DEFAULT_CROP_SIZE: u32 = 256;

/// Default number of draws the random sampler makes before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 100;

/// Normalized intensity above which a pixel counts as non-black.
pub const DEFAULT_INTENSITY_FLOOR: f32 = 0.1;

/// Non-black ratio a crop must exceed in rejection mode.
pub const DEFAULT_REJECTION_THRESHOLD: f64 = 0.01;

/// Non-black ratio a crop must exceed in strict mode.
pub const DEFAULT_STRICT_THRESHOLD: f64 = 0.9;

/// Accepted tiles between two progress log lines.
pub const DEFAULT_PROGRESS_INTERVAL: usize = 100;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for crop extraction and the worker pools that drive it.
#[derive(Debug, Clone)]
pub struct CropConfig {
    // Crop geometry
    /// Side length of each square crop in pixels.
    pub crop_size: u32,
    /// Maximum draws for the random sampler.
    pub max_attempts: u32,
    /// Optional seed making random sampling reproducible.
    pub seed: Option<u64>,

    // Validity policy
    /// Per-pixel normalized intensity that separates black from non-black.
    pub intensity_floor: f32,
    /// Non-black ratio required in rejection mode (exclusive).
    pub rejection_threshold: f64,
    /// Non-black ratio required in strict mode (exclusive).
    pub strict_threshold: f64,
    /// Accepted tiles between progress logs.
    pub progress_interval: usize,

    // Layout
    /// Root of the consumed `images/<disaster>/<location>` tree.
    pub images_root: PathBuf,
    /// Root of the produced `cropped_images/<disaster>/<location>` tree.
    pub output_root: PathBuf,

    // Concurrency
    /// Worker count for the per-disaster pool.
    pub disaster_workers: usize,
    /// Worker count for each per-location pool.
    pub location_workers: usize,
}

impl Default for CropConfig {
    fn default() -> Self {
        let workers = default_workers();
        Self {
            crop_size: DEFAULT_CROP_SIZE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            seed: None,

            intensity_floor: DEFAULT_INTENSITY_FLOOR,
            rejection_threshold: DEFAULT_REJECTION_THRESHOLD,
            strict_threshold: DEFAULT_STRICT_THRESHOLD,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,

            images_root: PathBuf::from("images"),
            output_root: PathBuf::from("cropped_images"),

            disaster_workers: workers,
            location_workers: workers,
        }
    }
}

/// One less than the available parallelism, never below one.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

impl CropConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `CROP_SIZE`: Crop side length in pixels (default: 256)
    /// - `CROP_MAX_ATTEMPTS`: Random sampler attempts (default: 100)
    /// - `CROP_SEED`: Seed for the random sampler (default: unset)
    /// - `CROP_INTENSITY_FLOOR`: Non-black intensity floor (default: 0.1)
    /// - `CROP_REJECTION_THRESHOLD`: Rejection-mode ratio (default: 0.01)
    /// - `CROP_STRICT_THRESHOLD`: Strict-mode ratio (default: 0.9)
    /// - `CROP_IMAGES_ROOT`: Input tree root (default: images)
    /// - `CROP_OUTPUT_ROOT`: Output tree root (default: cropped_images)
    /// - `CROP_DISASTER_WORKERS`: Disaster pool size (default: CPUs - 1)
    /// - `CROP_LOCATION_WORKERS`: Location pool size (default: CPUs - 1)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("CROP_SIZE") {
            config.crop_size = parse_env_value(&val, "CROP_SIZE")?;
        }

        if let Ok(val) = std::env::var("CROP_MAX_ATTEMPTS") {
            config.max_attempts = parse_env_value(&val, "CROP_MAX_ATTEMPTS")?;
        }

        if let Ok(val) = std::env::var("CROP_SEED") {
            config.seed = Some(parse_env_value(&val, "CROP_SEED")?);
        }

        if let Ok(val) = std::env::var("CROP_INTENSITY_FLOOR") {
            config.intensity_floor = parse_env_value(&val, "CROP_INTENSITY_FLOOR")?;
        }

        if let Ok(val) = std::env::var("CROP_REJECTION_THRESHOLD") {
            config.rejection_threshold = parse_env_value(&val, "CROP_REJECTION_THRESHOLD")?;
        }

        if let Ok(val) = std::env::var("CROP_STRICT_THRESHOLD") {
            config.strict_threshold = parse_env_value(&val, "CROP_STRICT_THRESHOLD")?;
        }

        if let Ok(val) = std::env::var("CROP_IMAGES_ROOT") {
            config.images_root = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("CROP_OUTPUT_ROOT") {
            config.output_root = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("CROP_DISASTER_WORKERS") {
            config.disaster_workers = parse_env_value(&val, "CROP_DISASTER_WORKERS")?;
        }

        if let Ok(val) = std::env::var("CROP_LOCATION_WORKERS") {
            config.location_workers = parse_env_value(&val, "CROP_LOCATION_WORKERS")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.crop_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "crop_size must be greater than 0".to_string(),
            ));
        }

        if self.max_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_attempts must be greater than 0".to_string(),
            ));
        }

        if !(0.0..1.0).contains(&self.intensity_floor) {
            return Err(ConfigError::ValidationFailed(
                "intensity_floor must be in [0.0, 1.0)".to_string(),
            ));
        }

        if !(0.0..1.0).contains(&self.rejection_threshold) {
            return Err(ConfigError::ValidationFailed(
                "rejection_threshold must be in [0.0, 1.0)".to_string(),
            ));
        }

        if !(0.0..1.0).contains(&self.strict_threshold) {
            return Err(ConfigError::ValidationFailed(
                "strict_threshold must be in [0.0, 1.0)".to_string(),
            ));
        }

        if self.progress_interval == 0 {
            return Err(ConfigError::ValidationFailed(
                "progress_interval must be greater than 0".to_string(),
            ));
        }

        if self.disaster_workers == 0 || self.location_workers == 0 {
            return Err(ConfigError::ValidationFailed(
                "worker pools need at least one worker".to_string(),
            ));
        }

        Ok(())
    }

    // Builder methods

    /// Sets the crop size.
    pub fn with_crop_size(mut self, size: u32) -> Self {
        self.crop_size = size;
        self
    }

    /// Sets the random sampler attempt budget.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the random sampler seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Sets the rejection-mode threshold.
    pub fn with_rejection_threshold(mut self, threshold: f64) -> Self {
        self.rejection_threshold = threshold;
        self
    }

    /// Sets the strict-mode threshold.
    pub fn with_strict_threshold(mut self, threshold: f64) -> Self {
        self.strict_threshold = threshold;
        self
    }

    /// Sets the progress logging interval.
    pub fn with_progress_interval(mut self, interval: usize) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Sets the input tree root.
    pub fn with_images_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.images_root = root.into();
        self
    }

    /// Sets the output tree root.
    pub fn with_output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.output_root = root.into();
        self
    }

    /// Sets both pool sizes at once.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.disaster_workers = workers;
        self.location_workers = workers;
        self
    }
}

/// Parses an environment variable value.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CropConfig::default();
        assert_eq!(config.crop_size, 256);
        assert_eq!(config.max_attempts, 100);
        assert!(config.seed.is_none());
        assert!((config.intensity_floor - 0.1).abs() < f32::EPSILON);
        assert!((config.rejection_threshold - 0.01).abs() < f64::EPSILON);
        assert!((config.strict_threshold - 0.9).abs() < f64::EPSILON);
        assert_eq!(config.progress_interval, 100);
        assert_eq!(config.images_root, PathBuf::from("images"));
        assert_eq!(config.output_root, PathBuf::from("cropped_images"));
        assert!(config.disaster_workers >= 1);
        assert!(config.location_workers >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = CropConfig::new()
            .with_crop_size(128)
            .with_max_attempts(10)
            .with_seed(7)
            .with_strict_threshold(0.5)
            .with_images_root("/data/images")
            .with_output_root("/data/out")
            .with_workers(3);

        assert_eq!(config.crop_size, 128);
        assert_eq!(config.max_attempts, 10);
        assert_eq!(config.seed, Some(7));
        assert!((config.strict_threshold - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.images_root, PathBuf::from("/data/images"));
        assert_eq!(config.output_root, PathBuf::from("/data/out"));
        assert_eq!(config.disaster_workers, 3);
        assert_eq!(config.location_workers, 3);
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        assert!(CropConfig::new().with_crop_size(0).validate().is_err());
        assert!(CropConfig::new().with_max_attempts(0).validate().is_err());
        assert!(CropConfig::new().with_workers(0).validate().is_err());
        assert!(CropConfig::new().with_progress_interval(0).validate().is_err());
    }

    #[test]
    fn test_validation_rejects_out_of_range_thresholds() {
        assert!(CropConfig::new()
            .with_strict_threshold(1.0)
            .validate()
            .is_err());
        assert!(CropConfig::new()
            .with_rejection_threshold(-0.1)
            .validate()
            .is_err());
    }

    #[test]
    fn test_parse_env_value() {
        let size: u32 = parse_env_value(" 512 ", "CROP_SIZE").unwrap();
        assert_eq!(size, 512);

        let err = parse_env_value::<u32>("abc", "CROP_SIZE").unwrap_err();
        assert!(err.to_string().contains("CROP_SIZE"));
    }

    #[test]
    fn test_default_workers_is_positive() {
        assert!(default_workers() >= 1);
    }
}

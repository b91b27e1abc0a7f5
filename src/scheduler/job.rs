//! Work units and their outcomes.
//!
//! - `Unit`: one (disaster, location) task
//! - `UnitStatus`: how a unit ended
//! - `UnitOutcome`: tagged result reported back to the pool

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// One (disaster, location) processing task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Unit {
    pub disaster: String,
    pub location: String,
}

impl Unit {
    pub fn new(disaster: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            disaster: disaster.into(),
            location: location.into(),
        }
    }

    /// `<disaster>/<location>`, used in logs and summaries.
    pub fn id(&self) -> String {
        format!("{}/{}", self.disaster, self.location)
    }

    /// Directory holding the unit's dated captures.
    pub fn input_dir(&self, images_root: &Path) -> PathBuf {
        images_root.join(&self.disaster).join(&self.location)
    }

    /// Directory receiving the unit's `pair_<N>` slots.
    pub fn output_dir(&self, output_root: &Path) -> PathBuf {
        output_root.join(&self.disaster).join(&self.location)
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.disaster, self.location)
    }
}

/// How a unit ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    /// At least one crop pair was written.
    Produced,
    /// The unit ran to completion without producing anything.
    NoOutput,
    /// The unit was aborted by an error.
    Failed,
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitStatus::Produced => write!(f, "produced"),
            UnitStatus::NoOutput => write!(f, "no_output"),
            UnitStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Result of running one unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitOutcome {
    pub unit: Unit,
    pub status: UnitStatus,
    /// Crop pairs written.
    pub crops: usize,
    /// Human-readable diagnostic.
    pub detail: String,
    pub duration_ms: u64,
}

impl UnitOutcome {
    pub fn produced(unit: Unit, crops: usize, detail: impl Into<String>) -> Self {
        Self {
            unit,
            status: UnitStatus::Produced,
            crops,
            detail: detail.into(),
            duration_ms: 0,
        }
    }

    pub fn no_output(unit: Unit, detail: impl Into<String>) -> Self {
        Self {
            unit,
            status: UnitStatus::NoOutput,
            crops: 0,
            detail: detail.into(),
            duration_ms: 0,
        }
    }

    pub fn failed(unit: Unit, detail: impl Into<String>) -> Self {
        Self {
            unit,
            status: UnitStatus::Failed,
            crops: 0,
            detail: detail.into(),
            duration_ms: 0,
        }
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// A unit that ran to completion counts as a success, with or without
    /// output.
    pub fn is_success(&self) -> bool {
        self.status != UnitStatus::Failed
    }
}

//! Before/after pair selection from a location's dated captures.
//!
//! Capture files are named `YYYY-MM-DD_<rest>`. The earliest capture becomes
//! the "before" image and the latest the "after" image.
//!
//! When several captures share the earliest or latest date, the one listed
//! first (earliest) or last (latest) by the directory listing wins. Listing
//! order is platform dependent, so callers must not rely on a particular
//! choice among same-date captures.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::UnitError;

fn date_prefix() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\d{4}-\d{2}-\d{2})_(.+)$").expect("valid regex"))
}

/// One raster file representing a location at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatedCapture {
    pub date: NaiveDate,
    pub path: PathBuf,
}

impl DatedCapture {
    /// Parses the date prefix of `path`'s file name.
    ///
    /// Returns `None` for names without a `YYYY-MM-DD_` prefix or whose
    /// prefix is not a real calendar date.
    pub fn from_path(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let name = path.file_name()?.to_str()?;
        let caps = date_prefix().captures(name)?;
        let date = NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d").ok()?;
        Some(Self { date, path })
    }

    /// File name of the capture, used to name written crops.
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }
}

/// The before/after captures chosen for a location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePair {
    pub before: DatedCapture,
    pub after: DatedCapture,
}

/// Lists the dated captures in `dir`, in directory listing order.
///
/// Sub-directories and files without a date prefix are skipped.
pub fn discover(dir: &Path) -> Result<Vec<DatedCapture>, UnitError> {
    let entries = std::fs::read_dir(dir).map_err(|source| UnitError::Discovery {
        dir: dir.to_path_buf(),
        source,
    })?;

    let mut captures = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Skipping unreadable directory entry");
                continue;
            }
        };

        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }

        match DatedCapture::from_path(entry.path()) {
            Some(capture) => captures.push(capture),
            None => debug!(path = %entry.path().display(), "Ignoring undated file"),
        }
    }

    Ok(captures)
}

/// Picks the earliest and latest captures.
///
/// The sort is stable, so same-date captures keep their input order.
/// Returns `None` when fewer than two captures are given.
pub fn locate(captures: impl IntoIterator<Item = DatedCapture>) -> Option<ImagePair> {
    let mut dated: Vec<DatedCapture> = captures.into_iter().collect();
    if dated.len() < 2 {
        return None;
    }

    dated.sort_by_key(|c| c.date);
    let after = dated.pop()?;
    let before = dated.swap_remove(0);
    Some(ImagePair { before, after })
}

/// Discovers captures in `dir` and locates the pair, reporting
/// `DiscoveryEmpty` when there are fewer than two.
pub fn locate_in(dir: &Path) -> Result<ImagePair, UnitError> {
    let captures = discover(dir)?;
    let found = captures.len();
    locate(captures).ok_or_else(|| UnitError::DiscoveryEmpty {
        dir: dir.to_path_buf(),
        found,
    })
}

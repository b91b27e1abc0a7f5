//! Disaster tile catalogs.
//!
//! Each disaster publishes a tab-separated catalog with one row per captured
//! tile. Only tiles under a cloud-cover ceiling are kept, and of those only
//! tiles whose quadkey (location) was captured more than once, since a single
//! capture can never form a before/after pair.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{info, warn};

use super::download::ImageFetcher;
use super::types::{CollectorError, CollectorResult};

/// Base URL of the per-disaster catalogs.
pub const CATALOG_BASE_URL: &str =
    "https://raw.githubusercontent.com/opengeos/maxar-open-data/master/datasets";

/// Default cloud-cover ceiling, in percent (inclusive).
pub const DEFAULT_MAX_CLOUDS_PERCENT: f64 = 15.0;

#[derive(Debug, Deserialize)]
struct CatalogRow {
    quadkey: String,
    #[serde(rename = "tile:clouds_percent")]
    clouds_percent: String,
    visual: String,
}

/// Catalog URL of `disaster`.
pub fn catalog_url(disaster: &str) -> String {
    format!("{CATALOG_BASE_URL}/{disaster}.tsv")
}

/// Downloads the catalog of `disaster`.
pub async fn fetch_catalog(fetcher: &dyn ImageFetcher, disaster: &str) -> CollectorResult<String> {
    let bytes = fetcher.fetch(&catalog_url(disaster)).await?;
    String::from_utf8(bytes)
        .map_err(|e| CollectorError::ParseError(format!("catalog is not UTF-8: {e}")))
}

/// Returns the `visual` URLs of rows at or under `max_clouds_percent` whose
/// quadkey occurs more than once among those rows, in catalog order.
///
/// Rows with an unparsable cloud percentage are skipped.
pub fn filter_catalog(tsv: &str, max_clouds_percent: f64) -> CollectorResult<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_reader(tsv.as_bytes());

    let mut clear = Vec::new();
    for (line, row) in reader.deserialize::<CatalogRow>().enumerate() {
        let row = row?;
        let clouds: f64 = match row.clouds_percent.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(line = line + 2, value = %row.clouds_percent, "Skipping row with bad cloud cover");
                continue;
            }
        };
        if clouds <= max_clouds_percent {
            clear.push(row);
        }
    }

    let mut captures_per_quadkey: HashMap<&str, usize> = HashMap::new();
    for row in &clear {
        *captures_per_quadkey.entry(row.quadkey.as_str()).or_insert(0) += 1;
    }

    Ok(clear
        .iter()
        .filter(|row| captures_per_quadkey[row.quadkey.as_str()] > 1)
        .map(|row| row.visual.clone())
        .collect())
}

/// `<dir>/<disaster>_filtered_images.txt`.
pub fn links_path(dir: &Path, disaster: &str) -> PathBuf {
    dir.join(format!("{disaster}_filtered_images.txt"))
}

/// Writes `links` one per line to [`links_path`].
pub fn save_links(links: &[String], dir: &Path, disaster: &str) -> CollectorResult<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = links_path(dir, disaster);
    let mut body = links.join("\n");
    if !body.is_empty() {
        body.push('\n');
    }
    std::fs::write(&path, body)?;
    info!(path = %path.display(), links = links.len(), "Filtered image links saved");
    Ok(path)
}

/// Reads a links file, ignoring blank lines.
pub fn load_links(path: &Path) -> CollectorResult<Vec<String>> {
    Ok(std::fs::read_to_string(path)?
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

//! Bringing a disaster's imagery onto disk.
//!
//! A saved links file is reused when present; otherwise the catalog is
//! fetched, filtered and saved first. Every link is then downloaded into the
//! images tree.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::catalog::{
    fetch_catalog, filter_catalog, links_path, load_links, save_links, DEFAULT_MAX_CLOUDS_PERCENT,
};
use super::download::{download_all, DownloadOptions, DownloadReport, ImageFetcher};
use super::types::CollectorResult;

/// Default directory for filtered link lists.
pub const DEFAULT_LINKS_DIR: &str = "filtered_links";

/// Where and how imagery is acquired.
#[derive(Debug, Clone)]
pub struct AcquireOptions {
    /// Root of the `<disaster>/<location>/` images tree.
    pub images_root: PathBuf,
    /// Directory holding `<disaster>_filtered_images.txt` files.
    pub links_dir: PathBuf,
    /// Cloud-cover ceiling used when the catalog has to be filtered.
    pub max_clouds_percent: f64,
    pub download: DownloadOptions,
}

impl AcquireOptions {
    pub fn new(images_root: impl Into<PathBuf>) -> Self {
        Self {
            images_root: images_root.into(),
            links_dir: PathBuf::from(DEFAULT_LINKS_DIR),
            max_clouds_percent: DEFAULT_MAX_CLOUDS_PERCENT,
            download: DownloadOptions::default(),
        }
    }

    pub fn with_links_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.links_dir = dir.into();
        self
    }

    pub fn with_max_clouds_percent(mut self, percent: f64) -> Self {
        self.max_clouds_percent = percent;
        self
    }

    pub fn with_download(mut self, download: DownloadOptions) -> Self {
        self.download = download;
        self
    }
}

/// Filtered links of one disaster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkList {
    pub path: PathBuf,
    pub links: Vec<String>,
    /// Read from an existing file rather than a fresh catalog.
    pub reused: bool,
}

/// Result of acquiring one disaster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Acquisition {
    pub disaster: String,
    pub links: LinkList,
    pub report: DownloadReport,
}

/// Loads the saved links of `disaster`, or fetches and filters its catalog
/// and saves the result.
pub async fn resolve_links(
    fetcher: &dyn ImageFetcher,
    disaster: &str,
    options: &AcquireOptions,
) -> CollectorResult<LinkList> {
    let path = links_path(&options.links_dir, disaster);
    if path.is_file() {
        let links = load_links(&path)?;
        info!(disaster, path = %path.display(), links = links.len(), "Using existing filtered links");
        return Ok(LinkList {
            path,
            links,
            reused: true,
        });
    }

    info!(disaster, "Fetching catalog");
    let tsv = fetch_catalog(fetcher, disaster).await?;
    let links = filter_catalog(&tsv, options.max_clouds_percent)?;
    let path = save_links(&links, &options.links_dir, disaster)?;
    Ok(LinkList {
        path,
        links,
        reused: false,
    })
}

/// Resolves the links of `disaster` and downloads them into the images tree.
pub async fn acquire_disaster(
    fetcher: Arc<dyn ImageFetcher>,
    disaster: &str,
    options: &AcquireOptions,
) -> CollectorResult<Acquisition> {
    let links = resolve_links(fetcher.as_ref(), disaster, options).await?;
    let report = download_all(
        fetcher,
        links.links.clone(),
        &options.images_root,
        &options.download,
    )
    .await;

    info!(
        disaster,
        saved = report.saved.len(),
        failed = report.failed.len(),
        "Acquisition finished"
    );
    Ok(Acquisition {
        disaster: disaster.to_string(),
        links,
        report,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::collectors::catalog::catalog_url;
    use crate::collectors::types::CollectorError;
    use async_trait::async_trait;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Serves fixed bodies by URL and records every request.
    pub(crate) struct RecordingFetcher {
        bodies: HashMap<String, Vec<u8>>,
        pub(crate) requested: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ImageFetcher for RecordingFetcher {
        async fn fetch(&self, url: &str) -> CollectorResult<Vec<u8>> {
            self.requested.lock().unwrap().push(url.to_string());
            self.bodies
                .get(url)
                .cloned()
                .ok_or_else(|| CollectorError::HttpError(format!("{url} returned status 404")))
        }
    }

    fn png() -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, Rgb([90, 90, 90])));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    pub(crate) fn image_url(date: &str) -> String {
        format!("https://h/events/quake/ard/10/031/{date}/a-visual.tif")
    }

    /// Two 16x16 captures of `quake/ard_10_031`, plus the `quake` catalog
    /// listing them when `with_catalog` is set.
    pub(crate) fn fetcher(with_catalog: bool) -> Arc<RecordingFetcher> {
        let mut bodies = HashMap::from([
            (image_url("2020-01-01"), png()),
            (image_url("2020-06-01"), png()),
        ]);
        if with_catalog {
            let tsv = format!(
                "quadkey\ttile:clouds_percent\tvisual\n031\t2\t{}\n031\t5\t{}\n032\t1\thttps://h/events/quake/ard/10/032/2020-01-01/x.tif\n",
                image_url("2020-01-01"),
                image_url("2020-06-01"),
            );
            bodies.insert(catalog_url("quake"), tsv.into_bytes());
        }
        Arc::new(RecordingFetcher {
            bodies,
            requested: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn test_acquire_fetches_catalog_then_downloads() {
        let dir = TempDir::new().unwrap();
        let options = AcquireOptions::new(dir.path().join("images"))
            .with_links_dir(dir.path().join("filtered_links"));
        let fetcher = fetcher(true);

        let acquired = acquire_disaster(fetcher.clone(), "quake", &options)
            .await
            .unwrap();

        assert!(!acquired.links.reused);
        assert_eq!(acquired.links.links.len(), 2);
        assert!(acquired.links.path.is_file());
        assert_eq!(acquired.report.saved.len(), 2);
        assert!(acquired.report.failed.is_empty());

        let location = dir.path().join("images/quake/ard_10_031");
        assert!(location.join("2020-01-01_a-visual.jpg").is_file());
        assert!(location.join("2020-06-01_a-visual.jpg").is_file());
        assert_eq!(fetcher.requested.lock().unwrap()[0], catalog_url("quake"));
    }

    #[tokio::test]
    async fn test_existing_links_file_skips_catalog() {
        let dir = TempDir::new().unwrap();
        let links_dir = dir.path().join("filtered_links");
        save_links(&[image_url("2020-01-01")], &links_dir, "quake").unwrap();

        let options = AcquireOptions::new(dir.path().join("images")).with_links_dir(&links_dir);
        let fetcher = fetcher(false);
        let acquired = acquire_disaster(fetcher.clone(), "quake", &options)
            .await
            .unwrap();

        assert!(acquired.links.reused);
        assert_eq!(acquired.report.saved.len(), 1);
        assert!(!fetcher
            .requested
            .lock()
            .unwrap()
            .contains(&catalog_url("quake")));
    }

    #[tokio::test]
    async fn test_missing_catalog_is_error() {
        let dir = TempDir::new().unwrap();
        let options = AcquireOptions::new(dir.path().join("images"))
            .with_links_dir(dir.path().join("filtered_links"));

        let err = acquire_disaster(fetcher(false), "quake", &options)
            .await
            .unwrap_err();
        assert!(matches!(err, CollectorError::HttpError(_)));
        assert!(!dir.path().join("images").exists());
    }
}

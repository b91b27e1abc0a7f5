//! Source image download and conversion.
//!
//! Each URL is fetched, decoded, converted to RGB, shrunk so its longest edge
//! fits `max_size`, and stored as JPEG under
//! `<images_root>/<event>/<location>/<file>.jpg`. Failures are per URL; a
//! batch always runs to the end.

use std::fs::File;
use std::io::{BufWriter, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::types::{CollectorError, CollectorResult};

/// Source of raw catalog and image bytes.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> CollectorResult<Vec<u8>>;
}

/// HTTP fetcher with bounded retries on transient failures.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl HttpFetcher {
    pub fn new() -> CollectorResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| CollectorError::HttpError(e.to_string()))?;
        Ok(Self {
            client,
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
        })
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    async fn fetch_once(&self, url: &str) -> CollectorResult<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CollectorError::HttpError(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());
            return Err(CollectorError::RateLimited { retry_after });
        }

        if !status.is_success() {
            return Err(CollectorError::HttpError(format!(
                "{url} returned status {status}"
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CollectorError::HttpError(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    /// Fetches `url`, retrying transient failures up to `max_retries` times.
    pub async fn fetch_with_retry(&self, url: &str) -> CollectorResult<Vec<u8>> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(url).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = match &e {
                        CollectorError::RateLimited {
                            retry_after: Some(secs),
                        } => Duration::from_secs(*secs),
                        _ => self.retry_delay * attempt,
                    };
                    warn!(url, attempt, error = %e, "Fetch failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl ImageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> CollectorResult<Vec<u8>> {
        self.fetch_with_retry(url).await
    }
}

/// Options for converting downloaded images.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Longest edge after shrinking, in pixels.
    pub max_size: u32,
    /// JPEG quality, 1-100.
    pub quality: u8,
    /// Downloads in flight at once.
    pub concurrency: usize,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            max_size: 2048,
            quality: 95,
            concurrency: 5,
        }
    }
}

/// Outcome of a download batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DownloadReport {
    pub saved: Vec<PathBuf>,
    /// `(url, error)` for every URL that could not be stored.
    pub failed: Vec<(String, String)>,
}

/// Maps an image URL to its path under `<base>/images`.
pub fn local_path_for(url: &str, base: &Path) -> CollectorResult<PathBuf> {
    image_path_under(url, &base.join("images"))
}

/// Maps an image URL to its path under `images_root`.
///
/// The part after `events/` (or the whole URL path) is read as
/// `<event>/<a>/<b>/<c>/<rest...>`: the location is `a_b_c` and the file name
/// is `rest` joined with `_`, with its extension replaced by `.jpg`.
pub fn image_path_under(url: &str, images_root: &Path) -> CollectorResult<PathBuf> {
    let relative = match url.split_once("events/") {
        Some((_, rest)) => rest.to_string(),
        None => Url::parse(url)
            .map_err(|e| CollectorError::InvalidUrl(format!("{url}: {e}")))?
            .path()
            .trim_start_matches('/')
            .to_string(),
    };

    let components: Vec<&str> = relative.split('/').collect();
    if components.len() < 5 || components.iter().any(|c| c.is_empty()) {
        return Err(CollectorError::InvalidUrl(format!(
            "{url}: expected <event>/<a>/<b>/<c>/<file>"
        )));
    }

    let event = components[0];
    let location = components[1..4].join("_");
    let joined = components[4..].join("_");
    let stem = Path::new(&joined)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(joined.as_str());

    Ok(images_root
        .join(event)
        .join(location)
        .join(format!("{stem}.jpg")))
}

/// Decodes `bytes`, shrinks to `max_size` and writes a JPEG at `path`.
pub fn convert_and_save(bytes: &[u8], path: &Path, max_size: u32, quality: u8) -> CollectorResult<()> {
    let mut reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    reader.no_limits();
    let mut image = DynamicImage::ImageRgb8(reader.decode()?.to_rgb8());

    if image.width().max(image.height()) > max_size {
        image = image.resize(max_size, max_size, FilterType::Lanczos3);
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    image.write_with_encoder(JpegEncoder::new_with_quality(&mut writer, quality))?;
    Ok(())
}

async fn download_one(
    fetcher: &dyn ImageFetcher,
    url: &str,
    images_root: &Path,
    options: &DownloadOptions,
) -> CollectorResult<PathBuf> {
    let path = image_path_under(url, images_root)?;
    let bytes = fetcher.fetch(url).await?;
    debug!(url, bytes = bytes.len(), "Fetched image");

    let target = path.clone();
    let (max_size, quality) = (options.max_size, options.quality);
    tokio::task::spawn_blocking(move || convert_and_save(&bytes, &target, max_size, quality))
        .await
        .map_err(|e| CollectorError::Io(std::io::Error::other(e.to_string())))??;

    Ok(path)
}

/// Downloads and converts every URL into `images_root` with bounded
/// concurrency.
pub async fn download_all(
    fetcher: Arc<dyn ImageFetcher>,
    urls: Vec<String>,
    images_root: &Path,
    options: &DownloadOptions,
) -> DownloadReport {
    let limiter = Arc::new(Semaphore::new(options.concurrency.max(1)));

    let downloads = urls.into_iter().map(|url| {
        let limiter = Arc::clone(&limiter);
        let fetcher = Arc::clone(&fetcher);
        async move {
            let result = match limiter.acquire().await {
                Ok(_permit) => download_one(fetcher.as_ref(), &url, images_root, options).await,
                Err(e) => Err(CollectorError::HttpError(e.to_string())),
            };
            (url, result)
        }
    });

    let mut report = DownloadReport::default();
    for (url, result) in futures::future::join_all(downloads).await {
        match result {
            Ok(path) => {
                info!(path = %path.display(), "Downloaded and converted");
                report.saved.push(path);
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Error processing image");
                report.failed.push((url, e.to_string()));
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::collections::HashMap;
    use tempfile::TempDir;

    struct StaticFetcher {
        bodies: HashMap<String, Vec<u8>>,
    }

    #[async_trait]
    impl ImageFetcher for StaticFetcher {
        async fn fetch(&self, url: &str) -> CollectorResult<Vec<u8>> {
            self.bodies
                .get(url)
                .cloned()
                .ok_or_else(|| CollectorError::HttpError(format!("{url} returned status 404")))
        }
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba([200, 10, 10, 255])));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_local_path_for_event_url() {
        let url = "https://maxar-opendata.s3.amazonaws.com/events/Kalehe-DRC-Flooding-5-8-23/ard/33/122100331322/2023-05-10/10300100E5474B00-visual.tif";
        let path = local_path_for(url, Path::new("/data")).unwrap();
        assert_eq!(
            path,
            PathBuf::from(
                "/data/images/Kalehe-DRC-Flooding-5-8-23/ard_33_122100331322/2023-05-10_10300100E5474B00-visual.jpg"
            )
        );
    }

    #[test]
    fn test_local_path_for_plain_url() {
        let url = "https://example.com/quake/a/b/c/2021-01-01/tile.png?sig=1";
        let path = local_path_for(url, Path::new("out")).unwrap();
        assert_eq!(
            path,
            PathBuf::from("out/images/quake/a_b_c/2021-01-01_tile.jpg")
        );
    }

    #[test]
    fn test_local_path_for_short_url() {
        assert!(local_path_for("https://example.com/events/quake/a/b", Path::new(".")).is_err());
        assert!(local_path_for("not a url", Path::new(".")).is_err());
    }

    #[test]
    fn test_convert_shrinks_and_writes_jpeg() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("2020-01-01_a.jpg");

        convert_and_save(&png_bytes(400, 100), &path, 200, 90).unwrap();

        let written = image::open(&path).unwrap();
        assert_eq!((written.width(), written.height()), (200, 50));
        assert_eq!(image::ImageFormat::from_path(&path).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn test_convert_keeps_small_images() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("2020-01-01_a.jpg");
        convert_and_save(&png_bytes(64, 32), &path, 2048, 95).unwrap();
        let written = image::open(&path).unwrap();
        assert_eq!((written.width(), written.height()), (64, 32));
    }

    #[test]
    fn test_convert_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let err = convert_and_save(b"junk", &dir.path().join("x.jpg"), 10, 90).unwrap_err();
        assert!(matches!(err, CollectorError::Image(_)));
    }

    #[tokio::test]
    async fn test_download_all_reports_per_url() {
        let dir = TempDir::new().unwrap();
        let good = "https://h/events/quake/ard/10/031/2020-01-01/a.tif".to_string();
        let missing = "https://h/events/quake/ard/10/031/2020-06-01/b.tif".to_string();
        let invalid = "https://h/events/quake/short".to_string();

        let fetcher = Arc::new(StaticFetcher {
            bodies: HashMap::from([(good.clone(), png_bytes(32, 32))]),
        });
        let report = download_all(
            fetcher,
            vec![good, missing.clone(), invalid.clone()],
            &dir.path().join("images"),
            &DownloadOptions::default(),
        )
        .await;

        assert_eq!(report.saved.len(), 1);
        assert!(report.saved[0].ends_with("images/quake/ard_10_031/2020-01-01_a.jpg"));
        assert!(report.saved[0].is_file());

        let failed: Vec<&str> = report.failed.iter().map(|(u, _)| u.as_str()).collect();
        assert_eq!(failed, vec![missing.as_str(), invalid.as_str()]);
    }

    #[test]
    fn test_download_options_default() {
        let options = DownloadOptions::default();
        assert_eq!(options.max_size, 2048);
        assert_eq!(options.quality, 95);
        assert_eq!(options.concurrency, 5);
    }
}

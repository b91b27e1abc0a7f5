//! Source imagery collectors.
//!
//! - Catalog: per-disaster tile catalogs, filtered to clear repeated captures
//! - Download: fetching and converting the filtered images into the
//!   `images/<disaster>/<location>/` layout the crop pipeline reads
//! - Acquire: both steps chained for one disaster, reusing saved links

pub mod acquire;
pub mod catalog;
pub mod download;
pub mod types;

pub use acquire::{
    acquire_disaster, resolve_links, AcquireOptions, Acquisition, LinkList, DEFAULT_LINKS_DIR,
};
pub use catalog::{
    catalog_url, fetch_catalog, filter_catalog, links_path, load_links, save_links,
    CATALOG_BASE_URL, DEFAULT_MAX_CLOUDS_PERCENT,
};
pub use download::{
    convert_and_save, download_all, image_path_under, local_path_for, DownloadOptions,
    DownloadReport, HttpFetcher, ImageFetcher,
};
pub use types::*;

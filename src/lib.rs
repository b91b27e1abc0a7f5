//! change-forge: before/after crop datasets from dated disaster imagery.
//!
//! This library pairs the earliest and latest capture of each location,
//! cuts aligned square crops from both, and writes them as numbered pair
//! slots. It also fetches the source imagery catalogs and images.

// Core modules
pub mod cli;
pub mod collectors;
pub mod error;
pub mod export;
pub mod imagery;
pub mod pipeline;
pub mod scheduler;

// Re-export commonly used error types
pub use error::{OutputError, UnitError};

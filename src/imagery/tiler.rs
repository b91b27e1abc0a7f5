//! Exhaustive non-overlapping tiling.
//!
//! Cells are visited row-major on a grid of pitch `crop_size`. Strips at the
//! right and bottom edges narrower than a crop are dropped, never padded.

use tracing::info;

use super::raster::{BoundingBox, CropResult, RasterPair};
use super::validity::{ValidityFilter, ValidityMode};

/// Candidate boxes of a `width x height` grid, row-major.
#[derive(Debug, Clone)]
pub struct TileGrid {
    columns: u32,
    rows: u32,
    size: u32,
    next: u64,
}

impl TileGrid {
    pub fn new(width: u32, height: u32, size: u32) -> Self {
        let (columns, rows) = if size == 0 {
            (0, 0)
        } else {
            (width / size, height / size)
        };
        Self {
            columns,
            rows,
            size,
            next: 0,
        }
    }

    /// Total number of cells, `floor(W/S) * floor(H/S)`.
    pub fn cell_count(&self) -> u64 {
        u64::from(self.columns) * u64::from(self.rows)
    }
}

impl Iterator for TileGrid {
    type Item = BoundingBox;

    fn next(&mut self) -> Option<BoundingBox> {
        if self.next >= self.cell_count() {
            return None;
        }
        let row = (self.next / u64::from(self.columns)) as u32;
        let column = (self.next % u64::from(self.columns)) as u32;
        self.next += 1;
        Some(BoundingBox::square(
            column * self.size,
            row * self.size,
            self.size,
        ))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.cell_count() - self.next) as usize;
        (remaining, Some(remaining))
    }
}

/// Lazily yields every grid cell whose before and after regions pass
/// strict-mode validity.
///
/// Deterministic for a given pair and crop size; build a new one to restart.
pub struct ExhaustiveTiler<'a> {
    rasters: &'a RasterPair,
    filter: ValidityFilter,
    grid: TileGrid,
    accepted: usize,
    examined: u64,
    progress_interval: usize,
}

impl<'a> ExhaustiveTiler<'a> {
    pub fn new(
        rasters: &'a RasterPair,
        filter: ValidityFilter,
        crop_size: u32,
        progress_interval: usize,
    ) -> Self {
        Self {
            rasters,
            filter,
            grid: TileGrid::new(rasters.width(), rasters.height(), crop_size),
            accepted: 0,
            examined: 0,
            progress_interval: progress_interval.max(1),
        }
    }

    /// Crops accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted
    }

    /// Grid cells examined so far.
    pub fn examined(&self) -> u64 {
        self.examined
    }
}

impl Iterator for ExhaustiveTiler<'_> {
    type Item = CropResult;

    fn next(&mut self) -> Option<CropResult> {
        for bbox in self.grid.by_ref() {
            self.examined += 1;
            if let Some(crop) = self
                .filter
                .check_pair(self.rasters, bbox, ValidityMode::Strict)
            {
                self.accepted += 1;
                if self.accepted % self.progress_interval == 0 {
                    info!(accepted = self.accepted, "Processed valid crops");
                }
                return Some(crop);
            }
        }
        None
    }
}

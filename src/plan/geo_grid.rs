//! Partition a query bounding box into pixel-aligned geographic chunks.

use crate::query::BoundingBox;
use crate::raster::GridExtent;

/// One geographic chunk of the query grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoChunk {
    /// Position in planner order (bottom-to-top, then left-to-right)
    pub index: usize,

    /// Chunk row counted from the south edge
    pub row: usize,

    /// Chunk column counted from the west edge
    pub col: usize,

    /// Latitude span in degrees `(south, north)`
    pub lat_range: (f64, f64),

    /// Longitude span in degrees `(west, east)`
    pub lon_range: (f64, f64),

    /// First pixel row of this chunk in the query grid (row 0 is north)
    pub row_offset: usize,

    /// First pixel column of this chunk in the query grid
    pub col_offset: usize,

    pub rows: usize,
    pub cols: usize,
}

impl GeoChunk {
    pub fn bbox(&self) -> BoundingBox {
        BoundingBox::new(
            self.lat_range.0,
            self.lat_range.1,
            self.lon_range.0,
            self.lon_range.1,
        )
    }

    /// Pixel extent of this chunk inside the query grid.
    pub fn extent(&self, grid: &GridExtent) -> GridExtent {
        grid.window(self.row_offset, self.col_offset, self.rows, self.cols)
    }
}

/// Chunk layout over the query grid.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoGrid {
    /// Requested bounding box
    pub bbox: BoundingBox,

    /// Pixel grid covering the bounding box
    pub extent: GridExtent,

    /// Chunk side in pixels
    pub cell_pixels: usize,

    /// Chunks along latitude
    pub row_chunks: usize,

    /// Chunks along longitude
    pub col_chunks: usize,
}

impl GeoGrid {
    /// Lay out near-square cells of about `geo_chunk_size` degrees over `bbox`.
    pub fn new(bbox: BoundingBox, resolution: f64, geo_chunk_size: f64) -> Self {
        let extent = GridExtent::for_bbox(&bbox, resolution);
        let cell_pixels = ((geo_chunk_size / resolution).round() as usize).max(1);
        let row_chunks = extent.rows.div_ceil(cell_pixels);
        let col_chunks = extent.cols.div_ceil(cell_pixels);

        tracing::debug!(
            "Geo grid: {}x{} pixels, {}px cells, {}x{} chunks",
            extent.rows,
            extent.cols,
            cell_pixels,
            row_chunks,
            col_chunks
        );

        Self {
            bbox,
            extent,
            cell_pixels,
            row_chunks,
            col_chunks,
        }
    }

    pub fn num_chunks(&self) -> usize {
        self.row_chunks * self.col_chunks
    }

    /// Build the chunk at (`row`, `col`), with `row` counted from the south.
    pub fn chunk(&self, row: usize, col: usize) -> GeoChunk {
        let cell = self.cell_pixels;
        let cell_deg = cell as f64 * self.extent.resolution;

        // Pixel rows measured from the southern edge of the grid.
        let south_px = row * cell;
        let north_px = ((row + 1) * cell).min(self.extent.rows);
        let west_px = col * cell;
        let east_px = ((col + 1) * cell).min(self.extent.cols);

        let lat_lo = self.bbox.lat_min + row as f64 * cell_deg;
        let lat_hi = if row + 1 == self.row_chunks {
            self.bbox.lat_max
        } else {
            (lat_lo + cell_deg).min(self.bbox.lat_max)
        };
        let lon_lo = self.bbox.lon_min + col as f64 * cell_deg;
        let lon_hi = if col + 1 == self.col_chunks {
            self.bbox.lon_max
        } else {
            (lon_lo + cell_deg).min(self.bbox.lon_max)
        };

        GeoChunk {
            index: row * self.col_chunks + col,
            row,
            col,
            lat_range: (lat_lo, lat_hi),
            lon_range: (lon_lo, lon_hi),
            row_offset: self.extent.rows - north_px,
            col_offset: west_px,
            rows: north_px - south_px,
            cols: east_px - west_px,
        }
    }

    /// Enumerate chunks bottom-to-top, left-to-right.
    pub fn enumerate_chunks(&self) -> impl Iterator<Item = GeoChunk> + '_ {
        (0..self.row_chunks)
            .flat_map(move |row| (0..self.col_chunks).map(move |col| self.chunk(row, col)))
    }
}

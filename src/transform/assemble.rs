//! Stitch a time group's geo-chunk tiles into one raster for the whole query grid.

use crate::error::MosaicError;
use crate::plan::{GeoChunk, GeoGrid};
use crate::raster::{Band, RasterDataset, NODATA};
use anyhow::Result;
use ndarray::{concatenate, Array2, ArrayView2, Axis};
use std::collections::HashMap;

/// Concatenate tiles into a north-up raster spanning `grid`.
///
/// `tiles` maps geo-chunk index to the chunk's mosaic. Chunks without a tile (empty
/// results) are filled with nodata. Returns `None` when no chunk produced a tile.
/// Planner rows run south to north, so rows are laid out in reverse.
pub fn assemble_group(
    grid: &GeoGrid,
    chunks: &[GeoChunk],
    tiles: &HashMap<usize, RasterDataset>,
) -> Result<Option<RasterDataset>> {
    let Some(first) = chunks.iter().find_map(|c| tiles.get(&c.index)) else {
        return Ok(None);
    };
    let band_names = first.band_names();

    for chunk in chunks {
        if let Some(tile) = tiles.get(&chunk.index) {
            if tile.shape() != (chunk.rows, chunk.cols) {
                return Err(MosaicError::ShapeMismatch {
                    band: format!("geo chunk {}", chunk.index),
                    expected: (chunk.rows, chunk.cols),
                    actual: tile.shape(),
                }
                .into());
            }
        }
    }

    let mut bands = Vec::with_capacity(band_names.len());
    for name in &band_names {
        let mut rows: Vec<Array2<f32>> = Vec::with_capacity(grid.row_chunks);
        for row in (0..grid.row_chunks).rev() {
            let row_tiles: Vec<Array2<f32>> = chunks
                .iter()
                .filter(|c| c.row == row)
                .map(|c| {
                    tiles
                        .get(&c.index)
                        .and_then(|t| t.band(name))
                        .cloned()
                        .unwrap_or_else(|| Array2::from_elem((c.rows, c.cols), NODATA))
                })
                .collect();
            let views: Vec<ArrayView2<f32>> = row_tiles.iter().map(|a| a.view()).collect();
            rows.push(concatenate(Axis(1), &views)?);
        }
        let views: Vec<ArrayView2<f32>> = rows.iter().map(|a| a.view()).collect();
        bands.push(Band::new(name.clone(), concatenate(Axis(0), &views)?));
    }

    Ok(Some(RasterDataset::new(grid.extent, bands)?))
}

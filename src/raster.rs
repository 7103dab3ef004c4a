//! In-memory raster types shared by the catalog, kernels, scratch store and writers.
//!
//! Every grid is `f32` with [`NODATA`] marking "no valid observation". Grids are
//! north-up: row 0 is the northern edge, column 0 the western edge.

use crate::error::MosaicError;
use crate::query::BoundingBox;
use chrono::{DateTime, Utc};
use ndarray::{s, Array2, Array3, Axis};
use serde::{Deserialize, Serialize};

/// Reserved nodata sentinel for all bands.
pub const NODATA: f32 = -9999.0;

/// Geographic lat/lon coordinate reference.
pub const WGS84: &str = "EPSG:4326";

/// Whether a pixel value is a real observation.
#[inline]
pub fn is_valid(v: f32) -> bool {
    v != NODATA && !v.is_nan()
}

/// Number of whole pixels needed to span `[lo, hi]` at `resolution`.
///
/// The small epsilon keeps exact multiples (e.g. 1.0 / 0.1) from rounding up a pixel.
pub fn pixel_span(lo: f64, hi: f64, resolution: f64) -> usize {
    let n = ((hi - lo) / resolution - 1e-6).ceil();
    if n < 1.0 {
        1
    } else {
        n as usize
    }
}

/// Affine transform from pixel to geographic coordinates.
///
/// Coefficients follow the usual affine layout:
/// ```text
/// x = a * col + b * row + c
/// y = d * col + e * row + f
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    /// Pixel width
    pub a: f64,
    /// Row rotation (0 for north-up)
    pub b: f64,
    /// X of the upper-left corner
    pub c: f64,
    /// Column rotation (0 for north-up)
    pub d: f64,
    /// Pixel height (negative for north-up)
    pub e: f64,
    /// Y of the upper-left corner
    pub f: f64,
}

impl GeoTransform {
    /// North-up transform anchored at (`west`, `north`).
    pub fn north_up(west: f64, north: f64, resolution: f64) -> Self {
        Self {
            a: resolution,
            b: 0.0,
            c: west,
            d: 0.0,
            e: -resolution,
            f: north,
        }
    }

    /// Convert world coordinates to fractional (column, row).
    #[inline]
    pub fn world_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        let col = (x - self.c) / self.a;
        let row = (y - self.f) / self.e;
        (col, row)
    }

    /// Convert (column, row) to world coordinates.
    #[inline]
    pub fn pixel_to_world(&self, col: f64, row: f64) -> (f64, f64) {
        let x = self.a * col + self.b * row + self.c;
        let y = self.d * col + self.e * row + self.f;
        (x, y)
    }

    /// GDAL-ordered coefficients `[c, a, b, f, d, e]`.
    pub fn to_gdal(&self) -> [f64; 6] {
        [self.c, self.a, self.b, self.f, self.d, self.e]
    }
}

/// Pixel grid placement of a raster in geographic coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridExtent {
    /// Latitude of the northern edge
    pub north: f64,
    /// Longitude of the western edge
    pub west: f64,
    /// Pixel size in degrees (square pixels)
    pub resolution: f64,
    pub rows: usize,
    pub cols: usize,
}

impl GridExtent {
    pub fn new(north: f64, west: f64, resolution: f64, rows: usize, cols: usize) -> Self {
        Self {
            north,
            west,
            resolution,
            rows,
            cols,
        }
    }

    /// Smallest grid at `resolution` anchored at the box's north-west corner that covers it.
    pub fn for_bbox(bbox: &BoundingBox, resolution: f64) -> Self {
        Self {
            north: bbox.lat_max,
            west: bbox.lon_min,
            resolution,
            rows: pixel_span(bbox.lat_min, bbox.lat_max, resolution),
            cols: pixel_span(bbox.lon_min, bbox.lon_max, resolution),
        }
    }

    pub fn south(&self) -> f64 {
        self.north - self.rows as f64 * self.resolution
    }

    pub fn east(&self) -> f64 {
        self.west + self.cols as f64 * self.resolution
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn pixel_count(&self) -> usize {
        self.rows * self.cols
    }

    pub fn geotransform(&self) -> GeoTransform {
        GeoTransform::north_up(self.west, self.north, self.resolution)
    }

    /// Bounds actually covered by the pixel grid.
    pub fn bounds(&self) -> BoundingBox {
        BoundingBox::new(self.south(), self.north, self.west, self.east())
    }

    /// Extent of a pixel window inside this grid.
    pub fn window(&self, row_offset: usize, col_offset: usize, rows: usize, cols: usize) -> Self {
        Self {
            north: self.north - row_offset as f64 * self.resolution,
            west: self.west + col_offset as f64 * self.resolution,
            resolution: self.resolution,
            rows,
            cols,
        }
    }
}

/// One named 2-D band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub name: String,
    pub data: Array2<f32>,
}

impl Band {
    pub fn new(name: impl Into<String>, data: Array2<f32>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

/// A multi-band raster on a common grid. Also used as the intermediate mosaic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterDataset {
    pub extent: GridExtent,
    pub bands: Vec<Band>,
}

impl RasterDataset {
    /// Build a dataset, checking that every band matches the extent's shape.
    pub fn new(extent: GridExtent, bands: Vec<Band>) -> anyhow::Result<Self> {
        for band in &bands {
            if band.data.dim() != extent.shape() {
                return Err(MosaicError::ShapeMismatch {
                    band: band.name.clone(),
                    expected: extent.shape(),
                    actual: band.data.dim(),
                }
                .into());
            }
        }
        Ok(Self { extent, bands })
    }

    /// A dataset with every pixel of every named band set to `value`.
    pub fn filled(extent: GridExtent, names: &[String], value: f32) -> Self {
        let bands = names
            .iter()
            .map(|n| Band::new(n.clone(), Array2::from_elem(extent.shape(), value)))
            .collect();
        Self { extent, bands }
    }

    pub fn band(&self, name: &str) -> Option<&Array2<f32>> {
        self.bands.iter().find(|b| b.name == name).map(|b| &b.data)
    }

    pub fn band_names(&self) -> Vec<String> {
        self.bands.iter().map(|b| b.name.clone()).collect()
    }

    pub fn shape(&self) -> (usize, usize) {
        self.extent.shape()
    }

    /// Valid pixels in the first band, which stands in for the whole dataset.
    pub fn count_valid(&self) -> usize {
        self.bands
            .first()
            .map(|b| b.data.iter().filter(|v| is_valid(**v)).count())
            .unwrap_or(0)
    }

    /// True when there are no bands or the first band holds no valid pixel.
    pub fn is_empty(&self) -> bool {
        self.count_valid() == 0
    }
}

/// One named band across time: shape `(time, rows, cols)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBand {
    pub name: String,
    pub data: Array3<f32>,
}

/// Raw scene data for one fetch window, ordered by `times`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDataset {
    pub extent: GridExtent,
    pub times: Vec<DateTime<Utc>>,
    pub bands: Vec<RawBand>,
}

impl RawDataset {
    pub fn band(&self, name: &str) -> Option<&Array3<f32>> {
        self.bands.iter().find(|b| b.name == name).map(|b| &b.data)
    }

    pub fn has_band(&self, name: &str) -> bool {
        self.bands.iter().any(|b| b.name == name)
    }

    pub fn slice_count(&self) -> usize {
        self.times.len()
    }

    pub fn band_names(&self) -> Vec<String> {
        self.bands.iter().map(|b| b.name.clone()).collect()
    }

    /// The same dataset with `name` removed.
    pub fn without_band(mut self, name: &str) -> Self {
        self.bands.retain(|b| b.name != name);
        self
    }

    /// The same dataset with the time axis flipped (newest first if it was oldest first).
    pub fn reversed_time(mut self) -> Self {
        self.times.reverse();
        for band in &mut self.bands {
            band.data = band.data.slice(s![..;-1, .., ..]).to_owned();
        }
        self
    }

    /// One time slice of a band.
    pub fn slice(&self, name: &str, t: usize) -> Option<Array2<f32>> {
        self.band(name)
            .filter(|d| t < d.len_of(Axis(0)))
            .map(|d| d.index_axis(Axis(0), t).to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ndarray::array;

    #[test]
    fn test_pixel_span_exact_and_partial() {
        assert_eq!(pixel_span(0.0, 1.0, 0.1), 10);
        assert_eq!(pixel_span(0.0, 1.05, 0.1), 11);
        assert_eq!(pixel_span(0.0, 0.01, 0.1), 1);
    }

    #[test]
    fn test_geotransform_roundtrip() {
        let gt = GeoTransform::north_up(10.0, 1.0, 0.25);
        let (x, y) = gt.pixel_to_world(2.0, 3.0);
        assert!((x - 10.5).abs() < 1e-12);
        assert!((y - 0.25).abs() < 1e-12);

        let (col, row) = gt.world_to_pixel(x, y);
        assert!((col - 2.0).abs() < 1e-12);
        assert!((row - 3.0).abs() < 1e-12);
        assert_eq!(gt.to_gdal(), [10.0, 0.25, 0.0, 1.0, 0.0, -0.25]);
    }

    #[test]
    fn test_extent_for_bbox_and_window() {
        let bbox = BoundingBox::new(0.0, 1.0, 0.0, 2.0);
        let extent = GridExtent::for_bbox(&bbox, 0.5);
        assert_eq!(extent.shape(), (2, 4));
        assert_eq!(extent.south(), 0.0);
        assert_eq!(extent.east(), 2.0);

        let w = extent.window(1, 2, 1, 2);
        assert_eq!(w.north, 0.5);
        assert_eq!(w.west, 1.0);
    }

    #[test]
    fn test_dataset_rejects_mismatched_band() {
        let extent = GridExtent::new(1.0, 0.0, 0.5, 2, 2);
        let err = RasterDataset::new(extent, vec![Band::new("red", Array2::zeros((3, 2)))])
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MosaicError>(),
            Some(MosaicError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_count_valid_uses_first_band() {
        let extent = GridExtent::new(1.0, 0.0, 0.5, 2, 2);
        let ds = RasterDataset::new(
            extent,
            vec![
                Band::new("red", array![[1.0, NODATA], [NODATA, 4.0]]),
                Band::new("nir", array![[1.0, 2.0], [3.0, 4.0]]),
            ],
        )
        .unwrap();
        assert_eq!(ds.count_valid(), 2);
        assert!(!ds.is_empty());
        assert!(RasterDataset::filled(extent, &["red".into()], NODATA).is_empty());
    }

    #[test]
    fn test_reversed_time_flips_slices() {
        let extent = GridExtent::new(1.0, 0.0, 1.0, 1, 1);
        let t1 = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2020, 2, 1, 0, 0, 0).unwrap();
        let raw = RawDataset {
            extent,
            times: vec![t1, t2],
            bands: vec![RawBand {
                name: "red".into(),
                data: Array3::from_shape_vec((2, 1, 1), vec![1.0, 2.0]).unwrap(),
            }],
        };

        let rev = raw.reversed_time();
        assert_eq!(rev.times, vec![t2, t1]);
        assert_eq!(rev.slice("red", 0).unwrap()[[0, 0]], 2.0);
        assert!(rev.without_band("red").bands.is_empty());
    }
}

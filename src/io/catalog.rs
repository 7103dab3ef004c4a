//! Scene catalog: acquisition discovery and raw pixel access.

use crate::query::{BoundingBox, TimeRange};
use crate::raster::{Band, GridExtent, RawBand, RawDataset, NODATA};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ndarray::{Array3, Axis};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

/// Summary of the scenes covering a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneMetadata {
    pub scene_count: usize,
    /// Pixels in the query area at product resolution
    pub pixel_count: usize,
}

/// Inclusive time window for one fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl FetchWindow {
    /// Window spanning the earliest and latest of `times`.
    pub fn spanning(times: &[DateTime<Utc>]) -> Option<Self> {
        let start = times.iter().min()?;
        let end = times.iter().max()?;
        Some(Self {
            start: *start,
            end: *end,
        })
    }

    pub fn contains(&self, t: &DateTime<Utc>) -> bool {
        *t >= self.start && *t <= self.end
    }
}

/// Access to the scene archive.
///
/// One handle is shared by every worker of a query and may be reused across
/// sequential queries. `close` is called once when the owning service shuts down.
#[async_trait]
pub trait SceneCatalog: Send + Sync {
    /// Distinct acquisition times for the area, ascending.
    async fn list_acquisition_dates(
        &self,
        platform: &str,
        product: &str,
        bbox: &BoundingBox,
        time_range: &TimeRange,
    ) -> Result<Vec<DateTime<Utc>>>;

    /// Scene count and pixel count for the area, or `None` when nothing covers it.
    async fn scene_metadata(
        &self,
        platform: &str,
        product: &str,
        bbox: &BoundingBox,
        time_range: &TimeRange,
    ) -> Result<Option<SceneMetadata>>;

    /// Pixel size of the product in degrees.
    async fn product_resolution(&self, product: &str) -> Result<f64>;

    /// Load `bands` for every acquisition in `window` on the pixel grid `extent`.
    ///
    /// Bands that some matching scene lacks are left out of the result rather than
    /// failing the call.
    async fn fetch_extent(
        &self,
        product: &str,
        platform: &str,
        window: &FetchWindow,
        extent: &GridExtent,
        bands: &[String],
    ) -> Result<RawDataset>;

    /// Release any held connections.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// One acquisition of one product over a north-up grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub platform: String,
    pub product: String,
    pub time: DateTime<Utc>,
    pub extent: GridExtent,
    pub bands: Vec<Band>,
}

impl Scene {
    fn band(&self, name: &str) -> Option<&ndarray::Array2<f32>> {
        self.bands.iter().find(|b| b.name == name).map(|b| &b.data)
    }

    fn intersects(&self, bbox: &BoundingBox) -> bool {
        let e = &self.extent;
        e.west < bbox.lon_max && e.east() > bbox.lon_min && e.south() < bbox.lat_max && e.north > bbox.lat_min
    }

    /// Nearest-pixel value at a geographic point, if the point falls on this scene.
    fn sample(&self, data: &ndarray::Array2<f32>, lon: f64, lat: f64) -> Option<f32> {
        let (col, row) = self.extent.geotransform().world_to_pixel(lon, lat);
        if col < 0.0 || row < 0.0 {
            return None;
        }
        let (col, row) = (col.floor() as usize, row.floor() as usize);
        data.get((row, col)).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductInfo {
    pub name: String,
    /// Pixel size in degrees
    pub resolution: f64,
}

/// On-disk description of an in-memory catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogManifest {
    #[serde(default)]
    pub products: Vec<ProductInfo>,
    #[serde(default)]
    pub scenes: Vec<Scene>,
}

/// Catalog over scenes held in memory.
pub struct MemoryCatalog {
    products: Vec<ProductInfo>,
    scenes: Vec<Scene>,
    closed: AtomicBool,
}

impl MemoryCatalog {
    pub fn new(products: Vec<ProductInfo>, scenes: Vec<Scene>) -> Self {
        Self {
            products,
            scenes,
            closed: AtomicBool::new(false),
        }
    }

    /// Load a catalog manifest from YAML or JSON.
    pub fn from_manifest_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog manifest {}", path.display()))?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let manifest: CatalogManifest = match ext {
            "json" => serde_json::from_str(&contents)?,
            _ => serde_yaml::from_str(&contents)?,
        };

        tracing::info!(
            "Loaded catalog manifest: {} products, {} scenes",
            manifest.products.len(),
            manifest.scenes.len()
        );
        Ok(Self::new(manifest.products, manifest.scenes))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            anyhow::bail!("scene catalog is closed");
        }
        Ok(())
    }

    fn resolution_of(&self, product: &str) -> Result<f64> {
        self.products
            .iter()
            .find(|p| p.name == product)
            .map(|p| p.resolution)
            .with_context(|| format!("Unknown product '{}'", product))
    }

    fn matching<'a>(
        &'a self,
        platform: &'a str,
        product: &'a str,
        bbox: &'a BoundingBox,
    ) -> impl Iterator<Item = &'a Scene> + 'a {
        self.scenes
            .iter()
            .filter(move |s| s.platform == platform && s.product == product && s.intersects(bbox))
    }
}

#[async_trait]
impl SceneCatalog for MemoryCatalog {
    async fn list_acquisition_dates(
        &self,
        platform: &str,
        product: &str,
        bbox: &BoundingBox,
        time_range: &TimeRange,
    ) -> Result<Vec<DateTime<Utc>>> {
        self.ensure_open()?;
        let mut dates: Vec<_> = self
            .matching(platform, product, bbox)
            .filter(|s| time_range.contains(&s.time))
            .map(|s| s.time)
            .collect();
        dates.sort();
        dates.dedup();
        Ok(dates)
    }

    async fn scene_metadata(
        &self,
        platform: &str,
        product: &str,
        bbox: &BoundingBox,
        time_range: &TimeRange,
    ) -> Result<Option<SceneMetadata>> {
        self.ensure_open()?;
        let scene_count = self
            .matching(platform, product, bbox)
            .filter(|s| time_range.contains(&s.time))
            .count();
        if scene_count == 0 {
            return Ok(None);
        }
        let resolution = self.resolution_of(product)?;
        Ok(Some(SceneMetadata {
            scene_count,
            pixel_count: GridExtent::for_bbox(bbox, resolution).pixel_count(),
        }))
    }

    async fn product_resolution(&self, product: &str) -> Result<f64> {
        self.ensure_open()?;
        self.resolution_of(product)
    }

    async fn fetch_extent(
        &self,
        product: &str,
        platform: &str,
        window: &FetchWindow,
        extent: &GridExtent,
        bands: &[String],
    ) -> Result<RawDataset> {
        self.ensure_open()?;
        let bbox = extent.bounds();
        let scenes: Vec<&Scene> = self
            .matching(platform, product, &bbox)
            .filter(|s| window.contains(&s.time))
            .collect();

        let mut times: Vec<DateTime<Utc>> = scenes.iter().map(|s| s.time).collect();
        times.sort();
        times.dedup();

        let present: Vec<&String> = bands
            .iter()
            .filter(|b| !scenes.is_empty() && scenes.iter().all(|s| s.band(b).is_some()))
            .collect();

        let res = extent.resolution;
        let mut raw_bands = Vec::with_capacity(present.len());
        for name in present {
            let mut data = Array3::from_elem((times.len(), extent.rows, extent.cols), NODATA);
            for (t, mut slice) in data.axis_iter_mut(Axis(0)).enumerate() {
                // Several scenes may share an acquisition time; the first valid sample wins.
                for scene in scenes.iter().filter(|s| s.time == times[t]) {
                    let Some(src) = scene.band(name) else {
                        continue;
                    };
                    for ((row, col), value) in slice.indexed_iter_mut() {
                        if *value != NODATA {
                            continue;
                        }
                        let lat = extent.north - (row as f64 + 0.5) * res;
                        let lon = extent.west + (col as f64 + 0.5) * res;
                        if let Some(v) = scene.sample(src, lon, lat) {
                            *value = v;
                        }
                    }
                }
            }
            raw_bands.push(RawBand {
                name: name.clone(),
                data,
            });
        }

        tracing::debug!(
            "Fetched {} slices x {} bands for {}x{} px",
            times.len(),
            raw_bands.len(),
            extent.rows,
            extent.cols
        );

        Ok(RawDataset {
            extent: *extent,
            times,
            bands: raw_bands,
        })
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        tracing::debug!("Scene catalog closed");
        Ok(())
    }
}

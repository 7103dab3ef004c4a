//! Scene and configuration builders shared by pipeline tests.

use crate::config::Config;
use crate::io::{ProductInfo, Scene};
use crate::raster::{Band, GridExtent};
use chrono::{DateTime, TimeZone, Utc};
use ndarray::Array2;
use std::path::Path;

pub const PLATFORM: &str = "LANDSAT_7";
pub const PRODUCT: &str = "ls7";

pub fn date(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 6, day, 0, 0, 0).unwrap()
}

pub fn product() -> ProductInfo {
    ProductInfo {
        name: PRODUCT.into(),
        resolution: 0.25,
    }
}

/// 4x4 pixels over lat 0..1, lon 0..1.
pub fn unit_extent() -> GridExtent {
    GridExtent::new(1.0, 0.0, 0.25, 4, 4)
}

/// Scene over [`unit_extent`] with constant reflectance `value` and, when given, a
/// constant quality class.
pub fn scene(day: u32, value: f32, quality: Option<f32>) -> Scene {
    scene_on(unit_extent(), day, value, quality)
}

pub fn scene_on(extent: GridExtent, day: u32, value: f32, quality: Option<f32>) -> Scene {
    let shape = extent.shape();
    let mut bands = vec![
        Band::new("red", Array2::from_elem(shape, value)),
        Band::new("green", Array2::from_elem(shape, value)),
        Band::new("blue", Array2::from_elem(shape, value)),
        Band::new("nir", Array2::from_elem(shape, value * 2.0)),
    ];
    if let Some(q) = quality {
        bands.push(Band::new("cf_mask", Array2::from_elem(shape, q)));
    }
    Scene {
        platform: PLATFORM.into(),
        product: PRODUCT.into(),
        time: date(day),
        extent,
        bands,
    }
}

/// Defaults rooted in `dir`, metrics off.
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::with_manifest(dir.join("catalog.yaml"));
    config.scratch.root = dir.join("scratch");
    config.output.root = dir.join("results");
    config.processing.enable_metrics = false;
    config.processing.chunk_concurrency = 2;
    config
}

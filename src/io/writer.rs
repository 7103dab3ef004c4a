//! Output raster writers.

use crate::config::{OutputFormat, PngConfig};
use crate::error::MosaicError;
use crate::raster::{is_valid, GeoTransform, RasterDataset};
use anyhow::{Context, Result};
use image::{ImageFormat, Rgba, RgbaImage};
use std::path::{Path, PathBuf};

/// Encodes a finished mosaic into result files.
///
/// Writers are synchronous; callers run them on the blocking pool.
pub trait RasterWriter: Send + Sync {
    /// Write `dataset` as `format` under the name `stem` and return the files created.
    fn write_raster(
        &self,
        format: OutputFormat,
        stem: &str,
        dataset: &RasterDataset,
        geotransform: &GeoTransform,
        crs: &str,
        band_order: &[String],
    ) -> Result<Vec<PathBuf>>;
}

/// Writes PNG previews to a local directory.
///
/// Each PNG gets a transparent-nodata image, a `_filled` variant with nodata painted in
/// the fill colour, and a `.pgw` world file. GeoTIFF and NetCDF are not encoded here.
pub struct LocalRasterWriter {
    root: PathBuf,
    png: PngConfig,
}

impl LocalRasterWriter {
    pub fn new(root: impl Into<PathBuf>, png: PngConfig) -> Self {
        Self {
            root: root.into(),
            png,
        }
    }

    fn scale(&self, v: f32) -> u8 {
        (v / self.png.scale_max * 255.0).clamp(0.0, 255.0) as u8
    }

    fn write_png(
        &self,
        stem: &str,
        dataset: &RasterDataset,
        geotransform: &GeoTransform,
        crs: &str,
        band_order: &[String],
    ) -> Result<Vec<PathBuf>> {
        if band_order.len() != 3 {
            anyhow::bail!("PNG output needs three bands, got {}", band_order.len());
        }
        let (Some(r), Some(g), Some(b)) = (
            dataset.band(&band_order[0]),
            dataset.band(&band_order[1]),
            dataset.band(&band_order[2]),
        ) else {
            let missing = band_order
                .iter()
                .filter(|b| dataset.band(b).is_none())
                .cloned()
                .collect();
            return Err(MosaicError::MissingBands(missing).into());
        };

        let (rows, cols) = dataset.shape();
        let [fr, fg, fb] = self.png.fill_color;
        let mut clear = RgbaImage::new(cols as u32, rows as u32);
        let mut filled = RgbaImage::new(cols as u32, rows as u32);
        for row in 0..rows {
            for col in 0..cols {
                let (rv, gv, bv) = (r[[row, col]], g[[row, col]], b[[row, col]]);
                let (x, y) = (col as u32, row as u32);
                if is_valid(rv) && is_valid(gv) && is_valid(bv) {
                    let px = Rgba([self.scale(rv), self.scale(gv), self.scale(bv), 255]);
                    clear.put_pixel(x, y, px);
                    filled.put_pixel(x, y, px);
                } else {
                    clear.put_pixel(x, y, Rgba([0, 0, 0, 0]));
                    filled.put_pixel(x, y, Rgba([fr, fg, fb, 255]));
                }
            }
        }

        let png_path = self.root.join(format!("{}.png", stem));
        let filled_path = self.root.join(format!("{}_filled.png", stem));
        let world_path = self.root.join(format!("{}.pgw", stem));

        clear
            .save_with_format(&png_path, ImageFormat::Png)
            .with_context(|| format!("Failed to write {}", png_path.display()))?;
        filled
            .save_with_format(&filled_path, ImageFormat::Png)
            .with_context(|| format!("Failed to write {}", filled_path.display()))?;
        write_world_file(&world_path, geotransform)?;

        tracing::info!(
            "Wrote {}x{} PNG preview ({}) to {}",
            cols,
            rows,
            crs,
            png_path.display()
        );
        Ok(vec![png_path, filled_path, world_path])
    }
}

/// ESRI world file: pixel sizes, rotations, then the centre of the upper-left pixel.
fn write_world_file(path: &Path, gt: &GeoTransform) -> Result<()> {
    let contents = format!(
        "{}\n{}\n{}\n{}\n{}\n{}\n",
        gt.a,
        gt.d,
        gt.b,
        gt.e,
        gt.c + gt.a / 2.0,
        gt.f + gt.e / 2.0
    );
    std::fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))
}

impl RasterWriter for LocalRasterWriter {
    fn write_raster(
        &self,
        format: OutputFormat,
        stem: &str,
        dataset: &RasterDataset,
        geotransform: &GeoTransform,
        crs: &str,
        band_order: &[String],
    ) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create {}", self.root.display()))?;
        match format {
            OutputFormat::Png => self.write_png(stem, dataset, geotransform, crs, band_order),
            OutputFormat::Geotiff | OutputFormat::Netcdf => {
                Err(MosaicError::UnsupportedFormat(format.to_string()).into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{Band, GridExtent, WGS84, NODATA};
    use ndarray::array;
    use tempfile::TempDir;

    fn rgb() -> Vec<String> {
        vec!["red".into(), "green".into(), "blue".into()]
    }

    fn dataset() -> RasterDataset {
        RasterDataset::new(
            GridExtent::new(1.0, 0.0, 0.5, 2, 2),
            vec![
                Band::new("red", array![[4096.0, NODATA], [0.0, 2048.0]]),
                Band::new("green", array![[0.0, 1.0], [0.0, 2048.0]]),
                Band::new("blue", array![[0.0, 1.0], [0.0, 9999.0]]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_png_outputs() {
        let dir = TempDir::new().unwrap();
        let writer = LocalRasterWriter::new(
            dir.path(),
            PngConfig {
                fill_color: [10, 20, 30],
                ..Default::default()
            },
        );
        let ds = dataset();
        let paths = writer
            .write_raster(OutputFormat::Png, "q", &ds, &ds.extent.geotransform(), WGS84, &rgb())
            .unwrap();
        assert_eq!(paths.len(), 3);

        let clear = image::open(&paths[0]).unwrap().to_rgba8();
        assert_eq!(clear.get_pixel(0, 0), &Rgba([255, 0, 0, 255]));
        assert_eq!(clear.get_pixel(1, 0)[3], 0);
        assert_eq!(clear.get_pixel(1, 1), &Rgba([127, 127, 255, 255]));

        let filled = image::open(&paths[1]).unwrap().to_rgba8();
        assert_eq!(filled.get_pixel(1, 0), &Rgba([10, 20, 30, 255]));

        let world = std::fs::read_to_string(&paths[2]).unwrap();
        assert_eq!(world.lines().next(), Some("0.5"));
    }

    #[test]
    fn test_codec_formats_are_unsupported() {
        let dir = TempDir::new().unwrap();
        let writer = LocalRasterWriter::new(dir.path(), PngConfig::default());
        let ds = dataset();
        let err = writer
            .write_raster(OutputFormat::Geotiff, "q", &ds, &ds.extent.geotransform(), WGS84, &rgb())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MosaicError>(),
            Some(MosaicError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_png_needs_rgb_bands() {
        let dir = TempDir::new().unwrap();
        let writer = LocalRasterWriter::new(dir.path(), PngConfig::default());
        let ds = dataset();
        let order = vec!["red".to_string(), "green".to_string(), "nir".to_string()];
        let err = writer
            .write_raster(OutputFormat::Png, "q", &ds, &ds.extent.geotransform(), WGS84, &order)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MosaicError>(),
            Some(MosaicError::MissingBands(b)) if b == &vec!["nir".to_string()]
        ));
    }
}

//! Per-chunk pixel kernels: cloud masking and the per-iteration compositors.
//!
//! These are pure functions over in-memory arrays. Callers run them on the blocking
//! pool since they are CPU bound.

use crate::error::MosaicError;
use crate::raster::{is_valid, Band, RasterDataset, RawDataset, NODATA};
use crate::transform::combine::{CombinationStrategy, CRITERION_BAND};
use anyhow::Result;
use ndarray::{Array2, Array3, ArrayView1, Axis, Zip};
use serde::{Deserialize, Serialize};

/// CFmask class values treated as an unobstructed observation (clear land, water).
pub const CLEAN_CLASSES: [f32; 2] = [0.0, 1.0];

/// Derive the clean-pixel mask from a quality band of shape `(time, rows, cols)`.
pub fn clean_pixel_mask(quality: &Array3<f32>) -> Array3<bool> {
    quality.map(|v| is_valid(*v) && CLEAN_CLASSES.contains(v))
}

/// Clean-pixel count per time slice.
pub fn clean_counts(mask: &Array3<bool>) -> Vec<u64> {
    mask.outer_iter()
        .map(|slice| slice.iter().filter(|m| **m).count() as u64)
        .collect()
}

/// The per-chunk compositor selected by the algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMethod {
    /// Fill gaps slice by slice in traversal order.
    Iterative,
    /// Per-pixel median of clean observations.
    Median,
    /// Slice with the greatest NDVI per pixel.
    MaxNdvi,
    /// Slice with the least NDVI per pixel.
    MinNdvi,
}

impl ProcessingMethod {
    /// Bands that must be present in a sub-range for this method to run.
    pub fn required_bands(&self) -> &'static [&'static str] {
        match self {
            ProcessingMethod::MaxNdvi | ProcessingMethod::MinNdvi => &["nir", "red"],
            ProcessingMethod::Iterative | ProcessingMethod::Median => &[],
        }
    }

    /// Composite `raw` (quality band already removed) under `mask`, carrying forward
    /// `previous`.
    pub fn process(
        &self,
        raw: &RawDataset,
        mask: &Array3<bool>,
        previous: Option<RasterDataset>,
    ) -> Result<RasterDataset> {
        let expected = (raw.slice_count(), raw.extent.rows, raw.extent.cols);
        if mask.dim() != expected {
            anyhow::bail!(
                "clean mask shape {:?} does not match raw data {:?}",
                mask.dim(),
                expected
            );
        }

        match self {
            ProcessingMethod::Iterative => Ok(iterative(raw, mask, previous)),
            ProcessingMethod::Median => Ok(median(raw, mask, previous)),
            ProcessingMethod::MaxNdvi => {
                let best = ndvi_select(raw, mask, true)?;
                CombinationStrategy::MaxValue.combine(&best, previous)
            }
            ProcessingMethod::MinNdvi => {
                let best = ndvi_select(raw, mask, false)?;
                CombinationStrategy::MinValue.combine(&best, previous)
            }
        }
    }
}

fn start_from(raw: &RawDataset, previous: Option<RasterDataset>) -> RasterDataset {
    previous.unwrap_or_else(|| RasterDataset::filled(raw.extent, &raw.band_names(), NODATA))
}

fn iterative(raw: &RawDataset, mask: &Array3<bool>, previous: Option<RasterDataset>) -> RasterDataset {
    let mut out = start_from(raw, previous);
    for band in &mut out.bands {
        let Some(data) = raw.band(&band.name) else {
            continue;
        };
        for (slice, clean) in data.outer_iter().zip(mask.outer_iter()) {
            Zip::from(&mut band.data)
                .and(&slice)
                .and(&clean)
                .par_for_each(|o, &v, &m| {
                    if !is_valid(*o) && m && is_valid(v) {
                        *o = v;
                    }
                });
        }
    }
    out
}

fn median_of(series: ArrayView1<f32>, clean: ArrayView1<bool>) -> f32 {
    let mut values: Vec<f32> = series
        .iter()
        .zip(clean.iter())
        .filter(|(v, m)| **m && is_valid(**v))
        .map(|(v, _)| *v)
        .collect();
    if values.is_empty() {
        return NODATA;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

fn median(raw: &RawDataset, mask: &Array3<bool>, previous: Option<RasterDataset>) -> RasterDataset {
    let mut out = start_from(raw, previous);
    for band in &mut out.bands {
        let Some(data) = raw.band(&band.name) else {
            continue;
        };
        Zip::from(&mut band.data)
            .and(data.lanes(Axis(0)))
            .and(mask.lanes(Axis(0)))
            .par_for_each(|o, series, clean| {
                if !is_valid(*o) {
                    *o = median_of(series, clean);
                }
            });
    }
    out
}

fn ndvi(nir: f32, red: f32) -> f32 {
    let sum = nir + red;
    if !is_valid(nir) || !is_valid(red) || sum == 0.0 {
        NODATA
    } else {
        (nir - red) / sum
    }
}

/// Pick, per pixel, the clean slice with the extreme NDVI and emit all bands from it.
fn ndvi_select(raw: &RawDataset, mask: &Array3<bool>, take_greater: bool) -> Result<RasterDataset> {
    let (Some(nir), Some(red)) = (raw.band("nir"), raw.band("red")) else {
        let missing = ["nir", "red"]
            .iter()
            .filter(|b| !raw.has_band(b))
            .map(|b| b.to_string())
            .collect();
        return Err(MosaicError::MissingBands(missing).into());
    };

    let best: Array2<(usize, f32)> = Zip::from(nir.lanes(Axis(0)))
        .and(red.lanes(Axis(0)))
        .and(mask.lanes(Axis(0)))
        .par_map_collect(|nir, red, clean| {
            let mut pick = (usize::MAX, NODATA);
            for t in 0..nir.len() {
                if !clean[t] {
                    continue;
                }
                let v = ndvi(nir[t], red[t]);
                if !is_valid(v) {
                    continue;
                }
                let better = pick.0 == usize::MAX
                    || (take_greater && v > pick.1)
                    || (!take_greater && v < pick.1);
                if better {
                    pick = (t, v);
                }
            }
            pick
        });

    let mut bands: Vec<Band> = raw
        .bands
        .iter()
        .filter(|b| b.name != CRITERION_BAND)
        .map(|b| {
            let data = Zip::from(&best)
                .and(b.data.lanes(Axis(0)))
                .par_map_collect(|(t, _), lane| if *t == usize::MAX { NODATA } else { lane[*t] });
            Band::new(b.name.clone(), data)
        })
        .collect();
    bands.push(Band::new(CRITERION_BAND, best.map(|(_, v)| *v)));

    RasterDataset::new(raw.extent, bands)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{GridExtent, RawBand};
    use chrono::{DateTime, TimeZone, Utc};

    fn times(n: usize) -> Vec<DateTime<Utc>> {
        (0..n)
            .map(|i| Utc.with_ymd_and_hms(2020, 1, 1 + i as u32, 0, 0, 0).unwrap())
            .collect()
    }

    /// 1x2 raw dataset with the given per-slice values for each band.
    fn raw(bands: &[(&str, Vec<[f32; 2]>)]) -> RawDataset {
        let n = bands[0].1.len();
        RawDataset {
            extent: GridExtent::new(1.0, 0.0, 0.5, 1, 2),
            times: times(n),
            bands: bands
                .iter()
                .map(|(name, slices)| RawBand {
                    name: name.to_string(),
                    data: Array3::from_shape_vec(
                        (n, 1, 2),
                        slices.iter().flat_map(|s| s.iter().copied()).collect(),
                    )
                    .unwrap(),
                })
                .collect(),
        }
    }

    fn all_clean(raw: &RawDataset) -> Array3<bool> {
        Array3::from_elem((raw.slice_count(), 1, 2), true)
    }

    #[test]
    fn test_clean_pixel_mask_classes() {
        let q = Array3::from_shape_vec((1, 1, 5), vec![0.0, 1.0, 2.0, 4.0, NODATA]).unwrap();
        let mask = clean_pixel_mask(&q);
        assert_eq!(
            mask.iter().copied().collect::<Vec<_>>(),
            vec![true, true, false, false, false]
        );
        assert_eq!(clean_counts(&mask), vec![2]);
    }

    #[test]
    fn test_iterative_takes_first_clean_value() {
        let r = raw(&[("red", vec![[NODATA, 5.0], [2.0, 6.0], [3.0, 7.0]])]);
        let mut mask = all_clean(&r);
        mask[[1, 0, 0]] = false;

        let out = ProcessingMethod::Iterative.process(&r, &mask, None).unwrap();
        assert_eq!(out.band("red").unwrap().as_slice().unwrap(), &[3.0, 5.0]);
    }

    #[test]
    fn test_iterative_keeps_previous_values() {
        let r = raw(&[("red", vec![[1.0, 1.0]])]);
        let prev = RasterDataset::new(
            r.extent,
            vec![Band::new("red", Array2::from_shape_vec((1, 2), vec![9.0, NODATA]).unwrap())],
        )
        .unwrap();
        let out = ProcessingMethod::Iterative
            .process(&r, &all_clean(&r), Some(prev))
            .unwrap();
        assert_eq!(out.band("red").unwrap().as_slice().unwrap(), &[9.0, 1.0]);
    }

    #[test]
    fn test_median_odd_and_even() {
        let r = raw(&[(
            "red",
            vec![[1.0, 1.0], [5.0, 2.0], [3.0, NODATA], [100.0, 4.0]],
        )]);
        let mut mask = all_clean(&r);
        mask[[3, 0, 0]] = false;

        let out = ProcessingMethod::Median.process(&r, &mask, None).unwrap();
        // left: clean {1, 5, 3} -> 3; right: {1, 2, 4} -> 2
        assert_eq!(out.band("red").unwrap().as_slice().unwrap(), &[3.0, 2.0]);

        let r = raw(&[("red", vec![[1.0, NODATA], [4.0, NODATA]])]);
        let out = ProcessingMethod::Median.process(&r, &all_clean(&r), None).unwrap();
        assert_eq!(out.band("red").unwrap().as_slice().unwrap(), &[2.5, NODATA]);
    }

    #[test]
    fn test_max_and_min_ndvi_pick_slices() {
        let r = raw(&[
            ("red", vec![[1.0, 1.0], [1.0, 3.0]]),
            ("nir", vec![[3.0, 2.0], [1.0, 9.0]]),
            ("blue", vec![[10.0, 20.0], [30.0, 40.0]]),
        ]);
        // ndvi slice0: [0.5, 0.333], slice1: [0.0, 0.5]
        let max = ProcessingMethod::MaxNdvi.process(&r, &all_clean(&r), None).unwrap();
        assert_eq!(max.band("blue").unwrap().as_slice().unwrap(), &[10.0, 40.0]);
        assert!(max.band(CRITERION_BAND).is_some());

        let min = ProcessingMethod::MinNdvi.process(&r, &all_clean(&r), None).unwrap();
        assert_eq!(min.band("blue").unwrap().as_slice().unwrap(), &[30.0, 20.0]);
    }

    #[test]
    fn test_ndvi_without_nir_reports_missing_band() {
        let r = raw(&[("red", vec![[1.0, 1.0]])]);
        let err = ProcessingMethod::MaxNdvi
            .process(&r, &all_clean(&r), None)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MosaicError>(),
            Some(MosaicError::MissingBands(b)) if b == &vec!["nir".to_string()]
        ));
    }

    #[test]
    fn test_mask_shape_must_match() {
        let r = raw(&[("red", vec![[1.0, 1.0]])]);
        let bad = Array3::from_elem((2, 1, 2), true);
        assert!(ProcessingMethod::Iterative.process(&r, &bad, None).is_err());
    }
}

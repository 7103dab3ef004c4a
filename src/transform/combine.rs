//! Pixel-wise reducers that fold one dataset into a running intermediate mosaic.

use crate::error::MosaicError;
use crate::raster::{is_valid, RasterDataset};
use anyhow::Result;
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// Band compared by the max/min strategies.
pub const CRITERION_BAND: &str = "ndvi";

/// How a new dataset is merged into the current intermediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombinationStrategy {
    /// Keep the first valid value seen at each pixel. Order sensitive.
    FillNodata,
    /// Keep whichever dataset has the strictly greater criterion value.
    MaxValue,
    /// Keep whichever dataset has the strictly lesser criterion value.
    MinValue,
}

impl CombinationStrategy {
    /// Fold `new` into `current` and return the result.
    ///
    /// `current` is consumed; `new` is never modified. With no current intermediate the
    /// result is a copy of `new`. Bands of `current` that `new` lacks are kept as is.
    pub fn combine(
        &self,
        new: &RasterDataset,
        current: Option<RasterDataset>,
    ) -> Result<RasterDataset> {
        let Some(mut current) = current else {
            return Ok(new.clone());
        };
        check_aligned(new, &current)?;

        match self {
            CombinationStrategy::FillNodata => {
                for band in &mut current.bands {
                    if let Some(incoming) = new.band(&band.name) {
                        Zip::from(&mut band.data).and(incoming).par_for_each(|c, &n| {
                            if !is_valid(*c) {
                                *c = n;
                            }
                        });
                    }
                }
            }
            CombinationStrategy::MaxValue | CombinationStrategy::MinValue => {
                let wins = self.winner_mask(new, &current)?;
                for band in &mut current.bands {
                    if let Some(incoming) = new.band(&band.name) {
                        Zip::from(&mut band.data)
                            .and(incoming)
                            .and(&wins)
                            .par_for_each(|c, &n, &w| {
                                if w {
                                    *c = n;
                                }
                            });
                    }
                }
            }
        }

        Ok(current)
    }

    /// Pixels where `new` should replace `current`.
    ///
    /// A nodata criterion never wins and a valid one always beats nodata; ties keep
    /// the current value.
    fn winner_mask(&self, new: &RasterDataset, current: &RasterDataset) -> Result<Array2<bool>> {
        let (Some(n_crit), Some(c_crit)) = (new.band(CRITERION_BAND), current.band(CRITERION_BAND))
        else {
            return Err(MosaicError::MissingBands(vec![CRITERION_BAND.to_string()]).into());
        };

        let take_greater = matches!(self, CombinationStrategy::MaxValue);
        Ok(Zip::from(n_crit).and(c_crit).par_map_collect(|&n, &c| {
            if !is_valid(n) {
                false
            } else if !is_valid(c) {
                true
            } else if take_greater {
                n > c
            } else {
                n < c
            }
        }))
    }
}

fn check_aligned(new: &RasterDataset, current: &RasterDataset) -> Result<()> {
    for band in &new.bands {
        if band.data.dim() != current.shape() {
            return Err(MosaicError::ShapeMismatch {
                band: band.name.clone(),
                expected: current.shape(),
                actual: band.data.dim(),
            }
            .into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{Band, GridExtent, NODATA};
    use ndarray::array;

    fn extent() -> GridExtent {
        GridExtent::new(1.0, 0.0, 0.5, 2, 2)
    }

    fn single(values: Array2<f32>) -> RasterDataset {
        RasterDataset::new(extent(), vec![Band::new("red", values)]).unwrap()
    }

    fn with_ndvi(red: Array2<f32>, ndvi: Array2<f32>) -> RasterDataset {
        RasterDataset::new(extent(), vec![Band::new("red", red), Band::new("ndvi", ndvi)])
            .unwrap()
    }

    fn fold(strategy: CombinationStrategy, inputs: &[&RasterDataset]) -> RasterDataset {
        inputs
            .iter()
            .fold(None, |acc, ds| Some(strategy.combine(ds, acc).unwrap()))
            .unwrap()
    }

    #[test]
    fn test_first_fold_copies_input() {
        let a = single(array![[1.0, 2.0], [3.0, NODATA]]);
        let out = CombinationStrategy::FillNodata.combine(&a, None).unwrap();
        assert_eq!(out, a);
    }

    #[test]
    fn test_fill_nodata_only_fills_gaps() {
        let a = single(array![[1.0, NODATA], [NODATA, 4.0]]);
        let b = single(array![[9.0, 9.0], [NODATA, 9.0]]);
        let out = fold(CombinationStrategy::FillNodata, &[&a, &b]);
        assert_eq!(out.band("red").unwrap(), &array![[1.0, 9.0], [NODATA, 4.0]]);
    }

    #[test]
    fn test_fill_nodata_is_order_sensitive() {
        let a = single(array![[1.0, 1.0], [1.0, 1.0]]);
        let b = single(array![[2.0, 2.0], [2.0, 2.0]]);

        let ab = fold(CombinationStrategy::FillNodata, &[&a, &b]);
        let ba = fold(CombinationStrategy::FillNodata, &[&b, &a]);
        assert_eq!(ab.band("red").unwrap()[[0, 0]], 1.0);
        assert_eq!(ba.band("red").unwrap()[[0, 0]], 2.0);
        assert_ne!(ab, ba);
    }

    #[test]
    fn test_max_and_min_are_commutative() {
        let a = with_ndvi(array![[1.0, 2.0], [3.0, 4.0]], array![[0.1, 0.9], [NODATA, 0.5]]);
        let b = with_ndvi(array![[5.0, 6.0], [7.0, 8.0]], array![[0.2, 0.3], [0.4, NODATA]]);
        let c = with_ndvi(array![[9.0, 9.0], [9.0, 9.0]], array![[0.7, -0.2], [0.1, 0.6]]);

        for strategy in [CombinationStrategy::MaxValue, CombinationStrategy::MinValue] {
            let abc = fold(strategy, &[&a, &b, &c]);
            let cba = fold(strategy, &[&c, &b, &a]);
            let bac = fold(strategy, &[&b, &a, &c]);
            assert_eq!(abc, cba);
            assert_eq!(abc, bac);
        }

        let max = fold(CombinationStrategy::MaxValue, &[&a, &b, &c]);
        assert_eq!(max.band("red").unwrap(), &array![[9.0, 2.0], [7.0, 9.0]]);

        let min = fold(CombinationStrategy::MinValue, &[&a, &b, &c]);
        assert_eq!(min.band("red").unwrap(), &array![[1.0, 9.0], [9.0, 4.0]]);
    }

    #[test]
    fn test_min_never_picks_nodata_criterion() {
        let valid = with_ndvi(array![[1.0, 1.0], [1.0, 1.0]], array![[0.3, 0.3], [0.3, 0.3]]);
        let empty = with_ndvi(
            array![[NODATA, NODATA], [NODATA, NODATA]],
            array![[NODATA, NODATA], [NODATA, NODATA]],
        );
        let out = fold(CombinationStrategy::MinValue, &[&valid, &empty]);
        assert_eq!(out, valid);
    }

    #[test]
    fn test_max_requires_criterion_band() {
        let a = single(array![[1.0, 2.0], [3.0, 4.0]]);
        let err = CombinationStrategy::MaxValue
            .combine(&a, Some(a.clone()))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MosaicError>(),
            Some(MosaicError::MissingBands(_))
        ));
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let a = single(array![[1.0, 2.0], [3.0, 4.0]]);
        let mut b = a.clone();
        b.bands[0].data = Array2::zeros((3, 3));
        let err = CombinationStrategy::FillNodata
            .combine(&b, Some(a))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MosaicError>(),
            Some(MosaicError::ShapeMismatch { .. })
        ));
    }
}

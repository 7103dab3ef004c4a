//! Per-chunk processing: fetch, mask, fold, persist.
//!
//! A worker walks one (time group, geo chunk) pair in sub-ranges of
//! `time_slices_per_iteration` acquisitions. Each iteration is one fetch-mask-fold
//! cycle and cancellation is checked before every cycle.

use crate::algorithm::AlgorithmConfig;
use crate::error::MosaicError;
use crate::io::{FetchWindow, ScratchLocation, ScratchStore, SceneCatalog};
use crate::pipeline::ledger::CancellationToken;
use crate::pipeline::metrics::Metrics;
use crate::pipeline::result::AcquisitionRecords;
use crate::plan::GeoChunk;
use crate::raster::{GridExtent, RasterDataset};
use crate::transform::{clean_counts, clean_pixel_mask};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;

/// Input for one work unit.
#[derive(Debug, Clone)]
pub struct ChunkTask {
    pub query_id: String,
    pub platform: String,
    pub product: String,
    pub time_index: usize,
    pub geo_chunk: GeoChunk,

    /// Pixel grid of this chunk
    pub extent: GridExtent,

    /// Acquisitions of the time group in traversal order
    pub acquisitions: Vec<DateTime<Utc>>,

    /// Bands to load; the quality band and compositor inputs are added when absent
    pub measurements: Vec<String>,
}

/// A persisted chunk mosaic and the statistics gathered while building it.
#[derive(Debug, Clone)]
pub struct ChunkResult {
    pub time_index: usize,
    pub geo_index: usize,
    pub location: ScratchLocation,
    pub acquisitions: AcquisitionRecords,
}

#[derive(Debug, Clone)]
pub enum ChunkOutcome {
    Completed(ChunkResult),
    /// No sub-range had usable data; nothing was written
    Empty { time_index: usize, geo_index: usize },
    /// Cancellation was observed; nothing was written
    Cancelled,
}

/// Processor for individual work units.
pub struct ChunkWorker {
    catalog: Arc<dyn SceneCatalog>,
    scratch: Arc<ScratchStore>,
    metrics: Arc<Metrics>,
    config: AlgorithmConfig,
    quality_band: String,
}

impl ChunkWorker {
    pub fn new(
        catalog: Arc<dyn SceneCatalog>,
        scratch: Arc<ScratchStore>,
        metrics: Arc<Metrics>,
        config: AlgorithmConfig,
        quality_band: impl Into<String>,
    ) -> Self {
        Self {
            catalog,
            scratch,
            metrics,
            config,
            quality_band: quality_band.into(),
        }
    }

    /// Requested measurements plus the quality band and any band the compositor reads.
    fn fetch_bands(&self, task: &ChunkTask) -> Vec<String> {
        let mut bands = task.measurements.clone();
        let extra = std::iter::once(self.quality_band.as_str())
            .chain(self.config.processing.required_bands().iter().copied());
        for band in extra {
            if !bands.iter().any(|b| b == band) {
                bands.push(band.to_string());
            }
        }
        bands
    }

    /// Process one work unit.
    pub async fn run_chunk(&self, task: &ChunkTask, cancel: &CancellationToken) -> Result<ChunkOutcome> {
        let geo_index = task.geo_chunk.index;
        let bands = self.fetch_bands(task);
        let step = self
            .config
            .time_slices_per_iteration
            .unwrap_or(task.acquisitions.len())
            .max(1);

        let mut mosaic: Option<RasterDataset> = None;
        let mut records = AcquisitionRecords::new();
        let mut cursor = 0;

        while cursor < task.acquisitions.len() {
            if cancel.is_cancelled().await? {
                tracing::debug!(
                    "Work unit ({}, {}) observed cancellation",
                    task.time_index,
                    geo_index
                );
                return Ok(ChunkOutcome::Cancelled);
            }

            let end = (cursor + step).min(task.acquisitions.len());
            let sub_range = &task.acquisitions[cursor..end];
            cursor = end;

            let Some(window) = FetchWindow::spanning(sub_range) else {
                continue;
            };

            let fetch_start = Instant::now();
            let fetched = self
                .catalog
                .fetch_extent(&task.product, &task.platform, &window, &task.extent, &bands)
                .await;
            self.metrics.add_fetch_time(fetch_start.elapsed());

            let raw = match fetched {
                Ok(raw) => raw,
                Err(e) if matches!(e.downcast_ref::<MosaicError>(), Some(MosaicError::MissingBands(_))) => {
                    tracing::debug!("Skipping sub-range {:?}: {}", window, e);
                    self.metrics.add_subrange_skipped();
                    continue;
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Fetch failed for work unit ({}, {})", task.time_index, geo_index)
                    })
                }
            };
            self.metrics.add_subrange_fetched();

            let missing: Vec<&str> = std::iter::once(self.quality_band.as_str())
                .chain(self.config.processing.required_bands().iter().copied())
                .filter(|b| !raw.has_band(b))
                .collect();
            if raw.slice_count() == 0 || !missing.is_empty() {
                tracing::debug!(
                    "Skipping sub-range {} .. {} for chunk {}: {} slices, missing {:?}",
                    window.start.format("%Y-%m-%d"),
                    window.end.format("%Y-%m-%d"),
                    geo_index,
                    raw.slice_count(),
                    missing
                );
                self.metrics.add_subrange_skipped();
                continue;
            }

            self.metrics.add_slices_read(raw.slice_count() as u64);
            self.metrics.add_pixels_read(
                (raw.slice_count() * raw.extent.pixel_count() * raw.bands.len()) as u64,
            );

            let config = self.config;
            let quality_band = self.quality_band.clone();
            let metrics = self.metrics.clone();
            let previous = mosaic.take();
            let (folded, tallies) = tokio::task::spawn_blocking(move || {
                let raw = if config.reverse_time {
                    raw.reversed_time()
                } else {
                    raw
                };

                let mask_start = Instant::now();
                let quality = raw
                    .band(&quality_band)
                    .ok_or_else(|| MosaicError::MissingBands(vec![quality_band.clone()]))?;
                let mask = clean_pixel_mask(quality);
                let tallies: Vec<(DateTime<Utc>, u64)> =
                    raw.times.iter().copied().zip(clean_counts(&mask)).collect();
                metrics.add_mask_time(mask_start.elapsed());

                let fold_start = Instant::now();
                let raw = raw.without_band(&quality_band);
                let folded = config.processing.process(&raw, &mask, previous)?;
                metrics.add_fold_time(fold_start.elapsed());

                anyhow::Ok((folded, tallies))
            })
            .await
            .map_err(|e| anyhow::anyhow!("Fold task panicked: {}", e))??;

            for (date, clean) in tallies {
                records.record(date, clean);
            }
            mosaic = Some(folded);
        }

        let Some(mosaic) = mosaic else {
            self.metrics.add_work_unit_empty();
            return Ok(ChunkOutcome::Empty {
                time_index: task.time_index,
                geo_index,
            });
        };

        let location = ScratchLocation::new(&task.query_id, task.time_index, geo_index);
        let write_start = Instant::now();
        self.scratch.write_chunk(&location, &mosaic).await?;
        self.metrics.add_scratch_time(write_start.elapsed());
        self.metrics.add_work_unit_completed();

        Ok(ChunkOutcome::Completed(ChunkResult {
            time_index: task.time_index,
            geo_index,
            location,
            acquisitions: records,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::AlgorithmKind;
    use crate::io::{InMemoryRecordStore, MemoryCatalog, RecordStore};
    use crate::pipeline::test_support::{date, product, scene};
    use crate::plan::GeoGrid;
    use crate::query::BoundingBox;
    use crate::raster::NODATA;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        scratch: Arc<ScratchStore>,
        records: Arc<dyn RecordStore>,
        catalog: Arc<dyn SceneCatalog>,
    }

    fn fixture(scenes: Vec<crate::io::Scene>) -> Fixture {
        let dir = TempDir::new().unwrap();
        Fixture {
            scratch: Arc::new(ScratchStore::new(dir.path()).unwrap()),
            _dir: dir,
            records: Arc::new(InMemoryRecordStore::new()),
            catalog: Arc::new(MemoryCatalog::new(vec![product()], scenes)),
        }
    }

    fn task(acquisitions: Vec<DateTime<Utc>>) -> ChunkTask {
        let grid = GeoGrid::new(BoundingBox::new(0.0, 1.0, 0.0, 1.0), 0.25, 1.0);
        let chunk = grid.chunk(0, 0);
        ChunkTask {
            query_id: "q".into(),
            platform: "LANDSAT_7".into(),
            product: "ls7".into(),
            time_index: 0,
            geo_chunk: chunk,
            extent: chunk.extent(&grid.extent),
            acquisitions,
            measurements: vec!["red".into()],
        }
    }

    fn worker(f: &Fixture, kind: AlgorithmKind, slices: Option<usize>) -> ChunkWorker {
        let mut config = kind.config();
        config.time_slices_per_iteration = slices;
        ChunkWorker::new(f.catalog.clone(), f.scratch.clone(), Metrics::new(), config, "cf_mask")
    }

    #[tokio::test]
    async fn test_most_recent_prefers_newest_clean_value() {
        let mut cloudy = scene(3, 30.0, Some(0.0));
        // Top-left pixel of the newest scene is cloud
        if let Some(b) = cloudy.bands.iter_mut().find(|b| b.name == "cf_mask") {
            b.data[[0, 0]] = 4.0;
        }
        let f = fixture(vec![scene(1, 10.0, Some(0.0)), scene(2, 20.0, Some(0.0)), cloudy]);
        let cancel = CancellationToken::new("q", f.records.clone());
        let w = worker(&f, AlgorithmKind::MostRecent, None);

        let outcome = w
            .run_chunk(&task(vec![date(3), date(2), date(1)]), &cancel)
            .await
            .unwrap();
        let ChunkOutcome::Completed(result) = outcome else {
            panic!("expected a completed chunk");
        };

        let ds = f.scratch.read_chunk(&result.location).await.unwrap();
        let red = ds.band("red").unwrap();
        assert_eq!(red[[0, 0]], 20.0);
        assert_eq!(red[[1, 1]], 30.0);
        assert!(ds.band("cf_mask").is_none());

        assert_eq!(result.acquisitions.get(&date(3)), Some(15));
        assert_eq!(result.acquisitions.get(&date(2)), Some(16));
    }

    #[tokio::test]
    async fn test_sub_range_without_quality_band_is_skipped() {
        let f = fixture(vec![scene(1, 10.0, Some(0.0)), scene(2, 20.0, None)]);
        let cancel = CancellationToken::new("q", f.records.clone());
        let w = worker(&f, AlgorithmKind::LeastRecent, Some(1));

        let outcome = w.run_chunk(&task(vec![date(1), date(2)]), &cancel).await.unwrap();
        let ChunkOutcome::Completed(result) = outcome else {
            panic!("expected a completed chunk");
        };
        assert_eq!(result.acquisitions.len(), 1);
        assert_eq!(result.acquisitions.get(&date(2)), None);
        assert_eq!(w.metrics.snapshot().subranges_skipped, 1);
    }

    #[tokio::test]
    async fn test_no_usable_data_is_empty() {
        let f = fixture(vec![scene(1, 10.0, None)]);
        let cancel = CancellationToken::new("q", f.records.clone());
        let w = worker(&f, AlgorithmKind::Median, None);

        let outcome = w.run_chunk(&task(vec![date(1)]), &cancel).await.unwrap();
        assert!(matches!(outcome, ChunkOutcome::Empty { geo_index: 0, .. }));
        assert!(f.scratch.list_query_files("q").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_before_first_iteration() {
        let f = fixture(vec![scene(1, 10.0, Some(0.0))]);
        f.records.request_cancel("q").await.unwrap();
        let cancel = CancellationToken::new("q", f.records.clone());
        let w = worker(&f, AlgorithmKind::MostRecent, Some(1));

        let outcome = w.run_chunk(&task(vec![date(1)]), &cancel).await.unwrap();
        assert!(matches!(outcome, ChunkOutcome::Cancelled));
        assert!(f.scratch.list_query_files("q").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fully_cloudy_slices_stay_nodata() {
        let f = fixture(vec![scene(1, 10.0, Some(2.0))]);
        let cancel = CancellationToken::new("q", f.records.clone());
        let w = worker(&f, AlgorithmKind::MostRecent, None);

        let ChunkOutcome::Completed(result) =
            w.run_chunk(&task(vec![date(1)]), &cancel).await.unwrap()
        else {
            panic!("expected a completed chunk");
        };
        assert_eq!(result.acquisitions.get(&date(1)), Some(0));
        let ds = f.scratch.read_chunk(&result.location).await.unwrap();
        assert!(ds.band("red").unwrap().iter().all(|v| *v == NODATA));
    }

    #[tokio::test]
    async fn test_ndvi_loads_nir_when_not_requested() {
        let f = fixture(vec![scene(1, 10.0, Some(0.0))]);
        let cancel = CancellationToken::new("q", f.records.clone());
        let w = worker(&f, AlgorithmKind::MaxNdvi, None);

        let ChunkOutcome::Completed(result) =
            w.run_chunk(&task(vec![date(1)]), &cancel).await.unwrap()
        else {
            panic!("expected a completed chunk");
        };
        let ds = f.scratch.read_chunk(&result.location).await.unwrap();
        assert_eq!(ds.band("red").unwrap()[[0, 0]], 10.0);
        assert_eq!(ds.band("nir").unwrap()[[0, 0]], 20.0);
    }

    #[tokio::test]
    async fn test_ndvi_sub_range_without_nir_is_skipped() {
        let mut bare = scene(1, 10.0, Some(0.0));
        bare.bands.retain(|b| b.name != "nir");
        let f = fixture(vec![bare]);
        let cancel = CancellationToken::new("q", f.records.clone());
        let w = worker(&f, AlgorithmKind::MinNdvi, None);

        let outcome = w.run_chunk(&task(vec![date(1)]), &cancel).await.unwrap();
        assert!(matches!(outcome, ChunkOutcome::Empty { .. }));
        assert_eq!(w.metrics.snapshot().subranges_skipped, 1);
    }
}

//! Query orchestration.
//!
//! Plans a query, dispatches each time group's geo chunks to chunk workers with bounded
//! concurrency, stitches and folds the group results in group order, and drives the
//! progress ledger to a terminal status.

use crate::algorithm::AlgorithmConfig;
use crate::config::{Config, OutputFormat};
use crate::error::MosaicError;
use crate::io::{RasterWriter, RecordStore, SceneCatalog, SceneMetadata, ScratchStore};
use crate::pipeline::chunk_worker::{ChunkOutcome, ChunkResult, ChunkTask, ChunkWorker};
use crate::pipeline::ledger::{CancellationToken, LedgerStatus, ProgressLedger};
use crate::pipeline::metrics::{Metrics, MetricsReporter};
use crate::pipeline::result::{percent, AcquisitionRecords, QueryResult};
use crate::plan::{self, ChunkPlan, TimeGroup};
use crate::query::QueryDescriptor;
use crate::raster::{RasterDataset, WGS84};
use crate::transform::assemble_group;
use anyhow::{anyhow, Result};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const NO_ACQUISITIONS: &str = "There were no acquisitions for this parameter set.";
const NO_MOSAIC: &str = "No usable observations were found for this parameter set.";
pub(crate) const UNEXPECTED: &str = "An unexpected error occurred while processing the query.";

/// How a query ended, when it ended without a fault.
#[derive(Debug, Clone)]
pub enum QueryOutcome {
    Completed(QueryResult),
    /// Terminal ERROR with a user-facing message
    NoData { message: String },
    Cancelled,
}

/// Runs queries end to end against injected collaborators.
pub struct Orchestrator {
    catalog: Arc<dyn SceneCatalog>,
    records: Arc<dyn RecordStore>,
    scratch: Arc<ScratchStore>,
    writer: Arc<dyn RasterWriter>,
    config: Arc<Config>,
}

struct Reporter {
    shutdown: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl Orchestrator {
    pub fn new(
        catalog: Arc<dyn SceneCatalog>,
        records: Arc<dyn RecordStore>,
        scratch: Arc<ScratchStore>,
        writer: Arc<dyn RasterWriter>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            catalog,
            records,
            scratch,
            writer,
            config,
        }
    }

    pub fn catalog(&self) -> &Arc<dyn SceneCatalog> {
        &self.catalog
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    /// Run one query to a terminal ledger status.
    ///
    /// No-data and cancellation are reported as outcomes. Any other failure marks the
    /// ledger ERROR, releases scratch space and is returned to the caller.
    pub async fn run_query(&self, descriptor: &QueryDescriptor) -> Result<QueryOutcome> {
        let query_id = descriptor.query_id();
        let mut ledger = ProgressLedger::new(&query_id);
        ledger.publish(self.records.as_ref()).await?;

        let metrics = Metrics::new();
        tracing::info!("Starting query {} ({})", query_id, descriptor.algorithm);

        let err = match self.execute(descriptor, &mut ledger, &metrics).await {
            Ok(outcome) => {
                self.clear_cancel_request(&query_id).await;
                return Ok(outcome);
            }
            Err(e) => e,
        };

        let cancelled = matches!(err.downcast_ref::<MosaicError>(), Some(MosaicError::Cancelled(_)));
        let no_data = err
            .downcast_ref::<MosaicError>()
            .filter(|e| e.is_no_data())
            .map(|e| e.to_string());

        if cancelled {
            tracing::info!("Query {} cancelled", query_id);
            self.finish(&mut ledger, LedgerStatus::Cancelled, "Query was cancelled.").await;
            self.release_scratch(&query_id).await;
            if let Err(e) = self.records.delete_query_artifacts(&query_id).await {
                tracing::warn!("Failed to delete records of {}: {:#}", query_id, e);
            }
            return Ok(QueryOutcome::Cancelled);
        }

        if let Some(message) = no_data {
            tracing::info!("Query {} found no data: {}", query_id, message);
            self.finish(&mut ledger, LedgerStatus::Error, &message).await;
            self.release_scratch(&query_id).await;
            self.clear_cancel_request(&query_id).await;
            return Ok(QueryOutcome::NoData { message });
        }

        metrics.add_failure();
        tracing::error!("Query {} failed: {:#}", query_id, err);
        self.finish(&mut ledger, LedgerStatus::Error, UNEXPECTED).await;
        self.release_scratch(&query_id).await;
        self.clear_cancel_request(&query_id).await;
        Err(err)
    }

    async fn execute(
        &self,
        descriptor: &QueryDescriptor,
        ledger: &mut ProgressLedger,
        metrics: &Arc<Metrics>,
    ) -> Result<QueryOutcome> {
        descriptor.validate()?;
        let query_id = ledger.snapshot().query_id.clone();
        let algorithm = descriptor
            .algorithm
            .config_with(self.config.tuning(descriptor.algorithm));

        let dates = self
            .catalog
            .list_acquisition_dates(
                &descriptor.platform,
                &descriptor.product,
                &descriptor.bbox,
                &descriptor.time_range,
            )
            .await?;
        let metadata = self
            .catalog
            .scene_metadata(
                &descriptor.platform,
                &descriptor.product,
                &descriptor.bbox,
                &descriptor.time_range,
            )
            .await?;
        let Some(metadata) = metadata.filter(|_| !dates.is_empty()) else {
            return Err(MosaicError::NoData(NO_ACQUISITIONS.to_string()).into());
        };

        let resolution = self.catalog.product_resolution(&descriptor.product).await?;
        let plan = Arc::new(plan::plan(
            &descriptor.bbox,
            &descriptor.time_range,
            &dates,
            resolution,
            &algorithm,
        )?);

        let total = plan.total_work_units();
        ledger.start(total)?;
        ledger.publish(self.records.as_ref()).await?;

        let cancel = CancellationToken::new(&query_id, self.records.clone());
        let reporter = self.spawn_reporter(metrics, total);
        let worker = Arc::new(ChunkWorker::new(
            self.catalog.clone(),
            self.scratch.clone(),
            metrics.clone(),
            algorithm,
            self.config.processing.quality_band.clone(),
        ));

        let mut mosaic: Option<RasterDataset> = None;
        let mut acquisitions = AcquisitionRecords::new();

        // Groups fold in enumeration order; fill_nodata depends on it.
        for group in &plan.time_groups {
            if cancel.is_cancelled().await? {
                return Err(MosaicError::Cancelled(query_id).into());
            }

            let results = self
                .run_group(descriptor, &query_id, &plan, group, &worker, &cancel, ledger)
                .await?;
            for result in &results {
                acquisitions.merge(&result.acquisitions);
            }

            let tiles = self.load_tiles(&results, metrics).await?;
            mosaic = self
                .fold_group(&plan, tiles, mosaic, &algorithm, metrics)
                .await?;
        }

        if cancel.is_cancelled().await? {
            return Err(MosaicError::Cancelled(query_id).into());
        }
        let Some(mosaic) = mosaic else {
            return Err(MosaicError::NoData(NO_MOSAIC.to_string()).into());
        };

        let result = self
            .finalize(descriptor, &query_id, &plan, metadata, mosaic, acquisitions)
            .await?;
        self.records.save_result(&result).await?;

        ledger.finish(LedgerStatus::Ok, Some("Query completed.".to_string()))?;
        ledger.publish(self.records.as_ref()).await?;
        self.release_scratch(&query_id).await;

        if let Some(reporter) = reporter {
            let _ = reporter.shutdown.send(()).await;
            let _ = reporter.handle.await;
            MetricsReporter::new(metrics.clone(), self.config.processing.metrics_interval_secs, total as u64)
                .print_summary();
        }
        if let Some(path) = &self.config.processing.metrics_output_path {
            metrics.snapshot().save_to_file(path)?;
            tracing::info!("Metrics saved to {}", path);
        }

        tracing::info!(
            "Query {} completed: {} clean pixels ({:.1}%) over {} acquisitions",
            query_id,
            result.clean_pixels,
            result.clean_percent,
            result.total_scenes
        );
        Ok(QueryOutcome::Completed(result))
    }

    /// Dispatch every geo chunk of `group` and wait for all of them.
    #[allow(clippy::too_many_arguments)]
    async fn run_group(
        &self,
        descriptor: &QueryDescriptor,
        query_id: &str,
        plan: &ChunkPlan,
        group: &TimeGroup,
        worker: &Arc<ChunkWorker>,
        cancel: &CancellationToken,
        ledger: &mut ProgressLedger,
    ) -> Result<Vec<ChunkResult>> {
        tracing::debug!(
            "Dispatching time group {} ({} acquisitions) over {} geo chunks",
            group.index,
            group.len(),
            plan.geo_chunks.len()
        );

        let tasks: Vec<ChunkTask> = plan
            .geo_chunks
            .iter()
            .map(|chunk| ChunkTask {
                query_id: query_id.to_string(),
                platform: descriptor.platform.clone(),
                product: descriptor.product.clone(),
                time_index: group.index,
                geo_chunk: *chunk,
                extent: chunk.extent(&plan.grid.extent),
                acquisitions: group.acquisitions.clone(),
                measurements: descriptor.measurements.clone(),
            })
            .collect();

        let mut outcomes = stream::iter(tasks)
            .map(|task| {
                let worker = worker.clone();
                let cancel = cancel.clone();
                async move { worker.run_chunk(&task, &cancel).await }
            })
            .buffer_unordered(self.config.processing.chunk_concurrency);

        // After the first failure the remaining units are still awaited so no scratch
        // write lands after cleanup. The local cancel makes undispatched units return at
        // their first check.
        let mut results = Vec::with_capacity(plan.geo_chunks.len());
        let mut failure: Option<anyhow::Error> = None;
        while let Some(outcome) = outcomes.next().await {
            if failure.is_some() {
                if let Err(e) = outcome {
                    tracing::debug!("Work unit failed while aborting: {:#}", e);
                }
                continue;
            }
            let step: Result<()> = match outcome {
                Ok(ChunkOutcome::Cancelled) => {
                    Err(MosaicError::Cancelled(query_id.to_string()).into())
                }
                Ok(ChunkOutcome::Empty {
                    time_index,
                    geo_index,
                }) => {
                    tracing::debug!("Work unit ({}, {}) had no usable data", time_index, geo_index);
                    self.record_progress(ledger).await
                }
                Ok(ChunkOutcome::Completed(result)) => {
                    results.push(result);
                    self.record_progress(ledger).await
                }
                Err(e) => Err(e),
            };
            if let Err(e) = step {
                cancel.cancel();
                failure = Some(e);
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }
        Ok(results)
    }

    async fn record_progress(&self, ledger: &mut ProgressLedger) -> Result<()> {
        ledger.complete_one()?;
        ledger.publish(self.records.as_ref()).await
    }

    async fn load_tiles(
        &self,
        results: &[ChunkResult],
        metrics: &Metrics,
    ) -> Result<HashMap<usize, RasterDataset>> {
        let start = Instant::now();
        let mut tiles = HashMap::with_capacity(results.len());
        for result in results {
            let tile = self.scratch.read_chunk(&result.location).await?;
            tiles.insert(result.geo_index, tile);
        }
        metrics.add_scratch_time(start.elapsed());
        Ok(tiles)
    }

    /// Stitch a group's tiles and fold the group raster into the running mosaic.
    async fn fold_group(
        &self,
        plan: &Arc<ChunkPlan>,
        tiles: HashMap<usize, RasterDataset>,
        current: Option<RasterDataset>,
        algorithm: &AlgorithmConfig,
        metrics: &Arc<Metrics>,
    ) -> Result<Option<RasterDataset>> {
        let plan = plan.clone();
        let strategy = algorithm.combination;
        let metrics = metrics.clone();

        let folded = tokio::task::spawn_blocking(move || {
            let start = Instant::now();
            let folded = match assemble_group(&plan.grid, &plan.geo_chunks, &tiles)? {
                Some(group) => Some(strategy.combine(&group, current)?),
                None => current,
            };
            metrics.add_combine_time(start.elapsed());
            anyhow::Ok(folded)
        })
        .await
        .map_err(|e| anyhow!("Combine task panicked: {}", e))??;

        Ok(folded)
    }

    async fn finalize(
        &self,
        descriptor: &QueryDescriptor,
        query_id: &str,
        plan: &ChunkPlan,
        metadata: SceneMetadata,
        mosaic: RasterDataset,
        acquisitions: AcquisitionRecords,
    ) -> Result<QueryResult> {
        let extent = mosaic.extent;
        let clean_pixels = mosaic.count_valid();
        let outputs = self.write_outputs(query_id, mosaic).await?;

        Ok(QueryResult {
            query_id: query_id.to_string(),
            algorithm: descriptor.algorithm,
            bounds: extent.bounds(),
            rows: extent.rows,
            cols: extent.cols,
            total_scenes: plan.acquisition_count(),
            clean_pixels,
            clean_percent: percent(clean_pixels, metadata.pixel_count),
            acquisitions: acquisitions.summaries(metadata.pixel_count),
            outputs,
            completed_at: Utc::now(),
        })
    }

    async fn write_outputs(&self, query_id: &str, mosaic: RasterDataset) -> Result<Vec<PathBuf>> {
        let writer = self.writer.clone();
        let formats = self.config.output.formats.clone();
        let rgb_bands = self.config.output.png.rgb_bands.to_vec();
        let stem = query_id.to_string();

        tokio::task::spawn_blocking(move || {
            let geotransform = mosaic.extent.geotransform();
            let mut outputs = Vec::new();
            for format in formats {
                let band_order = match format {
                    OutputFormat::Png => rgb_bands.clone(),
                    OutputFormat::Geotiff | OutputFormat::Netcdf => mosaic.band_names(),
                };
                match writer.write_raster(format, &stem, &mosaic, &geotransform, WGS84, &band_order) {
                    Ok(paths) => outputs.extend(paths),
                    Err(e)
                        if matches!(
                            e.downcast_ref::<MosaicError>(),
                            Some(MosaicError::UnsupportedFormat(_))
                        ) =>
                    {
                        tracing::warn!("Skipping {} output: {}", format, e);
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok(outputs)
        })
        .await
        .map_err(|e| anyhow!("Writer task panicked: {}", e))?
    }

    fn spawn_reporter(&self, metrics: &Arc<Metrics>, total: usize) -> Option<Reporter> {
        if !self.config.processing.enable_metrics {
            return None;
        }
        let (shutdown, rx) = mpsc::channel::<()>(1);
        let reporter = MetricsReporter::new(
            metrics.clone(),
            self.config.processing.metrics_interval_secs,
            total as u64,
        );
        let handle = tokio::spawn(async move {
            reporter.run(rx).await;
        });
        Some(Reporter { shutdown, handle })
    }

    async fn finish(&self, ledger: &mut ProgressLedger, status: LedgerStatus, message: &str) {
        if let Err(e) = ledger.finish(status, Some(message.to_string())) {
            tracing::warn!("{:#}", e);
            return;
        }
        if let Err(e) = ledger.publish(self.records.as_ref()).await {
            tracing::warn!("Failed to publish ledger for {}: {:#}", ledger.snapshot().query_id, e);
        }
    }

    /// A cancel that arrives after the last check must not stop the next run of this id.
    async fn clear_cancel_request(&self, query_id: &str) {
        if let Err(e) = self.records.clear_cancel(query_id).await {
            tracing::warn!("Failed to clear cancel request for {}: {:#}", query_id, e);
        }
    }

    async fn release_scratch(&self, query_id: &str) {
        if let Err(e) = self.scratch.remove_query(query_id).await {
            tracing::warn!("Failed to release scratch space for {}: {:#}", query_id, e);
        }
    }
}

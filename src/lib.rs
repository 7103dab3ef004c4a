//! Datacube Mosaic
//!
//! Builds cloud-free composite rasters from a time series of satellite scenes. A query
//! (platform, product, bounding box, time range, algorithm) is split into geographic
//! chunks and time groups, each (group, chunk) pair is composited independently, and the
//! results are stitched and folded into one mosaic.
//!
//! # Architecture
//!
//! - **Plan**: pixel-aligned geo chunks and balanced time groups
//! - **Transform**: cloud masking, per-chunk compositors, combination strategies
//! - **I/O**: scene catalog, record store, scratch space and output writers
//! - **Pipeline**: chunk workers, the orchestrator, progress ledger and metrics
//!
//! # Usage
//!
//! ```no_run
//! use datacube_mosaic::{run_query, Config, QueryDescriptor};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file(&"config.yaml".into())?;
//!     let query = QueryDescriptor::from_file("query.yaml".as_ref())?;
//!     let outcome = run_query(config, query).await?;
//!     println!("{:?}", outcome);
//!     Ok(())
//! }
//! ```

pub mod algorithm;
pub mod config;
pub mod error;
pub mod io;
pub mod pipeline;
pub mod plan;
pub mod query;
pub mod raster;
pub mod transform;

pub use algorithm::{AlgorithmConfig, AlgorithmKind};
pub use config::Config;
pub use error::MosaicError;
pub use pipeline::{MosaicService, Orchestrator, QueryOutcome, QueryResult};
pub use query::{BoundingBox, QueryDescriptor, TimeRange};

use anyhow::Result;
use std::sync::Arc;

/// Wire the bundled collaborators described by `config` into a service.
pub fn build_service(config: Config) -> Result<MosaicService> {
    config.validate()?;

    let catalog = Arc::new(io::MemoryCatalog::from_manifest_file(&config.catalog.manifest_path)?);
    let records = Arc::new(io::InMemoryRecordStore::new());
    let scratch = Arc::new(io::ScratchStore::new(&config.scratch.root)?);
    let writer = Arc::new(io::LocalRasterWriter::new(
        &config.output.root,
        config.output.png.clone(),
    ));

    tracing::info!(
        "Scratch space at {}, results to {}",
        config.scratch.root.display(),
        config.output.root.display()
    );

    let orchestrator = Orchestrator::new(catalog, records, scratch, writer, Arc::new(config));
    Ok(MosaicService::new(orchestrator))
}

/// Run a single query to completion with the bundled collaborators.
pub async fn run_query(config: Config, descriptor: QueryDescriptor) -> Result<QueryOutcome> {
    let service = build_service(config)?;
    let query_id = service.submit_query(descriptor).await?;
    tracing::info!("Submitted query {}", query_id);

    let outcome = service.wait(&query_id).await;
    service.shutdown().await?;
    outcome
}

/// Build a Tokio runtime with the specified configuration.
pub fn build_runtime(worker_threads: Option<usize>) -> Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();

    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }

    builder.enable_all();

    Ok(builder.build()?)
}

/// Initialize the Rayon thread pool.
pub fn init_rayon(threads: Option<usize>) -> Result<()> {
    if let Some(threads) = threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()?;
    }
    Ok(())
}

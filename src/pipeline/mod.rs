//! Query execution: chunk workers, orchestration, progress and metrics.

pub mod chunk_worker;
pub mod ledger;
mod metrics;
pub mod orchestrator;
pub mod result;
mod service;

#[cfg(test)]
pub(crate) mod test_support;

pub use chunk_worker::{ChunkOutcome, ChunkResult, ChunkTask, ChunkWorker};
pub use ledger::{CancellationToken, LedgerSnapshot, LedgerStatus, ProgressLedger};
pub use metrics::{Metrics, MetricsReporter, MetricsSnapshot};
pub use orchestrator::{Orchestrator, QueryOutcome};
pub use result::{AcquisitionRecords, AcquisitionSummary, QueryResult};
pub use service::MosaicService;

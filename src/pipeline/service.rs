//! Fire-and-forget query submission on top of the orchestrator.

use crate::io::RecordStore;
use crate::pipeline::ledger::{LedgerSnapshot, LedgerStatus};
use crate::pipeline::orchestrator::{Orchestrator, QueryOutcome, UNEXPECTED};
use crate::query::QueryDescriptor;
use anyhow::{anyhow, bail, Result};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Runs each submitted query on its own tokio task.
///
/// Progress is observed through the ledger in the record store; `wait` joins a query's
/// task. Identical descriptors map to the same query id, so resubmitting a running or
/// completed query returns its id without running it again.
pub struct MosaicService {
    orchestrator: Arc<Orchestrator>,
    tasks: DashMap<String, JoinHandle<Result<QueryOutcome>>>,
    /// Serializes the check-then-spawn in `submit_query`
    submit_lock: Mutex<()>,
}

impl MosaicService {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            tasks: DashMap::new(),
            submit_lock: Mutex::new(()),
        }
    }

    fn records(&self) -> &Arc<dyn RecordStore> {
        self.orchestrator.records()
    }

    fn is_running(&self, query_id: &str) -> bool {
        self.tasks
            .get(query_id)
            .is_some_and(|task| !task.is_finished())
    }

    /// Start `descriptor` in the background and return its query id.
    pub async fn submit_query(&self, descriptor: QueryDescriptor) -> Result<String> {
        descriptor.validate()?;
        let query_id = descriptor.query_id();

        // One in-flight run per id: scratch space is keyed by it
        let _guard = self.submit_lock.lock().await;

        if self.is_running(&query_id) {
            tracing::info!("Query {} is already running", query_id);
            return Ok(query_id);
        }

        let ledger = self.records().ledger(&query_id).await?;
        if ledger.is_some_and(|l| l.status == LedgerStatus::Ok)
            && self.records().result(&query_id).await?.is_some()
        {
            tracing::info!("Query {} already completed; reusing its result", query_id);
            return Ok(query_id);
        }

        let orchestrator = self.orchestrator.clone();
        let handle = tokio::spawn(async move { orchestrator.run_query(&descriptor).await });
        if let Some(previous) = self.tasks.insert(query_id.clone(), handle) {
            tracing::debug!(
                "Replaced finished task of {} (finished: {})",
                query_id,
                previous.is_finished()
            );
        }
        Ok(query_id)
    }

    /// Ask a running query to stop at its next iteration boundary.
    ///
    /// Fails for ids this service is not running and whose ledger is absent or terminal.
    pub async fn cancel(&self, query_id: &str) -> Result<()> {
        if !self.is_running(query_id) {
            let live = self
                .records()
                .ledger(query_id)
                .await?
                .is_some_and(|l| !l.status.is_terminal());
            if !live {
                bail!("Query {} is not running", query_id);
            }
        }
        tracing::info!("Cancellation requested for {}", query_id);
        self.records().request_cancel(query_id).await
    }

    /// Current ledger of a query.
    pub async fn ledger(&self, query_id: &str) -> Result<Option<LedgerSnapshot>> {
        self.records().ledger(query_id).await
    }

    /// Wait for a query to reach a terminal status.
    ///
    /// A query whose task was already joined, or that finished before this service saw
    /// it, resolves from its stored ledger and result.
    pub async fn wait(&self, query_id: &str) -> Result<QueryOutcome> {
        if let Some((_, handle)) = self.tasks.remove(query_id) {
            return handle
                .await
                .map_err(|e| anyhow!("Query task {} panicked: {}", query_id, e))?;
        }
        self.stored_outcome(query_id).await
    }

    async fn stored_outcome(&self, query_id: &str) -> Result<QueryOutcome> {
        let Some(ledger) = self.records().ledger(query_id).await? else {
            return Err(anyhow!("Unknown query {}", query_id));
        };
        let message = ledger.result_message.unwrap_or_default();
        match ledger.status {
            LedgerStatus::Ok => match self.records().result(query_id).await? {
                Some(result) => Ok(QueryOutcome::Completed(result)),
                None => Err(anyhow!("Result of query {} is missing", query_id)),
            },
            LedgerStatus::Cancelled => Ok(QueryOutcome::Cancelled),
            LedgerStatus::Error if message == UNEXPECTED => {
                Err(anyhow!("Query {} failed: {}", query_id, message))
            }
            LedgerStatus::Error => Ok(QueryOutcome::NoData { message }),
            LedgerStatus::Waiting | LedgerStatus::Running => Err(anyhow!(
                "Query {} is running elsewhere ({:?})",
                query_id,
                ledger.status
            )),
        }
    }

    /// Wait for every submitted query, then close the scene catalog.
    pub async fn shutdown(self) -> Result<()> {
        let ids: Vec<String> = self.tasks.iter().map(|t| t.key().clone()).collect();
        for id in ids {
            if let Err(e) = self.wait(&id).await {
                tracing::warn!("Query {} ended with an error: {:#}", id, e);
            }
        }
        self.orchestrator.catalog().close().await?;
        tracing::info!("Mosaic service shut down");
        Ok(())
    }
}

//! Query record store: ledger snapshots, cancel flags and results.

use crate::pipeline::ledger::{LedgerSnapshot, LedgerStatus};
use crate::pipeline::result::QueryResult;
use anyhow::Result;
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};

/// Persistent query state keyed by query id.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Replace the stored ledger for `snapshot.query_id`.
    async fn update_ledger(&self, snapshot: &LedgerSnapshot) -> Result<()>;

    async fn ledger(&self, query_id: &str) -> Result<Option<LedgerSnapshot>>;

    /// Whether a caller asked for this query to stop.
    async fn is_cancelled(&self, query_id: &str) -> Result<bool>;

    /// Flag a query for cancellation. Queries already in a terminal state are left alone.
    async fn request_cancel(&self, query_id: &str) -> Result<()>;

    /// Drop a pending cancel request.
    async fn clear_cancel(&self, query_id: &str) -> Result<()>;

    async fn save_result(&self, result: &QueryResult) -> Result<()>;

    async fn result(&self, query_id: &str) -> Result<Option<QueryResult>>;

    /// Drop the result and cancel flag of a query. The ledger entry is kept so its
    /// terminal status stays visible.
    async fn delete_query_artifacts(&self, query_id: &str) -> Result<()>;
}

/// Record store held in process memory.
#[derive(Default)]
pub struct InMemoryRecordStore {
    ledgers: DashMap<String, LedgerSnapshot>,
    results: DashMap<String, QueryResult>,
    cancel_requests: DashSet<String>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn update_ledger(&self, snapshot: &LedgerSnapshot) -> Result<()> {
        self.ledgers
            .insert(snapshot.query_id.clone(), snapshot.clone());
        Ok(())
    }

    async fn ledger(&self, query_id: &str) -> Result<Option<LedgerSnapshot>> {
        Ok(self.ledgers.get(query_id).map(|l| l.value().clone()))
    }

    async fn is_cancelled(&self, query_id: &str) -> Result<bool> {
        if self.cancel_requests.contains(query_id) {
            return Ok(true);
        }
        Ok(self
            .ledgers
            .get(query_id)
            .map(|l| l.status == LedgerStatus::Cancelled)
            .unwrap_or(false))
    }

    async fn request_cancel(&self, query_id: &str) -> Result<()> {
        let terminal = self
            .ledgers
            .get(query_id)
            .is_some_and(|l| l.status.is_terminal());
        if terminal {
            tracing::debug!("Ignoring cancel for finished query {}", query_id);
            return Ok(());
        }
        tracing::info!("Cancellation requested for query {}", query_id);
        self.cancel_requests.insert(query_id.to_string());
        Ok(())
    }

    async fn clear_cancel(&self, query_id: &str) -> Result<()> {
        self.cancel_requests.remove(query_id);
        Ok(())
    }

    async fn save_result(&self, result: &QueryResult) -> Result<()> {
        self.results
            .insert(result.query_id.clone(), result.clone());
        Ok(())
    }

    async fn result(&self, query_id: &str) -> Result<Option<QueryResult>> {
        Ok(self.results.get(query_id).map(|r| r.value().clone()))
    }

    async fn delete_query_artifacts(&self, query_id: &str) -> Result<()> {
        self.results.remove(query_id);
        self.cancel_requests.remove(query_id);
        Ok(())
    }
}

//! Progress ledger and cooperative cancellation.
//!
//! The orchestrator is the single writer of a query's ledger. Every change is
//! published to the record store as a [`LedgerSnapshot`] so callers can poll progress.
//! Workers only read: they poll a [`CancellationToken`] between iterations.

use crate::error::MosaicError;
use crate::io::RecordStore;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerStatus {
    Waiting,
    Running,
    Ok,
    Error,
    Cancelled,
}

impl LedgerStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LedgerStatus::Ok | LedgerStatus::Error | LedgerStatus::Cancelled
        )
    }
}

/// The externally visible state of a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub query_id: String,
    pub status: LedgerStatus,
    pub completed_work_units: usize,
    pub total_work_units: usize,
    pub result_message: Option<String>,
}

impl LedgerSnapshot {
    /// Completion in percent.
    pub fn progress(&self) -> f64 {
        if self.total_work_units == 0 {
            0.0
        } else {
            self.completed_work_units as f64 / self.total_work_units as f64 * 100.0
        }
    }
}

/// Single-writer progress state machine: WAITING → RUNNING → {OK, ERROR, CANCELLED}.
///
/// Totals are fixed by [`start`](Self::start), completion never decreases nor exceeds
/// the total, and a terminal status is set exactly once.
#[derive(Debug)]
pub struct ProgressLedger {
    snapshot: LedgerSnapshot,
}

impl ProgressLedger {
    pub fn new(query_id: impl Into<String>) -> Self {
        Self {
            snapshot: LedgerSnapshot {
                query_id: query_id.into(),
                status: LedgerStatus::Waiting,
                completed_work_units: 0,
                total_work_units: 0,
                result_message: None,
            },
        }
    }

    pub fn snapshot(&self) -> &LedgerSnapshot {
        &self.snapshot
    }

    pub fn status(&self) -> LedgerStatus {
        self.snapshot.status
    }

    fn reject(&self, what: &str) -> anyhow::Error {
        MosaicError::LedgerTransition(format!(
            "{} while {:?} ({}/{})",
            what,
            self.snapshot.status,
            self.snapshot.completed_work_units,
            self.snapshot.total_work_units
        ))
        .into()
    }

    /// Fix the work-unit total and move to RUNNING.
    pub fn start(&mut self, total_work_units: usize) -> anyhow::Result<()> {
        if self.snapshot.status != LedgerStatus::Waiting {
            return Err(self.reject("start"));
        }
        self.snapshot.total_work_units = total_work_units;
        self.snapshot.status = LedgerStatus::Running;
        Ok(())
    }

    /// Record one finished work unit.
    pub fn complete_one(&mut self) -> anyhow::Result<()> {
        if self.snapshot.status != LedgerStatus::Running
            || self.snapshot.completed_work_units >= self.snapshot.total_work_units
        {
            return Err(self.reject("complete work unit"));
        }
        self.snapshot.completed_work_units += 1;
        Ok(())
    }

    /// Move to a terminal status. Allowed once, from WAITING or RUNNING.
    pub fn finish(&mut self, status: LedgerStatus, message: Option<String>) -> anyhow::Result<()> {
        if !status.is_terminal() || self.snapshot.status.is_terminal() {
            return Err(self.reject(&format!("finish as {:?}", status)));
        }
        self.snapshot.status = status;
        self.snapshot.result_message = message;
        Ok(())
    }

    /// Persist the current snapshot.
    pub async fn publish(&self, store: &dyn RecordStore) -> anyhow::Result<()> {
        store.update_ledger(&self.snapshot).await
    }
}

/// Cooperative cancellation handle for one query.
///
/// Combines a local flag (set when the orchestrator already knows) with the record
/// store's cancel state (set by callers).
#[derive(Clone)]
pub struct CancellationToken {
    query_id: String,
    store: Arc<dyn RecordStore>,
    local: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new(query_id: impl Into<String>, store: Arc<dyn RecordStore>) -> Self {
        Self {
            query_id: query_id.into(),
            store,
            local: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn query_id(&self) -> &str {
        &self.query_id
    }

    /// Mark cancelled locally; every clone observes it.
    pub fn cancel(&self) {
        self.local.store(true, Ordering::Release);
    }

    pub async fn is_cancelled(&self) -> anyhow::Result<bool> {
        if self.local.load(Ordering::Acquire) {
            return Ok(true);
        }
        let cancelled = self.store.is_cancelled(&self.query_id).await?;
        if cancelled {
            self.cancel();
        }
        Ok(cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::InMemoryRecordStore;

    #[test]
    fn test_happy_path_transitions() {
        let mut ledger = ProgressLedger::new("q");
        ledger.start(2).unwrap();
        ledger.complete_one().unwrap();
        assert_eq!(ledger.snapshot().progress(), 50.0);
        ledger.complete_one().unwrap();
        ledger.finish(LedgerStatus::Ok, None).unwrap();
        assert_eq!(ledger.status(), LedgerStatus::Ok);
    }

    #[test]
    fn test_completion_cannot_exceed_total() {
        let mut ledger = ProgressLedger::new("q");
        ledger.start(1).unwrap();
        ledger.complete_one().unwrap();
        let err = ledger.complete_one().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MosaicError>(),
            Some(MosaicError::LedgerTransition(_))
        ));
        assert_eq!(ledger.snapshot().completed_work_units, 1);
    }

    #[test]
    fn test_terminal_status_is_final() {
        let mut ledger = ProgressLedger::new("q");
        ledger.start(3).unwrap();
        ledger
            .finish(LedgerStatus::Cancelled, Some("cancelled".into()))
            .unwrap();
        assert!(ledger.finish(LedgerStatus::Ok, None).is_err());
        assert!(ledger.complete_one().is_err());
        assert!(ledger.start(3).is_err());
        assert!(ledger.finish(LedgerStatus::Running, None).is_err());
    }

    #[test]
    fn test_error_allowed_before_start() {
        let mut ledger = ProgressLedger::new("q");
        ledger
            .finish(LedgerStatus::Error, Some("no data".into()))
            .unwrap();
        assert_eq!(ledger.snapshot().result_message.as_deref(), Some("no data"));
    }

    #[tokio::test]
    async fn test_token_reads_store_flag() {
        let store: Arc<dyn RecordStore> = Arc::new(InMemoryRecordStore::new());
        let token = CancellationToken::new("q", store.clone());
        assert!(!token.is_cancelled().await.unwrap());

        store.request_cancel("q").await.unwrap();
        assert!(token.is_cancelled().await.unwrap());

        let other = CancellationToken::new("other", store);
        other.clone().cancel();
        assert!(other.is_cancelled().await.unwrap());
    }

    #[tokio::test]
    async fn test_publish_writes_snapshot() {
        let store = InMemoryRecordStore::new();
        let mut ledger = ProgressLedger::new("q");
        ledger.start(4).unwrap();
        ledger.publish(&store).await.unwrap();

        let stored = store.ledger("q").await.unwrap().unwrap();
        assert_eq!(stored.status, LedgerStatus::Running);
        assert_eq!(stored.total_work_units, 4);
    }
}

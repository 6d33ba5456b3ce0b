//! In-memory registry of in-flight executions
//!
//! Holds at most one record per spider. The map is locked only for the
//! duration of each call and never across an await.

use crate::state::ExecutionPhase;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// Signals shared between an execution task and its observers
#[derive(Debug, Clone, Default)]
pub struct ExecutionSignals {
    /// Cancelled when a stop is requested
    pub cancel: CancellationToken,
    /// Cancelled when the execution task has finished all its work
    pub finished: CancellationToken,
    /// Cancelled when the record has been removed from the registry
    pub released: CancellationToken,
}

/// One in-flight execution
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub spider_id: i64,
    pub started_at: DateTime<Utc>,
    pub phase: ExecutionPhase,
    pub pid: Option<u32>,
    pub signals: ExecutionSignals,
}

/// Read-only view of an execution
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionSnapshot {
    pub execution_id: String,
    pub spider_id: i64,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub phase: ExecutionPhase,
    pub pid: Option<u32>,
}

/// A granted stop request
#[derive(Debug, Clone)]
pub struct StopTicket {
    pub execution_id: String,
    pub signals: ExecutionSignals,
    /// True for the first stop request of this execution; only it reconciles
    pub initiator: bool,
}

#[derive(Debug, Default)]
pub struct ExecutionRegistry {
    records: Mutex<HashMap<i64, ExecutionRecord>>,
}

impl ExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<i64, ExecutionRecord>> {
        // Every mutation is a single insert, remove or field store
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Inserts a record unless the spider already has one
    ///
    /// # Returns
    ///
    /// * `Some(ExecutionSignals)` - Registered; signals for the new execution
    /// * `None` - The spider is already running
    pub fn try_register(&self, spider_id: i64, execution_id: &str) -> Option<ExecutionSignals> {
        let mut records = self.records();
        if records.contains_key(&spider_id) {
            return None;
        }

        let signals = ExecutionSignals::default();
        records.insert(
            spider_id,
            ExecutionRecord {
                execution_id: execution_id.to_string(),
                spider_id,
                started_at: Utc::now(),
                phase: ExecutionPhase::Running,
                pid: None,
                signals: signals.clone(),
            },
        );
        Some(signals)
    }

    pub fn contains(&self, spider_id: i64) -> bool {
        self.records().contains_key(&spider_id)
    }

    pub fn snapshot(&self, spider_id: i64) -> Option<ExecutionSnapshot> {
        let records = self.records();
        let record = records.get(&spider_id)?;
        let elapsed = Utc::now() - record.started_at;

        Some(ExecutionSnapshot {
            execution_id: record.execution_id.clone(),
            spider_id,
            started_at: record.started_at,
            duration_secs: elapsed.num_milliseconds().max(0) as f64 / 1000.0,
            phase: record.phase,
            pid: record.pid,
        })
    }

    /// Signals of the current execution of a spider
    pub fn signals(&self, spider_id: i64) -> Option<ExecutionSignals> {
        self.records().get(&spider_id).map(|r| r.signals.clone())
    }

    /// Records the OS pid once the child is spawned
    pub fn attach_pid(&self, spider_id: i64, execution_id: &str, pid: Option<u32>) {
        if let Some(record) = self.records().get_mut(&spider_id) {
            if record.execution_id == execution_id {
                record.pid = pid;
            }
        }
    }

    /// Claims the execution for a stop request
    ///
    /// Returns `None` when nothing is running or the process already exited
    /// and its task is reconciling the result.
    pub fn begin_stop(&self, spider_id: i64) -> Option<StopTicket> {
        let mut records = self.records();
        let record = records.get_mut(&spider_id)?;
        if !record.phase.accepts_stop() {
            return None;
        }

        let initiator = record.phase == ExecutionPhase::Running;
        record.phase = ExecutionPhase::Stopping;
        Some(StopTicket {
            execution_id: record.execution_id.clone(),
            signals: record.signals.clone(),
            initiator,
        })
    }

    /// Claims the execution for result reconciliation by its own task
    ///
    /// Returns false when a stop request got there first.
    pub fn begin_finish(&self, spider_id: i64, execution_id: &str) -> bool {
        let mut records = self.records();
        match records.get_mut(&spider_id) {
            Some(record) if record.execution_id == execution_id => {
                if record.phase == ExecutionPhase::Running {
                    record.phase = ExecutionPhase::Finishing;
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    /// Removes the record if it still belongs to `execution_id`
    ///
    /// Returns true if a record was removed. Safe to call more than once.
    pub fn remove(&self, spider_id: i64, execution_id: &str) -> bool {
        let removed = {
            let mut records = self.records();
            match records.get(&spider_id) {
                Some(record) if record.execution_id == execution_id => records.remove(&spider_id),
                _ => None,
            }
        };

        match removed {
            Some(record) => {
                record.signals.released.cancel();
                true
            }
            None => false,
        }
    }

    /// Spider ids with an in-flight execution, ascending
    pub fn running_spiders(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.records().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_record_per_spider() {
        let registry = ExecutionRegistry::new();
        assert!(registry.try_register(1, "a").is_some());
        assert!(registry.try_register(1, "b").is_none());
        assert!(registry.try_register(2, "c").is_some());
        assert_eq!(registry.running_spiders(), vec![1, 2]);
    }

    #[test]
    fn test_snapshot() {
        let registry = ExecutionRegistry::new();
        assert!(registry.snapshot(1).is_none());

        registry.try_register(1, "a");
        registry.attach_pid(1, "a", Some(99));
        registry.attach_pid(1, "other", Some(1));

        let snapshot = registry.snapshot(1).unwrap();
        assert_eq!(snapshot.execution_id, "a");
        assert_eq!(snapshot.phase, ExecutionPhase::Running);
        assert_eq!(snapshot.pid, Some(99));
        assert!(snapshot.duration_secs >= 0.0);
    }

    #[test]
    fn test_stop_claims() {
        let registry = ExecutionRegistry::new();
        assert!(registry.begin_stop(1).is_none());

        registry.try_register(1, "a");
        let first = registry.begin_stop(1).unwrap();
        let second = registry.begin_stop(1).unwrap();
        assert!(first.initiator);
        assert!(!second.initiator);
        assert_eq!(registry.snapshot(1).unwrap().phase, ExecutionPhase::Stopping);

        assert!(!registry.begin_finish(1, "a"));
    }

    #[test]
    fn test_finish_blocks_stop() {
        let registry = ExecutionRegistry::new();
        registry.try_register(1, "a");
        assert!(!registry.begin_finish(1, "other"));
        assert!(registry.begin_finish(1, "a"));
        assert!(registry.begin_stop(1).is_none());
    }

    #[test]
    fn test_remove_is_conditional() {
        let registry = ExecutionRegistry::new();
        let signals = registry.try_register(1, "a").unwrap();

        assert!(!registry.remove(1, "b"));
        assert!(registry.contains(1));
        assert!(!signals.released.is_cancelled());

        assert!(registry.remove(1, "a"));
        assert!(!registry.remove(1, "a"));
        assert!(signals.released.is_cancelled());
        assert!(registry.running_spiders().is_empty());
    }
}

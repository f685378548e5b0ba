//! The usage ledger: an append-only audit trail of gateway calls.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::SystemTime;

use lobbygate_protocol::ApiKeyId;
use serde::Serialize;

/// How a gateway call ended at the admission layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageOutcome {
    Accepted,
    RateLimited,
    Denied,
    /// A key or limiter store did not answer in time.
    Failed,
}

/// One audited call. Never mutated after it is appended.
#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
    /// `None` when the presented key matched nothing.
    pub api_key_id: Option<ApiKeyId>,
    pub endpoint: &'static str,
    pub timestamp: SystemTime,
    pub outcome: UsageOutcome,
}

/// Append-only log of [`UsageRecord`]s with bounded retention.
///
/// When `max_records` is reached the oldest record is dropped. That is the
/// only way a record ever leaves the ledger.
///
/// Appends use a `std` mutex: the critical section is a push onto a deque
/// and never awaits, so an append can neither block for long nor fail.
pub struct UsageLedger {
    records: Mutex<VecDeque<UsageRecord>>,
    max_records: usize,
}

impl UsageLedger {
    pub fn new(max_records: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
            max_records: max_records.max(1),
        }
    }

    pub fn append(&self, api_key_id: Option<ApiKeyId>, endpoint: &'static str, outcome: UsageOutcome) {
        let record = UsageRecord {
            api_key_id,
            endpoint,
            timestamp: SystemTime::now(),
            outcome,
        };
        tracing::debug!(key_id = ?api_key_id, endpoint, ?outcome, "gateway call recorded");

        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        if records.len() == self.max_records {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Snapshot of every retained record, oldest first.
    pub fn records(&self) -> Vec<UsageRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn records_for(&self, key: ApiKeyId) -> Vec<UsageRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.api_key_id == Some(key))
            .cloned()
            .collect()
    }

    pub fn count(&self, outcome: UsageOutcome) -> usize {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.outcome == outcome)
            .count()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for UsageLedger {
    fn default() -> Self {
        Self::new(100_000)
    }
}

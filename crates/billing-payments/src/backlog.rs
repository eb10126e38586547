//! Manual reconciliation backlog
//!
//! Anything the gateway was told "accepted" but that we could not apply lands
//! here for support staff to follow up. The webhook feeding it is public, so
//! the backlog is bounded: past `capacity` the oldest entries are evicted and
//! counted, and stored payloads are cut to `MAX_PAYLOAD_BYTES`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which channel delivered a gateway result
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileSource {
    Callback,
    Poll,
    Push,
}

impl ReconcileSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileSource::Callback => "callback",
            ReconcileSource::Poll => "poll",
            ReconcileSource::Push => "push",
        }
    }
}

/// One item needing manual follow-up
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BacklogEntry {
    pub checkout_request_id: Option<String>,
    pub source: ReconcileSource,
    pub reason: String,
    /// Raw payload for diagnostics
    pub payload: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Entries kept before the oldest are evicted
pub const DEFAULT_BACKLOG_CAPACITY: usize = 1_000;

/// Longest raw payload stored with an entry
pub const MAX_PAYLOAD_BYTES: usize = 8 * 1024;

/// In-memory backlog
pub struct ReconciliationBacklog {
    entries: RwLock<VecDeque<BacklogEntry>>,
    capacity: usize,
    evicted: AtomicU64,
}

impl Default for ReconciliationBacklog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_BACKLOG_CAPACITY)
    }
}

fn truncate_payload(mut payload: String) -> String {
    if payload.len() > MAX_PAYLOAD_BYTES {
        let mut end = MAX_PAYLOAD_BYTES;
        while !payload.is_char_boundary(end) {
            end -= 1;
        }
        payload.truncate(end);
        payload.push_str("...[truncated]");
    }
    payload
}

impl ReconciliationBacklog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `capacity` entries (at least one)
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
            evicted: AtomicU64::new(0),
        }
    }

    /// Record an entry. Never fails: losing the entry would lose the payment trail.
    pub fn record(
        &self,
        checkout_request_id: Option<&str>,
        source: ReconcileSource,
        reason: impl Into<String>,
        payload: Option<String>,
    ) {
        let entry = BacklogEntry {
            checkout_request_id: checkout_request_id.map(str::to_string),
            source,
            reason: reason.into(),
            payload: payload.map(truncate_payload),
            recorded_at: Utc::now(),
        };

        tracing::error!(
            checkout_request_id = ?entry.checkout_request_id,
            source = entry.source.as_str(),
            reason = %entry.reason,
            "Queued for manual reconciliation"
        );

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        while entries.len() >= self.capacity {
            entries.pop_front();
            let evicted = self.evicted.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(evicted, capacity = self.capacity, "Backlog full; oldest entry evicted");
        }
        entries.push_back(entry);
    }

    /// Oldest first
    pub fn list(&self) -> Vec<BacklogEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Entries dropped because the backlog was full
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Append-only action log.
//!
//! Fire-and-forget: recording can never fail into the caller or undo a
//! committed lending transition. Entries go to the `biblio.audit` tracing
//! target and a bounded in-memory tail.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use time::OffsetDateTime;

const TAIL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub actor: String,
    pub action: String,
    pub detail: String,
    pub at: OffsetDateTime,
}

/// In-process audit sink.
#[derive(Default)]
pub struct AuditLog {
    entries: Mutex<VecDeque<AuditEntry>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an action. Infallible; the oldest entry is dropped once the
    /// tail is full.
    pub fn record(&self, actor: &str, action: &str, detail: String) {
        tracing::info!(
            target: "biblio.audit",
            actor,
            action,
            detail = %detail,
            "audit entry"
        );

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() == TAIL_CAPACITY {
            entries.pop_front();
        }
        entries.push_back(AuditEntry {
            actor: actor.to_string(),
            action: action.to_string(),
            detail,
            at: OffsetDateTime::now_utc(),
        });
    }

    /// Snapshot of the retained tail, oldest first.
    pub fn recent(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

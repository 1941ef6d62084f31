//! Work detection across stop attempts.
//!
//! Each attempt hashes the working-tree diff. A first attempt (and the
//! session-start seed) only sets the baseline; repeat attempts count. When the
//! hash has not moved for [`RELEASE_AFTER_UNCHANGED`] consecutive repeat
//! attempts the workflow has stalled, and the stop validator lets it end even
//! with an unsatisfied checklist.

use crate::error::Result;
use crate::paths;
use crate::store::{self, StateStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const RELEASE_AFTER_UNCHANGED: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkSnapshot {
    #[serde(default)]
    pub session_id: String,
    pub diff_hash: String,
    pub captured_at: DateTime<Utc>,
    #[serde(default)]
    pub unchanged_attempts: u32,
}

pub fn has_new_work_since(last: &WorkSnapshot, current_hash: &str) -> bool {
    last.diff_hash != current_hash
}

pub fn stalled(unchanged_attempts: u32) -> bool {
    unchanged_attempts >= RELEASE_AFTER_UNCHANGED
}

impl WorkSnapshot {
    pub fn seed(session_id: impl Into<String>, diff_hash: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            diff_hash: diff_hash.into(),
            captured_at: Utc::now(),
            unchanged_attempts: 0,
        }
    }

    /// Fold in the hash seen at a stop attempt. Only repeat attempts advance the
    /// unchanged counter. Returns true if work happened since the previous observation.
    pub fn observe(&mut self, diff_hash: &str, repeat: bool) -> bool {
        let new_work = has_new_work_since(self, diff_hash);
        if new_work {
            self.unchanged_attempts = 0;
            self.diff_hash = diff_hash.to_string();
        } else if repeat {
            self.unchanged_attempts += 1;
        }
        self.captured_at = Utc::now();
        new_work
    }

    fn same_session(&self, session_id: &str) -> bool {
        self.session_id.is_empty() || session_id.is_empty() || self.session_id == session_id
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    pub fn load(store: &dyn StateStore) -> Option<Self> {
        store::load(store, paths::SNAPSHOT_FILE)
    }

    pub fn save(&self, store: &dyn StateStore) -> Result<()> {
        store::save(store, paths::SNAPSHOT_FILE, self)
    }

    pub fn remove(store: &dyn StateStore) -> Result<bool> {
        store.remove(paths::SNAPSHOT_FILE)
    }
}

/// Seed a fresh snapshot at session start, replacing whatever was there.
pub fn capture_seed(store: &dyn StateStore, session_id: &str, diff_hash: &str) -> Result<WorkSnapshot> {
    let snap = WorkSnapshot::seed(session_id, diff_hash);
    snap.save(store)?;
    Ok(snap)
}

/// Record a stop attempt's hash and return the updated snapshot. A snapshot
/// from another session is replaced by a fresh seed.
pub fn observe_attempt(
    store: &dyn StateStore,
    session_id: &str,
    diff_hash: &str,
    repeat: bool,
) -> Result<WorkSnapshot> {
    let snap = match WorkSnapshot::load(store) {
        Some(mut snap) if snap.same_session(session_id) => {
            let new_work = snap.observe(diff_hash, repeat);
            tracing::debug!(new_work, unchanged = snap.unchanged_attempts, "work snapshot updated");
            snap
        }
        _ => WorkSnapshot::seed(session_id, diff_hash),
    };
    snap.save(store)?;
    Ok(snap)
}

//! Is an autonomous workflow running in this checkout?
//!
//! Every answer fails open to "not active": an absent, unreadable, malformed or
//! expired state file never switches restrictive behavior on.

use crate::paths;
use crate::state::StateRecord;
use crate::store::StateStore;
use chrono::{DateTime, Duration, Utc};

pub fn is_mode_active(store: &dyn StateStore, workflow: &str, ttl: Duration) -> bool {
    live_record_at(store, workflow, ttl, Utc::now()).is_some()
}

/// The workflow's record if it exists, parses, and has not outlived `ttl` at `now`.
pub fn live_record_at(
    store: &dyn StateStore,
    workflow: &str,
    ttl: Duration,
    now: DateTime<Utc>,
) -> Option<StateRecord> {
    if paths::validate_workflow(workflow).is_err() {
        return None;
    }
    let record = StateRecord::load(store, workflow)?;
    if record.is_expired(ttl, now) {
        tracing::debug!(workflow, "state expired, treating mode as inactive");
        return None;
    }
    Some(record)
}

pub fn active_mode(store: &dyn StateStore, ttl: Duration) -> Option<StateRecord> {
    active_mode_at(store, ttl, Utc::now())
}

/// The most recently started live workflow in this checkout.
pub fn active_mode_at(
    store: &dyn StateStore,
    ttl: Duration,
    now: DateTime<Utc>,
) -> Option<StateRecord> {
    store
        .list()
        .iter()
        .filter_map(|f| paths::workflow_from_file_name(&f.name))
        .filter_map(|w| live_record_at(store, w, ttl, now))
        .max_by_key(|r| r.started_at)
}

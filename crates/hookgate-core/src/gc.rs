//! TTL sweep of the control directory.
//!
//! Workflow records expire by their own `started_at`. Files that cannot be
//! read as records, plus the checkpoint and snapshot, go by modification time.
//! Nothing younger than the TTL is ever removed.

use crate::error::Result;
use crate::paths;
use crate::state::StateRecord;
use crate::store::{StateStore, StoredFile};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepReason {
    Expired,
    Unreadable,
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Swept {
    pub name: String,
    pub reason: SweepReason,
}

pub fn sweep(store: &dyn StateStore, ttl: Duration, now: DateTime<Utc>, dry_run: bool) -> Result<Vec<Swept>> {
    let mut swept = Vec::new();
    for file in store.list() {
        let Some(reason) = sweep_reason(store, &file, ttl, now) else {
            continue;
        };
        if !dry_run {
            store.remove(&file.name)?;
        }
        tracing::debug!(file = %file.name, ?reason, dry_run, "swept");
        swept.push(Swept {
            name: file.name,
            reason,
        });
    }
    if !swept.is_empty() && !dry_run {
        tracing::info!(count = swept.len(), "removed stale control files");
    }
    Ok(swept)
}

fn sweep_reason(
    store: &dyn StateStore,
    file: &StoredFile,
    ttl: Duration,
    now: DateTime<Utc>,
) -> Option<SweepReason> {
    let older_than_ttl = file.modified.is_some_and(|m| now - m > ttl);

    if let Some(workflow) = paths::workflow_from_file_name(&file.name) {
        return match StateRecord::load(store, workflow) {
            Some(record) if record.is_expired(ttl, now) => Some(SweepReason::Expired),
            Some(_) => None,
            None if older_than_ttl => Some(SweepReason::Unreadable),
            None => None,
        };
    }

    let auxiliary = file.name == paths::CHECKPOINT_FILE || file.name == paths::SNAPSHOT_FILE;
    (auxiliary && older_than_ttl).then_some(SweepReason::Stale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn ttl() -> Duration {
        Duration::hours(4)
    }

    fn names(swept: &[Swept]) -> Vec<&str> {
        swept.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn live_state_survives() {
        let store = MemoryStore::new();
        StateRecord::new("melt", "s", true).save(&store).unwrap();
        // Even an old mtime does not matter for a parseable, unexpired record.
        store.set_modified("melt-state.json", Utc::now() - Duration::days(3));
        let swept = sweep(&store, ttl(), Utc::now(), false).unwrap();
        assert!(swept.is_empty());
        assert!(StateRecord::load(&store, "melt").is_some());
    }

    #[test]
    fn expired_state_is_removed() {
        let store = MemoryStore::new();
        let mut record = StateRecord::new("melt", "s", true);
        record.started_at = Utc::now() - Duration::hours(5);
        record.save(&store).unwrap();
        let swept = sweep(&store, ttl(), Utc::now(), false).unwrap();
        assert_eq!(swept[0].reason, SweepReason::Expired);
        assert!(store.list().is_empty());
    }

    #[test]
    fn unreadable_goes_by_mtime() {
        let store = MemoryStore::new();
        store.insert_raw("old-state.json", "{");
        store.insert_raw("new-state.json", "{");
        store.set_modified("old-state.json", Utc::now() - Duration::hours(6));
        let swept = sweep(&store, ttl(), Utc::now(), false).unwrap();
        assert_eq!(names(&swept), vec!["old-state.json"]);
        assert_eq!(swept[0].reason, SweepReason::Unreadable);
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn auxiliary_files_by_mtime_and_others_untouched() {
        let store = MemoryStore::new();
        store.insert_raw(paths::CHECKPOINT_FILE, "{}");
        store.insert_raw(paths::SNAPSHOT_FILE, "{}");
        store.insert_raw("settings.json", "{}");
        let old = Utc::now() - Duration::hours(10);
        store.set_modified(paths::CHECKPOINT_FILE, old);
        store.set_modified("settings.json", old);

        let swept = sweep(&store, ttl(), Utc::now(), false).unwrap();
        assert_eq!(names(&swept), vec![paths::CHECKPOINT_FILE]);
        assert_eq!(store.list().len(), 2);
    }

    #[test]
    fn dry_run_keeps_files() {
        let store = MemoryStore::new();
        store.insert_raw(paths::SNAPSHOT_FILE, "{}");
        store.set_modified(paths::SNAPSHOT_FILE, Utc::now() - Duration::hours(5));
        let swept = sweep(&store, ttl(), Utc::now(), true).unwrap();
        assert_eq!(swept.len(), 1);
        assert_eq!(store.list().len(), 1);
    }
}

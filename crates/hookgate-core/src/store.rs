//! The state store: every gate reads and writes its JSON records through a
//! [`StateStore`] handed to it, never through ambient file paths.
//!
//! Reads are lenient. A record that is missing, unreadable or malformed loads
//! as `None`, so callers treat it as absent. Writes replace the whole document
//! atomically.

use crate::error::Result;
use crate::{io, paths};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A file present in the store, as seen by the GC sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFile {
    pub name: String,
    pub modified: Option<DateTime<Utc>>,
}

pub trait StateStore {
    /// Raw contents of `name`, or `None` if absent or unreadable.
    fn read(&self, name: &str) -> Option<String>;

    /// Replace `name` with `data` in one step.
    fn save_atomic(&self, name: &str, data: &[u8]) -> Result<()>;

    fn exists(&self, name: &str) -> bool;

    /// Remove `name`. Returns false if it was already gone.
    fn remove(&self, name: &str) -> Result<bool>;

    fn list(&self) -> Vec<StoredFile>;
}

/// Load and parse a JSON record. Parse failures are logged and read as absent.
pub fn load<T: DeserializeOwned>(store: &dyn StateStore, name: &str) -> Option<T> {
    let raw = store.read(name)?;
    match serde_json::from_str(&raw) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(file = name, error = %e, "ignoring malformed state file");
            None
        }
    }
}

pub fn save<T: Serialize>(store: &dyn StateStore, name: &str, value: &T) -> Result<()> {
    let mut data = serde_json::to_string_pretty(value)?;
    data.push('\n');
    store.save_atomic(name, data.as_bytes())
}

// ---------------------------------------------------------------------------
// FsStore
// ---------------------------------------------------------------------------

/// Store rooted at one checkout's control directory.
#[derive(Debug, Clone)]
pub struct FsStore {
    dir: PathBuf,
}

impl FsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn for_root(root: &Path) -> Self {
        Self::new(paths::control_dir(root))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

impl StateStore for FsStore {
    fn read(&self, name: &str) -> Option<String> {
        match io::read_optional(&self.path(name)) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(file = name, error = %e, "state file unreadable");
                None
            }
        }
    }

    fn save_atomic(&self, name: &str, data: &[u8]) -> Result<()> {
        io::atomic_write(&self.path(name), data)
    }

    fn exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    fn remove(&self, name: &str) -> Result<bool> {
        match std::fs::remove_file(self.path(name)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> Vec<StoredFile> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut files: Vec<StoredFile> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|e| StoredFile {
                name: e.file_name().to_string_lossy().into_owned(),
                modified: e
                    .metadata()
                    .and_then(|m| m.modified())
                    .ok()
                    .map(DateTime::<Utc>::from),
            })
            .collect();
        files.sort_by(|a, b| a.name.cmp(&b.name));
        files
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-process store for exercising gate logic without touching disk.
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: RefCell<BTreeMap<String, (String, DateTime<Utc>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_raw(&self, name: &str, data: &str) {
        self.files
            .borrow_mut()
            .insert(name.to_string(), (data.to_string(), Utc::now()));
    }

    pub fn set_modified(&self, name: &str, at: DateTime<Utc>) {
        if let Some(entry) = self.files.borrow_mut().get_mut(name) {
            entry.1 = at;
        }
    }
}

impl StateStore for MemoryStore {
    fn read(&self, name: &str) -> Option<String> {
        self.files.borrow().get(name).map(|(d, _)| d.clone())
    }

    fn save_atomic(&self, name: &str, data: &[u8]) -> Result<()> {
        self.insert_raw(name, &String::from_utf8_lossy(data));
        Ok(())
    }

    fn exists(&self, name: &str) -> bool {
        self.files.borrow().contains_key(name)
    }

    fn remove(&self, name: &str) -> Result<bool> {
        Ok(self.files.borrow_mut().remove(name).is_some())
    }

    fn list(&self) -> Vec<StoredFile> {
        self.files
            .borrow()
            .iter()
            .map(|(name, (_, modified))| StoredFile {
                name: name.clone(),
                modified: Some(*modified),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

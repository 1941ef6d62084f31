use crate::error::{GateError, Result};
use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const CONTROL_DIR: &str = ".claude";

pub const CHECKPOINT_FILE: &str = "completion-checkpoint.json";
pub const SNAPSHOT_FILE: &str = "session-snapshot.json";
pub const CONFIG_FILE: &str = "hookgate.yaml";

pub const STATE_SUFFIX: &str = "-state.json";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn control_dir(root: &Path) -> PathBuf {
    root.join(CONTROL_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    control_dir(root).join(CONFIG_FILE)
}

/// `~/.claude/hookgate.yaml`, consulted when the project has no config of its own.
pub fn user_config_path() -> Result<PathBuf> {
    let home = home::home_dir().ok_or(GateError::HomeNotFound)?;
    Ok(home.join(CONTROL_DIR).join(CONFIG_FILE))
}

/// File name (relative to the control dir) of a workflow's state record.
pub fn state_file_name(workflow: &str) -> String {
    format!("{workflow}{STATE_SUFFIX}")
}

/// Inverse of [`state_file_name`]. Returns `None` for files that are not state records.
pub fn workflow_from_file_name(name: &str) -> Option<&str> {
    let workflow = name.strip_suffix(STATE_SUFFIX)?;
    validate_workflow(workflow).ok()?;
    Some(workflow)
}

/// Normalize a path reported by the agent runtime into a `/`-separated path
/// relative to `root`. `.` and `..` are resolved lexically, without touching
/// the filesystem. Paths that end up outside `root` are returned absolute.
pub fn relative_to_root(root: &Path, path: &str) -> String {
    let root = lexical_normalize(root);
    let full = lexical_normalize(&root.join(path));
    let rel = full.strip_prefix(&root).unwrap_or(&full);
    rel.to_string_lossy().replace('\\', "/")
}

/// Resolve `.` and `..` components. A `..` at the filesystem root stays at the
/// root; a leading `..` in a relative path is kept.
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// True when `rel_path` sits under one of `prefixes`. A path with any `..`
/// segment never counts.
pub fn under_prefixes(rel_path: &str, prefixes: &[String]) -> bool {
    if rel_path.split('/').any(|seg| seg == "..") {
        return false;
    }
    prefixes.iter().any(|prefix| {
        let dir = prefix.trim_end_matches('/');
        !dir.is_empty() && (rel_path == dir || rel_path.starts_with(&format!("{dir}/")))
    })
}

// ---------------------------------------------------------------------------
// Workflow name validation
// ---------------------------------------------------------------------------

static WORKFLOW_RE: OnceLock<Regex> = OnceLock::new();

fn workflow_re() -> &'static Regex {
    WORKFLOW_RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9\-]*[a-z0-9]$|^[a-z0-9]$").unwrap())
}

pub fn validate_workflow(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 64 || !workflow_re().is_match(name) {
        return Err(GateError::InvalidWorkflow(name.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

use hookgate_core::paths;
use std::path::{Path, PathBuf};

/// Resolve the project root from the current directory.
///
/// Priority:
/// 1. `--root` flag / `HOOKGATE_ROOT` env var (passed in as `explicit`)
/// 2. [`resolve_from`] the current directory
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    resolve_from(&cwd)
}

/// Walk upward from `start`:
/// 1. the nearest directory holding a `.claude/` that is not the user's own `~/.claude`
/// 2. the nearest directory holding `.git/`
/// 3. `start` itself
pub fn resolve_from(start: &Path) -> PathBuf {
    let home = paths::user_config_path()
        .ok()
        .and_then(|p| p.parent().and_then(Path::parent).map(Path::to_path_buf));

    if let Some(dir) = walk_up(start, |d| {
        paths::control_dir(d).is_dir() && home.as_deref() != Some(d)
    }) {
        return dir;
    }
    if let Some(dir) = walk_up(start, |d| d.join(".git").exists()) {
        return dir;
    }
    start.to_path_buf()
}

fn walk_up(start: &Path, found: impl Fn(&Path) -> bool) -> Option<PathBuf> {
    start.ancestors().find(|d| found(d)).map(Path::to_path_buf)
}

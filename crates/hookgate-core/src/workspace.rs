//! What the working tree looks like right now: the code version claims are
//! pinned to, and the diff that change classification and work detection read.

use crate::checkpoint::EvidenceProbe;
use crate::error::{GateError, Result};
use crate::paths;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Reported as the code version when there is no git history to pin to.
pub const UNVERSIONED: &str = "unversioned";

/// Untracked files larger than this are hashed by name only.
const MAX_UNTRACKED_BYTES: u64 = 1024 * 1024;

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

/// Staged, unstaged and untracked changes, bookkeeping paths excluded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diff {
    pub paths: Vec<String>,
    pub text: String,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty() && self.text.is_empty()
    }

    /// Hex SHA-256 over the changed paths and the diff text.
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        for p in &self.paths {
            hasher.update(p.as_bytes());
            hasher.update(b"\n");
        }
        hasher.update(b"\0");
        hasher.update(self.text.as_bytes());
        hex::encode(hasher.finalize())
    }
}

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

pub trait Workspace {
    fn diff(&self) -> Diff;
    fn code_version(&self) -> String;
}

/// Version string for a commit plus whatever is uncommitted on top of it.
pub fn version_string(head: &str, diff: &Diff) -> String {
    if diff.is_empty() {
        head.to_string()
    } else {
        format!("{head}+{}", &diff.hash()[..8])
    }
}

pub struct GitWorkspace {
    root: PathBuf,
    git: Option<PathBuf>,
    excludes: Vec<String>,
}

impl GitWorkspace {
    pub fn new(root: &Path, bookkeeping_paths: &[String]) -> Self {
        let git = which::which("git").ok();
        if git.is_none() {
            tracing::debug!("git not found on PATH, working tree treated as unversioned");
        }
        Self {
            root: root.to_path_buf(),
            git,
            excludes: bookkeeping_paths
                .iter()
                .map(|p| format!(":(exclude){}", p.trim_end_matches('/')))
                .collect(),
        }
    }

    fn git(&self, args: &[&str]) -> Result<String> {
        let git = self
            .git
            .as_ref()
            .ok_or_else(|| GateError::Git("git not installed".to_string()))?;
        let output = Command::new(git)
            .args(args)
            .current_dir(&self.root)
            .output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GateError::Git(stderr.trim().to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// `git <args> -- . <excludes>`
    fn git_scoped(&self, args: &[&str]) -> Result<String> {
        let mut full: Vec<&str> = args.to_vec();
        full.push("--");
        full.push(".");
        full.extend(self.excludes.iter().map(String::as_str));
        self.git(&full)
    }

    fn is_repo(&self) -> bool {
        self.git(&["rev-parse", "--is-inside-work-tree"])
            .map(|s| s.trim() == "true")
            .unwrap_or(false)
    }

    fn head(&self) -> Option<String> {
        self.git(&["rev-parse", "--short", "HEAD"])
            .ok()
            .map(|s| s.trim().to_string())
    }

    fn tracked_diff(&self) -> Result<(Vec<String>, String)> {
        let flags = ["--no-color", "--no-ext-diff"];
        if self.head().is_some() {
            let names = self.git_scoped(&["diff", "HEAD", "--name-only"])?;
            let text = self.git_scoped(&["diff", "HEAD", flags[0], flags[1]])?;
            return Ok((lines(&names), text));
        }
        // No commits yet: staged plus unstaged.
        let mut names = lines(&self.git_scoped(&["diff", "--cached", "--name-only"])?);
        names.extend(lines(&self.git_scoped(&["diff", "--name-only"])?));
        let mut text = self.git_scoped(&["diff", "--cached", flags[0], flags[1]])?;
        text.push_str(&self.git_scoped(&["diff", flags[0], flags[1]])?);
        Ok((names, text))
    }

    fn collect_diff(&self) -> Result<Diff> {
        let (mut paths, mut text) = self.tracked_diff()?;
        let untracked = lines(&self.git_scoped(&["ls-files", "--others", "--exclude-standard"])?);
        for path in untracked {
            text.push_str(&format!("+++ b/{path}\n"));
            let full = self.root.join(&path);
            let small = std::fs::metadata(&full)
                .map(|m| m.len() <= MAX_UNTRACKED_BYTES)
                .unwrap_or(false);
            if small {
                if let Ok(content) = std::fs::read_to_string(&full) {
                    for line in content.lines() {
                        text.push('+');
                        text.push_str(line);
                        text.push('\n');
                    }
                }
            }
            paths.push(path);
        }
        paths.sort();
        paths.dedup();
        Ok(Diff { paths, text })
    }
}

fn lines(s: &str) -> Vec<String> {
    s.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

impl Workspace for GitWorkspace {
    fn diff(&self) -> Diff {
        if !self.is_repo() {
            return Diff::default();
        }
        self.collect_diff().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "could not read working tree diff");
            Diff::default()
        })
    }

    fn code_version(&self) -> String {
        if !self.is_repo() {
            return UNVERSIONED.to_string();
        }
        let head = self.head().unwrap_or_else(|| "0000000".to_string());
        version_string(&head, &self.diff())
    }
}

// ---------------------------------------------------------------------------
// FsProbe
// ---------------------------------------------------------------------------

/// Evidence references are http(s) URLs with a host, or non-empty files
/// (absolute, or relative to the project root).
pub struct FsProbe {
    root: PathBuf,
}

impl FsProbe {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

impl EvidenceProbe for FsProbe {
    fn reference_exists(&self, reference: &str) -> bool {
        let reference = reference.trim();
        if reference.starts_with("https://") || reference.starts_with("http://") {
            return url::Url::parse(reference)
                .ok()
                .and_then(|u| u.host_str().map(|h| !h.is_empty()))
                .unwrap_or(false);
        }
        if reference.is_empty() {
            return false;
        }
        let root = paths::lexical_normalize(&self.root);
        let full = paths::lexical_normalize(&self.root.join(reference));
        if full == root || full.parent().is_none() {
            return false;
        }
        std::fs::metadata(&full)
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

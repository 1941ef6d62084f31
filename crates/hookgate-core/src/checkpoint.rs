//! The completion checkpoint a workflow writes before it may stop, and the
//! rules that decide which of its claims still hold.
//!
//! A claim is a boolean in `self_report`, optionally pinned to the code version
//! it was checked at via a sibling `<claim>_at_version` string. Claims are
//! resolved in one pass:
//!
//! 1. a claim pinned to a version other than the live one is stale;
//! 2. a claim that needs evidence and has none that checks out is unverified;
//! 3. every claim reachable in [`DEPENDENCIES`] from a false claim is false too.

use crate::error::Result;
use crate::paths;
use crate::store::{self, StateStore};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::sync::OnceLock;

pub const JOB_COMPLETE: &str = "is_job_complete";
pub const VERSION_SUFFIX: &str = "_at_version";

/// `(prerequisite, dependent)` edges. Invalidating a prerequisite invalidates
/// everything downstream of it.
pub const DEPENDENCIES: &[(&str, &str)] = &[
    ("linters_pass", "deployed"),
    ("deployed", "web_testing_done"),
    ("deployed", "console_errors_checked"),
    ("deployed", "api_testing_done"),
];

/// Every claim reachable from `claim`, excluding `claim` itself, in BFS order.
pub fn downstream_of(claim: &str) -> Vec<&'static str> {
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    let mut order = Vec::new();
    let mut queue: VecDeque<&str> = VecDeque::from([claim]);
    while let Some(current) = queue.pop_front() {
        for (_, dep) in DEPENDENCIES.iter().filter(|(pre, _)| *pre == current) {
            if seen.insert(dep) {
                order.push(*dep);
                queue.push_back(dep);
            }
        }
    }
    order
}

// ---------------------------------------------------------------------------
// CheckpointRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reflection {
    #[serde(default)]
    pub what_was_done: String,
    #[serde(default)]
    pub what_remains: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Boolean claims plus their `<claim>_at_version` tags.
    #[serde(default)]
    pub self_report: BTreeMap<String, Value>,
    #[serde(default)]
    pub reflection: Reflection,
    /// Claim name to an artifact path, a URL, or a bare flag.
    #[serde(default)]
    pub evidence: BTreeMap<String, Value>,
}

impl CheckpointRecord {
    pub fn claim(&self, name: &str) -> Option<bool> {
        self.self_report.get(name).and_then(Value::as_bool)
    }

    pub fn claim_version(&self, name: &str) -> Option<&str> {
        self.self_report
            .get(&format!("{name}{VERSION_SUFFIX}"))
            .and_then(Value::as_str)
    }

    /// All boolean entries of `self_report`, in name order.
    pub fn claims(&self) -> impl Iterator<Item = (&str, bool)> {
        self.self_report
            .iter()
            .filter_map(|(k, v)| v.as_bool().map(|b| (k.as_str(), b)))
    }

    pub fn set_claim(&mut self, name: &str, value: bool, version: Option<&str>) {
        self.self_report.insert(name.to_string(), Value::Bool(value));
        let tag = format!("{name}{VERSION_SUFFIX}");
        match version {
            Some(v) => {
                self.self_report.insert(tag, Value::String(v.to_string()));
            }
            None => {
                self.self_report.remove(&tag);
            }
        }
    }

    pub fn set_evidence(&mut self, claim: &str, reference: impl Into<Value>) {
        self.evidence.insert(claim.to_string(), reference.into());
    }

    /// Skeleton a workflow fills in: every known claim false, tagged at `version`.
    pub fn template(version: &str, required: &[String]) -> Self {
        let mut record = Self::default();
        record.set_claim(JOB_COMPLETE, false, None);
        let mut names: BTreeSet<&str> = required.iter().map(String::as_str).collect();
        for (pre, dep) in DEPENDENCIES {
            names.insert(pre);
            names.insert(dep);
        }
        for name in names {
            record.set_claim(name, false, Some(version));
        }
        record
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    pub fn load(store: &dyn StateStore) -> Option<Self> {
        store::load(store, paths::CHECKPOINT_FILE)
    }

    pub fn save(&self, store: &dyn StateStore) -> Result<()> {
        store::save(store, paths::CHECKPOINT_FILE, self)
    }

    pub fn remove(store: &dyn StateStore) -> Result<bool> {
        store.remove(paths::CHECKPOINT_FILE)
    }
}

// ---------------------------------------------------------------------------
// Evidence
// ---------------------------------------------------------------------------

/// Answers whether an evidence reference points at something real.
pub trait EvidenceProbe {
    fn reference_exists(&self, reference: &str) -> bool;
}

fn check_evidence(record: &CheckpointRecord, claim: &str, probe: &dyn EvidenceProbe) -> Option<String> {
    match record.evidence.get(claim) {
        None | Some(Value::Null) => Some("no evidence recorded".to_string()),
        Some(Value::Bool(false)) => Some("evidence marked false".to_string()),
        Some(Value::Bool(true)) => {
            Some("evidence is a bare `true`; record an artifact path or URL".to_string())
        }
        Some(Value::String(s)) if s.trim().is_empty() => {
            Some("evidence reference is empty".to_string())
        }
        Some(Value::String(s)) => {
            if probe.reference_exists(s.trim()) {
                None
            } else {
                Some(format!("evidence artifact '{}' not found", s.trim()))
            }
        }
        Some(_) => Some("evidence must be a path or URL string".to_string()),
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Invalidation {
    ReportedFalse,
    Stale { recorded: String, current: String },
    Untagged,
    Unverified { detail: String },
    Cascaded { from: String },
}

impl fmt::Display for Invalidation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Invalidation::ReportedFalse => f.write_str("reported false"),
            Invalidation::Stale { recorded, current } => write!(
                f,
                "checked at version {recorded}, code is now at {current}; re-verify"
            ),
            Invalidation::Untagged => write!(f, "no {VERSION_SUFFIX} tag"),
            Invalidation::Unverified { detail } => write!(f, "unverified: {detail}"),
            Invalidation::Cascaded { from } => write!(f, "depends on '{from}', which no longer holds"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimStatus {
    pub name: String,
    /// What the record said, `None` if the claim was not reported.
    pub reported: Option<bool>,
    pub holds: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalidation: Option<Invalidation>,
}

impl ClaimStatus {
    /// Asserted true, but the assertion did not survive resolution.
    pub fn was_overturned(&self) -> bool {
        self.reported == Some(true) && !self.holds
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ResolveOptions<'a> {
    pub current_version: &'a str,
    pub evidence_required: &'a [String],
    pub require_version_tags: bool,
}

/// Apply staleness, evidence and cascade rules to every reported claim, plus
/// every claim downstream of one that does not hold.
pub fn resolve_claims(
    record: &CheckpointRecord,
    opts: ResolveOptions<'_>,
    probe: &dyn EvidenceProbe,
) -> BTreeMap<String, ClaimStatus> {
    let mut table: BTreeMap<String, ClaimStatus> = BTreeMap::new();

    for (name, value) in record.claims() {
        let invalidation = if !value {
            Some(Invalidation::ReportedFalse)
        } else {
            direct_invalidation(record, name, opts, probe)
        };
        table.insert(
            name.to_string(),
            ClaimStatus {
                name: name.to_string(),
                reported: Some(value),
                holds: invalidation.is_none(),
                invalidation,
            },
        );
    }

    let roots: Vec<String> = table
        .values()
        .filter(|s| !s.holds)
        .map(|s| s.name.clone())
        .collect();
    for root in roots {
        for dep in downstream_of(&root) {
            let entry = table.entry(dep.to_string()).or_insert_with(|| ClaimStatus {
                name: dep.to_string(),
                reported: None,
                holds: false,
                invalidation: None,
            });
            entry.holds = false;
            // A claim keeps its own direct reason; the cascade only fills in the rest.
            if entry.invalidation.is_none() {
                entry.invalidation = Some(Invalidation::Cascaded { from: root.clone() });
            }
        }
    }

    table
}

fn direct_invalidation(
    record: &CheckpointRecord,
    name: &str,
    opts: ResolveOptions<'_>,
    probe: &dyn EvidenceProbe,
) -> Option<Invalidation> {
    match record.claim_version(name) {
        Some(recorded) if recorded.trim() != opts.current_version => {
            return Some(Invalidation::Stale {
                recorded: recorded.trim().to_string(),
                current: opts.current_version.to_string(),
            });
        }
        None if opts.require_version_tags && name != JOB_COMPLETE => {
            return Some(Invalidation::Untagged);
        }
        _ => {}
    }
    if opts.evidence_required.iter().any(|c| c == name) {
        if let Some(detail) = check_evidence(record, name, probe) {
            return Some(Invalidation::Unverified { detail });
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Remaining-work severity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Advisory,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn blocks(self) -> bool {
        self > Severity::Low
    }
}

static MARKER_RE: OnceLock<Regex> = OnceLock::new();

fn marker_re() -> &'static Regex {
    MARKER_RE.get_or_init(|| {
        Regex::new(
            r"(?i)^[\[(]?(advisory|nit|info|optional|low|minor|medium|med|high|critical|blocker)\b[\])]?\s*[:\-]?",
        )
        .unwrap()
    })
}

const NOTHING: &[&str] = &["none", "nothing", "n/a", "na", "-", "nothing remains"];

/// Parse one `what_remains` line. Unmarked lines count as medium.
pub fn line_severity(line: &str) -> Severity {
    let Some(caps) = marker_re().captures(line) else {
        return Severity::Medium;
    };
    match caps[1].to_ascii_lowercase().as_str() {
        "advisory" | "nit" | "info" | "optional" => Severity::Advisory,
        "low" | "minor" => Severity::Low,
        "high" => Severity::High,
        "critical" | "blocker" => Severity::Critical,
        _ => Severity::Medium,
    }
}

/// Items of `what_remains` above low/advisory severity.
pub fn blocking_remains(text: &str) -> Vec<(Severity, String)> {
    text.lines()
        .map(|l| {
            l.trim()
                .trim_start_matches(['-', '*', '•'])
                .trim_start_matches(|c: char| c.is_ascii_digit())
                .trim_start_matches(['.', ')'])
                .trim()
        })
        .filter(|l| !l.is_empty())
        .filter(|l| !NOTHING.contains(&l.trim_end_matches('.').to_ascii_lowercase().as_str()))
        .map(|l| (line_severity(l), l.to_string()))
        .filter(|(sev, _)| sev.blocks())
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

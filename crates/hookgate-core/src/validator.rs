//! Two-phase stop validation.
//!
//! ```text
//! Unchecked --Attempt{repeat: false}--> FirstBlock            (always deny, emit checklist)
//! any       --Attempt{repeat: true}---> Validating
//! Validating --Checked{passed: true}--> Allowed
//! Validating --Checked{passed: false}-> SecondBlock           (deny, name every failure)
//! ```
//!
//! The outcome of a repeat attempt depends only on the checkpoint record, the
//! live code version, the evidence on disk and the work-detection counter, so
//! [`evaluate`] is testable without a filesystem or a process.

use crate::changes::{self, ChecklistItem};
use crate::checkpoint::{
    blocking_remains, resolve_claims, CheckpointRecord, ClaimStatus, EvidenceProbe,
    ResolveOptions, JOB_COMPLETE,
};
use crate::config::Config;
use crate::decision::Decision;
use crate::error::Result;
use crate::hook::{HookEvent, HookInput};
use crate::mode;
use crate::paths;
use crate::snapshot::{self, WorkSnapshot};
use crate::state::StateRecord;
use crate::store::StateStore;
use crate::workspace::{Diff, Workspace};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopState {
    Unchecked,
    FirstBlock,
    Validating,
    Allowed,
    SecondBlock,
}

impl StopState {
    pub fn as_str(self) -> &'static str {
        match self {
            StopState::Unchecked => "unchecked",
            StopState::FirstBlock => "first_block",
            StopState::Validating => "validating",
            StopState::Allowed => "allowed",
            StopState::SecondBlock => "second_block",
        }
    }
}

impl fmt::Display for StopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopEvent {
    /// A termination attempt. `repeat` mirrors the runtime's `stop_hook_active`.
    Attempt { repeat: bool },
    Checked { passed: bool },
}

pub fn transition(state: StopState, event: StopEvent) -> StopState {
    match (state, event) {
        (_, StopEvent::Attempt { repeat: false }) => StopState::FirstBlock,
        (_, StopEvent::Attempt { repeat: true }) => StopState::Validating,
        (StopState::Validating, StopEvent::Checked { passed: true }) => StopState::Allowed,
        (StopState::Validating, StopEvent::Checked { passed: false }) => StopState::SecondBlock,
        (other, StopEvent::Checked { .. }) => other,
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

pub struct StopContext<'a> {
    pub config: &'a Config,
    pub current_version: &'a str,
    pub diff: &'a Diff,
    /// Consecutive repeat attempts with an unchanged work hash, including this one.
    pub unchanged_attempts: u32,
    pub probe: &'a dyn EvidenceProbe,
}

#[derive(Debug, Clone, Serialize)]
pub struct StopVerdict {
    pub state: StopState,
    pub decision: Decision,
    /// Phase 1 only: what to verify and report before the next attempt.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub checklist: Vec<ChecklistItem>,
    /// Phase 2 only: every unmet condition.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub claims: Vec<ClaimStatus>,
    /// Allowed despite failures because no work happened across attempts.
    pub released_by_stall: bool,
}

pub fn evaluate(
    previous: StopState,
    repeat: bool,
    record: Option<&CheckpointRecord>,
    ctx: &StopContext<'_>,
) -> StopVerdict {
    let state = transition(previous, StopEvent::Attempt { repeat });
    if state == StopState::FirstBlock {
        let checklist = changes::checklist(ctx.config, ctx.current_version, ctx.diff);
        let decision = Decision::Deny(render_checklist(&checklist));
        return StopVerdict {
            state,
            decision,
            checklist,
            failures: Vec::new(),
            claims: Vec::new(),
            released_by_stall: false,
        };
    }

    let (failures, claims) = match record {
        Some(record) => check_record(record, ctx),
        None => (
            vec![format!(
                "no readable checkpoint at {}/{}; write it before stopping",
                paths::CONTROL_DIR,
                paths::CHECKPOINT_FILE
            )],
            Vec::new(),
        ),
    };

    let stalled = snapshot::stalled(ctx.unchanged_attempts);
    let released_by_stall = stalled && !failures.is_empty();
    let passed = failures.is_empty() || stalled;
    let state = transition(state, StopEvent::Checked { passed });

    let decision = if passed {
        Decision::Allow
    } else {
        Decision::Deny(render_failures(&failures))
    };
    StopVerdict {
        state,
        decision,
        checklist: Vec::new(),
        failures,
        claims,
        released_by_stall,
    }
}

fn check_record(record: &CheckpointRecord, ctx: &StopContext<'_>) -> (Vec<String>, Vec<ClaimStatus>) {
    let table = resolve_claims(
        record,
        ResolveOptions {
            current_version: ctx.current_version,
            evidence_required: &ctx.config.evidence_required,
            require_version_tags: ctx.config.require_version_tags,
        },
        ctx.probe,
    );
    let mut failures = Vec::new();

    match table.get(JOB_COMPLETE) {
        Some(s) if s.holds => {}
        Some(s) => failures.push(format!(
            "{JOB_COMPLETE} does not hold: {}",
            s.invalidation
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "not true".to_string())
        )),
        None => failures.push(format!("{JOB_COMPLETE} is not reported")),
    }

    for required in &ctx.config.required_claims {
        if required == JOB_COMPLETE {
            continue;
        }
        match table.get(required) {
            Some(s) if s.holds => {}
            Some(s) => failures.push(format!(
                "required claim '{required}' does not hold: {}",
                s.invalidation
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "not reported".to_string())
            )),
            None => failures.push(format!("required claim '{required}' is not reported")),
        }
    }

    for status in table.values() {
        let required = ctx.config.required_claims.contains(&status.name);
        if status.was_overturned() && !required && status.name != JOB_COMPLETE {
            if let Some(why) = &status.invalidation {
                failures.push(format!("'{}' was claimed but {why}", status.name));
            }
        }
    }

    for (severity, item) in blocking_remains(&record.reflection.what_remains) {
        failures.push(format!(
            "what_remains lists unfinished work ({}): {item}",
            format!("{severity:?}").to_lowercase()
        ));
    }

    (failures, table.into_values().collect())
}

fn render_checklist(items: &[ChecklistItem]) -> String {
    let mut out = String::from("Stop blocked: report completion before stopping.\n");
    for (i, item) in items.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, item.instruction));
    }
    out.push_str("Then stop again; the checkpoint is validated on the next attempt.");
    out
}

fn render_failures(failures: &[String]) -> String {
    let mut out = String::from("Stop blocked: the completion checkpoint does not pass.\n");
    for f in failures {
        out.push_str(&format!("- {f}\n"));
    }
    out.push_str("Fix these, update the checkpoint truthfully, then stop again.");
    out
}

// ---------------------------------------------------------------------------
// Store-backed entry point
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StopOutcome {
    /// The active workflow, if any.
    pub workflow: Option<String>,
    pub version: String,
    /// `None` when no workflow is active and the stop goes through unchecked.
    pub verdict: Option<StopVerdict>,
}

impl StopOutcome {
    pub fn decision(&self) -> Decision {
        self.verdict
            .as_ref()
            .map(|v| v.decision.clone())
            .unwrap_or(Decision::Allow)
    }
}

/// Run one stop attempt against the active workflow: observe work, evaluate the
/// checkpoint, then persist the new stop state or clean up on completion.
/// A delegated sub-agent finishing is not a termination of the workflow and
/// passes through without touching any state.
pub fn run_stop(
    store: &dyn StateStore,
    workspace: &dyn Workspace,
    probe: &dyn EvidenceProbe,
    input: &HookInput,
    config: &Config,
) -> Result<StopOutcome> {
    let unchecked = StopOutcome {
        workflow: None,
        version: String::new(),
        verdict: None,
    };
    if input.event() == Some(HookEvent::SubagentStop) {
        tracing::debug!("sub-agent stop, not validated");
        return Ok(unchecked);
    }
    let Some(mut state) = mode::active_mode(store, config.ttl()) else {
        return Ok(unchecked);
    };

    let diff = workspace.diff();
    let version = workspace.code_version();
    let snap = snapshot::observe_attempt(
        store,
        input.session(),
        &diff.hash(),
        input.stop_hook_active,
    )?;
    let record = CheckpointRecord::load(store);

    let previous = state.stop_state.unwrap_or(StopState::Unchecked);
    let ctx = StopContext {
        config,
        current_version: &version,
        diff: &diff,
        unchanged_attempts: snap.unchanged_attempts,
        probe,
    };
    let verdict = evaluate(previous, input.stop_hook_active, record.as_ref(), &ctx);

    if verdict.released_by_stall {
        tracing::warn!(
            workflow = %state.workflow,
            unchanged = snap.unchanged_attempts,
            failures = verdict.failures.len(),
            "no work across stop attempts, releasing with unmet checks"
        );
    }

    if verdict.state == StopState::Allowed && config.cleanup_on_complete {
        StateRecord::remove(store, &state.workflow)?;
        CheckpointRecord::remove(store)?;
        WorkSnapshot::remove(store)?;
        tracing::info!(workflow = %state.workflow, "workflow complete, state cleared");
    } else {
        state.record_stop(verdict.state);
        state.save(store)?;
        tracing::info!(
            workflow = %state.workflow,
            state = %verdict.state,
            iteration = state.iteration,
            "stop attempt recorded"
        );
    }

    Ok(StopOutcome {
        workflow: Some(state.workflow),
        version,
        verdict: Some(verdict),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    struct AllExist;

    impl EvidenceProbe for AllExist {
        fn reference_exists(&self, _reference: &str) -> bool {
            true
        }
    }

    struct NoneExist;

    impl EvidenceProbe for NoneExist {
        fn reference_exists(&self, _reference: &str) -> bool {
            false
        }
    }

    fn ctx<'a>(config: &'a Config, version: &'a str, diff: &'a Diff, probe: &'a dyn EvidenceProbe) -> StopContext<'a> {
        StopContext {
            config,
            current_version: version,
            diff,
            unchanged_attempts: 0,
            probe,
        }
    }

    fn satisfied(version: &str) -> CheckpointRecord {
        let mut r = CheckpointRecord::default();
        r.set_claim(JOB_COMPLETE, true, None);
        for c in ["linters_pass", "deployed", "web_testing_done", "console_errors_checked", "api_testing_done", "tests_pass"] {
            r.set_claim(c, true, Some(version));
        }
        r.set_evidence("deployed", json!("logs/deploy.log"));
        r.set_evidence("tests_pass", json!("logs/tests.txt"));
        r.reflection.what_was_done = "Fixed the race and redeployed".to_string();
        r.reflection.what_remains = "none".to_string();
        r
    }

    #[test]
    fn transitions() {
        assert_eq!(
            transition(StopState::Unchecked, StopEvent::Attempt { repeat: false }),
            StopState::FirstBlock
        );
        assert_eq!(
            transition(StopState::FirstBlock, StopEvent::Attempt { repeat: true }),
            StopState::Validating
        );
        assert_eq!(
            transition(StopState::Validating, StopEvent::Checked { passed: true }),
            StopState::Allowed
        );
        assert_eq!(
            transition(StopState::Validating, StopEvent::Checked { passed: false }),
            StopState::SecondBlock
        );
        assert_eq!(
            transition(StopState::FirstBlock, StopEvent::Checked { passed: true }),
            StopState::FirstBlock
        );
    }

    #[test]
    fn first_attempt_always_blocks() {
        let cfg = Config::default();
        let diff = Diff::default();
        let record = satisfied("v1");
        let c = ctx(&cfg, "v1", &diff, &AllExist);
        let v = evaluate(StopState::Unchecked, false, Some(&record), &c);
        assert_eq!(v.state, StopState::FirstBlock);
        assert!(!v.decision.is_allow());
        assert!(!v.checklist.is_empty());
        assert!(v.decision.reason().unwrap().contains("completion-checkpoint.json"));
    }

    #[test]
    fn first_attempt_blocks_even_when_stalled() {
        let cfg = Config::default();
        let diff = Diff::default();
        let mut c = ctx(&cfg, "v1", &diff, &AllExist);
        c.unchanged_attempts = 5;
        let v = evaluate(StopState::Unchecked, false, None, &c);
        assert_eq!(v.state, StopState::FirstBlock);
    }

    #[test]
    fn second_attempt_with_satisfied_record_allows() {
        let cfg = Config::default();
        let diff = Diff::default();
        let record = satisfied("v1");
        let c = ctx(&cfg, "v1", &diff, &AllExist);
        let v = evaluate(StopState::FirstBlock, true, Some(&record), &c);
        assert_eq!(v.state, StopState::Allowed, "{:?}", v.failures);
        assert!(v.decision.is_allow());
        assert!(!v.released_by_stall);
    }

    #[test]
    fn stale_linters_block_and_cascade() {
        let cfg = Config::default();
        let diff = Diff::default();
        let mut record = satisfied("def456");
        record.set_claim("linters_pass", true, Some("abc123"));
        let c = ctx(&cfg, "def456", &diff, &AllExist);
        let v = evaluate(StopState::FirstBlock, true, Some(&record), &c);
        assert_eq!(v.state, StopState::SecondBlock);
        let reason = v.decision.reason().unwrap();
        assert!(reason.contains("linters_pass"));
        assert!(reason.contains("abc123"));
        for c in ["deployed", "web_testing_done", "console_errors_checked", "api_testing_done"] {
            assert!(reason.contains(&format!("'{c}' was claimed")), "{c} missing from: {reason}");
        }
    }

    #[test]
    fn missing_evidence_blocks() {
        let cfg = Config::default();
        let diff = Diff::default();
        let record = satisfied("v1");
        let c = ctx(&cfg, "v1", &diff, &NoneExist);
        let v = evaluate(StopState::FirstBlock, true, Some(&record), &c);
        assert_eq!(v.state, StopState::SecondBlock);
        assert!(v.decision.reason().unwrap().contains("logs/deploy.log"));
    }

    #[test]
    fn job_not_complete_blocks() {
        let cfg = Config::default();
        let diff = Diff::default();
        let mut record = satisfied("v1");
        record.set_claim(JOB_COMPLETE, false, None);
        let c = ctx(&cfg, "v1", &diff, &AllExist);
        let v = evaluate(StopState::FirstBlock, true, Some(&record), &c);
        assert!(!v.decision.is_allow());
        assert!(v.failures[0].contains(JOB_COMPLETE));
    }

    #[test]
    fn serious_remaining_work_blocks_but_advisory_does_not() {
        let cfg = Config::default();
        let diff = Diff::default();
        let c = ctx(&cfg, "v1", &diff, &AllExist);

        let mut record = satisfied("v1");
        record.reflection.what_remains = "- advisory: more docs\n- [low] rename helper".to_string();
        assert!(evaluate(StopState::FirstBlock, true, Some(&record), &c).decision.is_allow());

        record.reflection.what_remains = "high: payment retries still double-charge".to_string();
        let v = evaluate(StopState::FirstBlock, true, Some(&record), &c);
        assert!(!v.decision.is_allow());
        assert!(v.failures.iter().any(|f| f.contains("(high)")));
    }

    #[test]
    fn missing_record_blocks_on_repeat() {
        let cfg = Config::default();
        let diff = Diff::default();
        let c = ctx(&cfg, "v1", &diff, &AllExist);
        let v = evaluate(StopState::FirstBlock, true, None, &c);
        assert_eq!(v.state, StopState::SecondBlock);
        assert!(v.decision.reason().unwrap().contains("no readable checkpoint"));
    }

    #[test]
    fn required_claim_must_be_reported() {
        let cfg = Config::default();
        let diff = Diff::default();
        let mut record = CheckpointRecord::default();
        record.set_claim(JOB_COMPLETE, true, None);
        let c = ctx(&cfg, "v1", &diff, &AllExist);
        let v = evaluate(StopState::FirstBlock, true, Some(&record), &c);
        assert!(v
            .failures
            .iter()
            .any(|f| f == "required claim 'linters_pass' is not reported"));
    }

    #[test]
    fn stalled_workflow_is_released() {
        let cfg = Config::default();
        let diff = Diff::default();
        let mut record = satisfied("v1");
        record.set_claim("linters_pass", false, Some("v1"));
        let mut c = ctx(&cfg, "v1", &diff, &AllExist);

        c.unchanged_attempts = 1;
        assert!(!evaluate(StopState::SecondBlock, true, Some(&record), &c).decision.is_allow());

        c.unchanged_attempts = 2;
        let v = evaluate(StopState::SecondBlock, true, Some(&record), &c);
        assert!(v.decision.is_allow());
        assert_eq!(v.state, StopState::Allowed);
        assert!(v.released_by_stall);
        assert!(!v.failures.is_empty());
    }

    #[test]
    fn outcome_is_pure() {
        let cfg = Config::default();
        let diff = Diff::default();
        let record = satisfied("v1");
        let c = ctx(&cfg, "v2", &diff, &AllExist);
        let a = evaluate(StopState::SecondBlock, true, Some(&record), &c);
        let b = evaluate(StopState::SecondBlock, true, Some(&record), &c);
        assert_eq!(a.decision, b.decision);
        assert_eq!(a.failures, b.failures);
    }

    struct FixedWorkspace {
        version: &'static str,
        diff: Diff,
    }

    impl Workspace for FixedWorkspace {
        fn diff(&self) -> Diff {
            self.diff.clone()
        }

        fn code_version(&self) -> String {
            self.version.to_string()
        }
    }

    fn stop_input(repeat: bool) -> HookInput {
        HookInput {
            session_id: Some("s1".to_string()),
            hook_event_name: Some("Stop".to_string()),
            stop_hook_active: repeat,
            ..HookInput::default()
        }
    }

    fn subagent_stop(repeat: bool) -> HookInput {
        HookInput {
            hook_event_name: Some("SubagentStop".to_string()),
            ..stop_input(repeat)
        }
    }

    fn clean_tree() -> FixedWorkspace {
        FixedWorkspace {
            version: "v1",
            diff: Diff::default(),
        }
    }

    #[test]
    fn run_stop_without_workflow_allows() {
        let store = MemoryStore::new();
        let out = run_stop(&store, &clean_tree(), &AllExist, &stop_input(false), &Config::default()).unwrap();
        assert!(out.decision().is_allow());
        assert!(out.workflow.is_none());
        assert!(store.list().is_empty());
    }

    #[test]
    fn run_stop_two_phases_then_cleanup() {
        let store = MemoryStore::new();
        let cfg = Config::default();
        let ws = clean_tree();
        StateRecord::new("melt", "s1", true).save(&store).unwrap();

        let first = run_stop(&store, &ws, &AllExist, &stop_input(false), &cfg).unwrap();
        assert!(!first.decision().is_allow());
        let state = StateRecord::load(&store, "melt").unwrap();
        assert_eq!(state.stop_state, Some(StopState::FirstBlock));
        assert_eq!(state.iteration, 2);

        satisfied("v1").save(&store).unwrap();
        let second = run_stop(&store, &ws, &AllExist, &stop_input(true), &cfg).unwrap();
        assert!(second.decision().is_allow(), "{:?}", second.verdict);
        assert!(StateRecord::load(&store, "melt").is_none());
        assert!(CheckpointRecord::load(&store).is_none());
        assert!(WorkSnapshot::load(&store).is_none());
    }

    #[test]
    fn run_stop_records_second_block() {
        let store = MemoryStore::new();
        let cfg = Config::default();
        let ws = clean_tree();
        StateRecord::new("melt", "s1", true).save(&store).unwrap();

        run_stop(&store, &ws, &AllExist, &stop_input(false), &cfg).unwrap();
        let out = run_stop(&store, &ws, &AllExist, &stop_input(true), &cfg).unwrap();
        assert!(!out.decision().is_allow());
        let state = StateRecord::load(&store, "melt").unwrap();
        assert_eq!(state.stop_state, Some(StopState::SecondBlock));
        assert_eq!(state.iteration, 3);
    }

    #[test]
    fn run_stop_keeps_state_when_cleanup_disabled() {
        let store = MemoryStore::new();
        let cfg = Config {
            cleanup_on_complete: false,
            ..Config::default()
        };
        StateRecord::new("melt", "s1", true).save(&store).unwrap();
        satisfied("v1").save(&store).unwrap();
        let out = run_stop(&store, &clean_tree(), &AllExist, &stop_input(true), &cfg).unwrap();
        assert!(out.decision().is_allow());
        let state = StateRecord::load(&store, "melt").unwrap();
        assert_eq!(state.stop_state, Some(StopState::Allowed));
    }

    #[test]
    fn run_stop_releases_on_the_third_unchanged_attempt_seeded_or_not() {
        let cfg = Config::default();
        let ws = clean_tree();
        let seeded = MemoryStore::new();
        let unseeded = MemoryStore::new();
        for store in [&seeded, &unseeded] {
            StateRecord::new("melt", "s1", true).save(store).unwrap();
        }
        snapshot::capture_seed(&seeded, "s1", &ws.diff().hash()).unwrap();

        for (repeat, allowed) in [(false, false), (true, false), (true, true)] {
            for store in [&seeded, &unseeded] {
                let out = run_stop(store, &ws, &AllExist, &stop_input(repeat), &cfg).unwrap();
                assert_eq!(out.decision().is_allow(), allowed, "repeat={repeat}");
                if allowed {
                    assert!(out.verdict.unwrap().released_by_stall);
                }
            }
        }
    }

    #[test]
    fn subagent_stop_leaves_workflow_untouched() {
        let store = MemoryStore::new();
        let cfg = Config::default();
        let ws = clean_tree();
        StateRecord::new("melt", "s1", true).save(&store).unwrap();
        let before = StateRecord::load(&store, "melt").unwrap();

        for repeat in [false, true, true] {
            let out = run_stop(&store, &ws, &AllExist, &subagent_stop(repeat), &cfg).unwrap();
            assert!(out.decision().is_allow());
            assert!(out.verdict.is_none());
        }
        assert_eq!(StateRecord::load(&store, "melt").unwrap(), before);
        assert!(WorkSnapshot::load(&store).is_none());

        let main = run_stop(&store, &ws, &AllExist, &stop_input(false), &cfg).unwrap();
        assert!(!main.decision().is_allow());
    }
}

//! Pre-tool-use gate.
//!
//! Three independent checks, applied only while a workflow is active:
//!
//! - **Role**: a subordinate never deploys or releases.
//! - **Production**: production-targeting commands need a grant recorded at plan exit.
//! - **Plan**: nothing mutates the tree until planning is done, except writes
//!   under the bookkeeping paths.

use crate::action::{Action, ActionKind};
use crate::config::Config;
use crate::decision::Decision;
use crate::error::Result;
use crate::mode;
use crate::state::{PlanAxis, Role, StateRecord};
use crate::store::StateStore;

/// Decide a single action against the active workflow's state.
/// `None` means no workflow is active and the gate has no effect.
pub fn decide(action: &Action, state: Option<&StateRecord>, config: &Config) -> Decision {
    let Some(state) = state else {
        return Decision::Allow;
    };

    match &action.kind {
        ActionKind::ExitPlanning { .. } => return Decision::Allow,
        ActionKind::Mutate { path } if config.is_bookkeeping(path) => return Decision::Allow,
        _ => {}
    }

    if state.role() == Role::Subordinate && action.is_deploy() {
        return Decision::deny(format!(
            "{} looks like a deploy/release, and workflow '{}' is running as a delegated \
             sub-task. Only the coordinating session may deploy or release.",
            action.describe(),
            state.workflow
        ));
    }

    if action.is_production() && !is_granted(action, state) {
        return Decision::deny(format!(
            "{} targets production and no matching grant was recorded during planning. \
             Add it to the plan's allowed prompts (tool '{}') or run \
             `hookgate mode grant {} --tool {} --pattern '<command>'`.",
            action.describe(),
            action.tool,
            state.workflow,
            action.tool
        ));
    }

    if state.plan_axis() == PlanAxis::NotPlanned && action.is_mutating() {
        return Decision::deny(format!(
            "{} is blocked: workflow '{}' has not finished planning. Exit plan mode first \
             (writes under {} are always allowed).",
            action.describe(),
            state.workflow,
            config.bookkeeping_paths.join(", ")
        ));
    }

    Decision::Allow
}

fn is_granted(action: &Action, state: &StateRecord) -> bool {
    let Some(subject) = action.grant_subject() else {
        return false;
    };
    state
        .allowed_prompts
        .iter()
        .any(|p| p.matches(&action.tool, subject))
}

// ---------------------------------------------------------------------------
// Store-backed entry point
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ToolUseOutcome {
    pub decision: Decision,
    /// The active workflow, if any.
    pub workflow: Option<String>,
    /// Plan exit was recorded by this call.
    pub planned: bool,
}

/// Look up the active workflow, apply plan-exit transitions, and decide.
pub fn evaluate_tool_use(
    store: &dyn StateStore,
    action: &Action,
    config: &Config,
) -> Result<ToolUseOutcome> {
    let Some(mut state) = mode::active_mode(store, config.ttl()) else {
        return Ok(ToolUseOutcome {
            decision: Decision::Allow,
            workflow: None,
            planned: false,
        });
    };

    let mut planned = false;
    if let ActionKind::ExitPlanning { grants } = &action.kind {
        state.complete_planning(grants.iter().cloned());
        state.save(store)?;
        planned = true;
        tracing::info!(
            workflow = %state.workflow,
            grants = state.allowed_prompts.len(),
            "planning complete"
        );
    }

    let decision = decide(action, Some(&state), config);
    if let Decision::Deny(reason) = &decision {
        tracing::info!(workflow = %state.workflow, tool = %action.tool, reason, "denied");
    }
    Ok(ToolUseOutcome {
        decision,
        workflow: Some(state.workflow),
        planned,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

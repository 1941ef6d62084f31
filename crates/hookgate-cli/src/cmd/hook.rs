use crate::output::print_json;
use crate::root;
use anyhow::Context;
use chrono::Utc;
use clap::Subcommand;
use hookgate_core::{
    action::Action,
    config::{CommandPatterns, Config},
    decision::{Decision, PermissionOutput, EXIT_ALLOW},
    gc,
    hook::{HookEvent, HookInput},
    mode, permission, snapshot,
    store::FsStore,
    validator,
    workspace::{FsProbe, GitWorkspace, Workspace},
};
use std::io::Read;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum HookSubcommand {
    /// Gate a tool call before it runs
    PreToolUse,

    /// Validate a stop attempt (SubagentStop events pass through)
    Stop,

    /// Sweep expired state and seed work detection
    SessionStart,
}

impl HookSubcommand {
    fn expects(&self, event: HookEvent) -> bool {
        match self {
            HookSubcommand::PreToolUse => event == HookEvent::PreToolUse,
            HookSubcommand::Stop => event.is_termination(),
            HookSubcommand::SessionStart => event == HookEvent::SessionStart,
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Handle one hook event and exit. Any failure is logged and allows.
pub fn run(explicit_root: Option<&Path>, subcmd: HookSubcommand) -> ! {
    let code = match handle(explicit_root, subcmd) {
        Ok(decision) => {
            if let Decision::Deny(reason) = &decision {
                eprintln!("{reason}");
            }
            decision.exit_code()
        }
        Err(e) => {
            tracing::error!("hook failed, allowing: {e:#}");
            EXIT_ALLOW
        }
    };
    std::process::exit(code)
}

fn handle(explicit_root: Option<&Path>, subcmd: HookSubcommand) -> anyhow::Result<Decision> {
    let mut raw = String::new();
    std::io::stdin()
        .read_to_string(&mut raw)
        .context("failed to read hook input")?;
    let input = HookInput::parse(&raw).context("hook input is not valid JSON")?;

    if let Some(event) = input.event() {
        if !subcmd.expects(event) {
            tracing::debug!(event = %event, "hook wired to an unexpected event");
        }
    }

    let root = hook_root(explicit_root, input.cwd.as_deref());
    let config = Config::load_or_default(&root);
    let store = FsStore::for_root(&root);

    match subcmd {
        HookSubcommand::PreToolUse => pre_tool_use(&root, &store, &config, &input),
        HookSubcommand::Stop => stop(&root, &store, &config, &input),
        HookSubcommand::SessionStart => session_start(&root, &store, &config, &input),
    }
}

fn hook_root(explicit: Option<&Path>, cwd: Option<&Path>) -> PathBuf {
    match (explicit, cwd) {
        (Some(r), _) => r.to_path_buf(),
        (None, Some(cwd)) => root::resolve_from(cwd),
        (None, None) => root::resolve_root(None),
    }
}

// ---------------------------------------------------------------------------
// pre-tool-use
// ---------------------------------------------------------------------------

fn pre_tool_use(
    root: &Path,
    store: &FsStore,
    config: &Config,
    input: &HookInput,
) -> anyhow::Result<Decision> {
    let tool = input.tool_name.as_deref().unwrap_or("");
    let tool_input = input.tool_input.clone().unwrap_or_default();
    let patterns = CommandPatterns::from_config(config);
    let action = Action::classify(tool, &tool_input, root, &patterns);

    let outcome = permission::evaluate_tool_use(store, &action, config)?;
    if let (Decision::Allow, Some(workflow)) = (&outcome.decision, &outcome.workflow) {
        if config.auto_approve {
            print_json(&PermissionOutput::approve(workflow))?;
        }
    }
    Ok(outcome.decision)
}

// ---------------------------------------------------------------------------
// stop
// ---------------------------------------------------------------------------

fn stop(root: &Path, store: &FsStore, config: &Config, input: &HookInput) -> anyhow::Result<Decision> {
    let workspace = GitWorkspace::new(root, &config.bookkeeping_paths);
    let probe = FsProbe::new(root);
    let outcome = validator::run_stop(store, &workspace, &probe, input, config)?;

    if let Some(verdict) = &outcome.verdict {
        if verdict.released_by_stall {
            eprintln!(
                "hookgate: no new work since the last stop attempts; releasing with {} unmet check(s)",
                verdict.failures.len()
            );
        }
    }
    Ok(outcome.decision())
}

// ---------------------------------------------------------------------------
// session-start
// ---------------------------------------------------------------------------

fn session_start(
    root: &Path,
    store: &FsStore,
    config: &Config,
    input: &HookInput,
) -> anyhow::Result<Decision> {
    let swept = gc::sweep(store, config.ttl(), Utc::now(), false)?;
    if !swept.is_empty() {
        tracing::info!(count = swept.len(), "expired control files removed at session start");
    }

    if mode::active_mode(store, config.ttl()).is_some() {
        let workspace = GitWorkspace::new(root, &config.bookkeeping_paths);
        snapshot::capture_seed(store, input.session(), &workspace.diff().hash())?;
    }
    Ok(Decision::Allow)
}

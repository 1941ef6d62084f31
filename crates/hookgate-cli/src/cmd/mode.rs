use crate::output::{print_json, print_table};
use anyhow::Context;
use chrono::Utc;
use clap::Subcommand;
use hookgate_core::{
    config::Config,
    mode, paths,
    state::{AllowedPrompt, PlanAxis, Role, StateRecord},
    store::{FsStore, StateStore},
    GateError,
};
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum ModeSubcommand {
    /// Start an autonomous workflow in this checkout
    Start {
        /// Workflow name (lowercase, hyphens), e.g. fix-and-verify
        workflow: String,
        /// Run as a delegated sub-task: never allowed to deploy or release
        #[arg(long)]
        subordinate: bool,
        /// Session id to record (default: a generated one)
        #[arg(long)]
        session: Option<String>,
        /// Replace a workflow of the same name that is still live
        #[arg(long)]
        force: bool,
    },

    /// List workflow state in this checkout
    Status,

    /// Mark planning complete for a workflow
    ExitPlan { workflow: String },

    /// Record a production grant for a workflow
    Grant {
        workflow: String,
        /// Tool the grant applies to, e.g. Bash
        #[arg(long)]
        tool: String,
        /// Exact command, or a `*` glob
        #[arg(long)]
        pattern: String,
    },

    /// End a workflow and remove its state
    Stop { workflow: String },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(root: &Path, subcmd: ModeSubcommand, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let store = FsStore::for_root(root);
    match subcmd {
        ModeSubcommand::Start {
            workflow,
            subordinate,
            session,
            force,
        } => start(&store, &config, &workflow, subordinate, session, force, json),
        ModeSubcommand::Status => status(&store, &config, json),
        ModeSubcommand::ExitPlan { workflow } => exit_plan(&store, &workflow, json),
        ModeSubcommand::Grant {
            workflow,
            tool,
            pattern,
        } => grant(&store, &workflow, &tool, &pattern, json),
        ModeSubcommand::Stop { workflow } => stop(&store, &workflow, json),
    }
}

fn load_existing(store: &dyn StateStore, workflow: &str) -> anyhow::Result<StateRecord> {
    paths::validate_workflow(workflow)?;
    StateRecord::load(store, workflow).ok_or_else(|| GateError::WorkflowNotFound(workflow.to_string()).into())
}

// ---------------------------------------------------------------------------
// start
// ---------------------------------------------------------------------------

fn start(
    store: &dyn StateStore,
    config: &Config,
    workflow: &str,
    subordinate: bool,
    session: Option<String>,
    force: bool,
    json: bool,
) -> anyhow::Result<()> {
    paths::validate_workflow(workflow)?;
    if !force && mode::is_mode_active(store, workflow, config.ttl()) {
        return Err(GateError::WorkflowActive(workflow.to_string()).into());
    }

    let session = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let record = StateRecord::new(workflow, session, !subordinate);
    record
        .save(store)
        .with_context(|| format!("failed to save state for '{workflow}'"))?;
    tracing::info!(workflow, coordinator = record.coordinator, "workflow started");

    if json {
        print_json(&record)?;
    } else {
        println!(
            "Started '{workflow}' as {} (session {}). Planning is required before edits.",
            role_label(record.role()),
            record.session_id
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// status
// ---------------------------------------------------------------------------

fn status(store: &dyn StateStore, config: &Config, json: bool) -> anyhow::Result<()> {
    let now = Utc::now();
    let ttl = config.ttl();
    let records: Vec<StateRecord> = store
        .list()
        .iter()
        .filter_map(|f| paths::workflow_from_file_name(&f.name))
        .filter_map(|w| StateRecord::load(store, w))
        .collect();
    let active = mode::active_mode_at(store, ttl, now).map(|r| r.workflow);

    if json {
        #[derive(serde::Serialize)]
        struct Row<'a> {
            #[serde(flatten)]
            record: &'a StateRecord,
            active: bool,
            expired: bool,
        }
        let rows: Vec<Row> = records
            .iter()
            .map(|r| Row {
                record: r,
                active: active.as_deref() == Some(r.workflow.as_str()),
                expired: r.is_expired(ttl, now),
            })
            .collect();
        return print_json(&rows);
    }

    if records.is_empty() {
        println!("No workflow state. The gate is inactive.");
        return Ok(());
    }

    let rows: Vec<Vec<String>> = records
        .iter()
        .map(|r| {
            let marker = if active.as_deref() == Some(r.workflow.as_str()) {
                "*"
            } else {
                ""
            };
            let expiry = if r.is_expired(ttl, now) {
                "expired".to_string()
            } else {
                r.expires_at(ttl).format("%Y-%m-%d %H:%M UTC").to_string()
            };
            vec![
                format!("{}{marker}", r.workflow),
                role_label(r.role()).to_string(),
                match r.plan_axis() {
                    PlanAxis::Planned => "planned".to_string(),
                    PlanAxis::NotPlanned => "planning".to_string(),
                },
                r.iteration.to_string(),
                r.stop_state.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string()),
                r.allowed_prompts.len().to_string(),
                expiry,
            ]
        })
        .collect();
    print_table(
        &["WORKFLOW", "ROLE", "PLAN", "ITER", "STOP", "GRANTS", "EXPIRES"],
        &rows,
    );
    Ok(())
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::Coordinator => "coordinator",
        Role::Subordinate => "subordinate",
    }
}

// ---------------------------------------------------------------------------
// exit-plan
// ---------------------------------------------------------------------------

fn exit_plan(store: &dyn StateStore, workflow: &str, json: bool) -> anyhow::Result<()> {
    let mut record = load_existing(store, workflow)?;
    let already = record.plan_axis() == PlanAxis::Planned;
    record.complete_planning(Vec::new());
    record.save(store).context("failed to save state")?;

    if json {
        print_json(&record)?;
    } else if already {
        println!("'{workflow}' was already past planning.");
    } else {
        println!("'{workflow}' is past planning; edits are allowed.");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// grant
// ---------------------------------------------------------------------------

fn grant(store: &dyn StateStore, workflow: &str, tool: &str, pattern: &str, json: bool) -> anyhow::Result<()> {
    if tool.trim().is_empty() || pattern.trim().is_empty() {
        anyhow::bail!("--tool and --pattern must not be empty");
    }
    let mut record = load_existing(store, workflow)?;
    let added = record.grant(AllowedPrompt::new(tool, pattern));
    record.save(store).context("failed to save state")?;

    if json {
        print_json(&record.allowed_prompts)?;
    } else if added {
        println!("Granted {tool} `{pattern}` to '{workflow}'.");
    } else {
        println!("'{workflow}' already has that grant.");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// stop
// ---------------------------------------------------------------------------

fn stop(store: &dyn StateStore, workflow: &str, json: bool) -> anyhow::Result<()> {
    paths::validate_workflow(workflow)?;
    if !StateRecord::remove(store, workflow).context("failed to remove state")? {
        return Err(GateError::WorkflowNotFound(workflow.to_string()).into());
    }
    if json {
        print_json(&serde_json::json!({ "workflow": workflow, "removed": true }))?;
    } else {
        println!("Ended '{workflow}'.");
    }
    Ok(())
}

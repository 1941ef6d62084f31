use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use hookgate_core::{
    changes,
    checkpoint::CheckpointRecord,
    config::Config,
    io, paths,
    snapshot::WorkSnapshot,
    store::FsStore,
    validator::{self, StopContext, StopState},
    workspace::{FsProbe, GitWorkspace, Workspace},
};
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum CheckpointSubcommand {
    /// Print the code version claims should be tagged with
    Version,

    /// Print the checklist a first stop attempt would show
    Checklist,

    /// Validate the checkpoint as a repeat stop attempt would, without recording anything
    Check,

    /// Write a checkpoint template with every known claim false
    Init,

    /// Remove the checkpoint and the work snapshot
    Clear,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(root: &Path, subcmd: CheckpointSubcommand, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    match subcmd {
        CheckpointSubcommand::Version => version(root, &config, json),
        CheckpointSubcommand::Checklist => checklist(root, &config, json),
        CheckpointSubcommand::Check => check(root, &config, json),
        CheckpointSubcommand::Init => init(root, &config, json),
        CheckpointSubcommand::Clear => clear(root, json),
    }
}

// ---------------------------------------------------------------------------
// version
// ---------------------------------------------------------------------------

fn version(root: &Path, config: &Config, json: bool) -> anyhow::Result<()> {
    let workspace = GitWorkspace::new(root, &config.bookkeeping_paths);
    let version = workspace.code_version();
    if json {
        let diff = workspace.diff();
        print_json(&serde_json::json!({
            "version": version,
            "changed_paths": diff.paths,
            "diff_hash": diff.hash(),
        }))?;
    } else {
        println!("{version}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// checklist
// ---------------------------------------------------------------------------

fn checklist(root: &Path, config: &Config, json: bool) -> anyhow::Result<()> {
    let workspace = GitWorkspace::new(root, &config.bookkeeping_paths);
    let diff = workspace.diff();
    let items = changes::checklist(config, &workspace.code_version(), &diff);
    if json {
        return print_json(&items);
    }
    for (i, item) in items.iter().enumerate() {
        println!("{:>2}. [{}] {}", i + 1, item.source, item.instruction);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// check
// ---------------------------------------------------------------------------

fn check(root: &Path, config: &Config, json: bool) -> anyhow::Result<()> {
    let store = FsStore::for_root(root);
    let workspace = GitWorkspace::new(root, &config.bookkeeping_paths);
    let probe = FsProbe::new(root);
    let diff = workspace.diff();
    let version = workspace.code_version();
    let record = CheckpointRecord::load(&store);

    let ctx = StopContext {
        config,
        current_version: &version,
        diff: &diff,
        unchanged_attempts: 0,
        probe: &probe,
    };
    let verdict = validator::evaluate(StopState::FirstBlock, true, record.as_ref(), &ctx);

    if json {
        print_json(&verdict)?;
    } else {
        println!("Code version: {version}");
        if !verdict.claims.is_empty() {
            let rows: Vec<Vec<String>> = verdict
                .claims
                .iter()
                .map(|c| {
                    vec![
                        c.name.clone(),
                        c.reported
                            .map(|b| b.to_string())
                            .unwrap_or_else(|| "-".to_string()),
                        if c.holds { "yes" } else { "no" }.to_string(),
                        c.invalidation
                            .as_ref()
                            .map(ToString::to_string)
                            .unwrap_or_default(),
                    ]
                })
                .collect();
            print_table(&["CLAIM", "REPORTED", "HOLDS", "REASON"], &rows);
        }
        if verdict.failures.is_empty() {
            println!("Checkpoint passes. A repeat stop attempt would be allowed.");
        } else {
            println!("Checkpoint fails:");
            for f in &verdict.failures {
                println!("  - {f}");
            }
        }
    }

    if !verdict.decision.is_allow() {
        anyhow::bail!("checkpoint does not pass");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// init
// ---------------------------------------------------------------------------

fn init(root: &Path, config: &Config, json: bool) -> anyhow::Result<()> {
    let workspace = GitWorkspace::new(root, &config.bookkeeping_paths);
    let version = workspace.code_version();
    let template = CheckpointRecord::template(&version, &config.required_claims);
    let path = paths::control_dir(root).join(paths::CHECKPOINT_FILE);
    let data = format!("{}\n", serde_json::to_string_pretty(&template)?);
    let created = io::write_if_missing(&path, data.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;

    if json {
        print_json(&serde_json::json!({
            "path": path,
            "created": created,
            "version": version,
        }))?;
    } else if created {
        println!("Wrote {} at version {version}.", path.display());
    } else {
        println!("{} already exists; left unchanged.", path.display());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// clear
// ---------------------------------------------------------------------------

fn clear(root: &Path, json: bool) -> anyhow::Result<()> {
    let store = FsStore::for_root(root);
    let checkpoint = CheckpointRecord::remove(&store).context("failed to remove checkpoint")?;
    let snapshot = WorkSnapshot::remove(&store).context("failed to remove snapshot")?;
    if json {
        print_json(&serde_json::json!({
            "checkpoint_removed": checkpoint,
            "snapshot_removed": snapshot,
        }))?;
    } else if checkpoint || snapshot {
        println!("Cleared completion checkpoint and work snapshot.");
    } else {
        println!("Nothing to clear.");
    }
    Ok(())
}

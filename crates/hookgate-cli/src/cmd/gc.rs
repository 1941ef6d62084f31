use crate::output::{print_json, print_table};
use anyhow::Context;
use chrono::Utc;
use hookgate_core::{config::Config, gc, store::FsStore};
use std::path::Path;

pub fn run(root: &Path, dry_run: bool, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let store = FsStore::for_root(root);
    let swept = gc::sweep(&store, config.ttl(), Utc::now(), dry_run).context("sweep failed")?;

    if json {
        return print_json(&serde_json::json!({
            "dry_run": dry_run,
            "swept": swept,
        }));
    }

    if swept.is_empty() {
        println!("Nothing to sweep.");
        return Ok(());
    }
    let rows: Vec<Vec<String>> = swept
        .iter()
        .map(|s| vec![s.name.clone(), format!("{:?}", s.reason).to_lowercase()])
        .collect();
    print_table(&["FILE", "REASON"], &rows);
    if dry_run {
        println!("(dry run: nothing removed)");
    }
    Ok(())
}

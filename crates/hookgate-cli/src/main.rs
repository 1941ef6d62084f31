mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{
    checkpoint::CheckpointSubcommand, config::ConfigSubcommand, hook::HookSubcommand,
    mode::ModeSubcommand,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "hookgate",
    about = "Lifecycle hook gate for autonomous coding-agent workflows",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: the hook's cwd, else auto-detect from .claude/ or .git/)
    #[arg(long, global = true, env = "HOOKGATE_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Handle a lifecycle hook event read from stdin (exit 0 = allow, 2 = deny)
    Hook {
        #[command(subcommand)]
        subcommand: HookSubcommand,
    },

    /// Start, inspect and end autonomous workflows
    Mode {
        #[command(subcommand)]
        subcommand: ModeSubcommand,
    },

    /// Inspect and validate the completion checkpoint
    Checkpoint {
        #[command(subcommand)]
        subcommand: CheckpointSubcommand,
    },

    /// Remove expired workflow state and stale control files
    Gc {
        /// List what would be removed without removing it
        #[arg(long)]
        dry_run: bool,
    },

    /// Show or validate the gate configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    // stdout carries hook output; diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        // Hooks pick their own root from the event's cwd and always exit 0 or 2.
        Commands::Hook { subcommand } => cmd::hook::run(cli.root.as_deref(), subcommand),
        Commands::Mode { subcommand } => cmd::mode::run(&root, subcommand, cli.json),
        Commands::Checkpoint { subcommand } => cmd::checkpoint::run(&root, subcommand, cli.json),
        Commands::Gc { dry_run } => cmd::gc::run(&root, dry_run, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

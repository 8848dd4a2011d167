use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use plansmith_agent::PlanOrchestrator;
use plansmith_core::AppConfig;
use std::path::{Path, PathBuf};

mod commands;
mod output;

use commands::config::{run_analyze, run_config};
use commands::history::{run_accept, run_history, run_redo, run_reject, run_revert};
use commands::plan::{run_apply, run_ask, run_extract};

#[derive(Parser)]
#[command(name = "plansmith")]
#[command(about = "Turns model responses into checkpointed repository edits", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    json: bool,

    /// Log each step to stderr.
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Repository to operate on (defaults to the current directory).
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a model response (markdown or JSON plan) read from FILE or stdin.
    Apply(ApplyArgs),
    /// Show which files a response would write, without writing them.
    Extract(InputArg),
    /// Ask the configured model for a plan and execute it.
    Ask(AskArgs),
    /// Write the latest recorded content for PATH.
    Accept(PathArg),
    /// Restore PATH to its content before the latest recorded change.
    Reject(PathArg),
    /// Undo every change at or after checkpoint INDEX.
    Revert(IndexArg),
    /// Replay reverted changes up to checkpoint INDEX.
    Redo(IndexArg),
    /// List recorded changes and the current checkpoint.
    History,
    /// Summarize the repository as seen by the index.
    Analyze,
    /// Print the merged settings.
    Config,
}

#[derive(Args)]
struct InputArg {
    file: Option<PathBuf>,
}

#[derive(Args)]
struct ApplyArgs {
    file: Option<PathBuf>,

    /// Record writes as pending suggestions instead of touching files.
    #[arg(long)]
    stage: bool,
}

#[derive(Args)]
struct AskArgs {
    #[arg(required = true, trailing_var_arg = true)]
    prompt: Vec<String>,

    #[arg(long)]
    stage: bool,
}

#[derive(Args)]
struct PathArg {
    path: String,
}

#[derive(Args)]
struct IndexArg {
    #[arg(allow_negative_numbers = true)]
    index: i64,
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("{}", plansmith_errors::guidance_for(&err).format());
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let workspace = match cli.workspace {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    let json_mode = cli.json;
    match cli.command {
        Commands::Apply(args) => {
            let mut agent = open_agent(&workspace, cli.verbose, args.stage)?;
            run_apply(&mut agent, args.file.as_deref(), json_mode)
        }
        Commands::Extract(args) => {
            let agent = open_agent(&workspace, cli.verbose, false)?;
            run_extract(&agent, args.file.as_deref(), json_mode)
        }
        Commands::Ask(args) => {
            let mut agent = open_agent(&workspace, cli.verbose, args.stage)?;
            run_ask(&mut agent, &args.prompt.join(" "), json_mode)
        }
        Commands::Accept(args) => {
            let mut agent = open_agent(&workspace, cli.verbose, false)?;
            run_accept(&mut agent, &args.path, json_mode)
        }
        Commands::Reject(args) => {
            let mut agent = open_agent(&workspace, cli.verbose, false)?;
            run_reject(&mut agent, &args.path, json_mode)
        }
        Commands::Revert(args) => {
            let mut agent = open_agent(&workspace, cli.verbose, false)?;
            run_revert(&mut agent, args.index, json_mode)
        }
        Commands::Redo(args) => {
            let mut agent = open_agent(&workspace, cli.verbose, false)?;
            run_redo(&mut agent, args.index, json_mode)
        }
        Commands::History => {
            let agent = open_agent(&workspace, cli.verbose, false)?;
            run_history(&agent, json_mode)
        }
        Commands::Analyze => {
            let agent = open_agent(&workspace, cli.verbose, false)?;
            run_analyze(&agent, json_mode)
        }
        Commands::Config => run_config(&workspace, json_mode),
    }
}

fn open_agent(workspace: &Path, verbose: bool, stage: bool) -> Result<PlanOrchestrator> {
    let mut cfg = AppConfig::load(workspace)?;
    if stage {
        cfg.agent.stage_writes = true;
    }
    let mut agent = PlanOrchestrator::from_config(workspace, &cfg)?;
    agent.set_verbose(verbose);
    Ok(agent)
}

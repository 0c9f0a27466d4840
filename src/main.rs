mod cli;
mod commands;
mod corpus;
mod identity;
mod metrics;
mod mining;
mod model;
mod qrels;
mod sweep;
mod trec;
mod util;

use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};

fn main() {
    init_tracing();

    if let Err(err) = run() {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Qrels(args) => commands::qrels::run(args),
        Commands::Eval(args) => commands::eval::run(args),
        Commands::MinePairs(args) => commands::pairs::run(args),
        Commands::Sweep(args) => commands::sweep::run(args),
        Commands::Compare(args) => commands::sweep::compare(args),
        Commands::NormalizeRun(args) => commands::normalize::run(args),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

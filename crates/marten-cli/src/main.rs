use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::filter::EnvFilter;

mod commands;
mod config;

use commands::{check::CheckCommand, dump::DumpCommand, run::RunCommand};

#[derive(Parser)]
#[command(name = "marten", version, about = "Marten bytecode VM")]
struct Cli {
    /// Path to marten.toml (searched upward from the current directory by default)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log more (-v debug, -vv trace); RUST_LOG adds directives
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a compiled unit
    Run(RunCommand),
    /// Print the disassembly of a unit and its nested functions
    Dump(DumpCommand),
    /// Validate a unit without running it
    Check(CheckCommand),
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.parse()?))
        .init();

    let config = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run(cmd) => cmd.run(&config),
        Commands::Dump(cmd) => cmd.run(&config).map(|()| ExitCode::SUCCESS),
        Commands::Check(cmd) => cmd.run().map(|()| ExitCode::SUCCESS),
    }
}

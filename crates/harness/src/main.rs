//! `tether` - run a multi-service application described by a manifest

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::Level;

mod commands;

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Tether - local multi-service orchestration")]
#[command(version)]
struct Cli {
    /// Manifest file path
    #[arg(short, long, global = true, default_value = "tether.yaml")]
    manifest: PathBuf,

    /// Log engine activity at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the manifest and show how each service would run
    Validate {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Table)]
        format: Format,
    },

    /// Start every service and keep them running until interrupted
    Run {
        /// Reconcile services onto the cluster instead of this machine
        #[arg(long)]
        cluster: bool,

        /// Mirror service output to stdout
        #[arg(short, long)]
        follow: bool,
    },
}

/// Output format for `validate`
#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human-readable table
    Table,
    /// The parsed manifest as JSON
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let Cli { manifest, command, .. } = cli;
    smol::block_on(async move {
        match command {
            Commands::Validate { format } => commands::validate::run(&manifest, format),
            Commands::Run { cluster, follow } => commands::run::run(&manifest, cluster, follow).await,
        }
    })
}

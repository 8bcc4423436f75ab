mod cmd;
mod output;
mod reporting;
mod sim;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "pipecheck",
    about = "Run declarative scenarios against a simulated media pipeline",
    version,
    propagate_version = true
)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a scenario file against the built-in simulated pipeline
    Run {
        /// Scenario file (YAML)
        scenario: PathBuf,

        /// Simulated media duration in seconds
        #[arg(long, default_value = "60")]
        media_duration: f64,

        /// Number of simulated sink elements
        #[arg(long, default_value = "2")]
        sinks: usize,

        /// Abort if the scenario has not finished after this much
        /// simulated time, in seconds
        #[arg(long, default_value = "600")]
        max_run_time: f64,
    },

    /// Parse and validate a scenario without executing it
    Check {
        /// Scenario file (YAML)
        scenario: PathBuf,
    },

    /// List registered action types, or describe one
    Types {
        /// Action type to describe in full
        name: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Run {
            scenario,
            media_duration,
            sinks,
            max_run_time,
        } => cmd::run::run(&scenario, media_duration, sinks, max_run_time, cli.json),
        Commands::Check { scenario } => cmd::check::run(&scenario, cli.json),
        Commands::Types { name } => cmd::types::run(name.as_deref(), cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

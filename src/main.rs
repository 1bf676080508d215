// ABOUTME: Entry point for the cutover CLI application.
// ABOUTME: Parses arguments and dispatches to appropriate command handlers.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use cutover::config::{self, Config};
use cutover::error::{Error, Result};
use cutover::output::{Output, OutputMode};
use cutover::pipeline::OperatorRequest;
use cutover::types::{Revision, RunId};
use std::env;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // RUST_LOG overrides the verbose flag.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let output = Output::new(OutputMode::from_flags(cli.quiet, cli.json));

    if let Err(e) = run(cli, output).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, mut output: Output) -> Result<()> {
    let cwd = env::current_dir()?;

    if let Commands::Init { service, force } = &cli.command {
        let path = config::init_config(&cwd, service.as_deref(), *force)?;
        output.success(&format!("Created {}", path.display()));
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::discover(&cwd)?,
    };

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Serve { force_lock } => {
            output.start_timer();
            commands::serve(config, force_lock, &output).await
        }
        Commands::Trigger { revision } => {
            let revision = revision
                .map(|r| Revision::parse(&r))
                .transpose()
                .map_err(|e| Error::InvalidArgument(e.to_string()))?;
            commands::submit(&config, OperatorRequest::Trigger { revision }, &output)
        }
        Commands::Approve { run } => commands::submit(
            &config,
            OperatorRequest::Approve {
                run: RunId::new(run),
            },
            &output,
        ),
        Commands::Reject { run, reason } => commands::submit(
            &config,
            OperatorRequest::Reject {
                run: RunId::new(run),
                reason,
            },
            &output,
        ),
        Commands::Cancel { run } => commands::submit(
            &config,
            OperatorRequest::Cancel {
                run: RunId::new(run),
            },
            &output,
        ),
        Commands::Status => commands::status(&config, &output),
    }
}

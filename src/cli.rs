// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cutover")]
#[command(about = "Blue/green releases with weighted traffic cutover and automatic rollback")]
#[command(version)]
pub struct Cli {
    /// Path to the config file (default: discover cutover.yml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print final results
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Machine-readable JSON output
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new cutover.yml configuration file
    Init {
        /// Service name
        #[arg(short, long)]
        service: Option<String>,

        /// Overwrite an existing config file
        #[arg(short, long)]
        force: bool,
    },

    /// Run the release daemon: pipeline, cutover controller, and proxy
    Serve {
        /// Break an existing state lock (use if a previous daemon crashed)
        #[arg(long)]
        force_lock: bool,
    },

    /// Start a pipeline run
    Trigger {
        /// Source revision to release (default: latest)
        #[arg(short, long)]
        revision: Option<String>,
    },

    /// Approve a run awaiting approval
    Approve {
        /// Run id
        run: String,
    },

    /// Reject a run awaiting approval
    Reject {
        /// Run id
        run: String,

        /// Why the run was rejected
        #[arg(short, long)]
        reason: String,
    },

    /// Cancel a run; a run already deploying is rolled back
    Cancel {
        /// Run id
        run: String,
    },

    /// Show routing, the latest deployment, and recent runs
    Status,
}

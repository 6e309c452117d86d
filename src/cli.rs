// Command-line surface. Everything else is configured through the
// environment (see `infra/settings`).

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "docmerge",
    version,
    about = "Merge spreadsheet rows into documents, export them as PDF and email them"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Process every pending row once
    Run,
    /// Run once a day at TRIGGER_HOUR in TRIGGER_TIMEZONE until interrupted
    Schedule,
    /// Create the solution folder, the private template copy and the PDF folder
    Install,
    /// Show the most recent per-record outcomes
    History {
        /// Number of entries to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

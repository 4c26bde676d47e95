use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ffjob")]
#[command(about = "Compile and run transcode jobs", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compile a job file and print the command without executing (dry run)
    PrintCmd {
        /// Path to the job description (JSON)
        job: PathBuf,
    },

    /// Compile a job file and run it locally
    Run {
        /// Path to the job description (JSON)
        job: PathBuf,

        /// Kill the process after this many seconds
        #[arg(long, default_value_t = 6 * 3600)]
        timeout_secs: u64,
    },
}

pub fn parse() -> Cli {
    Cli::parse()
}

use std::fs;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::warn;

mod cli;

use ffjob::job::{self, FfmpegJob};
use ffjob::process::{LocalProcessFactory, ProcessRunner};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let cli = cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: cli::Cli) -> Result<ExitCode> {
    match cli.command {
        cli::Commands::PrintCmd { job } => {
            let compiled = compile_job_file(&job)?;
            println!("{} {}", compiled.executable, compiled.arguments);
            Ok(ExitCode::SUCCESS)
        }
        cli::Commands::Run { job, timeout_secs } => {
            let compiled = compile_job_file(&job)?;
            let runner = ProcessRunner::new(Arc::new(LocalProcessFactory));
            let result = runner.run(
                &compiled.executable,
                &compiled.arguments,
                Duration::from_secs(timeout_secs),
            )?;

            print!("{}", result.output);
            eprint!("{}", result.error);
            if result.exit_code == 0 {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(result.exit_code.clamp(1, 255) as u8))
            }
        }
    }
}

fn compile_job_file(path: &Path) -> Result<job::CompiledCommand> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read job file {}", path.display()))?;
    let parsed: FfmpegJob = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse job file {}", path.display()))?;

    for stream in &parsed.streams {
        if !stream.codec.is_valid() {
            warn!(codec = stream.codec.name(), "codec quality value out of range");
        }
    }

    Ok(job::compile(&parsed))
}

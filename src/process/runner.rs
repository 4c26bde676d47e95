//! One-shot process execution with output aggregation and a timeout-kill
//! race.

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::ProcessError;

use super::{ProcessDescriptor, ProcessEvent, ProcessFactory};

/// Outcome of a bounded run. A timeout is not an error: the process is
/// killed and the result carries the killed exit code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub exit_code: i32,
    pub output: String,
    pub error: String,
}

/// Runs processes obtained from a factory, one controller per call, so any
/// number of runs may proceed concurrently.
pub struct ProcessRunner {
    factory: Arc<dyn ProcessFactory>,
}

impl ProcessRunner {
    pub fn new(factory: Arc<dyn ProcessFactory>) -> Self {
        Self { factory }
    }

    /// Run to completion or until `timeout` elapses, whichever is first.
    ///
    /// Each produced line is appended to its accumulator with a trailing
    /// newline. On timeout the process is killed (at most once) and the
    /// result reflects whatever was captured before termination.
    pub fn run(
        &self,
        file_name: &str,
        arguments: &str,
        timeout: Duration,
    ) -> Result<RunResult, ProcessError> {
        if file_name.trim().is_empty() {
            return Err(ProcessError::InvalidDescriptor);
        }

        let mut process = self.factory.create();
        let (tx, rx) = mpsc::channel();
        process.set_event_sink(tx);
        process.start(&ProcessDescriptor::new(file_name, arguments))?;

        let deadline = Instant::now() + timeout;
        let mut output = String::new();
        let mut error = String::new();
        let mut killed = false;
        let mut exited = false;

        loop {
            if !killed && !exited && Instant::now() >= deadline {
                warn!(file_name, ?timeout, "run timed out, killing process");
                let _ = process.kill();
                killed = true;
            }

            // Once the process is gone (killed or exited) keep a short drain
            // budget: reader threads may still be flushing the last lines.
            let budget = if killed || exited {
                Duration::from_millis(250)
            } else {
                deadline
                    .saturating_duration_since(Instant::now())
                    .max(Duration::from_millis(1))
            };

            match rx.recv_timeout(budget) {
                Ok(ProcessEvent::OutputLine(line)) => {
                    output.push_str(&line);
                    output.push('\n');
                }
                Ok(ProcessEvent::ErrorLine(line)) => {
                    error.push_str(&line);
                    error.push('\n');
                }
                Ok(ProcessEvent::Exited { .. }) => exited = true,
                Err(RecvTimeoutError::Timeout) => {
                    if killed || exited {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let exit_code = process.exit_code();
        debug!(file_name, exit_code, killed, "run finished");
        Ok(RunResult {
            exit_code,
            output,
            error,
        })
    }

    /// Non-blocking variant: the run proceeds on a dedicated thread and the
    /// handle yields the result when it completes.
    pub fn run_in_background(
        &self,
        file_name: impl Into<String>,
        arguments: impl Into<String>,
        timeout: Duration,
    ) -> thread::JoinHandle<Result<RunResult, ProcessError>> {
        let runner = ProcessRunner {
            factory: Arc::clone(&self.factory),
        };
        let file_name = file_name.into();
        let arguments = arguments.into();
        thread::spawn(move || runner.run(&file_name, &arguments, timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::LocalProcessFactory;

    fn runner() -> ProcessRunner {
        ProcessRunner::new(Arc::new(LocalProcessFactory))
    }

    #[test]
    fn rejects_blank_file_name() {
        let err = runner().run("", "", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, ProcessError::InvalidDescriptor));
    }

    #[test]
    fn captures_output_and_error_lines() {
        let result = runner()
            .run(
                "/bin/sh",
                "-c \"for i in 1 2 3 4 5; do echo out$i; done; for i in 1 2 3; do echo err$i 1>&2; done\"",
                Duration::from_secs(10),
            )
            .unwrap();

        assert_eq!(result.exit_code, 0);
        assert_eq!(result.output, "out1\nout2\nout3\nout4\nout5\n");
        assert_eq!(result.error, "err1\nerr2\nerr3\n");
    }

    #[test]
    fn timeout_kills_and_reports_exit_code_one() {
        let started = Instant::now();
        let result = runner()
            .run("/bin/sh", "-c \"sleep 20\"", Duration::from_millis(300))
            .unwrap();

        assert_eq!(result.exit_code, 1);
        assert!(result.output.is_empty());
        assert!(result.error.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[test]
    fn concurrent_runs_do_not_interfere() {
        let runner = runner();
        let a = runner.run_in_background(
            "/bin/sh",
            "-c \"echo alpha\"",
            Duration::from_secs(10),
        );
        let b = runner.run_in_background(
            "/bin/sh",
            "-c \"echo beta; exit 2\"",
            Duration::from_secs(10),
        );

        let a = a.join().unwrap().unwrap();
        let b = b.join().unwrap().unwrap();
        assert_eq!(a.output, "alpha\n");
        assert_eq!(a.exit_code, 0);
        assert_eq!(b.output, "beta\n");
        assert_eq!(b.exit_code, 2);
    }
}

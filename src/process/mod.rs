// Process control - one uniform contract over local spawning and the
// sandbox bridge

pub mod local;
pub mod runner;

use std::sync::mpsc::Sender;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::error::ProcessError;

pub use local::{LocalProcess, LocalProcessFactory};
pub use runner::{ProcessRunner, RunResult};

/// What to run. Immutable once handed to `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessDescriptor {
    pub file_name: String,
    pub arguments: String,
}

impl ProcessDescriptor {
    pub fn new(file_name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            arguments: arguments.into(),
        }
    }
}

/// Line and lifecycle events delivered on an arbitrary background thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    OutputLine(String),
    ErrorLine(String),
    Exited { code: i32 },
}

/// Uniform process-control contract, implemented locally and over the bridge.
///
/// A controller is single-use per logical process: once exited it must be
/// `reset` (or discarded) before the next `start`. `id` is 0 until the first
/// successful start. `has_exited` is monotonic until reset.
pub trait ProcessControl: Send {
    fn start(&mut self, descriptor: &ProcessDescriptor) -> Result<(), ProcessError>;

    /// Terminate the running process. Synchronously forces `has_exited` with
    /// exit code 1 and fires `Exited` at most once.
    fn kill(&mut self) -> Result<(), ProcessError>;

    /// Block until exit. Safe to call from multiple threads.
    fn wait_for_exit(&self) -> bool;

    /// Block until exit or timeout; returns whether the process exited.
    fn wait_for_exit_timeout(&self, timeout: Duration) -> bool;

    fn id(&self) -> i32;
    fn exit_code(&self) -> i32;
    fn has_exited(&self) -> bool;

    /// Clear id, exit code, exit flag and the exit gate so the controller can
    /// run a new logical process.
    fn reset(&mut self);

    /// Register the event sink. Must be called before `start`; events fired
    /// before a sink is attached are lost.
    fn set_event_sink(&mut self, sink: Sender<ProcessEvent>);
}

/// Produces process controllers. The seam between callers (runner,
/// orchestrator) and the execution strategy (local spawn or bridge).
pub trait ProcessFactory: Send + Sync {
    fn create(&self) -> Box<dyn ProcessControl>;
}

/// One-shot broadcast exit signal: set at most once with the exit code,
/// waitable from any number of threads, resettable for controller reuse.
#[derive(Debug, Default)]
pub struct ExitGate {
    code: Mutex<Option<i32>>,
    signal: Condvar,
}

impl ExitGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the exit code. Returns false if the gate was already set;
    /// the first set wins and later calls change nothing.
    pub fn set(&self, code: i32) -> bool {
        let mut slot = self.code.lock().expect("exit gate poisoned");
        if slot.is_some() {
            return false;
        }
        *slot = Some(code);
        self.signal.notify_all();
        true
    }

    pub fn is_set(&self) -> bool {
        self.code.lock().expect("exit gate poisoned").is_some()
    }

    pub fn code(&self) -> Option<i32> {
        *self.code.lock().expect("exit gate poisoned")
    }

    pub fn wait(&self) -> i32 {
        let mut slot = self.code.lock().expect("exit gate poisoned");
        while slot.is_none() {
            slot = self.signal.wait(slot).expect("exit gate poisoned");
        }
        slot.expect("checked above")
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<i32> {
        let mut slot = self.code.lock().expect("exit gate poisoned");
        let deadline = std::time::Instant::now() + timeout;
        while slot.is_none() {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let (guard, result) = self
                .signal
                .wait_timeout(slot, remaining)
                .expect("exit gate poisoned");
            slot = guard;
            if result.timed_out() && slot.is_none() {
                return None;
            }
        }
        *slot
    }

    pub fn reset(&self) {
        *self.code.lock().expect("exit gate poisoned") = None;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn gate_set_wins_only_once() {
        let gate = ExitGate::new();
        assert!(gate.set(0));
        assert!(!gate.set(7));
        assert_eq!(gate.code(), Some(0));
    }

    #[test]
    fn gate_releases_multiple_waiters() {
        let gate = Arc::new(ExitGate::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let gate = Arc::clone(&gate);
            handles.push(thread::spawn(move || gate.wait()));
        }

        thread::sleep(Duration::from_millis(20));
        gate.set(3);

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 3);
        }
    }

    #[test]
    fn gate_wait_timeout_elapses() {
        let gate = ExitGate::new();
        assert_eq!(gate.wait_timeout(Duration::from_millis(10)), None);

        gate.set(0);
        assert_eq!(gate.wait_timeout(Duration::from_millis(10)), Some(0));
    }

    #[test]
    fn gate_reset_allows_reuse() {
        let gate = ExitGate::new();
        gate.set(1);
        gate.reset();
        assert!(!gate.is_set());
        assert!(gate.set(0));
    }
}

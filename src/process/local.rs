//! Direct OS process control: spawn with redirected pipes, line events from
//! reader threads, and a poll-based waiter that trips the exit gate.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::error::ProcessError;

use super::{ExitGate, ProcessControl, ProcessDescriptor, ProcessEvent, ProcessFactory};

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// State shared between the controller and its background threads.
#[derive(Default)]
struct Shared {
    gate: ExitGate,
    sink: Mutex<Option<Sender<ProcessEvent>>>,
    id: AtomicI32,
}

impl Shared {
    fn emit(&self, event: ProcessEvent) {
        let sink = self.sink.lock().expect("event sink poisoned");
        if let Some(sink) = sink.as_ref() {
            // A dropped receiver is not our problem; the consumer went away.
            let _ = sink.send(event);
        }
    }

    /// Record the exit exactly once; the first caller also fires `Exited`.
    fn finish(&self, code: i32) {
        if self.gate.set(code) {
            self.emit(ProcessEvent::Exited { code });
        }
    }
}

/// `ProcessControl` over a directly spawned OS process.
pub struct LocalProcess {
    shared: Arc<Shared>,
    child: Option<Arc<Mutex<Child>>>,
    started: bool,
}

impl LocalProcess {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            child: None,
            started: false,
        }
    }

    fn spawn_reader<R: Read + Send + 'static>(
        &self,
        source: R,
        make_event: fn(String) -> ProcessEvent,
    ) {
        let shared = Arc::clone(&self.shared);
        thread::spawn(move || {
            let reader = BufReader::new(source);
            for line in reader.lines().map_while(Result::ok) {
                shared.emit(make_event(line));
            }
        });
    }

    fn spawn_waiter(&self) {
        let shared = Arc::clone(&self.shared);
        let child = Arc::clone(self.child.as_ref().expect("waiter spawned after child"));
        thread::spawn(move || {
            loop {
                // Kill may have tripped the gate already; its code 1 wins
                // over the status the OS reports afterwards.
                if shared.gate.is_set() {
                    break;
                }
                let status = {
                    let mut child = child.lock().expect("child handle poisoned");
                    child.try_wait()
                };
                match status {
                    Ok(Some(status)) => {
                        shared.finish(status.code().unwrap_or(1));
                        break;
                    }
                    Ok(None) => thread::sleep(WAIT_POLL_INTERVAL),
                    Err(_) => {
                        shared.finish(1);
                        break;
                    }
                }
            }
        });
    }
}

impl Default for LocalProcess {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessControl for LocalProcess {
    fn start(&mut self, descriptor: &ProcessDescriptor) -> Result<(), ProcessError> {
        if descriptor.file_name.trim().is_empty() {
            return Err(ProcessError::InvalidDescriptor);
        }
        if self.started {
            return Err(ProcessError::AlreadyRunning);
        }

        // Shell-style split so quoted arguments survive; fall back to plain
        // whitespace splitting on unbalanced quotes.
        let argv = shlex::split(&descriptor.arguments).unwrap_or_else(|| {
            descriptor
                .arguments
                .split_whitespace()
                .map(str::to_string)
                .collect()
        });

        let mut command = Command::new(&descriptor.file_name);
        command
            .args(&argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn()?;
        let pid = child.id() as i32;
        self.shared.id.store(pid, Ordering::SeqCst);
        debug!(pid, file_name = %descriptor.file_name, "spawned local process");

        if let Some(stdout) = child.stdout.take() {
            self.spawn_reader(stdout, ProcessEvent::OutputLine);
        }
        if let Some(stderr) = child.stderr.take() {
            self.spawn_reader(stderr, ProcessEvent::ErrorLine);
        }

        self.child = Some(Arc::new(Mutex::new(child)));
        self.started = true;
        self.spawn_waiter();
        Ok(())
    }

    fn kill(&mut self) -> Result<(), ProcessError> {
        if !self.started {
            return Err(ProcessError::NotStarted);
        }
        if let Some(child) = &self.child {
            let mut child = child.lock().expect("child handle poisoned");
            // Already-exited processes make kill fail; that is fine.
            let _ = child.kill();
            // Reap the dead child here: the waiter thread stops once the
            // gate trips and would otherwise leave a zombie behind.
            let _ = child.wait();
        }
        // Contract: the killed path reports exit code 1 synchronously.
        self.shared.finish(1);
        Ok(())
    }

    fn wait_for_exit(&self) -> bool {
        self.shared.gate.wait();
        true
    }

    fn wait_for_exit_timeout(&self, timeout: Duration) -> bool {
        self.shared.gate.wait_timeout(timeout).is_some()
    }

    fn id(&self) -> i32 {
        self.shared.id.load(Ordering::SeqCst)
    }

    fn exit_code(&self) -> i32 {
        self.shared.gate.code().unwrap_or(0)
    }

    fn has_exited(&self) -> bool {
        self.shared.gate.is_set()
    }

    fn reset(&mut self) {
        self.shared.gate.reset();
        self.shared.id.store(0, Ordering::SeqCst);
        self.child = None;
        self.started = false;
    }

    fn set_event_sink(&mut self, sink: Sender<ProcessEvent>) {
        *self.shared.sink.lock().expect("event sink poisoned") = Some(sink);
    }
}

/// Factory for direct local spawning.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalProcessFactory;

impl ProcessFactory for LocalProcessFactory {
    fn create(&self) -> Box<dyn ProcessControl> {
        Box::new(LocalProcess::new())
    }
}

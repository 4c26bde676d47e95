//! Trusted-side dispatcher: receives start/kill requests, drives local
//! process controllers, and pushes line/exit events back over the channel
//! tagged with the owning process id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{debug, warn};

use crate::process::{ProcessControl, ProcessDescriptor, ProcessEvent, ProcessFactory};

use super::protocol::{
    BridgeResponse, DataPayload, ExitPayload, KillProcessRequest, Message, MessageKind,
    StartProcessRequest,
};

type ProcessTable = Arc<Mutex<HashMap<i32, Box<dyn ProcessControl>>>>;

/// Handles bridge requests on behalf of sandboxed clients. One host serves
/// any number of logical processes over one connection.
pub struct BridgeHost {
    factory: Arc<dyn ProcessFactory>,
    outbound: Sender<Message>,
    next_id: AtomicI32,
    processes: ProcessTable,
}

impl BridgeHost {
    /// `outbound` carries unsolicited event messages back to the client side.
    pub fn new(factory: Arc<dyn ProcessFactory>, outbound: Sender<Message>) -> Self {
        Self {
            factory,
            outbound,
            next_id: AtomicI32::new(1),
            processes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Dispatch one request message and produce its reply. Failures become
    /// error payloads in the reply body, never channel faults.
    pub fn handle_request(&self, message: &Message) -> Message {
        match message.kind {
            MessageKind::StartProcess => self.handle_start(&message.body),
            MessageKind::KillProcess => self.handle_kill(&message.body),
            other => {
                warn!(kind = other.name(), "unsupported request kind");
                self.reply(
                    0,
                    other,
                    BridgeResponse::failed("UnsupportedMessage", other.name()),
                )
            }
        }
    }

    fn handle_start(&self, body: &str) -> Message {
        let request: StartProcessRequest = match serde_json::from_str(body) {
            Ok(request) => request,
            Err(e) => {
                return self.reply(
                    0,
                    MessageKind::StartProcess,
                    BridgeResponse::failed("Serialization", e.to_string()),
                );
            }
        };

        let mut process = self.factory.create();
        let (tx, rx) = mpsc::channel();
        process.set_event_sink(tx);

        let descriptor = ProcessDescriptor::new(request.file_name, request.arguments);
        if let Err(e) = process.start(&descriptor) {
            return self.reply(
                0,
                MessageKind::StartProcess,
                BridgeResponse::failed("StartProcess", e.to_string()),
            );
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.processes
            .lock()
            .expect("process table poisoned")
            .insert(id, process);
        debug!(id, file_name = %descriptor.file_name, "bridge host started process");

        let outbound = self.outbound.clone();
        let processes = Arc::clone(&self.processes);
        thread::spawn(move || {
            for event in rx {
                let (kind, body) = match &event {
                    ProcessEvent::OutputLine(data) => (
                        MessageKind::OutputData,
                        serde_json::to_string(&DataPayload {
                            process_id: id,
                            data: data.clone(),
                        }),
                    ),
                    ProcessEvent::ErrorLine(data) => (
                        MessageKind::ErrorData,
                        serde_json::to_string(&DataPayload {
                            process_id: id,
                            data: data.clone(),
                        }),
                    ),
                    ProcessEvent::Exited { code } => (
                        MessageKind::Exited,
                        serde_json::to_string(&ExitPayload {
                            process_id: id,
                            exit_code: *code,
                        }),
                    ),
                };
                match body {
                    Ok(body) => {
                        if outbound.send(Message::new(id, kind, body)).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(id, error = %e, "failed to serialize event, dropping"),
                }
                if matches!(event, ProcessEvent::Exited { .. }) {
                    processes.lock().expect("process table poisoned").remove(&id);
                    break;
                }
            }
        });

        self.reply(id, MessageKind::StartProcess, BridgeResponse::ok(id))
    }

    fn handle_kill(&self, body: &str) -> Message {
        let request: KillProcessRequest = match serde_json::from_str(body) {
            Ok(request) => request,
            Err(e) => {
                return self.reply(
                    0,
                    MessageKind::KillProcess,
                    BridgeResponse::failed("Serialization", e.to_string()),
                );
            }
        };

        let mut table = self.processes.lock().expect("process table poisoned");
        let Some(process) = table.get_mut(&request.process_id) else {
            return self.reply(
                request.process_id,
                MessageKind::KillProcess,
                BridgeResponse::failed(
                    "UnknownProcess",
                    format!("no process with id {}", request.process_id),
                ),
            );
        };

        match process.kill() {
            Ok(()) => self.reply(
                request.process_id,
                MessageKind::KillProcess,
                BridgeResponse::ok(request.process_id),
            ),
            Err(e) => self.reply(
                request.process_id,
                MessageKind::KillProcess,
                BridgeResponse::failed("KillProcess", e.to_string()),
            ),
        }
    }

    fn reply(&self, process_id: i32, kind: MessageKind, response: BridgeResponse) -> Message {
        // A reply body that cannot serialize would be a bug in our own
        // payload types; fall back to an empty body the client reports as a
        // protocol error.
        let body = serde_json::to_string(&response).unwrap_or_default();
        Message::new(process_id, kind, body)
    }
}

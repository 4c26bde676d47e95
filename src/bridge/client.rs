//! `ProcessControl` implemented over the bridge: requests delegate spawn and
//! kill to the trusted host, events arrive unsolicited and are filtered by
//! process id. One client instance is one logical process; many clients may
//! share a single connection.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{BridgeError, ProcessError};
use crate::process::{ExitGate, ProcessControl, ProcessDescriptor, ProcessEvent, ProcessFactory};

use super::protocol::{
    BridgeResponse, DataPayload, ExitPayload, KillProcessRequest, Message, MessageKind,
    StartProcessRequest,
};
use super::transport::{BridgeConnection, ConnectionProvider, HandlerId};

/// Client-side state shared with the connection's inbound handler.
#[derive(Default)]
struct ClientState {
    id: AtomicI32,
    running: AtomicBool,
    gate: ExitGate,
    sink: Mutex<Option<Sender<ProcessEvent>>>,
}

impl ClientState {
    fn emit(&self, event: ProcessEvent) {
        let sink = self.sink.lock().expect("event sink poisoned");
        if let Some(sink) = sink.as_ref() {
            let _ = sink.send(event);
        }
    }

    fn finish(&self, code: i32) {
        if self.gate.set(code) {
            self.running.store(false, Ordering::SeqCst);
            self.emit(ProcessEvent::Exited { code });
        }
    }

    /// Inbound dispatch. Events for other logical processes and malformed
    /// bodies are dropped here so they can never corrupt this client's
    /// exit or output state.
    fn handle_message(&self, message: &Message) {
        let my_id = self.id.load(Ordering::SeqCst);
        if my_id == 0 || message.process_id != my_id {
            return;
        }

        if message.body.trim().is_empty() {
            warn!(kind = message.kind.name(), my_id, "dropping event with blank body");
            return;
        }

        match message.kind {
            MessageKind::OutputData | MessageKind::ErrorData => {
                match serde_json::from_str::<DataPayload>(&message.body) {
                    Ok(payload) => {
                        let event = if message.kind == MessageKind::OutputData {
                            ProcessEvent::OutputLine(payload.data)
                        } else {
                            ProcessEvent::ErrorLine(payload.data)
                        };
                        self.emit(event);
                    }
                    Err(e) => {
                        warn!(kind = message.kind.name(), my_id, error = %e, "dropping undecodable event");
                    }
                }
            }
            MessageKind::Exited => match serde_json::from_str::<ExitPayload>(&message.body) {
                Ok(payload) => self.finish(payload.exit_code),
                Err(e) => {
                    warn!(my_id, error = %e, "dropping undecodable exit event");
                }
            },
            // Requests never arrive on the client side.
            MessageKind::StartProcess | MessageKind::KillProcess => {}
        }
    }

    fn reset(&self) {
        self.id.store(0, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        self.gate.reset();
    }
}

/// Process control delegated to the trusted host over a shared connection.
pub struct BridgedProcess {
    provider: Arc<ConnectionProvider>,
    connection: Option<Arc<dyn BridgeConnection>>,
    handler: Option<HandlerId>,
    state: Arc<ClientState>,
}

impl BridgedProcess {
    pub fn new(provider: Arc<ConnectionProvider>) -> Self {
        Self {
            provider,
            connection: None,
            handler: None,
            state: Arc::new(ClientState::default()),
        }
    }

    /// The shared connection, opened lazily. The inbound handler is attached
    /// before any request so no early event can be missed; it stays attached
    /// for the client's lifetime and is detached again on drop.
    fn connection(&mut self) -> Result<Arc<dyn BridgeConnection>, BridgeError> {
        if let Some(connection) = &self.connection {
            return Ok(Arc::clone(connection));
        }
        let connection = self.provider.get()?;
        let state = Arc::clone(&self.state);
        let handler = connection
            .add_inbound_handler(Box::new(move |message| state.handle_message(message)));
        self.handler = Some(handler);
        self.connection = Some(Arc::clone(&connection));
        Ok(connection)
    }

    fn request<T: Serialize>(
        connection: &Arc<dyn BridgeConnection>,
        process_id: i32,
        kind: MessageKind,
        payload: &T,
    ) -> Result<BridgeResponse, BridgeError> {
        let body = serde_json::to_string(payload)
            .map_err(|_| BridgeError::Serialize { kind: kind.name() })?;

        let reply = connection.request(Message::new(process_id, kind, body))?;

        if reply.body.trim().is_empty() {
            return Err(BridgeError::EmptyResponse);
        }
        let response: BridgeResponse =
            serde_json::from_str(&reply.body).map_err(|e| BridgeError::Deserialize {
                kind: kind.name(),
                detail: e.to_string(),
            })?;

        if let Some(error) = response.error {
            return Err(BridgeError::remote(error.error_type, error.message));
        }
        Ok(response)
    }
}

impl ProcessControl for BridgedProcess {
    fn start(&mut self, descriptor: &ProcessDescriptor) -> Result<(), ProcessError> {
        if descriptor.file_name.trim().is_empty() {
            return Err(ProcessError::InvalidDescriptor);
        }
        if self.state.running.load(Ordering::SeqCst) && !self.state.gate.is_set() {
            return Err(ProcessError::AlreadyRunning);
        }
        // A post-exit start reuses the client for a new logical process.
        if self.state.gate.is_set() {
            self.state.reset();
        }

        let connection = self.connection()?;
        let request = StartProcessRequest {
            file_name: descriptor.file_name.clone(),
            arguments: descriptor.arguments.clone(),
        };
        let response = Self::request(&connection, 0, MessageKind::StartProcess, &request)?;

        self.state.id.store(response.process_id, Ordering::SeqCst);
        self.state.running.store(true, Ordering::SeqCst);
        debug!(process_id = response.process_id, "bridged process started");
        Ok(())
    }

    fn kill(&mut self) -> Result<(), ProcessError> {
        if !self.state.running.load(Ordering::SeqCst) {
            return Err(ProcessError::NotStarted);
        }
        let connection = self.connection()?;
        let request = KillProcessRequest {
            process_id: self.state.id.load(Ordering::SeqCst),
        };
        Self::request(
            &connection,
            request.process_id,
            MessageKind::KillProcess,
            &request,
        )?;
        // Contract: a successful kill reports exit code 1 right away; the
        // host's own Exited event arrives later and loses the gate race.
        self.state.finish(1);
        Ok(())
    }

    fn wait_for_exit(&self) -> bool {
        self.state.gate.wait();
        true
    }

    fn wait_for_exit_timeout(&self, timeout: Duration) -> bool {
        self.state.gate.wait_timeout(timeout).is_some()
    }

    fn id(&self) -> i32 {
        self.state.id.load(Ordering::SeqCst)
    }

    fn exit_code(&self) -> i32 {
        self.state.gate.code().unwrap_or(0)
    }

    fn has_exited(&self) -> bool {
        self.state.gate.is_set()
    }

    fn reset(&mut self) {
        self.state.reset();
    }

    fn set_event_sink(&mut self, sink: Sender<ProcessEvent>) {
        *self.state.sink.lock().expect("event sink poisoned") = Some(sink);
    }
}

impl Drop for BridgedProcess {
    fn drop(&mut self) {
        // Detach from the shared connection so short-lived clients (one per
        // runner call) do not accumulate dead handlers on it.
        if let (Some(connection), Some(handler)) = (&self.connection, self.handler.take()) {
            connection.remove_inbound_handler(handler);
        }
    }
}

/// Factory producing bridge-backed controllers that all share the provider's
/// connection.
pub struct BridgedProcessFactory {
    provider: Arc<ConnectionProvider>,
}

impl BridgedProcessFactory {
    pub fn new(provider: Arc<ConnectionProvider>) -> Self {
        Self { provider }
    }
}

impl ProcessFactory for BridgedProcessFactory {
    fn create(&self) -> Box<dyn ProcessControl> {
        Box::new(BridgedProcess::new(Arc::clone(&self.provider)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    /// Scripted connection: fixed replies, events pushed by hand.
    struct ScriptedConnection {
        reply: Mutex<Option<Message>>,
        handlers: Mutex<Vec<(HandlerId, super::super::transport::InboundHandler)>>,
        next_handler_id: std::sync::atomic::AtomicU64,
    }

    impl ScriptedConnection {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                reply: Mutex::new(None),
                handlers: Mutex::new(Vec::new()),
                next_handler_id: std::sync::atomic::AtomicU64::new(1),
            })
        }

        fn set_reply(&self, message: Message) {
            *self.reply.lock().unwrap() = Some(message);
        }

        fn push(&self, message: Message) {
            for (_, handler) in self.handlers.lock().unwrap().iter() {
                handler(&message);
            }
        }

        fn handler_count(&self) -> usize {
            self.handlers.lock().unwrap().len()
        }
    }

    impl BridgeConnection for ScriptedConnection {
        fn add_inbound_handler(
            &self,
            handler: super::super::transport::InboundHandler,
        ) -> HandlerId {
            let id = HandlerId(self.next_handler_id.fetch_add(1, Ordering::SeqCst));
            self.handlers.lock().unwrap().push((id, handler));
            id
        }

        fn remove_inbound_handler(&self, id: HandlerId) {
            self.handlers
                .lock()
                .unwrap()
                .retain(|(handler_id, _)| *handler_id != id);
        }

        fn request(&self, _message: Message) -> Result<Message, BridgeError> {
            self.reply
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| BridgeError::Transport("no reply scripted".into()))
        }
    }

    fn client_with(connection: &Arc<ScriptedConnection>) -> BridgedProcess {
        let shared: Arc<dyn BridgeConnection> = Arc::clone(connection) as _;
        BridgedProcess::new(Arc::new(ConnectionProvider::from_connection(shared)))
    }

    fn ok_start_reply(process_id: i32) -> Message {
        Message::new(
            process_id,
            MessageKind::StartProcess,
            serde_json::to_string(&BridgeResponse::ok(process_id)).unwrap(),
        )
    }

    fn start(client: &mut BridgedProcess, connection: &Arc<ScriptedConnection>, id: i32) {
        connection.set_reply(ok_start_reply(id));
        client
            .start(&ProcessDescriptor::new("ffmpeg", "-version"))
            .unwrap();
        assert_eq!(client.id(), id);
    }

    #[test]
    fn empty_reply_body_is_a_protocol_error() {
        let connection = ScriptedConnection::new();
        let mut client = client_with(&connection);
        connection.set_reply(Message::new(0, MessageKind::StartProcess, ""));

        let err = client
            .start(&ProcessDescriptor::new("ffmpeg", ""))
            .unwrap_err();
        assert!(matches!(
            err,
            ProcessError::Bridge(BridgeError::EmptyResponse)
        ));
    }

    #[test]
    fn undecodable_reply_body_is_a_protocol_error() {
        let connection = ScriptedConnection::new();
        let mut client = client_with(&connection);
        connection.set_reply(Message::new(0, MessageKind::StartProcess, "not json"));

        let err = client
            .start(&ProcessDescriptor::new("ffmpeg", ""))
            .unwrap_err();
        assert!(matches!(
            err,
            ProcessError::Bridge(BridgeError::Deserialize { kind: "StartProcess", .. })
        ));
    }

    #[test]
    fn remote_error_is_surfaced() {
        let connection = ScriptedConnection::new();
        let mut client = client_with(&connection);
        connection.set_reply(Message::new(
            0,
            MessageKind::StartProcess,
            serde_json::to_string(&BridgeResponse::failed("AccessDenied", "no")).unwrap(),
        ));

        let err = client
            .start(&ProcessDescriptor::new("ffmpeg", ""))
            .unwrap_err();
        assert_eq!(err.to_string(), "(AccessDenied) no");
    }

    #[test]
    fn foreign_process_events_are_discarded() {
        let connection = ScriptedConnection::new();
        let mut client = client_with(&connection);
        start(&mut client, &connection, 5);

        let body = serde_json::to_string(&ExitPayload {
            process_id: 6,
            exit_code: 9,
        })
        .unwrap();
        connection.push(Message::new(6, MessageKind::Exited, body));

        assert!(!client.has_exited());
        assert_eq!(client.exit_code(), 0);
    }

    #[test]
    fn blank_and_undecodable_event_bodies_are_dropped() {
        let connection = ScriptedConnection::new();
        let mut client = client_with(&connection);
        start(&mut client, &connection, 5);

        connection.push(Message::new(5, MessageKind::Exited, "  "));
        connection.push(Message::new(5, MessageKind::Exited, "garbage"));
        assert!(!client.has_exited());
    }

    #[test]
    fn exit_event_unblocks_waiters_and_records_code() {
        let connection = ScriptedConnection::new();
        let mut client = client_with(&connection);
        start(&mut client, &connection, 5);

        let body = serde_json::to_string(&ExitPayload {
            process_id: 5,
            exit_code: 0,
        })
        .unwrap();
        connection.push(Message::new(5, MessageKind::Exited, body));

        assert!(client.wait_for_exit_timeout(Duration::from_secs(1)));
        assert!(client.has_exited());
        assert_eq!(client.exit_code(), 0);
    }

    #[test]
    fn kill_requires_running_state() {
        let connection = ScriptedConnection::new();
        let mut client = client_with(&connection);
        assert!(matches!(client.kill(), Err(ProcessError::NotStarted)));
    }

    #[test]
    fn kill_synchronously_forces_exit_code_one() {
        let connection = ScriptedConnection::new();
        let mut client = client_with(&connection);
        let (tx, rx) = mpsc::channel();
        client.set_event_sink(tx);
        start(&mut client, &connection, 5);

        connection.set_reply(Message::new(
            5,
            MessageKind::KillProcess,
            serde_json::to_string(&BridgeResponse::ok(5)).unwrap(),
        ));
        client.kill().unwrap();
        assert!(client.has_exited());
        assert_eq!(client.exit_code(), 1);
        assert_eq!(rx.try_recv().unwrap(), ProcessEvent::Exited { code: 1 });

        // The host's own exit event arrives afterwards and changes nothing.
        let body = serde_json::to_string(&ExitPayload {
            process_id: 5,
            exit_code: 9,
        })
        .unwrap();
        connection.push(Message::new(5, MessageKind::Exited, body));
        assert_eq!(client.exit_code(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_client_detaches_its_handler() {
        let connection = ScriptedConnection::new();
        let mut client = client_with(&connection);
        start(&mut client, &connection, 5);
        assert_eq!(connection.handler_count(), 1);

        drop(client);
        assert_eq!(connection.handler_count(), 0);
    }

    #[test]
    fn post_exit_start_resets_the_client() {
        let connection = ScriptedConnection::new();
        let mut client = client_with(&connection);
        let (tx, rx) = mpsc::channel();
        client.set_event_sink(tx);
        start(&mut client, &connection, 5);

        let body = serde_json::to_string(&ExitPayload {
            process_id: 5,
            exit_code: 2,
        })
        .unwrap();
        connection.push(Message::new(5, MessageKind::Exited, body));
        assert!(client.has_exited());
        assert_eq!(
            rx.try_recv().unwrap(),
            ProcessEvent::Exited { code: 2 }
        );

        start(&mut client, &connection, 6);
        assert!(!client.has_exited());
        assert_eq!(client.exit_code(), 0);
        assert_eq!(client.id(), 6);
    }
}

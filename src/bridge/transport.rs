//! Connection plumbing for the bridge: the channel contract, a shared lazy
//! connection provider, and an in-process connection that pairs a client
//! with a [`BridgeHost`] for tests and single-binary setups.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::debug;

use crate::error::BridgeError;
use crate::process::ProcessFactory;

use super::host::BridgeHost;
use super::protocol::Message;

/// Callback invoked for every unsolicited inbound message. Handlers run on
/// the channel's delivery thread and must filter by `process_id` themselves.
pub type InboundHandler = Box<dyn Fn(&Message) + Send + Sync>;

/// Token identifying one registered inbound handler on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(pub u64);

/// A bidirectional, connection-oriented message channel.
///
/// `request` performs one synchronous round trip: send, await the delivery
/// acknowledgment, await the reply. Only one call may be outstanding at a
/// time; implementations serialize concurrent callers.
pub trait BridgeConnection: Send + Sync {
    /// Attach a handler for unsolicited messages. Multiple logical processes
    /// may share one connection, so every handler sees every message. Attach
    /// before the first `request` to avoid missing early events, and detach
    /// with the returned id when the subscriber goes away.
    fn add_inbound_handler(&self, handler: InboundHandler) -> HandlerId;

    /// Detach a previously registered handler. Unknown ids are a no-op.
    fn remove_inbound_handler(&self, id: HandlerId);

    fn request(&self, message: Message) -> Result<Message, BridgeError>;
}

type Opener =
    Box<dyn Fn() -> Result<Arc<dyn BridgeConnection>, BridgeError> + Send + Sync>;

/// Lazily opens one connection and hands the same instance to every caller.
///
/// This is the only process-wide shared state of the bridge; it is injected
/// explicitly rather than living in a global.
pub struct ConnectionProvider {
    opener: Opener,
    cached: Mutex<Option<Arc<dyn BridgeConnection>>>,
}

impl ConnectionProvider {
    pub fn new(
        opener: impl Fn() -> Result<Arc<dyn BridgeConnection>, BridgeError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            opener: Box::new(opener),
            cached: Mutex::new(None),
        }
    }

    /// Wrap an already-open connection.
    pub fn from_connection(connection: Arc<dyn BridgeConnection>) -> Self {
        Self {
            opener: Box::new(move || Err(BridgeError::Connect("connection closed".into()))),
            cached: Mutex::new(Some(connection)),
        }
    }

    /// The shared connection, opened on first use.
    pub fn get(&self) -> Result<Arc<dyn BridgeConnection>, BridgeError> {
        let mut cached = self.cached.lock().expect("connection cache poisoned");
        if let Some(connection) = cached.as_ref() {
            return Ok(Arc::clone(connection));
        }
        debug!("opening bridge connection");
        let connection = (self.opener)()?;
        *cached = Some(Arc::clone(&connection));
        Ok(connection)
    }

    /// Drop the cached connection; the next `get` reopens.
    pub fn close(&self) {
        *self.cached.lock().expect("connection cache poisoned") = None;
    }
}

/// Client and host in one process, joined by an in-memory channel. Delivery
/// never fails, so `request` maps directly onto the host dispatcher.
pub struct InProcessConnection {
    host: BridgeHost,
    handlers: Arc<Mutex<Vec<(HandlerId, InboundHandler)>>>,
    next_handler_id: AtomicU64,
    // One outstanding request per connection.
    request_gate: Mutex<()>,
}

impl InProcessConnection {
    pub fn new(factory: Arc<dyn ProcessFactory>) -> Arc<Self> {
        let (outbound_tx, outbound_rx) = mpsc::channel::<Message>();
        let handlers: Arc<Mutex<Vec<(HandlerId, InboundHandler)>>> =
            Arc::new(Mutex::new(Vec::new()));

        let dispatch = Arc::clone(&handlers);
        thread::spawn(move || {
            for message in outbound_rx {
                let handlers = dispatch.lock().expect("handler list poisoned");
                for (_, handler) in handlers.iter() {
                    handler(&message);
                }
            }
        });

        Arc::new(Self {
            host: BridgeHost::new(factory, outbound_tx),
            handlers,
            next_handler_id: AtomicU64::new(1),
            request_gate: Mutex::new(()),
        })
    }
}

impl BridgeConnection for InProcessConnection {
    fn add_inbound_handler(&self, handler: InboundHandler) -> HandlerId {
        let id = HandlerId(self.next_handler_id.fetch_add(1, Ordering::SeqCst));
        self.handlers
            .lock()
            .expect("handler list poisoned")
            .push((id, handler));
        id
    }

    fn remove_inbound_handler(&self, id: HandlerId) {
        self.handlers
            .lock()
            .expect("handler list poisoned")
            .retain(|(handler_id, _)| *handler_id != id);
    }

    fn request(&self, message: Message) -> Result<Message, BridgeError> {
        let _gate = self.request_gate.lock().expect("request gate poisoned");
        Ok(self.host.handle_request(&message))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingConnection;

    impl BridgeConnection for CountingConnection {
        fn add_inbound_handler(&self, _handler: InboundHandler) -> HandlerId {
            HandlerId(0)
        }

        fn remove_inbound_handler(&self, _id: HandlerId) {}

        fn request(&self, message: Message) -> Result<Message, BridgeError> {
            Ok(message)
        }
    }

    #[test]
    fn provider_opens_once_and_shares() {
        let opened = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&opened);
        let provider = ConnectionProvider::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(CountingConnection) as Arc<dyn BridgeConnection>)
        });

        let a = provider.get().unwrap();
        let b = provider.get().unwrap();
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn provider_reopens_after_close() {
        let opened = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&opened);
        let provider = ConnectionProvider::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(CountingConnection) as Arc<dyn BridgeConnection>)
        });

        provider.get().unwrap();
        provider.close();
        provider.get().unwrap();
        assert_eq!(opened.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn removed_handlers_leave_the_list() {
        let connection = InProcessConnection::new(Arc::new(crate::process::LocalProcessFactory));
        let a = connection.add_inbound_handler(Box::new(|_| {}));
        let b = connection.add_inbound_handler(Box::new(|_| {}));
        assert_ne!(a, b);
        assert_eq!(connection.handlers.lock().unwrap().len(), 2);

        connection.remove_inbound_handler(a);
        assert_eq!(connection.handlers.lock().unwrap().len(), 1);
        connection.remove_inbound_handler(a);
        assert_eq!(connection.handlers.lock().unwrap().len(), 1);
        connection.remove_inbound_handler(b);
        assert!(connection.handlers.lock().unwrap().is_empty());
    }

    #[test]
    fn provider_propagates_open_failure() {
        let provider =
            ConnectionProvider::new(|| Err(BridgeError::Connect("host unavailable".into())));
        assert!(matches!(provider.get(), Err(BridgeError::Connect(_))));
    }
}

// Sandbox bridge - delegated process control over a message channel

pub mod client;
pub mod host;
pub mod protocol;
pub mod transport;

pub use client::{BridgedProcess, BridgedProcessFactory};
pub use host::BridgeHost;
pub use protocol::{
    BridgeResponse, DataPayload, ExitPayload, KillProcessRequest, Message, MessageKind,
    RemoteError, StartProcessRequest,
};
pub use transport::{
    BridgeConnection, ConnectionProvider, HandlerId, InProcessConnection, InboundHandler,
};

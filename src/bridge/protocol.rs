//! Wire format for the sandbox bridge.
//!
//! A message is a flat envelope: correlation `process_id`, a small integer
//! `kind`, and an opaque JSON body whose shape depends on the kind. Requests
//! and replies correlate by the call itself (one outstanding call per
//! connection); asynchronous events correlate by `process_id`.

use serde::{Deserialize, Serialize};

/// Message discriminator. The numeric values are the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum MessageKind {
    StartProcess = 0,
    KillProcess = 1,
    OutputData = 2,
    ErrorData = 3,
    Exited = 4,
}

impl MessageKind {
    pub fn name(&self) -> &'static str {
        match self {
            MessageKind::StartProcess => "StartProcess",
            MessageKind::KillProcess => "KillProcess",
            MessageKind::OutputData => "OutputData",
            MessageKind::ErrorData => "ErrorData",
            MessageKind::Exited => "Exited",
        }
    }
}

impl From<MessageKind> for u8 {
    fn from(kind: MessageKind) -> u8 {
        kind as u8
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageKind::StartProcess),
            1 => Ok(MessageKind::KillProcess),
            2 => Ok(MessageKind::OutputData),
            3 => Ok(MessageKind::ErrorData),
            4 => Ok(MessageKind::Exited),
            other => Err(format!("unknown message kind {other}")),
        }
    }
}

/// The unit carried over a bridge connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub process_id: i32,
    pub kind: MessageKind,
    #[serde(default)]
    pub body: String,
}

impl Message {
    pub fn new(process_id: i32, kind: MessageKind, body: impl Into<String>) -> Self {
        Self {
            process_id,
            kind,
            body: body.into(),
        }
    }
}

/// Host-reported failure inside a response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartProcessRequest {
    pub file_name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillProcessRequest {
    pub process_id: i32,
}

/// Reply body for both start and kill. On a successful start,
/// `process_id` is the newly assigned id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeResponse {
    #[serde(default)]
    pub process_id: i32,
    #[serde(default)]
    pub error: Option<RemoteError>,
}

impl BridgeResponse {
    pub fn ok(process_id: i32) -> Self {
        Self {
            process_id,
            error: None,
        }
    }

    pub fn failed(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            process_id: 0,
            error: Some(RemoteError {
                error_type: Some(error_type.into()),
                message: Some(message.into()),
            }),
        }
    }
}

/// Body for output/error line events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPayload {
    pub process_id: i32,
    pub data: String,
}

/// Body for the exit event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitPayload {
    pub process_id: i32,
    pub exit_code: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_wire_values_are_stable() {
        assert_eq!(u8::from(MessageKind::StartProcess), 0);
        assert_eq!(u8::from(MessageKind::KillProcess), 1);
        assert_eq!(u8::from(MessageKind::OutputData), 2);
        assert_eq!(u8::from(MessageKind::ErrorData), 3);
        assert_eq!(u8::from(MessageKind::Exited), 4);

        assert!(MessageKind::try_from(5).is_err());
    }

    #[test]
    fn message_serializes_kind_as_integer() {
        let msg = Message::new(7, MessageKind::Exited, "{}");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["kind"], 4);
        assert_eq!(json["process_id"], 7);

        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn response_body_roundtrip() {
        let body = serde_json::to_string(&BridgeResponse::failed("Spawn", "not found")).unwrap();
        let parsed: BridgeResponse = serde_json::from_str(&body).unwrap();
        let error = parsed.error.unwrap();
        assert_eq!(error.error_type.as_deref(), Some("Spawn"));
        assert_eq!(error.message.as_deref(), Some("not found"));
    }
}

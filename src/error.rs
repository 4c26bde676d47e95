use thiserror::Error;

/// Failures scoped to a single process attempt. Nothing here is fatal to the
/// application; callers retry or report per job.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Process descriptor is empty or invalid")]
    InvalidDescriptor,

    #[error("Process is already running; reset before starting again")]
    AlreadyRunning,

    #[error("Process has not been started")]
    NotStarted,

    #[error("Failed to spawn process: {0}")]
    Spawn(#[from] std::io::Error),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// Failures crossing the sandbox bridge. Transport and protocol problems are
/// kept apart from errors the host itself reported.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Failed to open bridge connection: {0}")]
    Connect(String),

    #[error("Bridge transport failed: {0}")]
    Transport(String),

    #[error("Bridge response had no body")]
    EmptyResponse,

    #[error("Failed to serialize {kind} request")]
    Serialize { kind: &'static str },

    #[error("Failed to deserialize {kind} body: {detail}")]
    Deserialize { kind: &'static str, detail: String },

    #[error("({error_type}) {message}")]
    Remote { error_type: String, message: String },
}

impl BridgeError {
    /// Host-reported error, formatted `"(type) message"` with an `Unknown`
    /// fallback when the host sent neither field.
    pub fn remote(error_type: Option<String>, message: Option<String>) -> Self {
        let error_type = error_type.filter(|s| !s.is_empty());
        let message = message.filter(|s| !s.is_empty());
        if error_type.is_none() && message.is_none() {
            return BridgeError::Remote {
                error_type: "Unknown".to_string(),
                message: String::new(),
            };
        }
        BridgeError::Remote {
            error_type: error_type.unwrap_or_else(|| "Unknown".to_string()),
            message: message.unwrap_or_default(),
        }
    }
}

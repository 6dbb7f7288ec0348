// Crosswin Core Library
// Namespaced events, request/response and heartbeats between browsing contexts

/// Diagnostic logging, emitted only when the bridge runs with `debug = true`.
macro_rules! diag {
    ($cfg:expr, $($arg:tt)+) => {
        if $cfg.debug {
            let __ns = &$cfg.namespace;
            tracing::debug!(target: "crosswin", namespace = %__ns, $($arg)+);
        }
    };
}

pub mod bridge;
pub mod channel;
pub mod config;
pub mod correlation;
pub mod envelope;
pub mod heartbeat;
mod router;
pub mod registry;
pub mod window;
pub mod wire;

// Export core types
pub use bridge::{Bridge, ErrorHandler};
pub use channel::{PostTarget, RawChannel, RawMessage, TransportError, ANY_ORIGIN};
pub use config::BridgeConfig;
pub use correlation::{PendingInfo, PendingReply};
pub use envelope::{status, Envelope, MessageType, ValidationError};
pub use heartbeat::Liveness;
pub use registry::{HandlerError, HandlerId};
pub use window::{Window, WindowStats};
pub use wire::MessageFormat;

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Request \"{event_name}\" timed out after {timeout_ms}ms")]
    Timeout { event_name: String, timeout_ms: u64 },

    #[error("Request \"{event_name}\" could not be delivered to any target")]
    Undeliverable { event_name: String },

    #[error("Bridge destroyed")]
    Destroyed,

    #[error("Handler for \"{event_name}\" failed: {message}")]
    Handler { event_name: String, message: String },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}
pub type Result<T> = std::result::Result<T, BridgeError>;

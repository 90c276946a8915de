//! Error types.
//!
//! Configuration errors are fatal for the controller that hits them.
//! Everything else the controller can recover from is logged through
//! `tracing` instead of being returned.

use thiserror::Error;

/// Failure to parse a field path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("empty field path")]
    Empty,

    #[error("empty path segment at byte {0}")]
    EmptySegment(usize),

    #[error("invalid array index `{0}`")]
    InvalidIndex(String),

    #[error("unterminated `[` at byte {0}")]
    Unterminated(usize),

    /// A write named an array index more than one past the end.
    #[error("array index {index} is past the end of an array of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Errors surfaced by the component controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The host never supplied an initial-data function.
    #[error("component `{0}` has no initial data supplier")]
    MissingInitialData(String),

    /// The host never supplied a render sink.
    #[error("component `{0}` has no render sink")]
    MissingRenderSink(String),

    /// The controller was already destroyed.
    #[error("component `{0}` is destroyed")]
    Destroyed(String),

    #[error("watch handler names unknown method `{0}`")]
    UnknownMethod(String),

    #[error("unknown computed key `{0}`")]
    UnknownComputed(String),

    #[error("computed key `{0}` has no setter")]
    ReadOnlyComputed(String),

    #[error(transparent)]
    Path(#[from] PathError),
}

/// Failure reported by an injected render function.
#[derive(Debug, Error)]
#[error("render function failed: {message}")]
pub struct RenderError {
    pub message: String,
}

impl RenderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failure to load a [`RuntimeConfig`](crate::config::RuntimeConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid runtime config: {0}")]
    Json(#[from] serde_json::Error),
}

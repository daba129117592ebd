//! Error types shared across the bridge.

use std::fmt::{Display, Formatter};

/// Shared bridge result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Bridge error enumeration covering every failure a tool call can end in.
///
/// Each variant maps to a stable machine-readable [`kind`](Self::kind) that
/// is used when a failure is reported as a structured `{ kind, message }`
/// object (batch outcomes, explore events, daemon error envelopes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Tool arguments violated the tool's input schema. Never reaches the wire.
    InvalidArguments(String),
    /// The requested tool is not registered with this dispatcher.
    UnknownTool(String),
    /// A request id was registered while a call with the same id is pending.
    DuplicateRequestId(String),
    /// No terminal envelope arrived before the call's deadline.
    Timeout(String),
    /// The call was cancelled by its caller.
    Cancelled(String),
    /// The daemon's tool executor reported a failure.
    Remote {
        /// Short machine-readable category from the executor.
        kind: String,
        /// Human-readable failure description.
        message: String,
    },
    /// The channel closed or broke before a terminal envelope arrived.
    Transport(String),
    /// A batch exceeded the configured maximum size.
    BatchTooLarge {
        /// Number of entries submitted.
        len: usize,
        /// Configured maximum.
        max: usize,
    },
    /// A batch was structurally malformed.
    InvalidBatch(String),
    /// The per-channel pending-call limit was reached.
    Overloaded(String),
    /// The caller's credential was rejected.
    Unauthorized(String),
    /// The rate limiter denied the call.
    RateLimited(String),
    /// No gateway key is stored for the user.
    MissingGatewayKey(String),
    /// Frame decoding failure on the wire.
    Codec(String),
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// Machine-readable category for structured error reporting.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::InvalidArguments(_) => "invalid_arguments",
            Self::UnknownTool(_) => "unknown_tool",
            Self::DuplicateRequestId(_) => "duplicate_request_id",
            Self::Timeout(_) => "timeout",
            Self::Cancelled(_) => "cancelled",
            Self::Remote { kind, .. } => kind,
            Self::Transport(_) => "transport_error",
            Self::BatchTooLarge { .. } => "batch_too_large",
            Self::InvalidBatch(_) => "invalid_batch",
            Self::Overloaded(_) => "overloaded",
            Self::Unauthorized(_) => "unauthorized",
            Self::RateLimited(_) => "rate_limited",
            Self::MissingGatewayKey(_) => "missing_gateway_key",
            Self::Codec(_) => "codec_error",
            Self::Config(_) => "config_error",
            Self::Io(_) => "io_error",
        }
    }

    /// Human-readable message without the kind prefix.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::InvalidArguments(msg)
            | Self::UnknownTool(msg)
            | Self::DuplicateRequestId(msg)
            | Self::Timeout(msg)
            | Self::Cancelled(msg)
            | Self::Transport(msg)
            | Self::InvalidBatch(msg)
            | Self::Overloaded(msg)
            | Self::Unauthorized(msg)
            | Self::RateLimited(msg)
            | Self::MissingGatewayKey(msg)
            | Self::Codec(msg)
            | Self::Config(msg)
            | Self::Io(msg) => msg.clone(),
            Self::Remote { message, .. } => message.clone(),
            Self::BatchTooLarge { len, max } => {
                format!("batch has {len} entries, maximum is {max}")
            }
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidArguments(msg) => write!(f, "invalid arguments: {msg}"),
            Self::UnknownTool(name) => write!(f, "unknown tool: {name}"),
            Self::DuplicateRequestId(id) => write!(f, "duplicate request id: {id}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Cancelled(msg) => write!(f, "cancelled: {msg}"),
            Self::Remote { kind, message } => write!(f, "remote {kind}: {message}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::BatchTooLarge { len, max } => {
                write!(f, "batch too large: {len} entries, maximum is {max}")
            }
            Self::InvalidBatch(msg) => write!(f, "invalid batch: {msg}"),
            Self::Overloaded(msg) => write!(f, "overloaded: {msg}"),
            Self::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            Self::RateLimited(msg) => write!(f, "rate limited: {msg}"),
            Self::MissingGatewayKey(msg) => write!(f, "missing gateway key: {msg}"),
            Self::Codec(msg) => write!(f, "codec: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(format!("json: {err}"))
    }
}

//! Errors from the wire layer.
//!
//! Every variant is returned to the immediate caller. Nothing in this crate
//! terminates the process, so one misbehaving peer or one bad message only
//! affects the operation that observed it.

use thiserror::Error;

/// Errors from the wire protocol layer.
#[derive(Debug, Error)]
pub enum WireError {
    /// The message's type was never registered. A programming error on the
    /// sending side.
    #[error("Message type is not registered: {0}")]
    UnregisteredType(String),

    /// The buffer is too short or otherwise not an envelope.
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The envelope names a handle this registry does not know.
    #[error("Unknown type handle {0}")]
    UnknownType(u16),

    /// The same shape was registered twice.
    #[error("Type {name} is already registered as handle {handle}")]
    DuplicateType { name: String, handle: u16 },

    /// Every handle value has been assigned.
    #[error("Type registry is full")]
    RegistryFull,

    /// The payload encoder failed.
    #[error("Failed to encode {type_name}: {reason}")]
    Encode { type_name: String, reason: String },

    /// The payload decoder failed.
    #[error("Failed to decode {type_name} (handle {handle}): {reason}")]
    Decode {
        handle: u16,
        type_name: String,
        reason: String,
    },

    /// All dial attempts were exhausted.
    #[error("Failed to connect to {address} after {attempts} attempts: {reason}")]
    DialFailed {
        address: String,
        attempts: u32,
        reason: String,
    },

    /// The listening socket could not be bound.
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WireError {
    /// Decode-side errors leave the stream in sync; the caller may keep
    /// receiving on the same connection.
    pub fn is_recoverable_decode(&self) -> bool {
        matches!(
            self,
            WireError::MalformedEnvelope(_) | WireError::UnknownType(_) | WireError::Decode { .. }
        )
    }
}

/// Alias for Result with WireError.
pub type WireResult<T> = Result<T, WireError>;

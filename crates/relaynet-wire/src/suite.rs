//! Fallback structured encoders.
//!
//! A shape registered with `TypeRegistry::register` has no binary form of its
//! own; its payload is produced by the registry's [`Suite`]. The suite only
//! sees the payload, never the handle prefix, and every envelope travels in
//! its own frame, so the encoders do not need to be self-delimiting.

use relaynet_types::SuiteKind;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Failure inside a suite encoder or decoder.
#[derive(Debug, Error)]
pub enum SuiteError {
    #[error("msgpack encode: {0}")]
    MsgpackEncode(#[from] rmp_serde::encode::Error),

    #[error("msgpack decode: {0}")]
    MsgpackDecode(#[from] rmp_serde::decode::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// A serde-backed payload encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Suite {
    /// MessagePack with named struct fields, so fields can be added with
    /// `#[serde(default)]` without breaking older peers.
    #[default]
    MessagePack,
    /// JSON. Larger, but readable in packet captures.
    Json,
}

impl Suite {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Suite::MessagePack => "msgpack",
            Suite::Json => "json",
        }
    }

    /// Serialize `value`, appending to `out`.
    pub fn write<T: Serialize + ?Sized>(
        &self,
        out: &mut Vec<u8>,
        value: &T,
    ) -> Result<(), SuiteError> {
        match self {
            Suite::MessagePack => rmp_serde::encode::write_named(out, value)?,
            Suite::Json => serde_json::to_writer(out, value)?,
        }
        Ok(())
    }

    /// Deserialize a complete payload.
    pub fn read<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, SuiteError> {
        let value = match self {
            Suite::MessagePack => rmp_serde::from_slice(data)?,
            Suite::Json => serde_json::from_slice(data)?,
        };
        Ok(value)
    }
}

impl From<SuiteKind> for Suite {
    fn from(kind: SuiteKind) -> Self {
        match kind {
            SuiteKind::Msgpack => Suite::MessagePack,
            SuiteKind::Json => Suite::Json,
        }
    }
}

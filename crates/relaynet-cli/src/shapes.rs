//! Message shapes spoken by the `relaynet` binary.
//!
//! Handles are assigned in registration order, so every build of the binary
//! must call [`register_shapes`] with the same list in the same order.

use relaynet_wire::{BinaryError, BinaryMessage, TypeRegistry, WireResult};
use serde::{Deserialize, Serialize};

/// Free-form text, encoded by the registry's suite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub from: String,
    pub text: String,
}

/// Round-trip ping. Encodes itself as an 8-byte big-endian sequence number.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Ping {
    pub seq: u64,
}

impl BinaryMessage for Ping {
    fn marshal_binary(&self) -> Result<Vec<u8>, BinaryError> {
        Ok(self.seq.to_be_bytes().to_vec())
    }

    fn unmarshal_binary(&mut self, data: &[u8]) -> Result<(), BinaryError> {
        let bytes: [u8; 8] = data.try_into().map_err(|_| {
            BinaryError::new(format!("ping payload must be 8 bytes, got {}", data.len()))
        })?;
        self.seq = u64::from_be_bytes(bytes);
        Ok(())
    }
}

pub fn register_shapes(registry: &TypeRegistry) -> WireResult<()> {
    registry.register::<Chat>()?;
    registry.register_binary::<Ping>()?;
    Ok(())
}

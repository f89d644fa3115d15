//! Message traits.
//!
//! [`Message`] is implemented for every `'static + Send + Sync + Debug` type
//! and gives the envelope a way to carry and downcast arbitrary values.
//! [`BinaryMessage`] is the optional self-describing capability: a shape that
//! implements it and is registered with `register_binary` bypasses the suite.

use std::any::Any;
use std::fmt;
use thiserror::Error;

/// Any value that can travel inside an envelope.
pub trait Message: Any + Send + Sync + fmt::Debug {
    /// Borrow as `Any` for type inspection.
    fn as_any(&self) -> &dyn Any;

    /// Convert into a boxed `Any` for owned downcasting.
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync>;

    /// Rust type name of the concrete shape.
    fn type_name(&self) -> &'static str;
}

impl<T: Any + Send + Sync + fmt::Debug> Message for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync> {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Error raised by a [`BinaryMessage`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct BinaryError(pub String);

impl BinaryError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Self-describing binary encoding.
///
/// Decoding starts from `Self::default()` and fills it in place. The input
/// slice holds exactly the bytes produced by `marshal_binary`.
pub trait BinaryMessage: Message + Default {
    /// Produce the payload bytes for this value.
    fn marshal_binary(&self) -> Result<Vec<u8>, BinaryError>;

    /// Populate `self` from payload bytes.
    fn unmarshal_binary(&mut self, data: &[u8]) -> Result<(), BinaryError>;
}

//! Type registry: maps small integer handles to message shapes and back.
//!
//! Handles are assigned from 1 upwards in registration order and are never
//! reused. Two processes that register the same shapes in the same order
//! agree on every handle, which is what lets a receiver rebuild a message from
//! nothing but the handle prefix.
//!
//! The encoding path of a shape is fixed when it is registered:
//! [`TypeRegistry::register`] routes it through the registry's [`Suite`],
//! [`TypeRegistry::register_binary`] through its own [`BinaryMessage`] impl.
//! Each entry stores monomorphised encode/decode functions, so dispatch is a
//! single hash lookup with no per-call capability probing.

use crate::error::{WireError, WireResult};
use crate::message::{BinaryError, BinaryMessage, Message};
use crate::suite::{Suite, SuiteError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};
use thiserror::Error;
use tracing::debug;

/// Identifier of a registered shape. Zero is reserved and never assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeHandle(u16);

impl TypeHandle {
    /// Width of a handle on the wire.
    pub const WIRE_SIZE: usize = 2;

    /// Wrap a raw value. Returns `None` for the reserved value 0.
    pub fn new(raw: u16) -> Option<Self> {
        (raw != 0).then_some(Self(raw))
    }

    pub fn get(self) -> u16 {
        self.0
    }

    pub fn to_be_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; 2]) -> Option<Self> {
        Self::new(u16::from_be_bytes(bytes))
    }
}

impl fmt::Display for TypeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a shape's payload is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// The shape's own [`BinaryMessage`] implementation.
    SelfDescribing,
    /// The registry's [`Suite`].
    Suite,
}

/// Public description of a registered shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeInfo {
    pub handle: TypeHandle,
    pub name: &'static str,
    pub encoding: Encoding,
}

/// Payload codec failure, flattened into [`WireError`] by the envelope layer.
#[derive(Debug, Error)]
pub(crate) enum CodecError {
    #[error(transparent)]
    Suite(#[from] SuiteError),

    #[error(transparent)]
    Binary(#[from] BinaryError),

    #[error("expected {expected}, got {actual}")]
    Mismatch {
        expected: &'static str,
        actual: &'static str,
    },
}

type EncodeFn = fn(&dyn Message, Suite, &mut Vec<u8>) -> Result<(), CodecError>;
type DecodeFn = fn(&[u8], Suite) -> Result<Box<dyn Message>, CodecError>;

/// Dispatch entry for one shape.
#[derive(Clone, Copy)]
pub(crate) struct ShapeCodec {
    pub(crate) info: ShapeInfo,
    encode: EncodeFn,
    decode: DecodeFn,
}

impl ShapeCodec {
    pub(crate) fn encode(
        &self,
        msg: &dyn Message,
        suite: Suite,
        out: &mut Vec<u8>,
    ) -> Result<(), CodecError> {
        (self.encode)(msg, suite, out)
    }

    pub(crate) fn decode(
        &self,
        data: &[u8],
        suite: Suite,
    ) -> Result<Box<dyn Message>, CodecError> {
        (self.decode)(data, suite)
    }
}

fn downcast<T: Message>(msg: &dyn Message) -> Result<&T, CodecError> {
    msg.as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| CodecError::Mismatch {
            expected: std::any::type_name::<T>(),
            actual: msg.type_name(),
        })
}

fn encode_with_suite<T: Message + Serialize>(
    msg: &dyn Message,
    suite: Suite,
    out: &mut Vec<u8>,
) -> Result<(), CodecError> {
    Ok(suite.write(out, downcast::<T>(msg)?)?)
}

fn decode_with_suite<T: Message + DeserializeOwned>(
    data: &[u8],
    suite: Suite,
) -> Result<Box<dyn Message>, CodecError> {
    let value: T = suite.read(data)?;
    Ok(Box::new(value))
}

fn encode_binary<T: BinaryMessage>(
    msg: &dyn Message,
    _suite: Suite,
    out: &mut Vec<u8>,
) -> Result<(), CodecError> {
    let bytes = downcast::<T>(msg)?.marshal_binary()?;
    out.extend_from_slice(&bytes);
    Ok(())
}

fn decode_binary<T: BinaryMessage>(
    data: &[u8],
    _suite: Suite,
) -> Result<Box<dyn Message>, CodecError> {
    let mut value = T::default();
    value.unmarshal_binary(data)?;
    Ok(Box::new(value))
}

#[derive(Default)]
struct Inner {
    /// Last handle handed out; 0 before the first registration.
    last: u16,
    by_handle: HashMap<TypeHandle, ShapeCodec>,
    by_type: HashMap<TypeId, TypeHandle>,
}

/// Thread-safe registry of message shapes.
///
/// Cloning is cheap and shares the underlying table.
#[derive(Clone)]
pub struct TypeRegistry {
    inner: Arc<RwLock<Inner>>,
    suite: Suite,
}

impl TypeRegistry {
    /// Create an empty registry using the default suite.
    pub fn new() -> Self {
        Self::with_suite(Suite::default())
    }

    /// Create an empty registry with a specific fallback encoder.
    pub fn with_suite(suite: Suite) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            suite,
        }
    }

    /// The process-wide registry. Created empty on first use, never cleared.
    pub fn global() -> &'static TypeRegistry {
        static GLOBAL: OnceLock<TypeRegistry> = OnceLock::new();
        GLOBAL.get_or_init(TypeRegistry::new)
    }

    /// The fallback encoder for suite-path shapes.
    pub fn suite(&self) -> Suite {
        self.suite
    }

    /// Register `T`, encoding its payload with the suite.
    ///
    /// Registering a shape twice is rejected with
    /// [`WireError::DuplicateType`].
    pub fn register<T>(&self) -> WireResult<TypeHandle>
    where
        T: Message + Serialize + DeserializeOwned,
    {
        self.insert::<T>(
            Encoding::Suite,
            encode_with_suite::<T>,
            decode_with_suite::<T>,
        )
    }

    /// Register `T`, encoding its payload with its own [`BinaryMessage`] impl.
    pub fn register_binary<T: BinaryMessage>(&self) -> WireResult<TypeHandle> {
        self.insert::<T>(
            Encoding::SelfDescribing,
            encode_binary::<T>,
            decode_binary::<T>,
        )
    }

    fn insert<T: Message>(
        &self,
        encoding: Encoding,
        encode: EncodeFn,
        decode: DecodeFn,
    ) -> WireResult<TypeHandle> {
        let name = std::any::type_name::<T>();
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());

        if let Some(existing) = inner.by_type.get(&TypeId::of::<T>()) {
            return Err(WireError::DuplicateType {
                name: name.to_string(),
                handle: existing.get(),
            });
        }

        let raw = inner.last.checked_add(1).ok_or(WireError::RegistryFull)?;
        inner.last = raw;
        let handle = TypeHandle(raw);

        inner.by_handle.insert(
            handle,
            ShapeCodec {
                info: ShapeInfo {
                    handle,
                    name,
                    encoding,
                },
                encode,
                decode,
            },
        );
        inner.by_type.insert(TypeId::of::<T>(), handle);

        debug!(handle = raw, type_name = name, ?encoding, "registered message type");
        Ok(handle)
    }

    /// Look up the shape behind a handle.
    pub fn resolve(&self, handle: TypeHandle) -> Option<ShapeInfo> {
        self.codec(handle).map(|c| c.info)
    }

    /// Handle assigned to `T`, if registered.
    pub fn handle_of<T: Message>(&self) -> Option<TypeHandle> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Handle assigned to the concrete type of `msg`, if registered.
    pub fn handle_of_value(&self, msg: &dyn Message) -> Option<TypeHandle> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.by_type.get(&msg.as_any().type_id()).copied()
    }

    /// Human-readable name for a handle, `"unknown"` if unregistered.
    pub fn type_name(&self, handle: TypeHandle) -> &'static str {
        self.resolve(handle).map(|i| i.name).unwrap_or("unknown")
    }

    /// All registered shapes, ordered by handle.
    pub fn shapes(&self) -> Vec<ShapeInfo> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut shapes: Vec<ShapeInfo> = inner.by_handle.values().map(|c| c.info).collect();
        shapes.sort_by_key(|s| s.handle);
        shapes
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn codec(&self, handle: TypeHandle) -> Option<ShapeCodec> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.by_handle.get(&handle).copied()
    }

    pub(crate) fn codec_for_value(&self, msg: &dyn Message) -> Option<ShapeCodec> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let handle = inner.by_type.get(&msg.as_any().type_id())?;
        inner.by_handle.get(handle).copied()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("suite", &self.suite)
            .field("shapes", &self.shapes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::BinaryError;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Hello {
        from: String,
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Goodbye;

    #[derive(Debug, Default, PartialEq)]
    struct Point(u32);

    impl BinaryMessage for Point {
        fn marshal_binary(&self) -> Result<Vec<u8>, BinaryError> {
            Ok(self.0.to_be_bytes().to_vec())
        }

        fn unmarshal_binary(&mut self, data: &[u8]) -> Result<(), BinaryError> {
            let bytes: [u8; 4] = data
                .try_into()
                .map_err(|_| BinaryError::new("expected 4 bytes"))?;
            self.0 = u32::from_be_bytes(bytes);
            Ok(())
        }
    }

    #[test]
    fn test_handles_start_at_one_and_increase() {
        let registry = TypeRegistry::new();
        let a = registry.register::<Hello>().unwrap();
        let b = registry.register::<Goodbye>().unwrap();
        let c = registry.register_binary::<Point>().unwrap();

        assert_eq!(a.get(), 1);
        assert_eq!(b.get(), 2);
        assert_eq!(c.get(), 3);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_lookup_directions_are_inverse() {
        let registry = TypeRegistry::new();
        let handles = [
            registry.register::<Hello>().unwrap(),
            registry.register::<Goodbye>().unwrap(),
            registry.register_binary::<Point>().unwrap(),
        ];

        for handle in handles {
            let info = registry.resolve(handle).unwrap();
            assert_eq!(info.handle, handle);
        }
        assert_eq!(registry.handle_of::<Hello>(), Some(handles[0]));
        assert_eq!(registry.handle_of::<Goodbye>(), Some(handles[1]));
        assert_eq!(registry.handle_of::<Point>(), Some(handles[2]));
        assert_eq!(registry.handle_of_value(&Point(9)), Some(handles[2]));
    }

    #[test]
    fn test_encoding_is_fixed_at_registration() {
        let registry = TypeRegistry::new();
        let suite = registry.register::<Hello>().unwrap();
        let binary = registry.register_binary::<Point>().unwrap();

        assert_eq!(registry.resolve(suite).unwrap().encoding, Encoding::Suite);
        assert_eq!(
            registry.resolve(binary).unwrap().encoding,
            Encoding::SelfDescribing
        );
    }

    #[test]
    fn test_codec_errors_stay_typed() {
        let registry = TypeRegistry::new();
        let point = registry.register_binary::<Point>().unwrap();
        let codec = registry.codec(point).unwrap();

        let mut out = Vec::new();
        let err = codec
            .encode(&Hello { from: "x".to_string() }, Suite::Json, &mut out)
            .unwrap_err();
        assert!(matches!(err, CodecError::Mismatch { .. }));
        assert!(out.is_empty());

        let err = codec.decode(&[1, 2], Suite::Json).unwrap_err();
        assert!(matches!(err, CodecError::Binary(_)));
        assert_eq!(err.to_string(), "expected 4 bytes");

        let hello = registry.register::<Hello>().unwrap();
        let err = registry
            .codec(hello)
            .unwrap()
            .decode(b"not json", Suite::Json)
            .unwrap_err();
        assert!(matches!(err, CodecError::Suite(SuiteError::Json(_))));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = TypeRegistry::new();
        let first = registry.register::<Hello>().unwrap();

        match registry.register::<Hello>() {
            Err(WireError::DuplicateType { handle, name }) => {
                assert_eq!(handle, first.get());
                assert!(name.ends_with("Hello"));
            }
            other => panic!("Expected DuplicateType, got {other:?}"),
        }

        // The failed attempt must not burn a handle.
        let next = registry.register::<Goodbye>().unwrap();
        assert_eq!(next.get(), 2);
    }

    #[test]
    fn test_unknown_handle() {
        let registry = TypeRegistry::new();
        let handle = TypeHandle::new(42).unwrap();
        assert!(registry.resolve(handle).is_none());
        assert_eq!(registry.type_name(handle), "unknown");
        assert!(registry.handle_of::<Hello>().is_none());
    }

    #[test]
    fn test_zero_handle_is_reserved() {
        assert!(TypeHandle::new(0).is_none());
        assert!(TypeHandle::from_be_bytes([0, 0]).is_none());
        assert_eq!(TypeHandle::from_be_bytes([1, 2]).unwrap().get(), 258);
    }

    #[test]
    fn test_registry_full() {
        let registry = TypeRegistry::new();
        registry.inner.write().unwrap().last = u16::MAX;
        assert!(matches!(
            registry.register::<Hello>(),
            Err(WireError::RegistryFull)
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_clones_share_state() {
        let registry = TypeRegistry::new();
        let clone = registry.clone();
        let handle = clone.register::<Hello>().unwrap();
        assert_eq!(registry.handle_of::<Hello>(), Some(handle));
    }

    #[test]
    fn test_shapes_sorted() {
        let registry = TypeRegistry::with_suite(Suite::Json);
        registry.register_binary::<Point>().unwrap();
        registry.register::<Hello>().unwrap();

        let shapes = registry.shapes();
        assert_eq!(shapes.len(), 2);
        assert!(shapes[0].handle < shapes[1].handle);
        assert!(shapes[0].name.ends_with("Point"));
        assert_eq!(registry.suite(), Suite::Json);
    }

    #[test]
    fn test_global_is_singleton() {
        let a = TypeRegistry::global() as *const TypeRegistry;
        let b = TypeRegistry::global() as *const TypeRegistry;
        assert_eq!(a, b);
    }
}

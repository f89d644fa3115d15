//! relaynet wire layer: typed message envelopes over peer connections.
//!
//! Any registered Rust type can be sent to a named peer and rebuilt on the
//! other side. The receiver only needs to have registered the same shapes in
//! the same order; it needs no compile-time list of every message.
//!
//! ## Architecture
//!
//! - **TypeRegistry**: maps `TypeHandle`s to shapes and back
//! - **Envelope**: handle-prefixed payload, encoded by the shape itself
//!   (`BinaryMessage`) or by the registry's `Suite`
//! - **Connection**: one framed TCP stream to a named peer
//! - **Host**: dials peers with bounded retry and accepts inbound connections
//! - **PeerMap**: observational index of the connections a host has seen

pub mod connection;
pub mod envelope;
pub mod error;
pub mod host;
pub mod message;
pub mod peers;
pub mod registry;
pub mod retry;
pub mod suite;

pub use connection::Connection;
pub use envelope::{decode_envelope, encode_message, Envelope};
pub use error::{WireError, WireResult};
pub use host::{handler_fn, ConnectionHandler, Host, Listener};
pub use message::{BinaryError, BinaryMessage, Message};
pub use peers::{PeerDirection, PeerEntry, PeerMap, PeerState};
pub use registry::{Encoding, ShapeInfo, TypeHandle, TypeRegistry};
pub use suite::{Suite, SuiteError};

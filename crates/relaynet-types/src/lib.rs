//! Shared types for the relaynet messaging layer.
//!
//! This crate holds the configuration model and its loading logic. It is
//! depended on by the wire protocol and the CLI and contains no networking.

pub mod config;
pub mod error;

pub use config::{load_config, try_load_config, DialConfig, NetworkConfig, SuiteKind};
pub use error::{ConfigError, ConfigResult};

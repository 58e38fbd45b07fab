//! Relay Common - Shared configuration, errors, and logging for the chat relay.
//!
//! This crate provides:
//! - Configuration types and loading
//! - Configuration validation
//! - Error types and handling utilities
//! - Logging setup
//! - Small string helpers used when logging upstream payloads

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod util;
pub mod validation;

pub use config::{
    Config, ObservabilityConfig, RelayConfig, SecretsConfig, ServerConfig, StorageBackend,
    StorageConfig, UpstreamConfig,
};
pub use error::{Error, Result, ResultExt};
pub use validation::{validate_owner_id, validate_record_id, Validate, ValidationError, ValidationResult};

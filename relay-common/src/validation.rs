//! Configuration and identifier validation.
//!
//! Provides validation logic for configuration fields to ensure
//! all required values are present and within valid ranges, plus the
//! rules for conversation ids (which become file names) and owner ids.

use thiserror::Error;

use crate::config::{Config, ObservabilityConfig, RelayConfig, ServerConfig, UpstreamConfig};

/// Longest accepted conversation id.
pub const MAX_RECORD_ID_LEN: usize = 128;

/// Longest accepted owner id, in characters.
pub const MAX_OWNER_ID_LEN: usize = 256;

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid port {port}: must be between 1 and 65535")]
    InvalidPort { port: u16, field: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.server.validate() {
            errors.push(e);
        }
        if let Err(e) = self.upstream.validate() {
            errors.push(e);
        }
        if let Err(e) = self.relay.validate() {
            errors.push(e);
        }
        if let Err(e) = self.observability.validate() {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }

    /// Load, apply environment overrides, and validate configuration.
    pub fn load_and_validate() -> anyhow::Result<Self> {
        let config = Self::load_with_env()?;
        config.validate().map_err(|e| anyhow::anyhow!("{}", e))?;
        Ok(config)
    }
}

impl Validate for ServerConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort {
                port: self.port,
                field: "server.port".into(),
            });
        }
        if self.bind.parse::<std::net::IpAddr>().is_err() {
            return Err(ValidationError::InvalidValue {
                field: "server.bind".into(),
                reason: format!("not an IP address: {}", self.bind),
            });
        }
        if self.max_body_bytes == 0 {
            return Err(ValidationError::InvalidValue {
                field: "server.max_body_bytes".into(),
                reason: "must be greater than 0".into(),
            });
        }
        Ok(())
    }
}

impl Validate for UpstreamConfig {
    fn validate(&self) -> ValidationResult<()> {
        match url::Url::parse(&self.base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => {
                return Err(ValidationError::InvalidValue {
                    field: "upstream.base_url".into(),
                    reason: format!("unsupported scheme: {}", url.scheme()),
                })
            }
            Err(e) => {
                return Err(ValidationError::InvalidValue {
                    field: "upstream.base_url".into(),
                    reason: e.to_string(),
                })
            }
        }

        if self.model.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "upstream.model".into(),
            });
        }

        if let Some(temperature) = self.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(ValidationError::InvalidValue {
                    field: "upstream.temperature".into(),
                    reason: "must be between 0.0 and 2.0".into(),
                });
            }
        }

        if self.connect_timeout_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "upstream.connect_timeout_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.idle_timeout_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "upstream.idle_timeout_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }

        Ok(())
    }
}

impl Validate for RelayConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.channel_capacity == 0 {
            return Err(ValidationError::InvalidValue {
                field: "relay.channel_capacity".into(),
                reason: "must be greater than 0".into(),
            });
        }
        validate_owner_id("relay.default_owner", &self.default_owner)
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            });
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            });
        }

        Ok(())
    }
}

/// Check that an id is safe to use as a storage key and file name.
///
/// Accepts 1 to [`MAX_RECORD_ID_LEN`] characters from `[A-Za-z0-9_.-]`,
/// excluding `.` and `..`.
pub fn validate_record_id(field: &str, id: &str) -> ValidationResult<()> {
    if id.is_empty() {
        return Err(ValidationError::MissingField {
            field: field.to_string(),
        });
    }
    if id.len() > MAX_RECORD_ID_LEN {
        return Err(ValidationError::InvalidValue {
            field: field.to_string(),
            reason: format!("longer than {} characters", MAX_RECORD_ID_LEN),
        });
    }
    if id == "." || id == ".." {
        return Err(ValidationError::InvalidValue {
            field: field.to_string(),
            reason: "reserved path segment".into(),
        });
    }
    if let Some(bad) = id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(ValidationError::InvalidValue {
            field: field.to_string(),
            reason: format!("unsupported character {:?}", bad),
        });
    }
    Ok(())
}

/// Check an owner id.
///
/// Owner ids are opaque strings compared for equality and never used in
/// paths, so any non-blank value up to [`MAX_OWNER_ID_LEN`] characters is
/// accepted.
pub fn validate_owner_id(field: &str, id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::MissingField {
            field: field.to_string(),
        });
    }
    if id.chars().count() > MAX_OWNER_ID_LEN {
        return Err(ValidationError::InvalidValue {
            field: field.to_string(),
            reason: format!("longer than {} characters", MAX_OWNER_ID_LEN),
        });
    }
    Ok(())
}

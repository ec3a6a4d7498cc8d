//! Validation for configuration and user-supplied values.
//!
//! The same error type covers both startup checks (missing token, bad port)
//! and values a user types into a command (temperature, persona, model).

use thiserror::Error;

use crate::config::{Config, HealthConfig, ObservabilityConfig, SessionSettings, TelegramConfig};

/// Validation error.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Invalid port {port}: must be between 1 and 65535")]
    InvalidPort { port: u16, field: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{field} expects a number, got {input:?}")]
    NotANumber { field: String, input: String },

    #[error("Unknown {field}: {value}")]
    UnknownOption { field: String, value: String },

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

        if let Err(e) = self.telegram.validate() {
            errors.push(e);
        }
        if let Err(e) = self.session.validate() {
            errors.push(e);
        }
        if let Err(e) = self.health.validate() {
            errors.push(e);
        }
        if let Err(e) = self.observability.validate() {
            errors.push(e);
        }
        if self.gemini.api_key.as_deref().map_or(true, str::is_empty) {
            errors.push(ValidationError::MissingField {
                field: "gemini.api_key".into(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }

    /// Load and validate configuration.
    pub fn load_and_validate() -> anyhow::Result<Self> {
        let config = Self::load_with_env()?;
        config.validate().map_err(|e| anyhow::anyhow!("{}", e))?;
        Ok(config)
    }
}

impl Validate for TelegramConfig {
    fn validate(&self) -> ValidationResult<()> {
        match self.bot_token.as_deref() {
            None | Some("") => Err(ValidationError::MissingField {
                field: "telegram.bot_token".into(),
            }),
            Some(token) if !token.contains(':') => Err(ValidationError::InvalidValue {
                field: "telegram.bot_token".into(),
                reason: "expected the `<id>:<secret>` form issued by BotFather".into(),
            }),
            Some(_) => Ok(()),
        }
    }
}

impl Validate for SessionSettings {
    fn validate(&self) -> ValidationResult<()> {
        if self.max_history == 0 {
            return Err(ValidationError::InvalidValue {
                field: "session.max_history".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.idle_ttl_secs == Some(0) {
            return Err(ValidationError::InvalidValue {
                field: "session.idle_ttl_secs".into(),
                reason: "use null to disable eviction instead of 0".into(),
            });
        }
        Ok(())
    }
}

impl Validate for HealthConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort {
                port: self.port,
                field: "health.port".into(),
            });
        }
        if self.bind.parse::<std::net::IpAddr>().is_err() {
            return Err(ValidationError::InvalidValue {
                field: "health.bind".into(),
                reason: format!("{:?} is not an IP address", self.bind),
            });
        }
        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
        const FORMATS: &[&str] = &["json", "pretty"];

        if !LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("must be one of {LEVELS:?}"),
            });
        }
        if !FORMATS.contains(&self.log_format.as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("must be one of {FORMATS:?}"),
            });
        }
        Ok(())
    }
}

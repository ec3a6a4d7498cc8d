//! Parley Common - Shared configuration, errors, and logging for the Parley chat proxy.
//!
//! This crate provides:
//! - Configuration types and loading (file + environment overrides)
//! - Configuration validation
//! - The error taxonomy shared by every handler boundary
//! - Logging setup and structured logging helpers
//! - Small text utilities used across the bot

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod util;
pub mod validation;

pub use config::{
    Config, GeminiConfig, HealthConfig, ObservabilityConfig, SessionSettings, TelegramConfig,
};
pub use error::{Error, FormatError, Result};
pub use validation::{Validate, ValidationError, ValidationResult};

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, FormatError, Result};
    pub use crate::logging::init_logging;
    pub use crate::validation::{Validate, ValidationError};
}

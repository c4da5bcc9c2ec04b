//! Configuration validation for llama-relay.
//!
//! Missing credentials are the one error that stops the bot at startup.

use thiserror::Error;

use crate::config::{Config, HistoryConfig, ObservabilityConfig, OllamaConfig, TelegramConfig};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
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

        if let Err(e) = self.telegram.validate() {
            errors.push(e);
        }
        if let Err(e) = self.ollama.validate() {
            errors.push(e);
        }
        if let Err(e) = self.history.validate() {
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
}

impl Validate for TelegramConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if self.bot_token.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "telegram.bot_token".into(),
            });
        }
        if self.owner_id.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "telegram.owner_id".into(),
            });
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ValidationError::Multiple(errors)),
        }
    }
}

impl Validate for OllamaConfig {
    fn validate(&self) -> ValidationResult<()> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ValidationError::InvalidValue {
                field: "ollama.base_url".into(),
                reason: format!("'{}' is not an http(s) URL", self.base_url),
            });
        }
        if self.model.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "ollama.model".into(),
            });
        }
        if self.timeout_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "ollama.timeout_secs".into(),
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

impl Validate for HistoryConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.path.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "history.path".into(),
            });
        }
        if self.default_session.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "history.default_session".into(),
            });
        }
        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
        const FORMATS: &[&str] = &["pretty", "json"];

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

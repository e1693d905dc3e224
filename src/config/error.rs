use crate::error::ScanflowError;
use thiserror::Error;

/// Failures while loading or validating configuration
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("Failed to load configuration from {source_name}: {message}")]
    LoadFailed {
        source_name: String,
        message: String,
    },

    #[error("Invalid value for {field}: {value} ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required field {field} in {context}")]
    MissingRequiredField { field: String, context: String },
}

impl ConfigurationError {
    pub fn load_failed(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LoadFailed {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    pub fn invalid_value(
        field: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    pub fn missing_required_field(field: impl Into<String>, context: impl Into<String>) -> Self {
        Self::MissingRequiredField {
            field: field.into(),
            context: context.into(),
        }
    }
}

impl From<ConfigurationError> for ScanflowError {
    fn from(err: ConfigurationError) -> Self {
        ScanflowError::Configuration(err.to_string())
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigurationError>;

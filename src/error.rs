use axum::http::StatusCode;
use thiserror::Error;

/// Errors surfaced by channel provisioning
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Invalid channel name: {0:?}")]
    InvalidChannelName(String),

    #[error("Failed to create directory for channel {channel}: {source}")]
    DirectoryCreationFailure {
        channel: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Engine refused task for channel {channel}: {source}")]
    EngineRegistrationFailure {
        channel: String,
        #[source]
        source: EngineError,
    },

    #[error("Provisioning of channel {0} was interrupted")]
    Interrupted(String),
}

impl ProvisionError {
    /// HTTP status the front door answers with
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProvisionError::InvalidChannelName(_) => StatusCode::BAD_REQUEST,
            ProvisionError::DirectoryCreationFailure { .. }
            | ProvisionError::EngineRegistrationFailure { .. }
            | ProvisionError::Interrupted(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum EngineError {
    #[error("Task for app {0:?} already exists")]
    DuplicateApp(String),

    #[error("Task list is full ({0} tasks)")]
    CapacityExceeded(usize),
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    #[error("Missing required configuration value: {0}")]
    Missing(&'static str),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

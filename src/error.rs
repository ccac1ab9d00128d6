use reqwest::StatusCode;
use thiserror::Error;

/// Failure of a single request to the controller.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Error: {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("Connection error: {0}")]
    Connection(#[from] reqwest::Error),

    #[error("Decode error: {0}")]
    Decode(String),
}

impl TransportError {
    /// True when the controller answered but refused the request.
    pub fn is_status(&self) -> bool {
        matches!(self, TransportError::Status { .. })
    }
}

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Authentication failed: {0}")]
    Authentication(#[source] TransportError),

    #[error("Registration failed: {0}")]
    Registration(#[source] TransportError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid agent state: expected {expected}, was {actual}")]
    State {
        expected: &'static str,
        actual: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, AgentError>;

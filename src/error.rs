use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("File not found or could not be read: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse settings JSON: {0}")]
    DeserializationError(#[from] serde_json::Error),

    /// A page element required by the session could not be located.
    #[error("Booking page is unavailable: {0}")]
    AdapterUnavailable(String),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Invalid date or time input: {0}")]
    InvalidTime(String),

    #[error("Session cannot {action} while {state}")]
    InvalidTransition { action: &'static str, state: String },
}

pub type Result<T> = std::result::Result<T, Error>;

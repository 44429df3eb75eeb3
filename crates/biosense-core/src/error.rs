use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // Identifier errors
    #[error("Invalid user id: {0}")]
    InvalidUserId(i32),

    #[error("Invalid error code: {0}")]
    InvalidErrorCode(i32),

    // Token errors
    #[error("Invalid hardware auth token: expected {expected} bytes, got {actual}")]
    InvalidAuthToken { expected: usize, actual: usize },

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

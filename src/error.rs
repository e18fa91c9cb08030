use rusqlite::Error as RusqliteError;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EvolveError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// A statement failed to execute. Surfaced unmodified so the caller's
    /// transaction aborts with the engine's own message.
    #[error("Database error: {0}")]
    DatabaseError(#[from] RusqliteError),

    /// A table or column required by a directive is missing.
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Invalid directive: {0}")]
    InvalidDirective(String),

    #[error("Plan parsing error: {0}")]
    PlanError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Logger error: {0}")]
    LoggerError(#[from] flexi_logger::FlexiLoggerError),

    #[error("Error: {0}")]
    Error(String), // Allows custom application errors
}

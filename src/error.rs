use thiserror::Error;

/// Error type for dbconn operations
#[derive(Debug, Error)]
pub enum DbError {
    #[error("No known database driver name given: {0}")]
    UnknownDriver(String),

    #[error("Invalid connection configuration: {0}")]
    InvalidConfig(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection is closed")]
    ConnectionClosed,

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Invalid statement: {0}")]
    InvalidStatement(String),

    #[error("Expected {expected} row(s), got {actual}")]
    UnexpectedRowCount { expected: usize, actual: usize },

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for dbconn operations
pub type Result<T> = std::result::Result<T, DbError>;

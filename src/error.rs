use thiserror::Error;

/// Failures raised by an execution engine while running a command
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("no connection configured for selector {0}")]
    UnknownConnection(u32),

    #[error("unexpected reply to {command}: expected {expected}")]
    UnexpectedReply {
        command: String,
        expected: &'static str,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors surfaced by [`crate::Record`] operations
#[derive(Debug, Error)]
pub enum RecordError {
    /// The key column is unset; raised before anything is dispatched.
    #[error("primary key value for {table}.{key} is required")]
    MissingKey { table: String, key: String },

    #[error("no such column {column} in {table}")]
    UnknownColumn { table: String, column: String },

    #[error(transparent)]
    Engine(#[from] EngineError),
}

pub type Result<T, E = RecordError> = std::result::Result<T, E>;

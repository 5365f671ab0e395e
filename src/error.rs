use rusqlite::Error as RusqliteError;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MigratorError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] RusqliteError),

    #[error("Connection pool error: {0}")]
    PoolError(#[from] r2d2::Error),

    #[error("Serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    #[error("Unknown dual-write pattern: {0}")]
    UnknownPattern(String),

    #[error("Unknown repair direction: {0}")]
    UnknownDirection(String),

    #[error("Control-plane lock was poisoned")]
    LockPoisoned,

    #[error("Error: {0}")]
    Error(String), // Allows custom application errors
}

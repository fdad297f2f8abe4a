//! Error types for the Neo4j manager

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the connection façade, health monitor and backup helper
#[derive(Error, Debug)]
pub enum ManagerError {
    /// The endpoint could not be contacted
    #[error("Neo4j service unavailable at {uri}: {message}")]
    ServiceUnreachable { uri: String, message: String },

    /// The server rejected the credentials
    #[error("Authentication failed for user {username}: {message}")]
    AuthenticationFailed { username: String, message: String },

    /// Driver-level failure while running a statement
    #[error("Query execution failed: {0}")]
    QueryExecutionFailed(String),

    /// Import requested against a path that does not exist
    #[error("Backup file not found: {}", .0.display())]
    BackupNotFound(PathBuf),

    /// Plugin export failed
    #[error("Export failed: {0}")]
    ExportFailed(String),

    /// Plugin import failed
    #[error("Import failed: {0}")]
    ImportFailed(String),

    /// Driver configuration could not be built
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ManagerError {
    /// Whether this error means the endpoint is down rather than misused
    pub fn is_unreachable(&self) -> bool {
        matches!(self, ManagerError::ServiceUnreachable { .. })
    }
}

pub type ManagerResult<T> = Result<T, ManagerError>;

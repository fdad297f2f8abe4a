//! Neo4j Manager
//!
//! Utilities for running a Neo4j database from Rust: connection lifecycle,
//! query execution, health checks, and GraphML backup/restore through the
//! APOC plugin.
//!
//! # Components
//!
//! - **`Connection`**: owns the driver handle, connects lazily, runs read
//!   and write statements, and offers node/relationship counts and a
//!   destructive `clear_database`.
//! - **`HealthChecker`**: connectivity, APOC availability, version and
//!   statistics probes plus a bounded `wait_for_ready` poll.
//! - **`BackupManager`**: APOC GraphML export/import and a listing of the
//!   artifacts in the backup directory.
//!
//! All calls are synchronous and block the calling thread.
//!
//! # Logging
//!
//! Every component logs through `tracing`. Nothing is emitted unless the
//! application installs a subscriber.
//!
//! # Example Usage
//!
//! ```rust
//! use neo4j_manager::{Connection, ConnectionConfig, HealthChecker, Script};
//! use neo4j_manager::value::record;
//!
//! // A scripted driver stands in for a live server here.
//! let script = Script::new();
//! script.respond("count(n)", vec![record([("count", 4i64)])]);
//!
//! let conn = Connection::with_connector(ConnectionConfig::default(), script.connector());
//! assert_eq!(conn.get_node_count().unwrap(), 4);
//!
//! let report = HealthChecker::new(&conn).full_health_check();
//! assert!(report.connected);
//! ```

#![warn(clippy::all)]

pub mod backup;
pub mod connection;
pub mod driver;
pub mod error;
pub mod health;
pub mod value;

// Re-export main types for convenience
pub use backup::{BackupArtifact, BackupManager, ImportStats};
pub use connection::{Connection, ConnectionConfig, ConnectionGuard};
pub use driver::{AccessMode, BoltConnector, Connector, GraphDriver, Script, ScriptedConnector};
pub use error::{ManagerError, ManagerResult};
pub use health::{DatabaseStats, HealthChecker, HealthReport, UNKNOWN_VERSION};
pub use value::{Params, Record, Value};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get version string
pub fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(version(), "0.1.0");
    }
}

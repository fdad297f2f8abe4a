//! Health monitor — point-in-time health snapshots built on the façade
//!
//! Nothing here mutates the graph. Failures the monitor expects (endpoint
//! down, APOC missing, no version row) become booleans or the `"unknown"`
//! sentinel; `full_health_check` never returns an error at all.

use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::connection::Connection;
use crate::error::ManagerResult;

/// Version reported when the server does not say
pub const UNKNOWN_VERSION: &str = "unknown";

const PLUGIN_QUERY: &str = "CALL apoc.help('version') YIELD name RETURN count(name) AS count";
const VERSION_QUERY: &str = "CALL dbms.components() YIELD versions RETURN versions[0] AS version";
const LABELS_QUERY: &str = "CALL db.labels() YIELD label RETURN collect(label) AS labels";

/// Aggregate counts. The three figures come from independent reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseStats {
    pub node_count: i64,
    pub relationship_count: i64,
    pub labels: Vec<String>,
}

/// Result of [`HealthChecker::full_health_check`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub connected: bool,
    /// Whether the APOC plugin answered
    pub plugin_available: bool,
    pub version: String,
    pub stats: DatabaseStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Default for HealthReport {
    fn default() -> Self {
        Self {
            connected: false,
            plugin_available: false,
            version: UNKNOWN_VERSION.to_string(),
            stats: DatabaseStats::default(),
            error: None,
        }
    }
}

impl HealthReport {
    /// Connected with no recorded error
    pub fn is_healthy(&self) -> bool {
        self.connected && self.error.is_none()
    }
}

/// Health checks for one connection
pub struct HealthChecker<'a> {
    connection: &'a Connection,
}

impl<'a> HealthChecker<'a> {
    pub fn new(connection: &'a Connection) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &Connection {
        self.connection
    }

    /// `Ok(false)` only when the endpoint is unreachable; other errors propagate
    pub fn check_connectivity(&self) -> ManagerResult<bool> {
        let outcome = self
            .connection
            .get_or_connect()
            .and_then(|driver| driver.verify_connectivity());
        match outcome {
            Ok(()) => Ok(true),
            Err(e) if e.is_unreachable() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Whether APOC answers its own help procedure.
    ///
    /// Any failure counts as "not available": a missing plugin shows up as a
    /// query error, but so would an unrelated one.
    pub fn check_plugin_available(&self) -> bool {
        match self.connection.execute_query(PLUGIN_QUERY, None) {
            Ok(records) => records
                .first()
                .and_then(|r| r.get("count"))
                .and_then(|v| v.as_integer())
                .map(|count| count > 0)
                .unwrap_or(false),
            Err(e) => {
                error!("APOC check failed: {}", e);
                false
            }
        }
    }

    /// Server version, or [`UNKNOWN_VERSION`] when no row comes back
    pub fn get_version(&self) -> ManagerResult<String> {
        let records = self.connection.execute_query(VERSION_QUERY, None)?;
        Ok(records
            .first()
            .and_then(|r| r.get("version"))
            .and_then(|v| v.as_string())
            .map(str::to_string)
            .unwrap_or_else(|| UNKNOWN_VERSION.to_string()))
    }

    /// Node count, relationship count and label names
    pub fn get_database_stats(&self) -> ManagerResult<DatabaseStats> {
        let node_count = self.connection.get_node_count()?;
        let relationship_count = self.connection.get_relationship_count()?;

        let records = self.connection.execute_query(LABELS_QUERY, None)?;
        let labels = records
            .first()
            .and_then(|r| r.get("labels"))
            .and_then(|v| v.as_list())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_string().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        Ok(DatabaseStats {
            node_count,
            relationship_count,
            labels,
        })
    }

    /// Poll connectivity every `interval` until it succeeds or `timeout` elapses.
    ///
    /// Blocks the calling thread. Returns immediately, without sleeping, when
    /// the first check succeeds. Only an unreachable endpoint counts as "not
    /// ready yet"; any other failure, such as rejected credentials, is
    /// returned at once.
    pub fn wait_for_ready(&self, timeout: Duration, interval: Duration) -> ManagerResult<bool> {
        let start = Instant::now();
        loop {
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                error!("Neo4j did not become ready within {}s", timeout.as_secs_f64());
                return Ok(false);
            }

            if self.check_connectivity()? {
                info!("Neo4j is ready");
                return Ok(true);
            }

            debug!("Waiting for Neo4j... ({}s)", start.elapsed().as_secs());
            thread::sleep(interval);
        }
    }

    /// Connectivity, then plugin, version and stats. Never fails: errors are
    /// recorded in the report next to whatever was gathered before them.
    pub fn full_health_check(&self) -> HealthReport {
        let mut report = HealthReport::default();
        if let Err(e) = self.fill_report(&mut report) {
            error!("Health check failed: {}", e);
            report.error = Some(e.to_string());
        }
        report
    }

    fn fill_report(&self, report: &mut HealthReport) -> ManagerResult<()> {
        report.connected = self.check_connectivity()?;
        if report.connected {
            report.plugin_available = self.check_plugin_available();
            report.version = self.get_version()?;
            report.stats = self.get_database_stats()?;
        }
        Ok(())
    }
}

//! Driver seam — the live handle behind the connection façade
//!
//! Provides two implementations:
//!
//! - **`BoltConnector`**: talks to a Neo4j server through `neo4rs`.
//! - **`ScriptedConnector`**: in-process, answers from canned responses and
//!   records every call. Used by tests and for dry runs.

pub mod bolt;
pub mod scripted;

use std::fmt;
use std::rc::Rc;

use crate::connection::ConnectionConfig;
use crate::error::ManagerResult;
use crate::value::{Params, Record};

pub use bolt::{BoltConnector, BoltDriver};
pub use scripted::{IssuedQuery, Script, ScriptedConnector, ScriptedDriver};

/// How a statement is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Auto-commit statement, no isolation across calls
    Read,
    /// Explicit transaction: commits everything or nothing
    Write,
}

/// A live connection handle.
///
/// Implemented by:
/// - `BoltDriver`: a Bolt connection to a running server
/// - `ScriptedDriver`: canned responses for tests
pub trait GraphDriver {
    /// Round-trip to the server
    fn verify_connectivity(&self) -> ManagerResult<()>;

    /// Run a statement and collect every row
    fn run(&self, query: &str, params: &Params, mode: AccessMode) -> ManagerResult<Vec<Record>>;

    /// Release driver resources
    fn close(&self);
}

impl fmt::Debug for dyn GraphDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("GraphDriver")
    }
}

/// Creates handles for a connection configuration
pub trait Connector {
    /// Open a handle. Reachability is checked by the caller.
    fn connect(&self, config: &ConnectionConfig) -> ManagerResult<Rc<dyn GraphDriver>>;
}

//! Connection façade — single owner of the live driver handle
//!
//! The handle is created lazily: every operation goes through
//! [`Connection::get_or_connect`], so callers never have to connect first.
//! A `Connection` is meant for one caller at a time and is not `Sync`.

use std::cell::RefCell;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use tracing::{debug, error, info, warn};

use crate::driver::{AccessMode, BoltConnector, Connector, GraphDriver};
use crate::error::{ManagerError, ManagerResult};
use crate::value::{Params, Record};

/// Endpoint and credentials for one Neo4j server
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Bolt URI, `scheme://host:port`
    pub uri: String,
    pub username: String,
    pub password: String,
    /// Database to run statements against (server default when `None`)
    pub database: Option<String>,
}

impl ConnectionConfig {
    pub fn new(
        uri: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            uri: uri.into(),
            username: username.into(),
            password: password.into(),
            database: None,
        }
    }

    /// Select a database other than the server default
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new("bolt://localhost:7687", "neo4j", "yourpassword")
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("uri", &self.uri)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}

/// Manages the connection to one Neo4j server
pub struct Connection {
    config: ConnectionConfig,
    connector: Box<dyn Connector>,
    handle: RefCell<Option<Rc<dyn GraphDriver>>>,
}

impl Connection {
    /// Create a connection that talks Bolt. Nothing is opened yet.
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_connector(config, BoltConnector)
    }

    /// Create a connection whose handles come from `connector`
    pub fn with_connector(config: ConnectionConfig, connector: impl Connector + 'static) -> Self {
        Self {
            config,
            connector: Box::new(connector),
            handle: RefCell::new(None),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Whether a handle is currently held
    pub fn is_connected(&self) -> bool {
        self.handle.borrow().is_some()
    }

    /// Open a fresh handle and verify the server answers.
    ///
    /// Any existing handle is replaced. On failure no handle is kept, not
    /// even one from an earlier successful call.
    pub fn connect(&self) -> ManagerResult<Rc<dyn GraphDriver>> {
        self.handle.borrow_mut().take();
        let driver = self
            .connector
            .connect(&self.config)
            .and_then(|driver| driver.verify_connectivity().map(|_| driver))
            .map_err(|e| self.log_connect_failure(e))?;

        *self.handle.borrow_mut() = Some(Rc::clone(&driver));
        info!("Connected to Neo4j at {}", self.config.uri);
        Ok(driver)
    }

    /// Release the handle. Safe to call when not connected.
    pub fn close(&self) {
        if let Some(driver) = self.handle.borrow_mut().take() {
            driver.close();
            info!("Neo4j connection closed");
        }
    }

    /// Current handle, connecting first if there is none
    pub fn get_or_connect(&self) -> ManagerResult<Rc<dyn GraphDriver>> {
        let existing = self.handle.borrow().clone();
        match existing {
            Some(driver) => Ok(driver),
            None => self.connect(),
        }
    }

    /// Run a read statement and return every row
    pub fn execute_query(&self, query: &str, params: Option<&Params>) -> ManagerResult<Vec<Record>> {
        self.run(query, params, AccessMode::Read)
    }

    /// Run a statement inside one write transaction: all of it commits or none
    pub fn execute_write(&self, query: &str, params: Option<&Params>) -> ManagerResult<Vec<Record>> {
        self.run(query, params, AccessMode::Write)
    }

    /// Total number of nodes
    pub fn get_node_count(&self) -> ManagerResult<i64> {
        let records = self.execute_query("MATCH (n) RETURN count(n) AS count", None)?;
        Ok(first_count(&records))
    }

    /// Total number of relationships
    pub fn get_relationship_count(&self) -> ManagerResult<i64> {
        let records = self.execute_query("MATCH ()-[r]->() RETURN count(r) AS count", None)?;
        Ok(first_count(&records))
    }

    /// Delete every node and relationship. Irreversible.
    pub fn clear_database(&self) -> ManagerResult<()> {
        warn!("Clearing all data from database");
        self.execute_write("MATCH (n) DETACH DELETE n", None)?;
        Ok(())
    }

    /// Connect, run `f`, and close again on every exit path
    pub fn scoped<T, F>(&self, f: F) -> ManagerResult<T>
    where
        F: FnOnce(&Connection) -> ManagerResult<T>,
    {
        let guard = self.open_scope()?;
        let result = f(&guard);
        drop(guard);
        result
    }

    /// Connect and return a guard that closes the connection when dropped
    pub fn open_scope(&self) -> ManagerResult<ConnectionGuard<'_>> {
        self.connect()?;
        Ok(ConnectionGuard { connection: self })
    }

    fn run(&self, query: &str, params: Option<&Params>, mode: AccessMode) -> ManagerResult<Vec<Record>> {
        let driver = self.get_or_connect()?;
        let empty = Params::new();
        driver
            .run(query, params.unwrap_or(&empty), mode)
            .inspect_err(|e| debug!("{:?} statement failed: {}", mode, e))
    }

    fn log_connect_failure(&self, err: ManagerError) -> ManagerError {
        match &err {
            ManagerError::ServiceUnreachable { message, .. } => {
                error!("Neo4j service unavailable at {}: {}", self.config.uri, message)
            }
            ManagerError::AuthenticationFailed { message, .. } => {
                error!("Authentication failed for user {}: {}", self.config.username, message)
            }
            other => error!("Could not connect to {}: {}", self.config.uri, other),
        }
        err
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("config", &self.config)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Scope-bound use of a [`Connection`]; closes it when dropped
pub struct ConnectionGuard<'a> {
    connection: &'a Connection,
}

impl Deref for ConnectionGuard<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.connection
    }
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        self.connection.close();
    }
}

fn first_count(records: &[Record]) -> i64 {
    records
        .first()
        .and_then(|r| r.get("count"))
        .and_then(|v| v.as_integer())
        .unwrap_or(0)
}

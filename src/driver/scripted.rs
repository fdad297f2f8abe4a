//! ScriptedConnector — in-process handle answering from canned responses
//!
//! No network. Responses are registered against a substring of the query
//! text; the first matching rule wins and unmatched statements return no
//! rows. Every connect, verification, statement and close is recorded on
//! the shared [`Script`] so callers can assert on what was issued.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::connection::ConnectionConfig;
use crate::driver::{AccessMode, Connector, GraphDriver};
use crate::error::{ManagerError, ManagerResult};
use crate::value::{Params, Record};

/// A statement received by a scripted handle
#[derive(Debug, Clone, PartialEq)]
pub struct IssuedQuery {
    pub text: String,
    pub params: Params,
    pub mode: AccessMode,
}

#[derive(Debug, Clone)]
enum Reply {
    Rows(Vec<Record>),
    Fail(String),
}

#[derive(Debug)]
struct ScriptState {
    reachable: Cell<bool>,
    accept_credentials: Cell<bool>,
    rules: RefCell<Vec<(String, Reply)>>,
    issued: RefCell<Vec<IssuedQuery>>,
    connects: Cell<usize>,
    verifications: Cell<usize>,
    closes: Cell<usize>,
}

/// Shared script driving every handle its connector hands out
#[derive(Debug, Clone)]
pub struct Script {
    state: Rc<ScriptState>,
}

impl Script {
    /// A reachable server that accepts any credentials and returns no rows
    pub fn new() -> Self {
        Self {
            state: Rc::new(ScriptState {
                reachable: Cell::new(true),
                accept_credentials: Cell::new(true),
                rules: RefCell::new(Vec::new()),
                issued: RefCell::new(Vec::new()),
                connects: Cell::new(0),
                verifications: Cell::new(0),
                closes: Cell::new(0),
            }),
        }
    }

    /// Connector whose handles follow this script
    pub fn connector(&self) -> ScriptedConnector {
        ScriptedConnector {
            script: self.clone(),
        }
    }

    /// Toggle whether the endpoint can be contacted
    pub fn set_reachable(&self, reachable: bool) -> &Self {
        self.state.reachable.set(reachable);
        self
    }

    /// Toggle whether credentials are accepted
    pub fn set_accept_credentials(&self, accept: bool) -> &Self {
        self.state.accept_credentials.set(accept);
        self
    }

    /// Answer statements containing `pattern` with `rows`
    pub fn respond(&self, pattern: &str, rows: Vec<Record>) -> &Self {
        self.state
            .rules
            .borrow_mut()
            .push((pattern.to_string(), Reply::Rows(rows)));
        self
    }

    /// Fail statements containing `pattern` with `message`
    pub fn fail(&self, pattern: &str, message: &str) -> &Self {
        self.state
            .rules
            .borrow_mut()
            .push((pattern.to_string(), Reply::Fail(message.to_string())));
        self
    }

    /// Statements issued so far, in order
    pub fn issued(&self) -> Vec<IssuedQuery> {
        self.state.issued.borrow().clone()
    }

    /// Number of handles opened
    pub fn connects(&self) -> usize {
        self.state.connects.get()
    }

    /// Number of connectivity verifications
    pub fn verifications(&self) -> usize {
        self.state.verifications.get()
    }

    /// Number of handles closed
    pub fn closes(&self) -> usize {
        self.state.closes.get()
    }

    fn check_endpoint(&self, config: &ConnectionConfig) -> ManagerResult<()> {
        if !self.state.reachable.get() {
            return Err(ManagerError::ServiceUnreachable {
                uri: config.uri.clone(),
                message: "connection refused".to_string(),
            });
        }
        if !self.state.accept_credentials.get() {
            return Err(ManagerError::AuthenticationFailed {
                username: config.username.clone(),
                message: "The client is unauthorized due to authentication failure.".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for Script {
    fn default() -> Self {
        Self::new()
    }
}

/// Creates [`ScriptedDriver`] handles
#[derive(Debug, Clone)]
pub struct ScriptedConnector {
    script: Script,
}

impl Connector for ScriptedConnector {
    fn connect(&self, config: &ConnectionConfig) -> ManagerResult<Rc<dyn GraphDriver>> {
        self.script.state.connects.set(self.script.connects() + 1);
        Ok(Rc::new(ScriptedDriver {
            script: self.script.clone(),
            config: config.clone(),
        }))
    }
}

/// Handle answering from a [`Script`]
#[derive(Debug)]
pub struct ScriptedDriver {
    script: Script,
    config: ConnectionConfig,
}

impl GraphDriver for ScriptedDriver {
    fn verify_connectivity(&self) -> ManagerResult<()> {
        let state = &self.script.state;
        state.verifications.set(state.verifications.get() + 1);
        self.script.check_endpoint(&self.config)
    }

    fn run(&self, query: &str, params: &Params, mode: AccessMode) -> ManagerResult<Vec<Record>> {
        self.script.check_endpoint(&self.config)?;

        let state = &self.script.state;
        state.issued.borrow_mut().push(IssuedQuery {
            text: query.to_string(),
            params: params.clone(),
            mode,
        });

        let rules = state.rules.borrow();
        match rules.iter().find(|(pattern, _)| query.contains(pattern.as_str())) {
            Some((_, Reply::Rows(rows))) => Ok(rows.clone()),
            Some((_, Reply::Fail(message))) => {
                Err(ManagerError::QueryExecutionFailed(message.clone()))
            }
            None => Ok(Vec::new()),
        }
    }

    fn close(&self) {
        let state = &self.script.state;
        state.closes.set(state.closes.get() + 1);
    }
}

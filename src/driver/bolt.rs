//! BoltDriver — network handle for a running Neo4j server
//!
//! Uses `neo4rs` over Bolt. The driver is async; every call is driven to
//! completion on a runtime owned by the handle so callers stay blocking.

use std::collections::HashMap;
use std::rc::Rc;

use neo4rs::{BoltList, BoltMap, BoltNull, BoltString, BoltType, ConfigBuilder, Graph, Query, Row, Txn};
use tokio::runtime::Runtime;
use tracing::debug;

use crate::connection::ConnectionConfig;
use crate::driver::{AccessMode, Connector, GraphDriver};
use crate::error::{ManagerError, ManagerResult};
use crate::value::{Params, Record, Value};

/// Statement used to prove the server answers and accepts our credentials
const PING_QUERY: &str = "RETURN 1";

/// Creates [`BoltDriver`] handles
#[derive(Debug, Default, Clone, Copy)]
pub struct BoltConnector;

impl Connector for BoltConnector {
    fn connect(&self, config: &ConnectionConfig) -> ManagerResult<Rc<dyn GraphDriver>> {
        Ok(Rc::new(BoltDriver::open(config)?))
    }
}

/// A Bolt connection to one Neo4j endpoint.
pub struct BoltDriver {
    // Dropped before the runtime that owns its sockets.
    graph: Graph,
    runtime: Runtime,
    uri: String,
    username: String,
}

impl BoltDriver {
    /// Build the driver for `config`. Does not verify reachability.
    pub fn open(config: &ConnectionConfig) -> ManagerResult<Self> {
        let mut builder = ConfigBuilder::default()
            .uri(config.uri.as_str())
            .user(config.username.as_str())
            .password(config.password.as_str());
        if let Some(db) = &config.database {
            builder = builder.db(db.as_str());
        }
        let neo4j_config = builder
            .build()
            .map_err(|e| ManagerError::InvalidConfig(e.to_string()))?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let graph = runtime
            .block_on(Graph::connect(neo4j_config))
            .map_err(|e| classify_connect_error(e, config))?;

        debug!("Opened Bolt driver for {}", config.uri);

        Ok(Self {
            graph,
            runtime,
            uri: config.uri.clone(),
            username: config.username.clone(),
        })
    }

    async fn run_read(&self, q: Query, columns: &[String]) -> ManagerResult<Vec<Record>> {
        let mut stream = self.graph.execute(q).await.map_err(query_error)?;
        let mut records = Vec::new();
        while let Some(row) = stream.next().await.map_err(query_error)? {
            records.push(row_to_record(&row, columns)?);
        }
        Ok(records)
    }

    async fn run_write(&self, q: Query, columns: &[String]) -> ManagerResult<Vec<Record>> {
        let mut txn = self.graph.start_txn().await.map_err(query_error)?;
        match collect_in_txn(&mut txn, q, columns).await {
            Ok(records) => {
                txn.commit().await.map_err(query_error)?;
                Ok(records)
            }
            Err(e) => {
                if let Err(rollback) = txn.rollback().await {
                    debug!("Rollback after failed write also failed: {}", rollback);
                }
                Err(e)
            }
        }
    }
}

impl GraphDriver for BoltDriver {
    fn verify_connectivity(&self) -> ManagerResult<()> {
        self.runtime
            .block_on(self.graph.run(neo4rs::query(PING_QUERY)))
            .map_err(|e| classify_error(e, &self.uri, &self.username))
    }

    fn run(&self, query: &str, params: &Params, mode: AccessMode) -> ManagerResult<Vec<Record>> {
        let q = build_query(query, params);
        let columns = projected_columns(query);
        match mode {
            AccessMode::Read => self.runtime.block_on(self.run_read(q, &columns)),
            AccessMode::Write => self.runtime.block_on(self.run_write(q, &columns)),
        }
    }

    fn close(&self) {
        // The pool is torn down when the last reference to the handle drops.
        debug!("Releasing Bolt driver for {}", self.uri);
    }
}

async fn collect_in_txn(txn: &mut Txn, q: Query, columns: &[String]) -> ManagerResult<Vec<Record>> {
    let mut stream = txn.execute(q).await.map_err(query_error)?;
    let mut records = Vec::new();
    while let Some(row) = stream.next(txn.handle()).await.map_err(query_error)? {
        records.push(row_to_record(&row, columns)?);
    }
    Ok(records)
}

fn build_query(text: &str, params: &Params) -> Query {
    params
        .iter()
        .fold(neo4rs::query(text), |q, (name, value)| {
            q.param(name.as_str(), to_bolt(value))
        })
}

/// `neo4rs` rows are keyed by name only. Columns named in `columns` come
/// first in that order; anything else follows sorted by name.
fn row_to_record(row: &Row, columns: &[String]) -> ManagerResult<Record> {
    let mut values: HashMap<String, serde_json::Value> = row
        .to()
        .map_err(|e| ManagerError::QueryExecutionFailed(format!("Cannot decode row: {}", e)))?;

    let mut record = Record::with_capacity(values.len());
    for column in columns {
        if let Some(json) = values.remove(column) {
            record.insert(column.clone(), Value::from(json));
        }
    }

    let mut rest: Vec<(String, serde_json::Value)> = values.into_iter().collect();
    rest.sort_by(|a, b| a.0.cmp(&b.0));
    record.extend(rest.into_iter().map(|(column, json)| (column, Value::from(json))));
    Ok(record)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Word,
    Comma,
    Semicolon,
}

#[derive(Debug)]
struct Token {
    kind: TokenKind,
    text: String,
    start: usize,
    end: usize,
}

impl Token {
    fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(keyword)
    }
}

/// Clauses that end a projection list
const PROJECTION_END: &[&str] = &[
    "ORDER", "SKIP", "LIMIT", "WHERE", "UNION", "WITH", "MATCH", "CALL", "UNWIND",
];

/// Column names of the last top-level `RETURN` (or `YIELD`), in order.
///
/// A column is named by its `AS` alias, else by the expression text. `*`
/// names no column.
fn projected_columns(query: &str) -> Vec<String> {
    let tokens = top_level_tokens(query);
    let Some(clause) = tokens
        .iter()
        .rposition(|t| t.is_keyword("RETURN") || t.is_keyword("YIELD"))
    else {
        return Vec::new();
    };

    let mut rest = tokens[clause + 1..].iter().peekable();
    let mut item_start = tokens[clause].end;
    if let Some(distinct) = rest.next_if(|t| t.is_keyword("DISTINCT")) {
        item_start = distinct.end;
    }

    let mut columns = Vec::new();
    let mut alias: Option<String> = None;
    let mut end = query.len();
    while let Some(token) = rest.next() {
        match token.kind {
            TokenKind::Comma => {
                push_column(&mut columns, &query[item_start..token.start], alias.take());
                item_start = token.end;
            }
            TokenKind::Semicolon => {
                end = token.start;
                break;
            }
            TokenKind::Word if PROJECTION_END.iter().any(|k| token.is_keyword(k)) => {
                end = token.start;
                break;
            }
            TokenKind::Word if token.is_keyword("AS") => {
                alias = rest
                    .next_if(|t| t.kind == TokenKind::Word)
                    .map(|t| t.text.clone());
            }
            TokenKind::Word => {}
        }
    }
    push_column(&mut columns, &query[item_start..end], alias);
    columns
}

fn push_column(columns: &mut Vec<String>, item: &str, alias: Option<String>) {
    let name = alias.unwrap_or_else(|| item.trim().to_string());
    if !name.is_empty() && name != "*" {
        columns.push(name);
    }
}

/// Words, commas and semicolons outside brackets and string literals.
/// A backquoted name is one word without its quotes.
fn top_level_tokens(query: &str) -> Vec<Token> {
    let bytes = query.as_bytes();
    let is_word_byte = |b: u8| b.is_ascii_alphanumeric() || b == b'_' || b == b'.' || b == b'$' || b >= 0x80;

    let mut tokens = Vec::new();
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'\'' | b'"' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
                i += 1;
            }
            b'`' => {
                let start = i;
                i += 1;
                let inner = i;
                while i < bytes.len() && bytes[i] != b'`' {
                    i += 1;
                }
                if depth == 0 {
                    tokens.push(Token {
                        kind: TokenKind::Word,
                        text: query[inner..i.min(bytes.len())].to_string(),
                        start,
                        end: (i + 1).min(bytes.len()),
                    });
                }
                i += 1;
            }
            b'(' | b'[' | b'{' => {
                depth += 1;
                i += 1;
            }
            b')' | b']' | b'}' => {
                depth = depth.saturating_sub(1);
                i += 1;
            }
            b',' | b';' if depth == 0 => {
                let kind = if b == b',' { TokenKind::Comma } else { TokenKind::Semicolon };
                tokens.push(Token {
                    kind,
                    text: String::new(),
                    start: i,
                    end: i + 1,
                });
                i += 1;
            }
            _ if is_word_byte(b) => {
                let start = i;
                while i < bytes.len() && is_word_byte(bytes[i]) {
                    i += 1;
                }
                if depth == 0 {
                    tokens.push(Token {
                        kind: TokenKind::Word,
                        text: query[start..i].to_string(),
                        start,
                        end: i,
                    });
                }
            }
            _ => i += 1,
        }
    }
    tokens
}

fn to_bolt(value: &Value) -> BoltType {
    match value {
        Value::Null => BoltType::Null(BoltNull),
        Value::Boolean(b) => BoltType::from(*b),
        Value::Integer(i) => BoltType::from(*i),
        Value::Float(f) => BoltType::from(*f),
        Value::String(s) => BoltType::from(s.as_str()),
        Value::List(items) => {
            let mut list = BoltList::with_capacity(items.len());
            for item in items {
                list.push(to_bolt(item));
            }
            BoltType::List(list)
        }
        Value::Map(map) => {
            let mut bolt_map = BoltMap::with_capacity(map.len());
            for (key, item) in map {
                bolt_map.put(BoltString::from(key.as_str()), to_bolt(item));
            }
            BoltType::Map(bolt_map)
        }
    }
}

fn query_error(err: neo4rs::Error) -> ManagerError {
    ManagerError::QueryExecutionFailed(err.to_string())
}

fn classify_connect_error(err: neo4rs::Error, config: &ConnectionConfig) -> ManagerError {
    classify_error(err, &config.uri, &config.username)
}

/// Split connect-time failures into "credentials rejected" and "endpoint down"
fn classify_error(err: neo4rs::Error, uri: &str, username: &str) -> ManagerError {
    match err {
        neo4rs::Error::AuthenticationError(message) => ManagerError::AuthenticationFailed {
            username: username.to_string(),
            message,
        },
        other => {
            let message = other.to_string();
            if is_auth_failure(&message) {
                ManagerError::AuthenticationFailed {
                    username: username.to_string(),
                    message,
                }
            } else {
                ManagerError::ServiceUnreachable {
                    uri: uri.to_string(),
                    message,
                }
            }
        }
    }
}

/// Server-side auth rejections arrive as plain failures carrying a security code
fn is_auth_failure(message: &str) -> bool {
    message.contains("Neo.ClientError.Security.Unauthorized")
        || message.contains("Neo.ClientError.Security.AuthenticationRateLimit")
        || message.to_lowercase().contains("authentication failure")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, i64)]) -> Row {
        let fields: Vec<BoltType> = pairs.iter().map(|(k, _)| BoltType::from(*k)).collect();
        let data: Vec<BoltType> = pairs.iter().map(|(_, v)| BoltType::from(*v)).collect();
        Row::new(BoltList::from(fields), BoltList::from(data))
    }

    #[test]
    fn test_projected_columns() {
        assert_eq!(
            projected_columns("MATCH (n) RETURN n.name AS name, count(n) AS total ORDER BY total"),
            vec!["name", "total"]
        );
        assert_eq!(projected_columns("MATCH (n) RETURN DISTINCT n.name, n.age"), vec!["n.name", "n.age"]);
        assert_eq!(
            projected_columns("CALL db.labels() YIELD label RETURN collect(label) AS labels"),
            vec!["labels"]
        );
        assert_eq!(
            projected_columns("RETURN {a: 1, b: 2} AS `my map`, 'x, y' AS s;"),
            vec!["my map", "s"]
        );
        assert_eq!(projected_columns("CALL db.labels() YIELD label"), vec!["label"]);
        assert!(projected_columns("MATCH (n) RETURN *").is_empty());
        assert!(projected_columns("CREATE (n:Person)").is_empty());
    }

    #[test]
    fn test_nested_return_is_ignored() {
        assert_eq!(
            projected_columns("CALL { MATCH (n) RETURN n AS inner } RETURN count(*) AS c"),
            vec!["c"]
        );
    }

    #[test]
    fn test_record_keeps_projection_order() {
        let row = row(&[("z", 1), ("a", 2), ("m", 3), ("b", 4), ("y", 5), ("c", 6)]);
        let columns = projected_columns("RETURN 1 AS z, 2 AS a, 3 AS m, 4 AS b, 5 AS y, 6 AS c");

        let record = row_to_record(&row, &columns).unwrap();
        let keys: Vec<&str> = record.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["z", "a", "m", "b", "y", "c"]);
        assert_eq!(record["m"], Value::Integer(3));
    }

    #[test]
    fn test_unnamed_columns_follow_sorted() {
        let row = row(&[("z", 1), ("a", 2), ("m", 3)]);
        let record = row_to_record(&row, &["m".to_string()]).unwrap();
        let keys: Vec<&str> = record.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["m", "a", "z"]);
    }

    #[test]
    fn test_auth_failure_detection() {
        assert!(is_auth_failure(
            "Neo4j error `Neo.ClientError.Security.Unauthorized`: The client is unauthorized"
        ));
        assert!(is_auth_failure("The client is unauthorized due to authentication failure."));
        assert!(!is_auth_failure("connection refused"));
    }

    #[test]
    fn test_authentication_error_is_classified() {
        let err = classify_error(
            neo4rs::Error::AuthenticationError("bad credentials".to_string()),
            "bolt://localhost:7687",
            "neo4j",
        );
        match err {
            ManagerError::AuthenticationFailed { username, message } => {
                assert_eq!(username, "neo4j");
                assert_eq!(message, "bad credentials");
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}

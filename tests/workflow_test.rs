//! End-to-end workflows against the scripted driver
//!
//! Startup health check, backup, and restore as an operator would run them.

use std::fs;
use std::time::Duration;

use neo4j_manager::value::record;
use neo4j_manager::{
    AccessMode, BackupManager, Connection, ConnectionConfig, HealthChecker, ManagerError, Script,
    Value,
};

fn healthy_server() -> Script {
    let script = Script::new();
    script
        .respond("apoc.help", vec![record([("count", 12i64)])])
        .respond("dbms.components", vec![record([("version", "5.26.0")])])
        .respond("count(n)", vec![record([("count", 4i64)])])
        .respond("count(r)", vec![record([("count", 4i64)])])
        .respond(
            "db.labels",
            vec![record([(
                "labels",
                Value::List(vec![Value::from("Person"), Value::from("Company")]),
            )])],
        )
        .respond(
            "apoc.export.graphml.all",
            vec![record([
                ("file", Value::from("neo4j_backup.graphml")),
                ("nodes", Value::from(4i64)),
                ("relationships", Value::from(4i64)),
                ("time", Value::from(8i64)),
            ])],
        )
        .respond(
            "apoc.import.graphml",
            vec![record([("nodes", 4i64), ("relationships", 4i64), ("time", 15i64)])],
        );
    script
}

#[test]
fn test_startup_health_check_workflow() {
    let script = healthy_server();
    let conn = Connection::with_connector(ConnectionConfig::default(), script.connector());

    let report = conn
        .scoped(|c| {
            let checker = HealthChecker::new(c);
            assert!(checker.wait_for_ready(Duration::from_secs(10), Duration::from_secs(1))?);
            Ok(checker.full_health_check())
        })
        .unwrap();

    assert!(report.connected);
    assert!(report.plugin_available);
    assert_eq!(report.version, "5.26.0");
    assert_eq!(report.stats.node_count, 4);
    assert_eq!(report.stats.relationship_count, 4);
    assert_eq!(report.stats.labels, vec!["Person", "Company"]);
    assert!(!conn.is_connected());

    // Health checks only read.
    assert!(script.issued().iter().all(|q| q.mode == AccessMode::Read));
}

#[test]
fn test_backup_clear_restore_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let script = healthy_server();
    let conn = Connection::with_connector(ConnectionConfig::default(), script.connector());
    let manager = BackupManager::new(&conn, dir.path().join("backups")).unwrap();

    let path = manager.export(None, true).unwrap();
    assert!(path.starts_with(dir.path().join("backups")));
    fs::write(&path, "<graphml/>").unwrap();

    let latest = manager.latest_backup().unwrap().unwrap();
    let stats = manager.import(&latest.path, true).unwrap();
    assert_eq!(stats.nodes, 4);
    assert_eq!(stats.relationships, 4);
    assert_eq!(stats.time_ms, 15);

    let texts: Vec<String> = script.issued().into_iter().map(|q| q.text).collect();
    assert_eq!(texts.len(), 3);
    assert!(texts[0].contains("apoc.export.graphml.all"));
    assert_eq!(texts[1], "MATCH (n) DETACH DELETE n");
    assert!(texts[2].contains("apoc.import.graphml"));
}

#[test]
fn test_unreachable_server_workflow() {
    let script = Script::new();
    script.set_reachable(false);
    let conn = Connection::with_connector(
        ConnectionConfig::new("bolt://db.invalid:7687", "neo4j", "secret"),
        script.connector(),
    );

    assert!(matches!(
        conn.connect().unwrap_err(),
        ManagerError::ServiceUnreachable { .. }
    ));

    let checker = HealthChecker::new(&conn);
    assert!(!checker.check_connectivity().unwrap());
    assert!(!checker
        .wait_for_ready(Duration::from_millis(100), Duration::from_millis(20))
        .unwrap());

    let report = checker.full_health_check();
    assert!(!report.connected);
    assert!(!report.plugin_available);
    assert_eq!(report.version, "unknown");
    assert_eq!(report.stats.node_count, 0);
    assert!(report.stats.labels.is_empty());

    // Recovery: the next call reconnects on its own.
    script.set_reachable(true);
    assert!(checker.check_connectivity().unwrap());
    assert!(conn.is_connected());
}

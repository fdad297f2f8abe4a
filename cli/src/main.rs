//! Neo4j Manager CLI — health checks, queries and GraphML backups
//!
//! Connection settings come from flags or the `NEO4J_*` environment
//! variables. `health` and `wait` connect on demand so they can report a
//! server that is down. `list`, `latest` and `import` never open a
//! connection up front: listing reads only the backup directory and import
//! checks its file before touching the server. The remaining commands run
//! inside a scoped connection.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table};
use neo4j_manager::{
    BackupArtifact, BackupManager, Connection, ConnectionConfig, HealthChecker, HealthReport,
    ManagerResult, Params, Record, Value,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "neo4j-manager", version, about = "Neo4j management CLI")]
struct Cli {
    /// Bolt URI of the server
    #[arg(long, default_value = "bolt://localhost:7687", global = true, env = "NEO4J_URI")]
    uri: String,

    /// Database user
    #[arg(long, default_value = "neo4j", global = true, env = "NEO4J_USERNAME")]
    username: String,

    /// Database password
    #[arg(long, default_value = "yourpassword", global = true, env = "NEO4J_PASSWORD", hide_env_values = true)]
    password: String,

    /// Database name (server default when omitted)
    #[arg(long, global = true, env = "NEO4J_DATABASE")]
    database: Option<String>,

    /// Directory holding GraphML backups [default: ./backup]
    #[arg(long, global = true, env = "NEO4J_BACKUP_DIR")]
    backup_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, clap::ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full health check
    Health,
    /// Wait until the server accepts connections
    Wait {
        /// Give up after this many seconds
        #[arg(long, default_value_t = 60)]
        timeout: u64,

        /// Seconds between attempts
        #[arg(long, default_value_t = 2)]
        interval: u64,
    },
    /// Execute a Cypher statement
    Query {
        /// The Cypher statement
        cypher: String,

        /// Run inside a write transaction
        #[arg(long)]
        write: bool,

        /// Statement parameter as name=value (value parsed as JSON, else string)
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, Value)>,
    },
    /// Show node, relationship and label statistics
    Stats,
    /// Export the database to a GraphML file
    Export {
        /// File name (generated from the current time when omitted)
        #[arg(long)]
        name: Option<String>,

        /// Leave type information out of the export
        #[arg(long)]
        no_types: bool,
    },
    /// Import a GraphML file
    Import {
        /// Path to the backup file
        path: PathBuf,

        /// Delete all existing data first
        #[arg(long)]
        clear: bool,
    },
    /// List backups, oldest first
    List,
    /// Show the most recent backup
    Latest,
    /// Delete every node and relationship
    Clear {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ConnectionConfig::new(&cli.uri, &cli.username, &cli.password);
    if let Some(db) = &cli.database {
        config = config.with_database(db);
    }
    let conn = Connection::new(config);

    let result: CliResult = match &cli.command {
        // Probes must report an unreachable server, not fail on connect.
        Commands::Wait { timeout, interval } => run_wait(&conn, *timeout, *interval),
        Commands::Health => run_health(&conn, &cli.format),
        Commands::List | Commands::Latest | Commands::Import { .. } => {
            let outcome = run_backup_command(&conn, &cli);
            conn.close();
            outcome
        }
        Commands::Query { cypher, write, params } => {
            in_scope(&conn, |c| run_query(c, cypher, *write, params, &cli.format))
        }
        Commands::Stats => in_scope(&conn, |c| run_stats(c, &cli.format)),
        Commands::Export { name, no_types } => in_scope(&conn, |c| {
            let manager = backup_manager(c, &cli)?;
            let path = manager.export(name.as_deref(), !no_types)?;
            println!("{}", path.display());
            Ok(ExitCode::SUCCESS)
        }),
        Commands::Clear { yes: false } => {
            eprintln!("Refusing to clear the database without --yes");
            Ok(ExitCode::FAILURE)
        }
        Commands::Clear { yes: true } => in_scope(&conn, |c| {
            c.clear_database()?;
            println!("Database cleared");
            Ok(ExitCode::SUCCESS)
        }),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

type CliResult = Result<ExitCode, Box<dyn std::error::Error>>;

/// Run `f` on a connection that is verified first and closed afterwards
fn in_scope(conn: &Connection, f: impl FnOnce(&Connection) -> CliResult) -> CliResult {
    match conn.scoped(|c| Ok(f(c))) {
        Ok(outcome) => outcome,
        Err(e) => Err(e.into()),
    }
}

fn backup_manager<'a>(conn: &'a Connection, cli: &Cli) -> ManagerResult<BackupManager<'a>> {
    match &cli.backup_dir {
        Some(dir) => BackupManager::new(conn, dir),
        None => BackupManager::with_default_dir(conn),
    }
}

/// Backup commands that connect lazily, if at all
fn run_backup_command(conn: &Connection, cli: &Cli) -> CliResult {
    let manager = backup_manager(conn, cli)?;
    match &cli.command {
        Commands::Import { path, clear } => {
            let stats = manager.import(path, *clear)?;
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
                _ => println!(
                    "Imported {} nodes and {} relationships in {}ms",
                    stats.nodes, stats.relationships, stats.time_ms
                ),
            }
        }
        Commands::Latest => match manager.latest_backup()? {
            Some(artifact) => print_artifacts(&[artifact], &cli.format)?,
            None => println!("(no backups)"),
        },
        _ => print_artifacts(&manager.list_backups()?, &cli.format)?,
    }
    Ok(ExitCode::SUCCESS)
}

fn run_wait(conn: &Connection, timeout: u64, interval: u64) -> CliResult {
    let checker = HealthChecker::new(conn);
    let ready = checker.wait_for_ready(Duration::from_secs(timeout), Duration::from_secs(interval))?;
    if ready {
        println!("ready");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("not ready after {}s", timeout);
        Ok(ExitCode::FAILURE)
    }
}

fn run_health(conn: &Connection, format: &OutputFormat) -> CliResult {
    let report = HealthChecker::new(conn).full_health_check();
    conn.close();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print_report(&report),
    }

    Ok(if report.is_healthy() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn run_query(
    conn: &Connection,
    cypher: &str,
    write: bool,
    params: &[(String, Value)],
    format: &OutputFormat,
) -> CliResult {
    let params: Params = params.iter().cloned().collect();
    let records = if write {
        conn.execute_write(cypher, Some(&params))?
    } else {
        conn.execute_query(cypher, Some(&params))?
    };
    print_records(&records, format)?;
    Ok(ExitCode::SUCCESS)
}

fn run_stats(conn: &Connection, format: &OutputFormat) -> CliResult {
    let stats = HealthChecker::new(conn).get_database_stats()?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
        _ => {
            println!("Nodes:         {}", stats.node_count);
            println!("Relationships: {}", stats.relationship_count);
            println!("Labels:        {}", stats.labels.join(", "));
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn print_report(report: &HealthReport) {
    println!("Connected:     {}", report.connected);
    println!("APOC:          {}", report.plugin_available);
    println!("Version:       {}", report.version);
    println!("Nodes:         {}", report.stats.node_count);
    println!("Relationships: {}", report.stats.relationship_count);
    println!("Labels:        {}", report.stats.labels.join(", "));
    if let Some(error) = &report.error {
        println!("Error:         {}", error);
    }
}

fn print_records(records: &[Record], format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let columns: Vec<String> = records
        .first()
        .map(|r| r.keys().cloned().collect())
        .unwrap_or_default();

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(records)?);
        }
        OutputFormat::Csv => {
            if !columns.is_empty() {
                println!("{}", columns.join(","));
                for record in records {
                    let cells: Vec<String> = columns
                        .iter()
                        .map(|c| format_csv_value(record.get(c).unwrap_or(&Value::Null)))
                        .collect();
                    println!("{}", cells.join(","));
                }
            }
        }
        OutputFormat::Table => {
            if columns.is_empty() {
                println!("(no results)");
                return Ok(());
            }

            let mut table = Table::new();
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(&columns);

            for record in records {
                let cells: Vec<String> = columns
                    .iter()
                    .map(|c| format_table_value(record.get(c).unwrap_or(&Value::Null)))
                    .collect();
                table.add_row(cells);
            }

            println!("{}", table);
            println!("{} row(s)", records.len());
        }
    }

    Ok(())
}

fn print_artifacts(artifacts: &[BackupArtifact], format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let rows: Vec<(String, String)> = artifacts
        .iter()
        .map(|a| {
            let modified: DateTime<Local> = a.modified.into();
            (a.path.display().to_string(), modified.format("%Y-%m-%d %H:%M:%S").to_string())
        })
        .collect();

    match format {
        OutputFormat::Json => {
            let json: Vec<serde_json::Value> = rows
                .iter()
                .map(|(path, modified)| serde_json::json!({ "path": path, "modified": modified }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Csv => {
            println!("path,modified");
            for (path, modified) in &rows {
                println!("{},{}", format_csv_value(&Value::from(path.as_str())), modified);
            }
        }
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("(no backups)");
                return Ok(());
            }
            let mut table = Table::new();
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec!["path", "modified"]);
            for (path, modified) in &rows {
                table.add_row(vec![path.clone(), modified.clone()]);
            }
            println!("{}", table);
        }
    }

    Ok(())
}

/// `name=value`; the value is JSON when it parses, a plain string otherwise
fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{}'", raw))?;
    if name.is_empty() {
        return Err(format!("missing parameter name in '{}'", raw));
    }
    let value = serde_json::from_str::<serde_json::Value>(value)
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(value));
    Ok((name.to_string(), value))
}

fn format_table_value(v: &Value) -> String {
    match v {
        Value::Null => "null".to_string(),
        Value::String(s) => s.clone(),
        Value::List(_) | Value::Map(_) => serde_json::to_string(&v.to_json()).unwrap_or_default(),
        other => other.to_string(),
    }
}

fn format_csv_value(v: &Value) -> String {
    match v {
        Value::Null => "".to_string(),
        Value::String(s) => {
            if s.contains(',') || s.contains('"') || s.contains('\n') {
                format!("\"{}\"", s.replace('"', "\"\""))
            } else {
                s.clone()
            }
        }
        Value::Boolean(_) | Value::Integer(_) | Value::Float(_) => v.to_string(),
        _ => {
            let json = serde_json::to_string(&v.to_json()).unwrap_or_default();
            format!("\"{}\"", json.replace('"', "\"\""))
        }
    }
}

//! Run history - per-test outcomes kept in SQLite
//!
//! Every `framecheck` invocation opens a session; every test report becomes
//! one row. Lets flaky captures be spotted across runs with plain SQL.

use rusqlite::{Connection, params};
use std::path::Path;
use std::sync::Mutex;
use tracing::{info, warn};

use crate::error::{HarnessError, Result};
use crate::orchestrator::{RunSummary, TestReport, TestResult};

pub struct RunHistory {
    /// Connection wrapped in a Mutex so reports can be written from workers
    conn: Mutex<Connection>,
    session_id: String,
}

impl RunHistory {
    /// Open (or create) the database and start a session
    pub fn open(db_path: &Path, config_json: Option<&str>) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        // WAL so readers are not blocked while a run is in progress
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        Self::with_connection(conn, config_json)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, None)
    }

    fn with_connection(conn: Connection, config_json: Option<&str>) -> Result<Self> {
        init_schema(&conn)?;
        let session_id = create_session(&conn, config_json)?;
        info!("History session {}", session_id);
        Ok(Self {
            conn: Mutex::new(conn),
            session_id,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| HarnessError::Failed("history connection poisoned".to_string()))
    }

    /// Store one test outcome
    pub fn record(&self, report: &TestReport) -> Result<()> {
        let (status, frames, detail) = match &report.result {
            TestResult::Pass { frames } => ("pass", Some(*frames as i64), None),
            TestResult::Fail { error, .. } => ("fail", None, Some(error.as_str())),
            TestResult::Error { message } => ("error", None, Some(message.as_str())),
        };
        let conn = self.lock()?;
        conn.execute(
            r#"INSERT INTO results
               (session_id, name, path, status, frames, detail, steps_fired, elapsed_ms, started_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
            params![
                self.session_id,
                report.name,
                report.path,
                status,
                frames,
                detail,
                report.steps_fired as i64,
                report.elapsed_ms as i64,
                report.started_at,
            ],
        )?;
        Ok(())
    }

    /// Store a whole run; a row that fails to insert is logged and skipped
    pub fn record_summary(&self, summary: &RunSummary) -> usize {
        let mut stored = 0;
        for report in &summary.reports {
            match self.record(report) {
                Ok(()) => stored += 1,
                Err(e) => warn!("Failed to record {}: {}", report.name, e),
            }
        }
        stored
    }

    /// Results stored in this session
    pub fn result_count(&self) -> Result<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM results WHERE session_id = ?1",
            params![self.session_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// How many times `path` failed or errored across all sessions
    pub fn failure_count(&self, path: &str) -> Result<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM results WHERE path = ?1 AND status != 'pass'",
            params![path],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            created_at TEXT NOT NULL,
            config_json TEXT
        );

        CREATE TABLE IF NOT EXISTS results (
            id INTEGER PRIMARY KEY,
            session_id TEXT REFERENCES sessions(id),
            name TEXT NOT NULL,
            path TEXT NOT NULL,
            status TEXT NOT NULL,
            frames INTEGER,
            detail TEXT,
            steps_fired INTEGER NOT NULL,
            elapsed_ms INTEGER NOT NULL,
            started_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_results_session ON results(session_id);
        CREATE INDEX IF NOT EXISTS idx_results_path ON results(path, status);
        "#,
    )?;
    Ok(())
}

fn create_session(conn: &Connection, config_json: Option<&str>) -> Result<String> {
    let id = uuid::Uuid::new_v4().to_string();
    let created_at = chrono::Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO sessions (id, created_at, config_json) VALUES (?1, ?2, ?3)",
        params![id, created_at, config_json],
    )?;

    Ok(id)
}

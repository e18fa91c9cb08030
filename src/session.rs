use chrono::{DateTime, Utc};
use log::{debug, error, info, Level};
use logging_timer::timer;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Connection, ToSql};
use serde::Serialize;

use crate::error::EvolveError;
use crate::introspect;

/// Audit record for one executed statement.
#[derive(Debug, Clone, Serialize)]
pub struct LoggedStatement {
    pub sql: String,
    pub params: Vec<String>,
    /// Rows affected, `None` when the statement failed.
    pub rows: Option<usize>,
    pub error: Option<String>,
    pub executed_at: DateTime<Utc>,
}

/// Explicit context threaded through every helper operation.
///
/// A session borrows a connection (usually a `rusqlite::Transaction`, which
/// derefs to `Connection`) for the duration of one upgrade step. It never
/// begins or commits a transaction itself; the caller owns that boundary.
pub struct Session<'c> {
    conn: &'c Connection,
    legacy_prefix: String,
    journal: Vec<LoggedStatement>,
}

impl<'c> Session<'c> {
    pub fn new(conn: &'c Connection, legacy_prefix: impl Into<String>) -> Self {
        Self {
            conn,
            legacy_prefix: legacy_prefix.into(),
            journal: Vec::new(),
        }
    }

    pub fn connection(&self) -> &'c Connection {
        self.conn
    }

    pub fn journal(&self) -> &[LoggedStatement] {
        &self.journal
    }

    pub fn into_journal(self) -> Vec<LoggedStatement> {
        self.journal
    }

    pub fn table_exists(&self, table: &str) -> Result<bool, EvolveError> {
        introspect::table_exists(self.conn, table)
    }

    pub fn column_exists(&self, table: &str, column: &str) -> Result<bool, EvolveError> {
        introspect::column_exists(self.conn, table, column)
    }

    /// Name under which historical data of `name` is preserved, e.g.
    /// `openupgrade_legacy_9_0_type`.
    pub fn legacy_name(&self, name: &str) -> String {
        format!("{}_{}", self.legacy_prefix, name)
    }

    /// Execute a single statement, record it in the journal and return the
    /// number of affected rows. Errors are logged and returned unmodified.
    pub fn logged_query(&mut self, sql: &str, params: &[&dyn ToSql]) -> Result<usize, EvolveError> {
        let rendered: Vec<String> = params.iter().map(|p| render_param(*p)).collect();
        let executed_at = Utc::now();

        match self.conn.execute(sql, params) {
            Ok(rows) => {
                debug!("{} rows affected by: {} {:?}", rows, sql.trim(), rendered);
                self.journal.push(LoggedStatement {
                    sql: sql.trim().to_owned(),
                    params: rendered,
                    rows: Some(rows),
                    error: None,
                    executed_at,
                });
                Ok(rows)
            }
            Err(err) => {
                error!("Statement failed: {}\n  {} {:?}", err, sql.trim(), rendered);
                self.journal.push(LoggedStatement {
                    sql: sql.trim().to_owned(),
                    params: rendered,
                    rows: None,
                    error: Some(err.to_string()),
                    executed_at,
                });
                Err(err.into())
            }
        }
    }

    /// Record work that was executed outside `logged_query`, such as a
    /// row-wise update driven by a prepared statement.
    pub fn record(&mut self, sql: &str, rows: usize) {
        debug!("{} rows affected by: {}", rows, sql);
        self.journal.push(LoggedStatement {
            sql: sql.to_owned(),
            params: Vec::new(),
            rows: Some(rows),
            error: None,
            executed_at: Utc::now(),
        });
    }

    /// Run a named group of operations with timing and start/finish logging.
    pub fn logged_step<T, F>(&mut self, name: &str, f: F) -> Result<T, EvolveError>
    where
        F: FnOnce(&mut Self) -> Result<T, EvolveError>,
    {
        let _tmr = timer!(Level::Debug; "Session::logged_step", "{}", name);
        info!("{}: start", name);

        let result = f(self);
        match &result {
            Ok(_) => info!("{}: done", name),
            Err(e) => error!("{}: failed: {}", name, e),
        }

        result
    }
}

fn render_param(param: &dyn ToSql) -> String {
    match param.to_sql() {
        Ok(ToSqlOutput::Borrowed(value)) => render_value(value),
        Ok(ToSqlOutput::Owned(value)) => render_value(ValueRef::from(&value)),
        Ok(_) => "<?>".to_owned(),
        Err(_) => "<unrenderable>".to_owned(),
    }
}

fn render_value(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => "NULL".to_owned(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => format!("'{}'", String::from_utf8_lossy(t)),
        ValueRef::Blob(b) => format!("<blob {} bytes>", b.len()),
    }
}

//! SQLite-backed store for alerts and threshold configurations.
//!
//! A single writer connection behind a mutex; all multi-statement writes
//! run inside a transaction so the active-alert uniqueness invariant is
//! enforced by the database, not by in-process locking.

pub mod alerts;
pub mod projects;
pub mod retention;
mod schema;
#[cfg(test)]
pub(crate) mod testkit;
pub mod thresholds;

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::Connection;

use crate::calculator::ProjectLedger;
use crate::error::EngineError;
use crate::types::{CostLine, Project};

/// Handle to the engine database.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (creating if necessary) the database at `path` and apply the
    /// schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or migration fails.
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        conn.execute_batch(schema::MIGRATION_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (tests and local experimentation).
    ///
    /// # Errors
    ///
    /// Returns an error if migration fails.
    pub fn open_in_memory() -> Result<Self, EngineError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(schema::MIGRATION_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Prune terminal alerts past the retention window.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the transaction fails.
    pub fn prune_terminal(
        &self,
        now: chrono::DateTime<chrono::Utc>,
        retention_days: u32,
    ) -> Result<retention::RetentionReport, EngineError> {
        self.with_conn(|conn| retention::prune_terminal(conn, now, retention_days))
    }

    /// Execute a closure with the connection.
    pub(crate) fn with_conn<F, T>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&Connection) -> Result<T, EngineError>,
    {
        let guard = self.conn.lock().map_err(|_| {
            EngineError::WriteConflict("store lock poisoned".to_string())
        })?;
        f(&guard)
    }
}

#[async_trait]
impl ProjectLedger for Store {
    async fn project(&self, obra_id: &str) -> Result<Option<Project>, EngineError> {
        self.with_conn(|conn| projects::get(conn, obra_id))
    }

    async fn eligible_projects(
        &self,
        as_of: NaiveDate,
    ) -> Result<Vec<Project>, EngineError> {
        self.with_conn(|conn| projects::list_eligible(conn, as_of))
    }

    async fn budget_lines(&self, obra_id: &str) -> Result<Vec<CostLine>, EngineError> {
        self.with_conn(|conn| projects::budget_lines(conn, obra_id))
    }

    async fn expense_lines(&self, obra_id: &str) -> Result<Vec<CostLine>, EngineError> {
        self.with_conn(|conn| projects::expense_lines(conn, obra_id))
    }
}

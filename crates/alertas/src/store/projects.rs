//! Read-only queries over the CRUD subsystem's obras / orcamento /
//! despesas tables.

use chrono::NaiveDate;
use rusqlite::{params, Connection, Row};

use crate::error::EngineError;
use crate::types::{CostLine, Project};

fn row_to_project(row: &Row<'_>) -> rusqlite::Result<Project> {
    let inicio_raw: Option<String> = row.get(4)?;
    let data_inicio = match inicio_raw {
        Some(raw) => Some(
            NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    4,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?,
        ),
        None => None,
    };
    Ok(Project {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        nome: row.get(2)?,
        status: row.get(3)?,
        data_inicio,
    })
}

/// Fetch one project.
pub fn get(conn: &Connection, obra_id: &str) -> Result<Option<Project>, EngineError> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, tenant_id, nome, status, data_inicio
         FROM obras WHERE id = ?1",
    )?;
    let mut rows = stmt.query_map(params![obra_id], row_to_project)?;
    rows.next().transpose().map_err(EngineError::from)
}

/// Projects whose start date is on or before `as_of`.
pub fn list_eligible(
    conn: &Connection,
    as_of: NaiveDate,
) -> Result<Vec<Project>, EngineError> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, tenant_id, nome, status, data_inicio
         FROM obras
         WHERE data_inicio IS NOT NULL AND data_inicio <= ?1
         ORDER BY data_inicio, id",
    )?;
    let rows = stmt.query_map(
        params![as_of.format("%Y-%m-%d").to_string()],
        row_to_project,
    )?;
    rows.collect::<Result<Vec<_>, _>>().map_err(EngineError::from)
}

fn line_rows(
    conn: &Connection,
    sql: &str,
    obra_id: &str,
) -> Result<Vec<CostLine>, EngineError> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt.query_map(params![obra_id], |row| {
        Ok(CostLine {
            categoria: row.get(0)?,
            custo: row.get(1)?,
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(EngineError::from)
}

/// Budgeted amounts for a project, one line per orcamento row.
pub fn budget_lines(conn: &Connection, obra_id: &str) -> Result<Vec<CostLine>, EngineError> {
    line_rows(
        conn,
        "SELECT categoria, custo FROM orcamento WHERE obra_id = ?1",
        obra_id,
    )
}

/// Realized amounts for a project, one line per despesas row.
pub fn expense_lines(conn: &Connection, obra_id: &str) -> Result<Vec<CostLine>, EngineError> {
    line_rows(
        conn,
        "SELECT categoria, custo FROM despesas WHERE obra_id = ?1",
        obra_id,
    )
}

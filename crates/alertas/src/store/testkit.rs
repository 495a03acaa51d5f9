//! Seed helpers for tests. The engine never writes the CRUD tables in
//! production; these exist so tests can stand up realistic projects.

use rusqlite::{params, Connection};

use crate::error::EngineError;

pub fn seed_project(
    conn: &Connection,
    id: &str,
    nome: &str,
    data_inicio: Option<&str>,
) -> Result<(), EngineError> {
    conn.execute(
        "INSERT INTO obras (id, tenant_id, nome, status, data_inicio)
         VALUES (?1, 'tenant-1', ?2, 'em_andamento', ?3)",
        params![id, nome, data_inicio],
    )?;
    Ok(())
}

pub fn seed_budget(
    conn: &Connection,
    obra_id: &str,
    categoria: Option<&str>,
    custo: f64,
) -> Result<(), EngineError> {
    conn.execute(
        "INSERT INTO orcamento (obra_id, categoria, custo) VALUES (?1, ?2, ?3)",
        params![obra_id, categoria, custo],
    )?;
    Ok(())
}

pub fn seed_expense(
    conn: &Connection,
    obra_id: &str,
    categoria: Option<&str>,
    custo: f64,
) -> Result<(), EngineError> {
    conn.execute(
        "INSERT INTO despesas (obra_id, categoria, custo) VALUES (?1, ?2, ?3)",
        params![obra_id, categoria, custo],
    )?;
    Ok(())
}

/// Replace all expense rows for a project (simulates cost corrections).
pub fn reset_expenses(conn: &Connection, obra_id: &str) -> Result<(), EngineError> {
    conn.execute("DELETE FROM despesas WHERE obra_id = ?1", params![obra_id])?;
    Ok(())
}

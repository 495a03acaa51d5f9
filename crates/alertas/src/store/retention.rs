//! Retention pruning for terminal alerts.
//!
//! Alerts keep accumulating across runs; RESOLVIDO / IGNORADO rows older
//! than the retention window are pruned together with their history.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;

use super::alerts::encode_ts;
use crate::error::EngineError;

/// Minimum days a terminal alert is kept before it is eligible for
/// pruning.
pub const DEFAULT_RETENTION_DAYS: u32 = 90;

/// Report of one retention pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetentionReport {
    pub total_deleted: u64,
    pub per_table: Vec<TableCleanup>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableCleanup {
    pub table: String,
    pub deleted: u64,
}

/// Delete terminal alerts whose last update is older than the window.
/// History rows for pruned alerts go with them. Runs in one transaction.
pub fn prune_terminal(
    conn: &Connection,
    now: DateTime<Utc>,
    retention_days: u32,
) -> Result<RetentionReport, EngineError> {
    let cutoff = encode_ts(now - Duration::days(i64::from(retention_days)));
    let mut report = RetentionReport::default();

    let tx = conn.unchecked_transaction()?;

    let history = tx.execute(
        "DELETE FROM historico_alertas WHERE alerta_id IN (
            SELECT id FROM alertas_desvio
            WHERE status IN ('RESOLVIDO', 'IGNORADO') AND updated_at < ?1
         )",
        params![cutoff],
    )?;
    report.per_table.push(TableCleanup {
        table: "historico_alertas".to_string(),
        deleted: history as u64,
    });

    let alerts = tx.execute(
        "DELETE FROM alertas_desvio
         WHERE status IN ('RESOLVIDO', 'IGNORADO') AND updated_at < ?1",
        params![cutoff],
    )?;
    report.per_table.push(TableCleanup {
        table: "alertas_desvio".to_string(),
        deleted: alerts as u64,
    });

    tx.commit()?;

    report.total_deleted = report.per_table.iter().map(|t| t.deleted).sum();
    Ok(report)
}

//! Queries for the configuracoes_alerta table.
//!
//! One active row per project, enforced by a partial unique index.
//! Deactivation flips `ativo` off and keeps the row for audit.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::Serialize;
use uuid::Uuid;

use super::alerts::{decode_ts, encode_ts};
use crate::classifier::Thresholds;
use crate::error::EngineError;

/// A stored threshold configuration.
#[derive(Debug, Clone, Serialize)]
pub struct AlertConfig {
    pub id: String,
    pub obra_id: String,
    pub tenant_id: Option<String>,
    #[serde(flatten)]
    pub thresholds: Thresholds,
    pub notificar_email: bool,
    pub notificar_dashboard: bool,
    pub ativo: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Values for creating or updating a configuration.
#[derive(Debug, Clone)]
pub struct ConfigUpsert<'a> {
    pub obra_id: &'a str,
    pub tenant_id: Option<&'a str>,
    pub thresholds: Thresholds,
    pub notificar_email: bool,
    pub notificar_dashboard: bool,
}

const CONFIG_COLUMNS: &str = "id, obra_id, tenant_id, threshold_baixo, threshold_medio, \
     threshold_alto, threshold_critico, notificar_email, notificar_dashboard, \
     ativo, created_at, updated_at";

fn row_to_config(row: &Row<'_>) -> rusqlite::Result<AlertConfig> {
    let created_raw: String = row.get(10)?;
    let updated_raw: String = row.get(11)?;
    Ok(AlertConfig {
        id: row.get(0)?,
        obra_id: row.get(1)?,
        tenant_id: row.get(2)?,
        thresholds: Thresholds {
            threshold_baixo: row.get(3)?,
            threshold_medio: row.get(4)?,
            threshold_alto: row.get(5)?,
            threshold_critico: row.get(6)?,
        },
        notificar_email: row.get(7)?,
        notificar_dashboard: row.get(8)?,
        ativo: row.get(9)?,
        created_at: decode_ts(10, &created_raw)?,
        updated_at: decode_ts(11, &updated_raw)?,
    })
}

/// Fetch the active configuration for a project, if any.
pub fn get_active(
    conn: &Connection,
    obra_id: &str,
) -> Result<Option<AlertConfig>, EngineError> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {CONFIG_COLUMNS} FROM configuracoes_alerta
         WHERE obra_id = ?1 AND ativo = 1"
    ))?;
    let mut rows = stmt.query_map(params![obra_id], row_to_config)?;
    rows.next().transpose().map_err(EngineError::from)
}

/// Create or update the active configuration for a project.
///
/// Boundaries are validated before any write. An existing active row is
/// updated in place; otherwise a fresh row is inserted (a previously
/// deactivated project gets a new row, preserving the old one).
pub fn upsert(
    conn: &Connection,
    values: &ConfigUpsert<'_>,
    now: DateTime<Utc>,
) -> Result<AlertConfig, EngineError> {
    values.thresholds.validate()?;

    let tx = conn.unchecked_transaction()?;
    let existing = get_active(&tx, values.obra_id)?;
    let config = match existing {
        Some(current) => {
            tx.execute(
                "UPDATE configuracoes_alerta SET
                    tenant_id = ?1, threshold_baixo = ?2, threshold_medio = ?3,
                    threshold_alto = ?4, threshold_critico = ?5,
                    notificar_email = ?6, notificar_dashboard = ?7,
                    updated_at = ?8
                 WHERE id = ?9",
                params![
                    values.tenant_id,
                    values.thresholds.threshold_baixo,
                    values.thresholds.threshold_medio,
                    values.thresholds.threshold_alto,
                    values.thresholds.threshold_critico,
                    values.notificar_email,
                    values.notificar_dashboard,
                    encode_ts(now),
                    current.id,
                ],
            )?;
            AlertConfig {
                tenant_id: values.tenant_id.map(ToString::to_string),
                thresholds: values.thresholds,
                notificar_email: values.notificar_email,
                notificar_dashboard: values.notificar_dashboard,
                updated_at: now,
                ..current
            }
        }
        None => {
            let config = AlertConfig {
                id: Uuid::new_v4().to_string(),
                obra_id: values.obra_id.to_string(),
                tenant_id: values.tenant_id.map(ToString::to_string),
                thresholds: values.thresholds,
                notificar_email: values.notificar_email,
                notificar_dashboard: values.notificar_dashboard,
                ativo: true,
                created_at: now,
                updated_at: now,
            };
            tx.execute(
                "INSERT INTO configuracoes_alerta
                    (id, obra_id, tenant_id, threshold_baixo, threshold_medio,
                     threshold_alto, threshold_critico, notificar_email,
                     notificar_dashboard, ativo, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, ?10, ?11)",
                params![
                    config.id,
                    config.obra_id,
                    config.tenant_id,
                    config.thresholds.threshold_baixo,
                    config.thresholds.threshold_medio,
                    config.thresholds.threshold_alto,
                    config.thresholds.threshold_critico,
                    config.notificar_email,
                    config.notificar_dashboard,
                    encode_ts(config.created_at),
                    encode_ts(config.updated_at),
                ],
            )?;
            config
        }
    };
    tx.commit()?;
    Ok(config)
}

/// Soft-deactivate the active configuration. Returns false when the
/// project had none.
pub fn deactivate(
    conn: &Connection,
    obra_id: &str,
    now: DateTime<Utc>,
) -> Result<bool, EngineError> {
    let updated = conn.execute(
        "UPDATE configuracoes_alerta SET ativo = 0, updated_at = ?1
         WHERE obra_id = ?2 AND ativo = 1",
        params![encode_ts(now), obra_id],
    )?;
    Ok(updated == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    fn values(obra_id: &str, baixo: f64) -> ConfigUpsert<'_> {
        ConfigUpsert {
            obra_id,
            tenant_id: Some("tenant-1"),
            thresholds: Thresholds {
                threshold_baixo: baixo,
                threshold_medio: baixo + 5.0,
                threshold_alto: baixo + 15.0,
                threshold_critico: baixo + 25.0,
            },
            notificar_email: true,
            notificar_dashboard: true,
        }
    }

    #[test]
    fn test_upsert_updates_in_place() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();

        let first = store
            .with_conn(|conn| upsert(conn, &values("obra-1", 5.0), now))
            .unwrap();
        let second = store
            .with_conn(|conn| upsert(conn, &values("obra-1", 8.0), now))
            .unwrap();

        // Same active row, updated boundaries.
        assert_eq!(first.id, second.id);
        assert!((second.thresholds.threshold_baixo - 8.0).abs() < f64::EPSILON);

        let active = store
            .with_conn(|conn| get_active(conn, "obra-1"))
            .unwrap()
            .unwrap();
        assert!((active.thresholds.threshold_baixo - 8.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_upsert_rejects_invalid_boundaries() {
        let store = Store::open_in_memory().unwrap();
        let mut bad = values("obra-1", 5.0);
        bad.thresholds.threshold_critico = bad.thresholds.threshold_alto;

        let err = store
            .with_conn(|conn| upsert(conn, &bad, Utc::now()))
            .unwrap_err();
        assert!(matches!(err, crate::error::EngineError::ConfigInvalid(_)));
        assert!(store
            .with_conn(|conn| get_active(conn, "obra-1"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_deactivate_keeps_row_for_audit() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let first = store
            .with_conn(|conn| upsert(conn, &values("obra-1", 5.0), now))
            .unwrap();

        assert!(store
            .with_conn(|conn| deactivate(conn, "obra-1", now))
            .unwrap());
        assert!(store
            .with_conn(|conn| get_active(conn, "obra-1"))
            .unwrap()
            .is_none());
        // Deactivating twice is a no-op.
        assert!(!store
            .with_conn(|conn| deactivate(conn, "obra-1", now))
            .unwrap());

        // Reconfiguring starts a fresh row; the deactivated one stays.
        let second = store
            .with_conn(|conn| upsert(conn, &values("obra-1", 10.0), now))
            .unwrap();
        assert_ne!(first.id, second.id);

        let total: i64 = store
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM configuracoes_alerta WHERE obra_id = 'obra-1'",
                    [],
                    |row| row.get(0),
                )
                .map_err(crate::error::EngineError::from)
            })
            .unwrap();
        assert_eq!(total, 2);
    }
}

//! Queries for the alertas_desvio table and its historico_alertas log.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use crate::error::EngineError;
use crate::types::{
    AlertFilters, AlertStatus, AlertWithProject, DeviationAlert, ProjectMeta,
    ScopeDeviation, Severity,
};

/// Values for a new or refreshed alert, produced by the classifier.
#[derive(Debug, Clone)]
pub struct AlertCandidate<'a> {
    pub obra_id: &'a str,
    pub tenant_id: Option<&'a str>,
    pub tipo_alerta: Severity,
    pub scope: ScopeDeviation,
    pub categoria: Option<&'a str>,
    pub descricao: String,
}

pub(crate) fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn decode_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

const ALERT_COLUMNS: &str = "id, obra_id, tenant_id, tipo_alerta, percentual_desvio, \
     valor_orcado, valor_realizado, valor_desvio, categoria, descricao, \
     status, created_at, updated_at";

fn row_to_alert(row: &Row<'_>) -> rusqlite::Result<DeviationAlert> {
    let tipo_raw: String = row.get(3)?;
    let status_raw: String = row.get(10)?;
    let created_raw: String = row.get(11)?;
    let updated_raw: String = row.get(12)?;
    Ok(DeviationAlert {
        id: row.get(0)?,
        obra_id: row.get(1)?,
        tenant_id: row.get(2)?,
        tipo_alerta: Severity::parse(&tipo_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                format!("unknown tipo_alerta: {tipo_raw}").into(),
            )
        })?,
        percentual_desvio: row.get(4)?,
        valor_orcado: row.get(5)?,
        valor_realizado: row.get(6)?,
        valor_desvio: row.get(7)?,
        categoria: row.get(8)?,
        descricao: row.get(9)?,
        status: AlertStatus::parse(&status_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                10,
                rusqlite::types::Type::Text,
                format!("unknown status: {status_raw}").into(),
            )
        })?,
        created_at: decode_ts(11, &created_raw)?,
        updated_at: decode_ts(12, &updated_raw)?,
    })
}

/// Fetch one alert by id.
pub fn get(conn: &Connection, id: &str) -> Result<Option<DeviationAlert>, EngineError> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {ALERT_COLUMNS} FROM alertas_desvio WHERE id = ?1"
    ))?;
    let mut rows = stmt.query_map(params![id], row_to_alert)?;
    rows.next().transpose().map_err(EngineError::from)
}

/// Find the ATIVO alert for a (project, category scope), if any.
pub fn find_active_scope(
    conn: &Connection,
    obra_id: &str,
    categoria: Option<&str>,
) -> Result<Option<DeviationAlert>, EngineError> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {ALERT_COLUMNS} FROM alertas_desvio
         WHERE obra_id = ?1
           AND COALESCE(categoria, '') = COALESCE(?2, '')
           AND status = 'ATIVO'"
    ))?;
    let mut rows = stmt.query_map(params![obra_id, categoria], row_to_alert)?;
    rows.next().transpose().map_err(EngineError::from)
}

/// Insert a new ATIVO alert. The partial unique index rejects a second
/// ATIVO row for the same scope.
pub fn insert_active(
    conn: &Connection,
    candidate: &AlertCandidate<'_>,
    now: DateTime<Utc>,
) -> Result<DeviationAlert, EngineError> {
    let alert = DeviationAlert {
        id: Uuid::new_v4().to_string(),
        obra_id: candidate.obra_id.to_string(),
        tenant_id: candidate.tenant_id.map(ToString::to_string),
        tipo_alerta: candidate.tipo_alerta,
        percentual_desvio: candidate.scope.percentual,
        valor_orcado: candidate.scope.valor_orcado,
        valor_realizado: candidate.scope.valor_realizado,
        valor_desvio: candidate.scope.valor_desvio,
        categoria: candidate.categoria.map(ToString::to_string),
        descricao: candidate.descricao.clone(),
        status: AlertStatus::Active,
        created_at: now,
        updated_at: now,
    };
    conn.execute(
        "INSERT INTO alertas_desvio
            (id, obra_id, tenant_id, tipo_alerta, percentual_desvio,
             valor_orcado, valor_realizado, valor_desvio, categoria,
             descricao, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            alert.id,
            alert.obra_id,
            alert.tenant_id,
            alert.tipo_alerta.as_str(),
            alert.percentual_desvio,
            alert.valor_orcado,
            alert.valor_realizado,
            alert.valor_desvio,
            alert.categoria,
            alert.descricao,
            alert.status.as_str(),
            encode_ts(alert.created_at),
            encode_ts(alert.updated_at),
        ],
    )?;
    Ok(alert)
}

/// Refresh an existing ATIVO alert's tier and numbers in place.
pub fn refresh_active(
    conn: &Connection,
    id: &str,
    candidate: &AlertCandidate<'_>,
    now: DateTime<Utc>,
) -> Result<usize, EngineError> {
    let updated = conn.execute(
        "UPDATE alertas_desvio SET
            tipo_alerta = ?1, percentual_desvio = ?2, valor_orcado = ?3,
            valor_realizado = ?4, valor_desvio = ?5, descricao = ?6,
            updated_at = ?7
         WHERE id = ?8 AND status = 'ATIVO'",
        params![
            candidate.tipo_alerta.as_str(),
            candidate.scope.percentual,
            candidate.scope.valor_orcado,
            candidate.scope.valor_realizado,
            candidate.scope.valor_desvio,
            candidate.descricao,
            encode_ts(now),
            id,
        ],
    )?;
    Ok(updated)
}

/// Conditional status write: only succeeds while the row still holds the
/// expected current status. Returns false when the row moved underneath.
pub fn set_status(
    conn: &Connection,
    id: &str,
    expected: AlertStatus,
    next: AlertStatus,
    now: DateTime<Utc>,
) -> Result<bool, EngineError> {
    let updated = conn.execute(
        "UPDATE alertas_desvio SET status = ?1, updated_at = ?2
         WHERE id = ?3 AND status = ?4",
        params![next.as_str(), encode_ts(now), id, expected.as_str()],
    )?;
    Ok(updated == 1)
}

/// Bulk ATIVO -> VISUALIZADO; rows in another status are left untouched.
pub fn acknowledge_many(
    conn: &Connection,
    ids: &[String],
    now: DateTime<Utc>,
) -> Result<usize, EngineError> {
    if ids.is_empty() {
        return Ok(0);
    }
    let placeholders = (2..ids.len() + 2)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "UPDATE alertas_desvio SET status = 'VISUALIZADO', updated_at = ?1
         WHERE status = 'ATIVO' AND id IN ({placeholders})"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut bind: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(ids.len() + 1);
    let ts = encode_ts(now);
    bind.push(&ts);
    for id in ids {
        bind.push(id);
    }
    let updated = stmt.execute(bind.as_slice())?;
    Ok(updated)
}

/// All ATIVO alert scopes for a project: (alert id, category scope).
pub fn active_scopes(
    conn: &Connection,
    obra_id: &str,
) -> Result<Vec<(String, Option<String>)>, EngineError> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, categoria FROM alertas_desvio
         WHERE obra_id = ?1 AND status = 'ATIVO'",
    )?;
    let rows = stmt.query_map(params![obra_id], |row| {
        Ok((row.get(0)?, row.get(1)?))
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(EngineError::from)
}

/// Filtered listing joined with project metadata, newest first.
pub fn query(
    conn: &Connection,
    filters: &AlertFilters,
) -> Result<Vec<AlertWithProject>, EngineError> {
    let mut sql = format!(
        "SELECT {cols}, o.id, o.nome, o.status
         FROM alertas_desvio a LEFT JOIN obras o ON o.id = a.obra_id
         WHERE 1=1",
        cols = ALERT_COLUMNS
            .split(", ")
            .map(|c| format!("a.{c}"))
            .collect::<Vec<_>>()
            .join(", ")
    );
    let mut bind: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if !filters.status.is_empty() {
        let ph = placeholders(bind.len() + 1, filters.status.len());
        sql.push_str(&format!(" AND a.status IN ({ph})"));
        for s in &filters.status {
            bind.push(Box::new(s.as_str()));
        }
    }
    if !filters.tipo_alerta.is_empty() {
        let ph = placeholders(bind.len() + 1, filters.tipo_alerta.len());
        sql.push_str(&format!(" AND a.tipo_alerta IN ({ph})"));
        for t in &filters.tipo_alerta {
            bind.push(Box::new(t.as_str()));
        }
    }
    if let Some(obra_id) = &filters.obra_id {
        sql.push_str(&format!(" AND a.obra_id = ?{}", bind.len() + 1));
        bind.push(Box::new(obra_id.clone()));
    }
    if let Some(inicio) = filters.data_inicio {
        sql.push_str(&format!(" AND a.created_at >= ?{}", bind.len() + 1));
        bind.push(Box::new(encode_ts(inicio)));
    }
    if let Some(fim) = filters.data_fim {
        sql.push_str(&format!(" AND a.created_at <= ?{}", bind.len() + 1));
        bind.push(Box::new(encode_ts(fim)));
    }
    sql.push_str(" ORDER BY a.created_at DESC");

    let mut stmt = conn.prepare(&sql)?;
    let params = bind
        .iter()
        .map(|b| b.as_ref() as &dyn rusqlite::ToSql)
        .collect::<Vec<_>>();
    let rows = stmt.query_map(params.as_slice(), |row| {
        let alert = row_to_alert(row)?;
        let obra_id: Option<String> = row.get(13)?;
        let obras = match obra_id {
            Some(id) => Some(ProjectMeta {
                id,
                nome: row.get(14)?,
                status: row.get(15)?,
            }),
            None => None,
        };
        Ok(AlertWithProject { alert, obras })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(EngineError::from)
}

fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Append one lifecycle event to the historico_alertas log.
pub fn insert_history(
    conn: &Connection,
    alert: &DeviationAlert,
    acao: &str,
    now: DateTime<Utc>,
) -> Result<(), EngineError> {
    conn.execute(
        "INSERT INTO historico_alertas
            (alerta_id, obra_id, tenant_id, tipo_alerta, percentual_desvio,
             valor_orcado, valor_realizado, valor_desvio, acao, registrado_em)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            alert.id,
            alert.obra_id,
            alert.tenant_id,
            alert.tipo_alerta.as_str(),
            alert.percentual_desvio,
            alert.valor_orcado,
            alert.valor_realizado,
            alert.valor_desvio,
            acao,
            encode_ts(now),
        ],
    )?;
    Ok(())
}

/// Count historico rows for one alert (used by lifecycle tests).
pub fn history_count(conn: &Connection, alerta_id: &str) -> Result<i64, EngineError> {
    conn.query_row(
        "SELECT COUNT(*) FROM historico_alertas WHERE alerta_id = ?1",
        params![alerta_id],
        |row| row.get(0),
    )
    .map_err(EngineError::from)
}

//! Read-side statistics over the alert store for dashboards.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::store::{alerts, Store};
use crate::types::{AlertFilters, AlertStatus, Severity};

/// Optional filter for statistics queries.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatsFilter {
    pub data_inicio: Option<DateTime<Utc>>,
    pub data_fim: Option<DateTime<Utc>>,
    pub obra_id: Option<String>,
}

/// Counts per tier among ATIVO alerts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AlertasPorTipo {
    #[serde(rename = "BAIXO")]
    pub baixo: usize,
    #[serde(rename = "MEDIO")]
    pub medio: usize,
    #[serde(rename = "ALTO")]
    pub alto: usize,
    #[serde(rename = "CRITICO")]
    pub critico: usize,
}

/// Counts per lifecycle status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AlertasPorStatus {
    #[serde(rename = "ATIVO")]
    pub ativo: usize,
    #[serde(rename = "VISUALIZADO")]
    pub visualizado: usize,
    #[serde(rename = "RESOLVIDO")]
    pub resolvido: usize,
    #[serde(rename = "IGNORADO")]
    pub ignorado: usize,
}

/// The single largest absolute deviation among matched alerts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MaiorDesvio {
    pub obra_nome: String,
    pub percentual: f64,
    pub valor: f64,
}

/// Dashboard summary over the alert store.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EstatisticasAlertas {
    pub total_alertas: usize,
    pub alertas_por_tipo: AlertasPorTipo,
    pub alertas_por_status: AlertasPorStatus,
    pub obras_com_alertas: usize,
    pub media_desvio: f64,
    pub maior_desvio: MaiorDesvio,
}

/// Computes summary counts and rates over persisted alerts. Pure read
/// side; dashboards tolerate eventual consistency, so no caching.
pub struct StatisticsAggregator {
    store: Arc<Store>,
}

impl StatisticsAggregator {
    #[must_use]
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Aggregate statistics for alerts matching the filter.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the underlying query fails.
    pub fn estatisticas(
        &self,
        filter: &StatsFilter,
    ) -> Result<EstatisticasAlertas, EngineError> {
        let rows = self.store.with_conn(|conn| {
            alerts::query(
                conn,
                &AlertFilters {
                    obra_id: filter.obra_id.clone(),
                    data_inicio: filter.data_inicio,
                    data_fim: filter.data_fim,
                    ..AlertFilters::default()
                },
            )
        })?;

        let mut stats = EstatisticasAlertas {
            total_alertas: rows.len(),
            ..EstatisticasAlertas::default()
        };

        let mut obras = HashSet::new();
        let mut soma_desvio = 0.0;
        let mut maior: Option<&crate::types::AlertWithProject> = None;

        for row in &rows {
            let alert = &row.alert;
            if alert.status == AlertStatus::Active {
                match alert.tipo_alerta {
                    Severity::Low => stats.alertas_por_tipo.baixo += 1,
                    Severity::Medium => stats.alertas_por_tipo.medio += 1,
                    Severity::High => stats.alertas_por_tipo.alto += 1,
                    Severity::Critical => stats.alertas_por_tipo.critico += 1,
                }
            }
            match alert.status {
                AlertStatus::Active => stats.alertas_por_status.ativo += 1,
                AlertStatus::Acknowledged => stats.alertas_por_status.visualizado += 1,
                AlertStatus::Resolved => stats.alertas_por_status.resolvido += 1,
                AlertStatus::Dismissed => stats.alertas_por_status.ignorado += 1,
            }
            obras.insert(alert.obra_id.clone());
            soma_desvio += alert.percentual_desvio.abs();

            let is_larger = maior.is_none_or(|m| {
                alert.percentual_desvio.abs() > m.alert.percentual_desvio.abs()
            });
            if is_larger {
                maior = Some(row);
            }
        }

        stats.obras_com_alertas = obras.len();
        if !rows.is_empty() {
            stats.media_desvio = soma_desvio / rows.len() as f64;
        }
        if let Some(row) = maior {
            stats.maior_desvio = MaiorDesvio {
                obra_nome: row
                    .obras
                    .as_ref()
                    .map_or_else(|| row.alert.obra_id.clone(), |o| o.nome.clone()),
                percentual: row.alert.percentual_desvio,
                valor: row.alert.valor_desvio,
            };
        }

        Ok(stats)
    }
}

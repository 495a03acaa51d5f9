//! HTTP server for deviation triggers, alert queries and configuration.
//!
//! Endpoints:
//! - `POST /api/alertas/calcular` — single-project recalculation
//! - `POST /api/alertas/executar` — batch run over eligible projects
//! - `GET /api/alertas` — filtered alert listing
//! - `POST /api/alertas/status` — lifecycle status mutation
//! - `POST /api/alertas/visualizar` — bulk acknowledge
//! - `GET/POST/DELETE /api/configuracoes` — threshold configuration
//! - `GET /api/alertas/estatisticas` — dashboard summary
//! - `GET /health`

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::classifier::Thresholds;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::lifecycle::LifecycleManager;
use crate::orchestrator::BatchOrchestrator;
use crate::stats::{StatisticsAggregator, StatsFilter};
use crate::store::{thresholds, Store};
use crate::types::{
    AlertFilters, AlertStatus, CategoryDeviation, ScopeDeviation, Severity, TriggerType,
};

/// Server state shared across handlers.
pub struct ServerState {
    pub store: Arc<Store>,
    pub orchestrator: BatchOrchestrator,
    pub lifecycle: LifecycleManager,
    pub stats: StatisticsAggregator,
    pub config: EngineConfig,
}

impl ServerState {
    /// Wire the engine against one store.
    #[must_use]
    pub fn new(store: Arc<Store>, config: EngineConfig) -> Self {
        Self {
            orchestrator: BatchOrchestrator::new(
                Arc::clone(&store),
                config.batch.clone(),
                config.default_thresholds,
            ),
            lifecycle: LifecycleManager::new(Arc::clone(&store)),
            stats: StatisticsAggregator::new(Arc::clone(&store)),
            store,
            config,
        }
    }
}

/// Build the HTTP router.
pub fn build_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/alertas", get(listar_handler))
        .route("/api/alertas/calcular", post(calcular_handler))
        .route("/api/alertas/executar", post(executar_handler))
        .route("/api/alertas/status", post(status_handler))
        .route("/api/alertas/visualizar", post(visualizar_handler))
        .route("/api/alertas/estatisticas", get(estatisticas_handler))
        .route("/api/configuracoes", post(config_upsert_handler))
        .route(
            "/api/configuracoes/{obra_id}",
            get(config_get_handler).delete(config_deactivate_handler),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
///
/// # Errors
///
/// Returns an error if the server fails to bind or serve.
pub async fn run_server(state: Arc<ServerState>, addr: &str) -> anyhow::Result<()> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("alertas engine listening on {addr}");

    axum::serve(listener, app).await?;

    Ok(())
}

fn error_status(err: &EngineError) -> StatusCode {
    match err {
        EngineError::DataUnavailable { .. } | EngineError::NotFound(_) => {
            StatusCode::NOT_FOUND
        }
        EngineError::InvalidTransition { .. } | EngineError::ConfigInvalid(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        EngineError::WriteConflict(_) => StatusCode::CONFLICT,
        EngineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(err: &EngineError) -> Response {
    (
        error_status(err),
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Deserialize)]
struct CalcularDesvioRequest {
    obra_id: String,
    tenant_id: Option<String>,
    #[serde(default)]
    trigger_type: TriggerType,
}

#[derive(Debug, Serialize)]
struct DesviosCalculados {
    geral: ScopeDeviation,
    por_categoria: Vec<CategoryDeviation>,
}

#[derive(Debug, Serialize)]
struct CalcularDesvioResponse {
    success: bool,
    alertas_gerados: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    desvios_calculados: Option<DesviosCalculados>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ExecutarRequest {
    as_of: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
struct ListarAlertasParams {
    /// Comma-separated status filter.
    status: Option<String>,
    /// Comma-separated tier filter.
    tipo_alerta: Option<String>,
    obra_id: Option<String>,
    data_inicio: Option<DateTime<Utc>>,
    data_fim: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct AtualizarStatusRequest {
    alerta_id: String,
    novo_status: AlertStatus,
}

#[derive(Debug, Deserialize)]
struct VisualizarRequest {
    alerta_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
struct VisualizarResponse {
    atualizados: usize,
}

#[derive(Debug, Deserialize)]
struct ConfiguracaoRequest {
    obra_id: String,
    tenant_id: Option<String>,
    #[serde(flatten)]
    thresholds: Thresholds,
    #[serde(default)]
    notificar_email: bool,
    #[serde(default = "default_true")]
    notificar_dashboard: bool,
}

const fn default_true() -> bool {
    true
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Manual single-project recalculation; bypasses batching and pacing.
async fn calcular_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<CalcularDesvioRequest>,
) -> Response {
    info!(
        obra_id = %request.obra_id,
        trigger = %request.trigger_type,
        "manual deviation calculation requested"
    );

    match state
        .orchestrator
        .run_for_project(
            &request.obra_id,
            request.tenant_id.as_deref(),
            request.trigger_type,
        )
        .await
    {
        Ok(run) => Json(CalcularDesvioResponse {
            success: true,
            alertas_gerados: run.outcome.alerts_created,
            desvios_calculados: Some(DesviosCalculados {
                geral: run.deviations.overall,
                por_categoria: run.deviations.categories,
            }),
            error: None,
        })
        .into_response(),
        Err(e) => {
            error!(obra_id = %request.obra_id, error = %e, "calculation failed");
            (
                error_status(&e),
                Json(CalcularDesvioResponse {
                    success: false,
                    alertas_gerados: 0,
                    desvios_calculados: None,
                    error: Some(e.to_string()),
                }),
            )
                .into_response()
        }
    }
}

/// Batch run over all eligible projects.
async fn executar_handler(
    State(state): State<Arc<ServerState>>,
    Query(request): Query<ExecutarRequest>,
) -> Response {
    let as_of = request.as_of.unwrap_or_else(Utc::now);

    match state
        .orchestrator
        .run_for_eligible_projects(as_of, TriggerType::Automatic)
        .await
    {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => {
            error!(error = %e, "batch run failed to start");
            error_response(&e)
        }
    }
}

fn parse_csv<T>(
    raw: Option<&str>,
    parse: impl Fn(&str) -> Option<T>,
    what: &str,
) -> Result<Vec<T>, String> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse(s).ok_or_else(|| format!("unknown {what}: {s}")))
        .collect()
}

/// Filtered alert listing, newest first, joined with project metadata.
async fn listar_handler(
    State(state): State<Arc<ServerState>>,
    Query(params): Query<ListarAlertasParams>,
) -> Response {
    let status = match parse_csv(params.status.as_deref(), AlertStatus::parse, "status") {
        Ok(v) => v,
        Err(e) => {
            return (StatusCode::UNPROCESSABLE_ENTITY, Json(ErrorResponse { error: e }))
                .into_response()
        }
    };
    let tipo_alerta =
        match parse_csv(params.tipo_alerta.as_deref(), Severity::parse, "tipo_alerta") {
            Ok(v) => v,
            Err(e) => {
                return (StatusCode::UNPROCESSABLE_ENTITY, Json(ErrorResponse { error: e }))
                    .into_response()
            }
        };

    let filters = AlertFilters {
        status,
        tipo_alerta,
        obra_id: params.obra_id,
        data_inicio: params.data_inicio,
        data_fim: params.data_fim,
    };

    match state.lifecycle.query(&filters) {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => error_response(&e),
    }
}

/// Lifecycle status mutation.
async fn status_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<AtualizarStatusRequest>,
) -> Response {
    match state
        .lifecycle
        .transition_status(&request.alerta_id, request.novo_status)
    {
        Ok(alert) => Json(alert).into_response(),
        Err(e) => error_response(&e),
    }
}

/// Bulk acknowledge of ATIVO alerts.
async fn visualizar_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<VisualizarRequest>,
) -> Response {
    match state.lifecycle.acknowledge_many(&request.alerta_ids) {
        Ok(atualizados) => Json(VisualizarResponse { atualizados }).into_response(),
        Err(e) => error_response(&e),
    }
}

/// Dashboard statistics.
async fn estatisticas_handler(
    State(state): State<Arc<ServerState>>,
    Query(filter): Query<StatsFilter>,
) -> Response {
    match state.stats.estatisticas(&filter) {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => error_response(&e),
    }
}

/// Fetch the active configuration for a project; the system defaults
/// are reported when none is configured.
async fn config_get_handler(
    State(state): State<Arc<ServerState>>,
    Path(obra_id): Path<String>,
) -> Response {
    match state
        .store
        .with_conn(|conn| thresholds::get_active(conn, &obra_id))
    {
        Ok(Some(config)) => Json(config).into_response(),
        Ok(None) => Json(serde_json::json!({
            "obra_id": obra_id,
            "ativo": false,
            "defaults": state.config.default_thresholds,
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

/// Create or update a project's configuration (keyed on obra_id).
async fn config_upsert_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<ConfiguracaoRequest>,
) -> Response {
    let values = thresholds::ConfigUpsert {
        obra_id: &request.obra_id,
        tenant_id: request.tenant_id.as_deref(),
        thresholds: request.thresholds,
        notificar_email: request.notificar_email,
        notificar_dashboard: request.notificar_dashboard,
    };
    match state
        .store
        .with_conn(|conn| thresholds::upsert(conn, &values, Utc::now()))
    {
        Ok(config) => Json(config).into_response(),
        Err(e) => error_response(&e),
    }
}

/// Soft-deactivate a project's configuration.
async fn config_deactivate_handler(
    State(state): State<Arc<ServerState>>,
    Path(obra_id): Path<String>,
) -> Response {
    match state
        .store
        .with_conn(|conn| thresholds::deactivate(conn, &obra_id, Utc::now()))
    {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => error_response(&EngineError::NotFound(format!(
            "active configuration for obra {obra_id}"
        ))),
        Err(e) => error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testkit;

    fn test_state() -> Arc<ServerState> {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store
            .with_conn(|conn| {
                testkit::seed_project(conn, "obra-1", "Aurora", Some("2025-01-01"))?;
                testkit::seed_budget(conn, "obra-1", Some("estrutura"), 100_000.0)?;
                testkit::seed_expense(conn, "obra-1", Some("estrutura"), 125_000.0)
            })
            .unwrap();
        Arc::new(ServerState::new(store, EngineConfig::default()))
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            error_status(&EngineError::NotFound("x".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            error_status(&EngineError::InvalidTransition {
                from: AlertStatus::Resolved,
                to: AlertStatus::Active,
            }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            error_status(&EngineError::WriteConflict("x".to_string())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            error_status(&EngineError::ConfigInvalid("x".to_string())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_parse_csv_filters() {
        let parsed = parse_csv(Some("ATIVO, RESOLVIDO"), AlertStatus::parse, "status").unwrap();
        assert_eq!(parsed, vec![AlertStatus::Active, AlertStatus::Resolved]);

        assert!(parse_csv(Some("PENDENTE"), AlertStatus::parse, "status").is_err());
        assert!(parse_csv(None, AlertStatus::parse, "status")
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_calcular_and_listar_flow() {
        let state = test_state();

        let run = state
            .orchestrator
            .run_for_project("obra-1", None, TriggerType::Manual)
            .await
            .unwrap();
        assert_eq!(run.outcome.alerts_created, 2);

        let rows = state.lifecycle.query(&AlertFilters::default()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].obras.as_ref().unwrap().nome, "Aurora");
    }

    #[tokio::test]
    async fn test_router_builds() {
        let _router = build_router(test_state());
    }
}

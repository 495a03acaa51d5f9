//! Alert lifecycle management.
//!
//! One ATIVO alert per (project, category scope). A calculation run
//! either refreshes that alert's numbers, supersedes nothing, or
//! auto-resolves it when the deviation drops below the alert floor.
//! User transitions follow a fixed table; terminal rows are never
//! mutated again.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::error::EngineError;
use crate::store::alerts::{self, AlertCandidate};
use crate::store::Store;
use crate::types::{
    AlertFilters, AlertStatus, AlertWithProject, DeviationAlert, Project,
    ScopeDeviation, Severity,
};

/// What a reconcile did to a scope's alert.
#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    /// New ATIVO alert inserted.
    Created(DeviationAlert),
    /// Existing ATIVO alert refreshed in place.
    Refreshed(DeviationAlert),
    /// Deviation self-corrected; ATIVO alert moved to RESOLVIDO.
    AutoResolved(DeviationAlert),
    /// No alert warranted and none active.
    Unchanged,
}

/// Creates, refreshes, resolves and transitions alert records.
pub struct LifecycleManager {
    store: Arc<Store>,
}

impl LifecycleManager {
    #[must_use]
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Reconcile one scope's classification against the alert store.
    ///
    /// With a tier, upserts the ATIVO alert for (project, scope); the
    /// write runs in one transaction guarded by the store's partial
    /// unique index and is retried once on a constraint collision before
    /// surfacing `WriteConflict`. Without a tier, an existing ATIVO
    /// alert is auto-resolved.
    ///
    /// # Errors
    ///
    /// Returns `WriteConflict` after a retried collision, or a storage
    /// error.
    pub fn reconcile_scope(
        &self,
        project: &Project,
        categoria: Option<&str>,
        tier: Option<Severity>,
        scope: &ScopeDeviation,
    ) -> Result<ReconcileOutcome, EngineError> {
        match tier {
            Some(tipo_alerta) => {
                let candidate = AlertCandidate {
                    obra_id: &project.id,
                    tenant_id: project.tenant_id.as_deref(),
                    tipo_alerta,
                    scope: *scope,
                    categoria,
                    descricao: describe(categoria, scope),
                };
                match self.upsert_active(&candidate) {
                    Err(e) if e.is_constraint_violation() => {
                        debug!(
                            obra_id = candidate.obra_id,
                            "active-alert upsert collided, retrying once"
                        );
                        self.upsert_active(&candidate).map_err(|retry| {
                            if retry.is_constraint_violation() {
                                EngineError::WriteConflict(format!(
                                    "concurrent upsert for obra {} scope {:?}",
                                    candidate.obra_id, candidate.categoria
                                ))
                            } else {
                                retry
                            }
                        })
                    }
                    other => other,
                }
            }
            None => self.auto_resolve(project, categoria),
        }
    }

    fn upsert_active(
        &self,
        candidate: &AlertCandidate<'_>,
    ) -> Result<ReconcileOutcome, EngineError> {
        let now = Utc::now();
        self.store.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let outcome = match alerts::find_active_scope(
                &tx,
                candidate.obra_id,
                candidate.categoria,
            )? {
                Some(existing) => {
                    alerts::refresh_active(&tx, &existing.id, candidate, now)?;
                    let refreshed = DeviationAlert {
                        tipo_alerta: candidate.tipo_alerta,
                        percentual_desvio: candidate.scope.percentual,
                        valor_orcado: candidate.scope.valor_orcado,
                        valor_realizado: candidate.scope.valor_realizado,
                        valor_desvio: candidate.scope.valor_desvio,
                        descricao: candidate.descricao.clone(),
                        updated_at: now,
                        ..existing
                    };
                    alerts::insert_history(&tx, &refreshed, "ATUALIZADO", now)?;
                    ReconcileOutcome::Refreshed(refreshed)
                }
                None => {
                    let created = alerts::insert_active(&tx, candidate, now)?;
                    alerts::insert_history(&tx, &created, "CRIADO", now)?;
                    info!(
                        obra_id = %created.obra_id,
                        categoria = ?created.categoria,
                        tipo = %created.tipo_alerta,
                        percentual = created.percentual_desvio,
                        "deviation alert created"
                    );
                    ReconcileOutcome::Created(created)
                }
            };
            tx.commit()?;
            Ok(outcome)
        })
    }

    fn auto_resolve(
        &self,
        project: &Project,
        categoria: Option<&str>,
    ) -> Result<ReconcileOutcome, EngineError> {
        let now = Utc::now();
        self.store.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let outcome = match alerts::find_active_scope(&tx, &project.id, categoria)? {
                Some(existing) => {
                    alerts::set_status(
                        &tx,
                        &existing.id,
                        AlertStatus::Active,
                        AlertStatus::Resolved,
                        now,
                    )?;
                    let resolved = DeviationAlert {
                        status: AlertStatus::Resolved,
                        updated_at: now,
                        ..existing
                    };
                    alerts::insert_history(&tx, &resolved, "RESOLVIDO_AUTO", now)?;
                    info!(
                        obra_id = %resolved.obra_id,
                        categoria = ?resolved.categoria,
                        "deviation self-corrected, alert resolved"
                    );
                    ReconcileOutcome::AutoResolved(resolved)
                }
                None => ReconcileOutcome::Unchanged,
            };
            tx.commit()?;
            Ok(outcome)
        })
    }

    /// Auto-resolve ATIVO alerts whose scope no longer appears in a
    /// calculation (category dropped from both ledgers). Returns how
    /// many were resolved.
    pub fn resolve_vanished_scopes(
        &self,
        project: &Project,
        seen_scopes: &[Option<String>],
    ) -> Result<usize, EngineError> {
        let active = self
            .store
            .with_conn(|conn| alerts::active_scopes(conn, &project.id))?;
        let mut resolved = 0;
        for (_, categoria) in active {
            if !seen_scopes.contains(&categoria) {
                if let ReconcileOutcome::AutoResolved(_) =
                    self.auto_resolve(project, categoria.as_deref())?
                {
                    resolved += 1;
                }
            }
        }
        Ok(resolved)
    }

    /// Apply a user-requested status transition.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown alert, `InvalidTransition` for an
    /// illegal move (state unchanged), `WriteConflict` when the row
    /// moved concurrently.
    pub fn transition_status(
        &self,
        alerta_id: &str,
        novo_status: AlertStatus,
    ) -> Result<DeviationAlert, EngineError> {
        let now = Utc::now();
        self.store.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let alert = alerts::get(&tx, alerta_id)?
                .ok_or_else(|| EngineError::NotFound(format!("alert {alerta_id}")))?;
            if !alert.status.can_transition_to(novo_status) {
                return Err(EngineError::InvalidTransition {
                    from: alert.status,
                    to: novo_status,
                });
            }
            if !alerts::set_status(&tx, alerta_id, alert.status, novo_status, now)? {
                return Err(EngineError::WriteConflict(format!(
                    "alert {alerta_id} changed status concurrently"
                )));
            }
            let updated = DeviationAlert {
                status: novo_status,
                updated_at: now,
                ..alert
            };
            alerts::insert_history(&tx, &updated, &format!("STATUS_{novo_status}"), now)?;
            tx.commit()?;
            Ok(updated)
        })
    }

    /// Bulk ATIVO -> VISUALIZADO. Rows in any other status are skipped,
    /// not failed. Returns how many rows changed.
    pub fn acknowledge_many(&self, alerta_ids: &[String]) -> Result<usize, EngineError> {
        let now = Utc::now();
        self.store
            .with_conn(|conn| alerts::acknowledge_many(conn, alerta_ids, now))
    }

    /// Fetch one alert.
    pub fn get(&self, alerta_id: &str) -> Result<Option<DeviationAlert>, EngineError> {
        self.store.with_conn(|conn| alerts::get(conn, alerta_id))
    }

    /// Filtered listing joined with project metadata, newest first.
    pub fn query(&self, filters: &AlertFilters) -> Result<Vec<AlertWithProject>, EngineError> {
        self.store.with_conn(|conn| alerts::query(conn, filters))
    }

    /// All alerts for one project.
    pub fn list_by_project(&self, obra_id: &str) -> Result<Vec<DeviationAlert>, EngineError> {
        let filters = AlertFilters {
            obra_id: Some(obra_id.to_string()),
            ..AlertFilters::default()
        };
        Ok(self.query(&filters)?.into_iter().map(|r| r.alert).collect())
    }

    /// All ATIVO alerts.
    pub fn list_active(&self) -> Result<Vec<DeviationAlert>, EngineError> {
        let filters = AlertFilters {
            status: vec![AlertStatus::Active],
            ..AlertFilters::default()
        };
        Ok(self.query(&filters)?.into_iter().map(|r| r.alert).collect())
    }

    /// ATIVO alerts of one tier.
    pub fn list_by_tier(&self, tier: Severity) -> Result<Vec<DeviationAlert>, EngineError> {
        let filters = AlertFilters {
            status: vec![AlertStatus::Active],
            tipo_alerta: vec![tier],
            ..AlertFilters::default()
        };
        Ok(self.query(&filters)?.into_iter().map(|r| r.alert).collect())
    }
}

fn describe(categoria: Option<&str>, scope: &ScopeDeviation) -> String {
    match categoria {
        Some(cat) => format!(
            "Desvio de {:.2}% na categoria {cat}",
            scope.percentual
        ),
        None => format!(
            "Desvio de {:.2}% no orçamento geral",
            scope.percentual
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testkit;

    fn setup() -> (Arc<Store>, LifecycleManager, Project) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store
            .with_conn(|conn| {
                testkit::seed_project(conn, "obra-1", "Residencial Aurora", Some("2025-01-15"))
            })
            .unwrap();
        let manager = LifecycleManager::new(Arc::clone(&store));
        let project = Project {
            id: "obra-1".to_string(),
            tenant_id: Some("tenant-1".to_string()),
            nome: "Residencial Aurora".to_string(),
            status: "em_andamento".to_string(),
            data_inicio: chrono::NaiveDate::from_ymd_opt(2025, 1, 15),
        };
        (store, manager, project)
    }

    fn scope(pct: f64) -> ScopeDeviation {
        ScopeDeviation::from_amounts(100_000.0, 100_000.0 * (1.0 + pct / 100.0))
    }

    #[test]
    fn test_reconcile_creates_then_refreshes() {
        let (_store, manager, project) = setup();

        let first = manager
            .reconcile_scope(&project, None, Some(Severity::High), &scope(25.0))
            .unwrap();
        let created = match first {
            ReconcileOutcome::Created(a) => a,
            other => panic!("expected Created, got {other:?}"),
        };
        assert_eq!(created.status, AlertStatus::Active);
        assert!((created.percentual_desvio - 25.0).abs() < 1e-9);

        // Re-running with unchanged data refreshes in place: same row,
        // no duplicate.
        let second = manager
            .reconcile_scope(&project, None, Some(Severity::High), &scope(25.0))
            .unwrap();
        let refreshed = match second {
            ReconcileOutcome::Refreshed(a) => a,
            other => panic!("expected Refreshed, got {other:?}"),
        };
        assert_eq!(refreshed.id, created.id);
        assert_eq!(manager.list_active().unwrap().len(), 1);
    }

    #[test]
    fn test_auto_resolution_below_floor() {
        let (_store, manager, project) = setup();

        manager
            .reconcile_scope(&project, None, Some(Severity::High), &scope(25.0))
            .unwrap();

        // Deviation drops below the low threshold: classifier yields no
        // tier, the alert resolves, nothing new is created.
        let outcome = manager
            .reconcile_scope(&project, None, None, &scope(3.0))
            .unwrap();
        let resolved = match outcome {
            ReconcileOutcome::AutoResolved(a) => a,
            other => panic!("expected AutoResolved, got {other:?}"),
        };
        assert_eq!(resolved.status, AlertStatus::Resolved);
        assert!(manager.list_active().unwrap().is_empty());

        // A further clean run is a no-op.
        assert!(matches!(
            manager
                .reconcile_scope(&project, None, None, &scope(2.0))
                .unwrap(),
            ReconcileOutcome::Unchanged
        ));
    }

    #[test]
    fn test_reopening_creates_fresh_alert() {
        let (_store, manager, project) = setup();

        let first = match manager
            .reconcile_scope(&project, None, Some(Severity::Medium), &scope(12.0))
            .unwrap()
        {
            ReconcileOutcome::Created(a) => a,
            other => panic!("unexpected {other:?}"),
        };
        manager.reconcile_scope(&project, None, None, &scope(1.0)).unwrap();

        // Deviation comes back: terminal row is untouched, a new ATIVO
        // row appears.
        let second = match manager
            .reconcile_scope(&project, None, Some(Severity::High), &scope(22.0))
            .unwrap()
        {
            ReconcileOutcome::Created(a) => a,
            other => panic!("unexpected {other:?}"),
        };
        assert_ne!(first.id, second.id);
        assert_eq!(
            manager.get(&first.id).unwrap().unwrap().status,
            AlertStatus::Resolved
        );
        assert_eq!(manager.list_active().unwrap().len(), 1);
    }

    #[test]
    fn test_category_scopes_are_independent() {
        let (_store, manager, project) = setup();

        manager
            .reconcile_scope(&project, None, Some(Severity::Low), &scope(6.0))
            .unwrap();
        manager
            .reconcile_scope(
                &project,
                Some("estrutura"),
                Some(Severity::Critical),
                &scope(40.0),
            )
            .unwrap();

        let active = manager.list_active().unwrap();
        assert_eq!(active.len(), 2);
        assert_eq!(manager.list_by_tier(Severity::Critical).unwrap().len(), 1);
    }

    #[test]
    fn test_transition_table_enforced() {
        let (_store, manager, project) = setup();
        let alert = match manager
            .reconcile_scope(&project, None, Some(Severity::High), &scope(25.0))
            .unwrap()
        {
            ReconcileOutcome::Created(a) => a,
            other => panic!("unexpected {other:?}"),
        };

        let acked = manager
            .transition_status(&alert.id, AlertStatus::Acknowledged)
            .unwrap();
        assert_eq!(acked.status, AlertStatus::Acknowledged);

        // ACKNOWLEDGED cannot go back to ATIVO.
        let err = manager
            .transition_status(&alert.id, AlertStatus::Active)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));

        let resolved = manager
            .transition_status(&alert.id, AlertStatus::Resolved)
            .unwrap();
        assert_eq!(resolved.status, AlertStatus::Resolved);

        // Terminal: every further transition fails and changes nothing.
        for next in [
            AlertStatus::Active,
            AlertStatus::Acknowledged,
            AlertStatus::Resolved,
            AlertStatus::Dismissed,
        ] {
            let err = manager.transition_status(&alert.id, next).unwrap_err();
            assert!(matches!(err, EngineError::InvalidTransition { .. }));
        }
        assert_eq!(
            manager.get(&alert.id).unwrap().unwrap().status,
            AlertStatus::Resolved
        );
    }

    #[test]
    fn test_unknown_alert_is_not_found() {
        let (_store, manager, _project) = setup();
        let err = manager
            .transition_status("missing", AlertStatus::Resolved)
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn test_acknowledge_many_skips_non_active() {
        let (_store, manager, project) = setup();
        let a1 = match manager
            .reconcile_scope(&project, None, Some(Severity::Low), &scope(6.0))
            .unwrap()
        {
            ReconcileOutcome::Created(a) => a,
            other => panic!("unexpected {other:?}"),
        };
        let a2 = match manager
            .reconcile_scope(&project, Some("estrutura"), Some(Severity::Low), &scope(7.0))
            .unwrap()
        {
            ReconcileOutcome::Created(a) => a,
            other => panic!("unexpected {other:?}"),
        };
        manager
            .transition_status(&a2.id, AlertStatus::Dismissed)
            .unwrap();

        let updated = manager
            .acknowledge_many(&[a1.id.clone(), a2.id.clone()])
            .unwrap();
        assert_eq!(updated, 1);
        assert_eq!(
            manager.get(&a1.id).unwrap().unwrap().status,
            AlertStatus::Acknowledged
        );
        assert_eq!(
            manager.get(&a2.id).unwrap().unwrap().status,
            AlertStatus::Dismissed
        );
    }

    #[test]
    fn test_resolve_vanished_scopes() {
        let (_store, manager, project) = setup();
        manager
            .reconcile_scope(
                &project,
                Some("demolicao"),
                Some(Severity::Medium),
                &scope(15.0),
            )
            .unwrap();
        manager
            .reconcile_scope(&project, None, Some(Severity::Low), &scope(6.0))
            .unwrap();

        // Latest calculation only saw the overall scope.
        let resolved = manager
            .resolve_vanished_scopes(&project, &[None])
            .unwrap();
        assert_eq!(resolved, 1);
        assert_eq!(manager.list_active().unwrap().len(), 1);
    }

    #[test]
    fn test_active_uniqueness_under_concurrency() {
        let (_store, manager, project) = setup();
        let manager = Arc::new(manager);
        let project = Arc::new(project);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let manager = Arc::clone(&manager);
                let project = Arc::clone(&project);
                std::thread::spawn(move || {
                    let pct = 20.0 + f64::from(i);
                    manager.reconcile_scope(
                        &project,
                        None,
                        Some(Severity::High),
                        &scope(pct),
                    )
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        assert_eq!(manager.list_active().unwrap().len(), 1);
    }

    #[test]
    fn test_history_is_appended() {
        let (store, manager, project) = setup();
        let alert = match manager
            .reconcile_scope(&project, None, Some(Severity::High), &scope(25.0))
            .unwrap()
        {
            ReconcileOutcome::Created(a) => a,
            other => panic!("unexpected {other:?}"),
        };
        manager
            .reconcile_scope(&project, None, Some(Severity::High), &scope(26.0))
            .unwrap();
        manager
            .transition_status(&alert.id, AlertStatus::Acknowledged)
            .unwrap();

        let count = store
            .with_conn(|conn| alerts::history_count(conn, &alert.id))
            .unwrap();
        // CRIADO + ATUALIZADO + STATUS_VISUALIZADO
        assert_eq!(count, 3);
    }
}

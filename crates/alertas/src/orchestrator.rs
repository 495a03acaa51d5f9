//! Batch orchestration of deviation pipelines.
//!
//! Eligible projects are processed in fixed-size batches; each batch
//! fans out concurrently and the orchestrator waits for the whole batch
//! (successes and failures alike) before pausing and advancing. This
//! bounds peak load on the shared database without an adaptive limiter.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{debug, error, info};

use crate::calculator::{DeviationCalculator, ProjectLedger};
use crate::classifier::{classify, Thresholds};
use crate::error::EngineError;
use crate::lifecycle::{LifecycleManager, ReconcileOutcome};
use crate::store::{thresholds, Store};
use crate::types::{
    DeviationResult, ProjectFailure, ProjectOutcome, RunSummary, TriggerType,
};

/// Pacing knobs for batch runs.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Projects processed concurrently per batch.
    pub batch_size: usize,
    /// Fixed pause between batches.
    pub batch_pause: Duration,
    /// Ceiling for one project's pipeline so a stalled project cannot
    /// stall its whole batch.
    pub project_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            batch_pause: Duration::from_secs(1),
            project_timeout: Duration::from_secs(30),
        }
    }
}

/// Result of one project's pipeline.
#[derive(Debug, Clone)]
pub struct ProjectRun {
    pub outcome: ProjectOutcome,
    pub deviations: DeviationResult,
}

/// Runs the Calculator -> Classifier -> Lifecycle pipeline across
/// projects.
pub struct BatchOrchestrator {
    ledger: Arc<dyn ProjectLedger>,
    store: Arc<Store>,
    calculator: DeviationCalculator,
    lifecycle: LifecycleManager,
    batch: BatchConfig,
    defaults: Thresholds,
}

impl BatchOrchestrator {
    /// Wire the pipeline against one store. The ledger defaults to the
    /// store itself; `with_ledger` swaps in another read side.
    #[must_use]
    pub fn new(store: Arc<Store>, batch: BatchConfig, defaults: Thresholds) -> Self {
        let ledger: Arc<dyn ProjectLedger> = Arc::clone(&store) as Arc<dyn ProjectLedger>;
        Self {
            calculator: DeviationCalculator::new(Arc::clone(&ledger)),
            lifecycle: LifecycleManager::new(Arc::clone(&store)),
            ledger,
            store,
            batch,
            defaults,
        }
    }

    /// Replace the read side (used by tests and split deployments).
    #[must_use]
    pub fn with_ledger(mut self, ledger: Arc<dyn ProjectLedger>) -> Self {
        self.calculator = DeviationCalculator::new(Arc::clone(&ledger));
        self.ledger = ledger;
        self
    }

    /// The lifecycle manager wired to this orchestrator's store.
    #[must_use]
    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    /// Run the pipeline for every eligible project.
    ///
    /// Per-project failures are caught, recorded in the summary, and
    /// never abort sibling pipelines or the run.
    ///
    /// # Errors
    ///
    /// Only the eligibility read itself can fail the run.
    pub async fn run_for_eligible_projects(
        &self,
        as_of: DateTime<Utc>,
        trigger: TriggerType,
    ) -> Result<RunSummary, EngineError> {
        let projects = self.ledger.eligible_projects(as_of.date_naive()).await?;
        let total = projects.len();
        info!(total, %trigger, "starting batch deviation run");

        let mut summary = RunSummary {
            started_at: Some(Utc::now()),
            attempted: total,
            ..RunSummary::default()
        };

        let mut processed = 0;
        for chunk in projects.chunks(self.batch.batch_size) {
            let pipelines = chunk.iter().map(|project| async move {
                let run = tokio::time::timeout(
                    self.batch.project_timeout,
                    self.run_for_project(&project.id, project.tenant_id.as_deref(), trigger),
                )
                .await;
                (project, run)
            });

            for (project, run) in join_all(pipelines).await {
                match run {
                    Ok(Ok(result)) => {
                        summary.succeeded += 1;
                        summary.outcomes.push(result.outcome);
                    }
                    Ok(Err(e)) => {
                        error!(obra_id = %project.id, error = %e, "pipeline failed");
                        summary.failed += 1;
                        summary.failures.push(ProjectFailure {
                            obra_id: project.id.clone(),
                            nome: project.nome.clone(),
                            error: e.to_string(),
                        });
                    }
                    Err(_) => {
                        error!(obra_id = %project.id, "pipeline timed out");
                        summary.failed += 1;
                        summary.failures.push(ProjectFailure {
                            obra_id: project.id.clone(),
                            nome: project.nome.clone(),
                            error: format!(
                                "pipeline timed out after {}s",
                                self.batch.project_timeout.as_secs()
                            ),
                        });
                    }
                }
            }

            processed += chunk.len();
            if processed < total {
                tokio::time::sleep(self.batch.batch_pause).await;
            }
        }

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            alerts_created = summary.alerts_created(),
            "batch deviation run finished"
        );
        Ok(summary)
    }

    /// Run the pipeline for a single project (manual/on-demand path;
    /// bypasses batching and pacing).
    ///
    /// # Errors
    ///
    /// Returns `DataUnavailable` when the project or its ledger cannot
    /// be read, or a store error from the lifecycle writes.
    pub async fn run_for_project(
        &self,
        obra_id: &str,
        tenant_id: Option<&str>,
        trigger: TriggerType,
    ) -> Result<ProjectRun, EngineError> {
        debug!(obra_id, %trigger, "calculating deviations");

        let project = self
            .ledger
            .project(obra_id)
            .await?
            .ok_or_else(|| EngineError::DataUnavailable {
                obra_id: obra_id.to_string(),
                reason: "project not found".to_string(),
            })?;

        let thresholds = self
            .store
            .with_conn(|conn| thresholds::get_active(conn, obra_id))?
            .map_or(self.defaults, |config| config.thresholds);

        let result = self.calculator.calculate(obra_id, tenant_id).await?;

        let mut outcome = ProjectOutcome {
            obra_id: project.id.clone(),
            nome: project.nome.clone(),
            alerts_created: 0,
            alerts_refreshed: 0,
            alerts_resolved: 0,
        };

        let tier = classify(&result.overall, &thresholds);
        self.tally(
            &mut outcome,
            self.lifecycle
                .reconcile_scope(&project, None, tier, &result.overall)?,
        );

        let mut seen_scopes: Vec<Option<String>> = vec![None];
        for category in &result.categories {
            let tier = classify(&category.scope, &thresholds);
            self.tally(
                &mut outcome,
                self.lifecycle.reconcile_scope(
                    &project,
                    Some(&category.categoria),
                    tier,
                    &category.scope,
                )?,
            );
            seen_scopes.push(Some(category.categoria.clone()));
        }

        outcome.alerts_resolved += self
            .lifecycle
            .resolve_vanished_scopes(&project, &seen_scopes)?;

        Ok(ProjectRun {
            outcome,
            deviations: result,
        })
    }

    #[allow(clippy::unused_self)]
    fn tally(&self, outcome: &mut ProjectOutcome, reconciled: ReconcileOutcome) {
        match reconciled {
            ReconcileOutcome::Created(_) => outcome.alerts_created += 1,
            ReconcileOutcome::Refreshed(_) => outcome.alerts_refreshed += 1,
            ReconcileOutcome::AutoResolved(_) => outcome.alerts_resolved += 1,
            ReconcileOutcome::Unchanged => {}
        }
    }
}

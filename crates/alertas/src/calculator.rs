//! Deviation calculation: budgeted vs realized, overall and per category.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::warn;

use crate::error::EngineError;
use crate::types::{CategoryDeviation, CostLine, DeviationResult, Project, ScopeDeviation};

/// Read-side seam over the project CRUD subsystem's data.
///
/// The store implements this against the shared database; tests mock it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProjectLedger: Send + Sync {
    /// Fetch one project row.
    async fn project(&self, obra_id: &str) -> Result<Option<Project>, EngineError>;

    /// Projects whose start date has passed as of the given date.
    async fn eligible_projects(&self, as_of: NaiveDate) -> Result<Vec<Project>, EngineError>;

    /// Budgeted amounts for a project.
    async fn budget_lines(&self, obra_id: &str) -> Result<Vec<CostLine>, EngineError>;

    /// Realized amounts for a project.
    async fn expense_lines(&self, obra_id: &str) -> Result<Vec<CostLine>, EngineError>;
}

/// Computes a `DeviationResult` for one project. Pure read-and-compute;
/// no side effects beyond logging.
pub struct DeviationCalculator {
    ledger: Arc<dyn ProjectLedger>,
}

impl DeviationCalculator {
    #[must_use]
    pub fn new(ledger: Arc<dyn ProjectLedger>) -> Self {
        Self { ledger }
    }

    /// Calculate overall and per-category deviation for a project.
    ///
    /// Categories are the union of budget and expense categories, so
    /// spend in a never-budgeted category surfaces as a zero-budget
    /// scope. Lines without category attribution count only toward the
    /// overall scope and are reported as skipped.
    ///
    /// # Errors
    ///
    /// Returns `DataUnavailable` when the project does not exist or
    /// either ledger read fails.
    pub async fn calculate(
        &self,
        obra_id: &str,
        tenant_id: Option<&str>,
    ) -> Result<DeviationResult, EngineError> {
        let project = self
            .ledger
            .project(obra_id)
            .await
            .map_err(|e| unavailable(obra_id, &e))?
            .ok_or_else(|| EngineError::DataUnavailable {
                obra_id: obra_id.to_string(),
                reason: "project not found".to_string(),
            })?;

        let budget = self
            .ledger
            .budget_lines(obra_id)
            .await
            .map_err(|e| unavailable(obra_id, &e))?;
        let expenses = self
            .ledger
            .expense_lines(obra_id)
            .await
            .map_err(|e| unavailable(obra_id, &e))?;

        let mut by_category: BTreeMap<String, (f64, f64)> = BTreeMap::new();
        let mut total_budget = 0.0;
        let mut total_realized = 0.0;
        let mut skipped_lines = 0;

        for line in &budget {
            total_budget += line.custo;
            match &line.categoria {
                Some(cat) => by_category.entry(cat.clone()).or_default().0 += line.custo,
                None => skipped_lines += 1,
            }
        }
        for line in &expenses {
            total_realized += line.custo;
            match &line.categoria {
                Some(cat) => by_category.entry(cat.clone()).or_default().1 += line.custo,
                None => skipped_lines += 1,
            }
        }

        if skipped_lines > 0 {
            warn!(
                obra_id,
                skipped_lines,
                "ledger lines without category attribution; per-category \
                 scopes are partial"
            );
        }

        let categories = by_category
            .into_iter()
            .map(|(categoria, (orcado, realizado))| CategoryDeviation {
                categoria,
                scope: ScopeDeviation::from_amounts(orcado, realizado),
            })
            .collect();

        Ok(DeviationResult {
            obra_id: project.id,
            tenant_id: tenant_id
                .map(ToString::to_string)
                .or(project.tenant_id),
            overall: ScopeDeviation::from_amounts(total_budget, total_realized),
            categories,
            skipped_lines,
        })
    }
}

fn unavailable(obra_id: &str, source: &EngineError) -> EngineError {
    match source {
        EngineError::DataUnavailable { .. } => EngineError::DataUnavailable {
            obra_id: obra_id.to_string(),
            reason: source.to_string(),
        },
        _ => EngineError::DataUnavailable {
            obra_id: obra_id.to_string(),
            reason: format!("ledger read failed: {source}"),
        },
    }
}

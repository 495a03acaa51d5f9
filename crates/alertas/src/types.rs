//! Core domain types for budget deviation alerts.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Severity tier of a deviation alert.
///
/// Ordered so that a larger deviation never maps to a smaller tier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Severity {
    /// Deviation crossed the low threshold
    #[serde(rename = "BAIXO")]
    Low,
    /// Deviation crossed the medium threshold
    #[serde(rename = "MEDIO")]
    Medium,
    /// Deviation crossed the high threshold
    #[serde(rename = "ALTO")]
    High,
    /// Deviation crossed the critical threshold, or spend with no budget
    #[serde(rename = "CRITICO")]
    Critical,
}

impl Severity {
    /// Database column value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "BAIXO",
            Self::Medium => "MEDIO",
            Self::High => "ALTO",
            Self::Critical => "CRITICO",
        }
    }

    /// Parse from a stored column value.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BAIXO" => Some(Self::Low),
            "MEDIO" => Some(Self::Medium),
            "ALTO" => Some(Self::High),
            "CRITICO" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a deviation alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertStatus {
    /// Open and current
    #[serde(rename = "ATIVO")]
    Active,
    /// Seen by a user, still open
    #[serde(rename = "VISUALIZADO")]
    Acknowledged,
    /// Closed: the deviation was addressed or self-corrected
    #[serde(rename = "RESOLVIDO")]
    Resolved,
    /// Closed: deliberately ignored
    #[serde(rename = "IGNORADO")]
    Dismissed,
}

impl AlertStatus {
    /// Database column value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ATIVO",
            Self::Acknowledged => "VISUALIZADO",
            Self::Resolved => "RESOLVIDO",
            Self::Dismissed => "IGNORADO",
        }
    }

    /// Parse from a stored column value.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ATIVO" => Some(Self::Active),
            "VISUALIZADO" => Some(Self::Acknowledged),
            "RESOLVIDO" => Some(Self::Resolved),
            "IGNORADO" => Some(Self::Dismissed),
            _ => None,
        }
    }

    /// Terminal statuses are never mutated again; reopening requires a
    /// fresh ATIVO alert.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Dismissed)
    }

    /// Status transition table.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Active => matches!(
                next,
                Self::Acknowledged | Self::Resolved | Self::Dismissed
            ),
            Self::Acknowledged => matches!(next, Self::Resolved | Self::Dismissed),
            Self::Resolved | Self::Dismissed => false,
        }
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a calculation run was initiated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    #[default]
    Manual,
    Automatic,
    Scheduled,
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => f.write_str("manual"),
            Self::Automatic => f.write_str("automatic"),
            Self::Scheduled => f.write_str("scheduled"),
        }
    }
}

/// A project row from the CRUD subsystem; read-only to this engine.
#[derive(Debug, Clone, Serialize)]
pub struct Project {
    pub id: String,
    pub tenant_id: Option<String>,
    pub nome: String,
    pub status: String,
    /// Projects with no start date are never eligible for batch runs.
    pub data_inicio: Option<NaiveDate>,
}

impl Project {
    /// Eligible once the start date has passed; completed projects stay
    /// eligible so drift can still be reported post-completion.
    #[must_use]
    pub fn is_eligible(&self, as_of: NaiveDate) -> bool {
        self.data_inicio.is_some_and(|d| d <= as_of)
    }
}

/// A budget or expense line read from the ledger.
#[derive(Debug, Clone)]
pub struct CostLine {
    /// Missing attribution makes the line count only toward the overall
    /// scope (partial data).
    pub categoria: Option<String>,
    pub custo: f64,
}

/// Budget-vs-realized numbers for one scope (overall or one category).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScopeDeviation {
    pub valor_orcado: f64,
    pub valor_realizado: f64,
    pub valor_desvio: f64,
    pub percentual: f64,
    /// Spend recorded against a zero budget; classified CRITICO
    /// regardless of thresholds.
    #[serde(skip)]
    pub unbudgeted: bool,
}

impl ScopeDeviation {
    /// Compute the deviation for a scope.
    ///
    /// Percentage is `(realizado - orcado) / orcado * 100` for a positive
    /// budget. A zero budget with zero spend is a zero deviation; a zero
    /// budget with spend is flagged unbudgeted and reported as 100%.
    #[must_use]
    pub fn from_amounts(valor_orcado: f64, valor_realizado: f64) -> Self {
        let valor_desvio = valor_realizado - valor_orcado;
        let (percentual, unbudgeted) = if valor_orcado > 0.0 {
            (valor_desvio / valor_orcado * 100.0, false)
        } else if valor_realizado > 0.0 {
            (100.0, true)
        } else {
            (0.0, false)
        };
        Self {
            valor_orcado,
            valor_realizado,
            valor_desvio,
            percentual,
            unbudgeted,
        }
    }
}

/// One category's deviation within a calculation.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryDeviation {
    pub categoria: String,
    #[serde(flatten)]
    pub scope: ScopeDeviation,
}

/// Result of one deviation calculation for a project. Ephemeral; consumed
/// by the classifier and lifecycle manager, never persisted as-is.
#[derive(Debug, Clone)]
pub struct DeviationResult {
    pub obra_id: String,
    pub tenant_id: Option<String>,
    pub overall: ScopeDeviation,
    pub categories: Vec<CategoryDeviation>,
    /// Ledger lines skipped for missing category attribution.
    pub skipped_lines: usize,
}

impl DeviationResult {
    /// Whether some ledger lines could not be attributed to a category.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.skipped_lines > 0
    }
}

/// A persisted deviation alert.
#[derive(Debug, Clone, Serialize)]
pub struct DeviationAlert {
    pub id: String,
    pub obra_id: String,
    pub tenant_id: Option<String>,
    pub tipo_alerta: Severity,
    pub percentual_desvio: f64,
    pub valor_orcado: f64,
    pub valor_realizado: f64,
    pub valor_desvio: f64,
    /// None is the overall-project scope.
    pub categoria: Option<String>,
    pub descricao: String,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Minimal project metadata joined onto alert listings.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectMeta {
    pub id: String,
    pub nome: String,
    pub status: String,
}

/// Alert row plus its project, newest first in listings.
#[derive(Debug, Clone, Serialize)]
pub struct AlertWithProject {
    #[serde(flatten)]
    pub alert: DeviationAlert,
    pub obras: Option<ProjectMeta>,
}

/// Filters for alert listings.
#[derive(Debug, Clone, Default)]
pub struct AlertFilters {
    pub status: Vec<AlertStatus>,
    pub tipo_alerta: Vec<Severity>,
    pub obra_id: Option<String>,
    pub data_inicio: Option<DateTime<Utc>>,
    pub data_fim: Option<DateTime<Utc>>,
}

/// Per-project tallies from one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectOutcome {
    pub obra_id: String,
    pub nome: String,
    pub alerts_created: usize,
    pub alerts_refreshed: usize,
    pub alerts_resolved: usize,
}

/// A project whose pipeline failed during a batch run.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectFailure {
    pub obra_id: String,
    pub nome: String,
    pub error: String,
}

/// Aggregate result of one batch run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub started_at: Option<DateTime<Utc>>,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub outcomes: Vec<ProjectOutcome>,
    pub failures: Vec<ProjectFailure>,
}

impl RunSummary {
    /// Total alerts created across all successful pipelines.
    #[must_use]
    pub fn alerts_created(&self) -> usize {
        self.outcomes.iter().map(|o| o.alerts_created).sum()
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Run: {} attempted | {} succeeded | {} failed | {} alerts created",
            self.attempted,
            self.succeeded,
            self.failed,
            self.alerts_created()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn test_severity_roundtrip() {
        for tier in [
            Severity::Low,
            Severity::Medium,
            Severity::High,
            Severity::Critical,
        ] {
            assert_eq!(Severity::parse(tier.as_str()), Some(tier));
        }
        assert_eq!(Severity::parse("URGENTE"), None);
    }

    #[test]
    fn test_transition_table_from_active() {
        let active = AlertStatus::Active;
        assert!(active.can_transition_to(AlertStatus::Acknowledged));
        assert!(active.can_transition_to(AlertStatus::Resolved));
        assert!(active.can_transition_to(AlertStatus::Dismissed));
        assert!(!active.can_transition_to(AlertStatus::Active));
    }

    #[test]
    fn test_transition_table_terminal() {
        for terminal in [AlertStatus::Resolved, AlertStatus::Dismissed] {
            assert!(terminal.is_terminal());
            for next in [
                AlertStatus::Active,
                AlertStatus::Acknowledged,
                AlertStatus::Resolved,
                AlertStatus::Dismissed,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_deviation_formula() {
        let scope = ScopeDeviation::from_amounts(100_000.0, 125_000.0);
        assert!((scope.percentual - 25.0).abs() < f64::EPSILON);
        assert!((scope.valor_desvio - 25_000.0).abs() < f64::EPSILON);
        assert!(!scope.unbudgeted);
    }

    #[test]
    fn test_deviation_zero_budget_zero_spend() {
        let scope = ScopeDeviation::from_amounts(0.0, 0.0);
        assert!(scope.percentual.abs() < f64::EPSILON);
        assert!(!scope.unbudgeted);
    }

    #[test]
    fn test_deviation_zero_budget_with_spend() {
        let scope = ScopeDeviation::from_amounts(0.0, 500.0);
        assert!(scope.unbudgeted);
        assert!((scope.percentual - 100.0).abs() < f64::EPSILON);
        assert!((scope.valor_desvio - 500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_eligibility() {
        let as_of = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let mut obra = Project {
            id: "o1".to_string(),
            tenant_id: None,
            nome: "Obra".to_string(),
            status: "em_andamento".to_string(),
            data_inicio: Some(NaiveDate::from_ymd_opt(2025, 5, 1).unwrap()),
        };
        assert!(obra.is_eligible(as_of));

        obra.data_inicio = Some(NaiveDate::from_ymd_opt(2025, 7, 1).unwrap());
        assert!(!obra.is_eligible(as_of));

        obra.data_inicio = None;
        assert!(!obra.is_eligible(as_of));
    }
}

//! Severity classification of budget deviations.
//!
//! Pure tier selection over one deviation scope and a threshold set.
//! Underspend never alerts; spend against a zero budget is always CRITICO.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::types::{ScopeDeviation, Severity};

/// Default boundaries substituted when a project has no active
/// configuration.
pub const DEFAULT_THRESHOLD_BAIXO: f64 = 5.0;
pub const DEFAULT_THRESHOLD_MEDIO: f64 = 10.0;
pub const DEFAULT_THRESHOLD_ALTO: f64 = 20.0;
pub const DEFAULT_THRESHOLD_CRITICO: f64 = 30.0;

/// Ordered percentage boundaries for tier selection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub threshold_baixo: f64,
    pub threshold_medio: f64,
    pub threshold_alto: f64,
    pub threshold_critico: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            threshold_baixo: DEFAULT_THRESHOLD_BAIXO,
            threshold_medio: DEFAULT_THRESHOLD_MEDIO,
            threshold_alto: DEFAULT_THRESHOLD_ALTO,
            threshold_critico: DEFAULT_THRESHOLD_CRITICO,
        }
    }
}

impl Thresholds {
    /// Reject boundary sets that are not strictly increasing positives.
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` describing the offending boundary pair.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.threshold_baixo <= 0.0 {
            return Err(EngineError::ConfigInvalid(format!(
                "threshold_baixo must be positive, got {}",
                self.threshold_baixo
            )));
        }
        let pairs = [
            ("threshold_baixo", self.threshold_baixo, "threshold_medio", self.threshold_medio),
            ("threshold_medio", self.threshold_medio, "threshold_alto", self.threshold_alto),
            ("threshold_alto", self.threshold_alto, "threshold_critico", self.threshold_critico),
        ];
        for (lo_name, lo, hi_name, hi) in pairs {
            if lo >= hi {
                return Err(EngineError::ConfigInvalid(format!(
                    "{lo_name} ({lo}) must be below {hi_name} ({hi})"
                )));
            }
        }
        Ok(())
    }
}

/// Map a deviation scope to a severity tier, or `None` when no alert is
/// warranted.
///
/// Boundaries are inclusive on the lower edge: a percentage exactly at a
/// threshold selects that threshold's tier.
#[must_use]
pub fn classify(scope: &ScopeDeviation, thresholds: &Thresholds) -> Option<Severity> {
    if scope.unbudgeted {
        return Some(Severity::Critical);
    }
    let pct = scope.percentual;
    if pct < 0.0 {
        // Underspend signals planning slack, not an overrun.
        return None;
    }
    if pct >= thresholds.threshold_critico {
        Some(Severity::Critical)
    } else if pct >= thresholds.threshold_alto {
        Some(Severity::High)
    } else if pct >= thresholds.threshold_medio {
        Some(Severity::Medium)
    } else if pct >= thresholds.threshold_baixo {
        Some(Severity::Low)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScopeDeviation;

    fn scope(pct: f64) -> ScopeDeviation {
        ScopeDeviation {
            valor_orcado: 100.0,
            valor_realizado: 100.0 + pct,
            valor_desvio: pct,
            percentual: pct,
            unbudgeted: false,
        }
    }

    #[test]
    fn test_tier_ladder() {
        let t = Thresholds::default();
        assert_eq!(classify(&scope(0.0), &t), None);
        assert_eq!(classify(&scope(4.9), &t), None);
        assert_eq!(classify(&scope(5.0), &t), Some(Severity::Low));
        assert_eq!(classify(&scope(9.9), &t), Some(Severity::Low));
        assert_eq!(classify(&scope(10.0), &t), Some(Severity::Medium));
        assert_eq!(classify(&scope(20.0), &t), Some(Severity::High));
        assert_eq!(classify(&scope(25.0), &t), Some(Severity::High));
        assert_eq!(classify(&scope(30.0), &t), Some(Severity::Critical));
        assert_eq!(classify(&scope(250.0), &t), Some(Severity::Critical));
    }

    #[test]
    fn test_underspend_never_alerts() {
        let t = Thresholds::default();
        assert_eq!(classify(&scope(-5.0), &t), None);
        assert_eq!(classify(&scope(-80.0), &t), None);
    }

    #[test]
    fn test_unbudgeted_is_always_critical() {
        let t = Thresholds::default();
        let s = ScopeDeviation::from_amounts(0.0, 1.0);
        assert_eq!(classify(&s, &t), Some(Severity::Critical));
    }

    #[test]
    fn test_monotonic_in_percentage() {
        let t = Thresholds::default();
        let mut last = None;
        for tenths in 0..=400 {
            let tier = classify(&scope(f64::from(tenths) / 10.0), &t);
            assert!(tier >= last, "tier regressed at {tenths}");
            last = tier;
        }
    }

    #[test]
    fn test_validate_rejects_unordered() {
        let t = Thresholds {
            threshold_alto: 10.0,
            ..Thresholds::default()
        };
        assert!(matches!(
            t.validate(),
            Err(EngineError::ConfigInvalid(_))
        ));

        let t = Thresholds {
            threshold_baixo: 0.0,
            threshold_medio: 10.0,
            threshold_alto: 20.0,
            threshold_critico: 30.0,
        };
        assert!(t.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(Thresholds::default().validate().is_ok());
    }
}

//! Budget deviation detection and alert lifecycle engine.
//!
//! Compares each construction project's budgeted cost against its
//! realized cost, classifies the deviation into severity tiers using
//! per-project configurable thresholds, and maintains durable alert
//! records with a defined lifecycle. Batch runs process many projects
//! concurrently under a fixed pacing policy.
//!
//! # Architecture
//!
//! - [`calculator::DeviationCalculator`] — pure read-and-compute of
//!   budget-vs-realized deviation, overall and per category
//! - [`classifier`] — maps a deviation to a severity tier via ordered
//!   thresholds
//! - [`lifecycle::LifecycleManager`] — creates, refreshes, auto-resolves
//!   and transitions alert records
//! - [`orchestrator::BatchOrchestrator`] — fans the pipeline out over
//!   eligible projects in bounded batches
//! - [`stats::StatisticsAggregator`] — dashboard summaries over the
//!   alert store
//! - [`store`] — SQLite persistence with the uniqueness guarantees the
//!   lifecycle relies on
//! - [`server`] — HTTP surface for triggers, queries and configuration

pub mod calculator;
pub mod classifier;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod orchestrator;
pub mod server;
pub mod stats;
pub mod store;
pub mod types;

pub use calculator::{DeviationCalculator, ProjectLedger};
pub use classifier::{classify, Thresholds};
pub use config::EngineConfig;
pub use error::EngineError;
pub use lifecycle::{LifecycleManager, ReconcileOutcome};
pub use orchestrator::{BatchConfig, BatchOrchestrator};
pub use stats::{EstatisticasAlertas, StatisticsAggregator, StatsFilter};
pub use store::Store;
pub use types::{
    AlertStatus, DeviationAlert, DeviationResult, Project, RunSummary, Severity,
    TriggerType,
};

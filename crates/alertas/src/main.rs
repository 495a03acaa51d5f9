//! Alertas CLI
//!
//! Runs the deviation engine: HTTP server with an optional scheduler
//! loop, one-off batch runs, single-project recalculation, statistics
//! and retention pruning.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use alertas::server::{run_server, ServerState};
use alertas::stats::StatsFilter;
use alertas::{EngineConfig, RunSummary, Store, TriggerType};

/// Budget deviation detection and alert lifecycle engine
#[derive(Parser)]
#[command(name = "alertas")]
#[command(about = "Budget deviation detection and alert lifecycle engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the SQLite database
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Output format (json or text)
    #[arg(long, default_value = "text", global = true)]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    Json,
    #[default]
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server, optionally with a scheduler loop
    Serve {
        /// Bind address
        #[arg(long)]
        addr: Option<String>,

        /// Minutes between scheduled batch runs (0 disables)
        #[arg(long, default_value = "0")]
        interval_minutes: u64,
    },
    /// Run the deviation pipeline once over all eligible projects
    Run {
        /// Reference time for eligibility (RFC 3339; defaults to now)
        #[arg(long)]
        as_of: Option<DateTime<Utc>>,
    },
    /// Recalculate deviations for a single project
    Project {
        /// Project identifier
        #[arg(long)]
        obra_id: String,

        /// Tenant identifier
        #[arg(long)]
        tenant_id: Option<String>,
    },
    /// Print alert statistics
    Stats {
        /// Restrict to one project
        #[arg(long)]
        obra_id: Option<String>,
    },
    /// Prune terminal alerts past the retention window
    Prune {
        /// Override the retention window in days
        #[arg(long)]
        days: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("alertas=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("alertas=info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = EngineConfig::from_env();
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    let store = Arc::new(
        Store::open(&config.db_path)
            .with_context(|| format!("Failed to open database {}", config.db_path.display()))?,
    );

    match cli.command {
        Commands::Serve {
            addr,
            interval_minutes,
        } => {
            if let Some(addr) = addr {
                config.bind_addr = addr;
            }
            let state = Arc::new(ServerState::new(store, config));

            if interval_minutes > 0 {
                spawn_scheduler(Arc::clone(&state), interval_minutes);
            }

            let bind_addr = state.config.bind_addr.clone();
            run_server(state, &bind_addr).await?;
        }
        Commands::Run { as_of } => {
            let state = ServerState::new(store, config);
            let summary = state
                .orchestrator
                .run_for_eligible_projects(as_of.unwrap_or_else(Utc::now), TriggerType::Manual)
                .await?;
            print_summary(&summary, cli.format)?;
        }
        Commands::Project { obra_id, tenant_id } => {
            let state = ServerState::new(store, config);
            let run = state
                .orchestrator
                .run_for_project(&obra_id, tenant_id.as_deref(), TriggerType::Manual)
                .await?;
            match cli.format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&run.outcome)?);
                }
                OutputFormat::Text => {
                    println!(
                        "{} {} | desvio geral {:.2}% | {} criados, {} atualizados, {} resolvidos",
                        "✓".green(),
                        run.outcome.nome.bold(),
                        run.deviations.overall.percentual,
                        run.outcome.alerts_created,
                        run.outcome.alerts_refreshed,
                        run.outcome.alerts_resolved,
                    );
                }
            }
        }
        Commands::Stats { obra_id } => {
            let state = ServerState::new(store, config);
            let stats = state.stats.estatisticas(&StatsFilter {
                obra_id,
                ..StatsFilter::default()
            })?;
            match cli.format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&stats)?);
                }
                OutputFormat::Text => {
                    println!("{}", "Alertas de desvio".bold());
                    println!("  total: {}", stats.total_alertas);
                    println!(
                        "  ativos por tipo: {} baixo, {} médio, {} alto, {} crítico",
                        stats.alertas_por_tipo.baixo,
                        stats.alertas_por_tipo.medio,
                        stats.alertas_por_tipo.alto,
                        stats.alertas_por_tipo.critico.to_string().red(),
                    );
                    println!("  obras com alertas: {}", stats.obras_com_alertas);
                    println!("  média de desvio: {:.2}%", stats.media_desvio);
                    if !stats.maior_desvio.obra_nome.is_empty() {
                        println!(
                            "  maior desvio: {} ({:.2}%)",
                            stats.maior_desvio.obra_nome, stats.maior_desvio.percentual
                        );
                    }
                }
            }
        }
        Commands::Prune { days } => {
            let retention_days = days.unwrap_or(config.retention_days);
            let report = store.prune_terminal(Utc::now(), retention_days)?;
            match cli.format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
                OutputFormat::Text => {
                    println!(
                        "pruned {} rows past the {retention_days}-day window",
                        report.total_deleted
                    );
                }
            }
        }
    }

    Ok(())
}

/// Periodic batch runs plus a retention pass, the scheduled trigger path.
fn spawn_scheduler(state: Arc<ServerState>, interval_minutes: u64) {
    info!(interval_minutes, "scheduler enabled");
    tokio::spawn(async move {
        let interval = std::time::Duration::from_secs(interval_minutes * 60);
        loop {
            tokio::time::sleep(interval).await;

            match state
                .orchestrator
                .run_for_eligible_projects(Utc::now(), TriggerType::Scheduled)
                .await
            {
                Ok(summary) => info!(%summary, "scheduled run finished"),
                Err(e) => error!(error = %e, "scheduled run failed"),
            }

            let retention_days = state.config.retention_days;
            match state.store.prune_terminal(Utc::now(), retention_days) {
                Ok(report) if report.total_deleted > 0 => {
                    info!(deleted = report.total_deleted, "retention pass pruned alerts");
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "retention pass failed"),
            }
        }
    });
}

fn print_summary(summary: &RunSummary, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(summary)?);
        }
        OutputFormat::Text => {
            println!("{summary}");
            for outcome in &summary.outcomes {
                println!(
                    "  {} {}: {} criados, {} atualizados, {} resolvidos",
                    "✓".green(),
                    outcome.nome,
                    outcome.alerts_created,
                    outcome.alerts_refreshed,
                    outcome.alerts_resolved,
                );
            }
            for failure in &summary.failures {
                println!(
                    "  {} {}: {}",
                    "✗".red(),
                    failure.nome,
                    failure.error.red()
                );
            }
        }
    }
    Ok(())
}

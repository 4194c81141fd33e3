//! MIMIC — Budget-Constrained Copy-Trade Simulation Engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! and runs the resolve→scan→resolve check loop over every followed
//! trader with graceful shutdown.

use anyhow::Result;
use std::time::Duration;
use tracing::{error, info};

use mimic::config;
use mimic::engine::orchestrator::CycleOrchestrator;
use mimic::gateway::polymarket::PolymarketGateway;
use mimic::notify;
use mimic::store::RunStore;

const BANNER: &str = r#"
 __  __ ___ __  __ ___ ____
|  \/  |_ _|  \/  |_ _/ ___|
| |\/| || || |\/| || | |
| |  | || || |  | || | |___
|_|  |_|___|_|  |_|___\____|

  Budget-Constrained Copy-Trade Simulation Engine
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Load configuration from TOML
    let cfg = config::AppConfig::load("config.toml")?;

    // Initialise structured logging
    init_logging();

    // Print startup banner
    println!("{BANNER}");
    info!(
        name = %cfg.app.name,
        check_interval_secs = cfg.app.check_interval_secs,
        followed = cfg.followed.len(),
        state_file = %cfg.app.state_file,
        "MIMIC starting up"
    );

    // -- Initialise components -------------------------------------------

    let store = RunStore::new(&cfg.app.state_file);
    let gateway = PolymarketGateway::new(&cfg.gateway)?;
    let notifier = notify::from_alerts_config(&cfg.alerts);
    let orchestrator = CycleOrchestrator::new(cfg.gateway.activity_limit);

    // Runs for newly followed traders are created by the orchestrator on
    // each pass, after the record validates.

    // -- Main loop -------------------------------------------------------

    let check_interval = Duration::from_secs(cfg.app.check_interval_secs);
    let mut interval = tokio::time::interval(check_interval);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.app.check_interval_secs,
        "Entering check loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let reports = orchestrator
                    .process_all(&cfg.followed, &store, &gateway, &*notifier)
                    .await;

                let active: usize = reports.iter().filter(|r| r.has_changes()).count();
                info!(
                    runs = reports.len(),
                    with_activity = active,
                    "Check pass complete"
                );
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    // The store is written at the end of every cycle; nothing is pending
    // here beyond logging the final position.
    match store.load() {
        Ok(runs) => {
            for run in &runs {
                let stats = run.stats();
                info!(
                    run = %run.id,
                    budget = format!("${:.2}", run.current_budget),
                    open = stats.open,
                    won = stats.won,
                    lost = stats.lost,
                    pnl = format!("${:.2}", stats.total_pnl),
                    "Final position"
                );
            }
        }
        Err(e) => error!(error = %e, "Failed to read state for shutdown summary"),
    }
    info!("MIMIC shut down cleanly.");

    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mimic=info"));

    let json_logging = std::env::var("MIMIC_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}

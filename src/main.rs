//! funds_flow - Funds-Movement Workflow Engine
//!
//! Entry point for the gateway binary:
//!
//! ```text
//! ┌──────────┐    ┌──────────────┐    ┌──────────┐
//! │ Gateway  │───▶│ FundsService │───▶│  Ledger  │
//! │  (HTTP)  │    │ (FSM + Idem) │    │ Network  │
//! └──────────┘    └──────────────┘    └──────────┘
//!                        ▲
//!                 ┌──────┴──────┐
//!                 │ Maintenance │
//!                 │   Worker    │
//!                 └─────────────┘
//! ```

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use funds_flow::clock::{Clock, SystemClock};
use funds_flow::config::AppConfig;
use funds_flow::gateway::{self, state::AppState};
use funds_flow::ledger::{AccountLedger, MemoryLedger};
use funds_flow::network::{BankNetwork, HttpBankNetwork, StaticBankNetwork};
use funds_flow::service::FundsService;
use funds_flow::worker::MaintenanceWorker;

// ============================================================
// COMMAND LINE
// ============================================================

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    std::env::var("FUNDS_FLOW_ENV").unwrap_or_else(|_| "dev".to_string())
}

fn get_port_override() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().ok();
        }
    }
    None
}

// ============================================================
// WIRING
// ============================================================

fn build_ledger(config: &AppConfig, clock: Arc<dyn Clock>) -> Arc<dyn AccountLedger> {
    let accounts = if cfg!(feature = "sandbox") {
        config.sandbox.accounts.clone()
    } else {
        warn!("Built without the sandbox feature, ledger starts empty");
        Vec::new()
    };
    info!(accounts = accounts.len(), "In-memory ledger seeded");
    Arc::new(MemoryLedger::with_accounts(clock, accounts))
}

fn build_network(config: &AppConfig) -> anyhow::Result<Arc<dyn BankNetwork>> {
    match &config.bank_network_url {
        Some(url) => {
            let network = HttpBankNetwork::new(url.clone(), config.engine.resolution_timeout())
                .context("failed to build bank network client")?;
            info!(%url, "Using HTTP bank network");
            Ok(Arc::new(network))
        }
        None => {
            let directory = StaticBankNetwork::new(config.sandbox.directory.clone());
            info!(entries = directory.len(), "Using static bank directory");
            Ok(Arc::new(directory))
        }
    }
}

// ============================================================
// MAIN
// ============================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let mut app_config =
        AppConfig::load(&env).with_context(|| format!("failed to load config for env {}", env))?;
    if let Some(port) = get_port_override() {
        app_config.gateway.port = port;
    }
    let _log_guard = funds_flow::logging::init_logging(&app_config);

    info!(env = %env, "Starting funds_flow");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ledger = build_ledger(&app_config, clock.clone());
    let network = build_network(&app_config)?;

    let funds = Arc::new(FundsService::new(
        ledger,
        network,
        clock,
        app_config.engine.clone(),
    ));

    let worker = MaintenanceWorker::new(funds.clone(), app_config.worker.clone());
    tokio::spawn(async move {
        worker.run().await;
    });

    let state = Arc::new(AppState::new(funds));
    gateway::run_server(&app_config.gateway, state)
        .await
        .context("gateway server failed")?;

    Ok(())
}

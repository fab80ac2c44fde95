use std::sync::Arc;
use std::time::Duration;

use dotenvy::dotenv;
use tracing::info;

use yield_allocator_bot::config;
use yield_allocator_bot::db::ledger::LedgerManager;
use yield_allocator_bot::gateway::ChainGateway;
use yield_allocator_bot::gateway::adapter::AdapterRegistry;
use yield_allocator_bot::gateway::vault::VaultReader;
use yield_allocator_bot::logging;
use yield_allocator_bot::monitor::YieldMonitor;
use yield_allocator_bot::scheduler::Scheduler;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    // Initialize logging
    if let Err(e) = logging::init_logging(env!("CARGO_BIN_NAME").to_string()) {
        eprintln!("Failed to initialize logging: {}", e);
        return Err(e);
    }

    // Load configuration (including provider)
    let cfg = Arc::new(config::Config::load().await?);
    info!(
        pools = cfg.pools.len(),
        instance = %cfg.instance_id,
        "Configuration loaded and logging initialized"
    );

    // Initialize run ledger
    let ledger = Arc::new(LedgerManager::init(&cfg).await?);
    info!("Run ledger initialized");

    // Initialize chain gateway and protocol adapters
    let gateway = Arc::new(ChainGateway::new(&cfg)?);
    let registry = Arc::new(AdapterRegistry::from_config(&cfg, gateway.clone()));
    let vault = Arc::new(VaultReader::new(
        gateway.clone(),
        cfg.vault_address,
        cfg.asset_decimals,
    ));
    info!(executor = ?gateway.executor_address(), "Chain gateway initialized");

    let monitor = Arc::new(YieldMonitor::new(
        cfg.clone(),
        gateway,
        registry,
        vault,
        ledger,
    ));
    let scheduler = Scheduler::new(monitor, Duration::from_secs(cfg.monitor_interval_secs));

    if std::env::args().any(|a| a == "--once") {
        let outcome = scheduler.run_once().await?;
        tokio::time::sleep(Duration::from_secs(3)).await; // Allow time for logging to flush
        std::process::exit(outcome.exit_code());
    }

    scheduler.run_continuous().await
}

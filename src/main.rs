//! GAVEL — Live team bidding round engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens (or creates) the SQLite ledger, and serves the REST and
//! WebSocket API with graceful shutdown.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use gavel::config::AppConfig;
use gavel::engine::cooldown::SystemClock;
use gavel::engine::Auction;
use gavel::server;
use gavel::server::routes::ServerState;
use gavel::store::Ledger;

const BANNER: &str = r#"
  ____    ___     _____ _
 / ___|  / \ \   / / ____| |
| |  _  / _ \ \ / /|  _| | |
| |_| |/ ___ \ V / | |___| |___
 \____/_/   \_\_/  |_____|_____|

  Live Bidding Round Engine
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Load configuration from TOML
    let cfg = AppConfig::load("config.toml")?;

    // Initialise structured logging
    init_logging();

    // Print startup banner
    println!("{BANNER}");
    info!(
        port = cfg.server.port,
        database = %cfg.server.database_file,
        start_wallet = cfg.auction.start_wallet,
        max_bid = cfg.auction.max_bid,
        "GAVEL starting up"
    );

    // -- Open the ledger ---------------------------------------------------

    let ledger = Ledger::open(&cfg.server.database_file).await?;
    info!(file = %cfg.server.database_file, "Ledger opened");

    // -- Wire up the auction -----------------------------------------------

    let auction = Auction::new(ledger, cfg.auction.clone(), Arc::new(SystemClock));
    let state = Arc::new(ServerState {
        auction,
        admin_password: cfg.admin_password(),
    });

    // -- Serve until shutdown ----------------------------------------------

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    tokio::select! {
        result = server::serve(state, cfg.server.port) => result?,
        _ = &mut shutdown => {
            info!("Shutdown signal received.");
        }
    }

    info!("GAVEL shut down cleanly.");
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("gavel=info"));

    let json_logging = std::env::var("GAVEL_LOG_JSON").is_ok();

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

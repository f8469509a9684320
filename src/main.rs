//! Transaction relayer service.
//!
//! Wires configuration, store, chain client and the lifecycle engine, then
//! runs the confirmation monitor until shutdown. Transport servers attach to
//! the [`Coordinator`] surface and are deployed separately.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use relayer_chain::RpcChainClient;
use relayer_core::{
    custody, Authenticator, Coordinator, Executor, FeeTracker, Monitor, NonceAllocator,
    OperatorPool, RelayerConfig, Store,
};

#[tokio::main]
async fn main() -> Result<()> {
    print_banner();

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,relayer_core=debug,relayer_chain=debug")),
        )
        .init();

    let config = RelayerConfig::load().context("failed to load configuration")?;
    config.validate().context("configuration rejected")?;
    config.log_config();

    let store = Arc::new(Store::open(&config.store.path).context("failed to open store")?);
    info!(path = %config.store.path, "Store opened");

    let chain = Arc::new(
        RpcChainClient::connect(
            config.chain.rpc_url.clone(),
            config.chain.chain_id,
            config.chain.rpc_timeout(),
        )
        .await
        .context("failed to connect to chain rpc")?,
    );

    let custody = custody::from_config(config.security.kms_type, &config.security.kms_config)
        .context("failed to initialize key custody")?;

    let allocator = Arc::new(NonceAllocator::new(store.clone()));

    // Operator counters follow the chain's view before anything broadcasts
    let operators = store.active_operators().context("failed to list operators")?;
    for operator in &operators {
        allocator
            .sync_from_chain(chain.as_ref(), &operator.address)
            .await
            .with_context(|| format!("failed to sync nonce for operator {}", operator.address))?;
    }
    info!(operator_count = operators.len(), "Operator nonces synced");

    let executor = Arc::new(Executor::new(
        chain.clone(),
        custody.clone(),
        store.clone(),
        allocator.clone(),
        config.chain.chain_id,
        config.chain.gas_price_multiplier,
    ));

    let shutdown = CancellationToken::new();

    // The admission surface transport servers mount on
    let _coordinator = Arc::new(Coordinator::new(
        store.clone(),
        chain.clone(),
        Arc::new(Authenticator::new(
            store.clone(),
            custody,
            config.builder.timestamp_window_ms,
        )),
        OperatorPool::new(store.clone()),
        executor.clone(),
        FeeTracker::new(store.clone()),
        config.dispatch.clone(),
        shutdown.clone(),
    ));
    info!("Admission surface initialized");

    let monitor = Monitor::new(
        store.clone(),
        chain,
        executor,
        FeeTracker::new(store.clone()),
        allocator,
        config.monitor.clone(),
        shutdown.clone(),
    );
    let monitor_handle = tokio::spawn(async move { monitor.run().await });

    info!("Relayer running, press ctrl-c to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("Shutdown signal received");
    shutdown.cancel();
    monitor_handle.await.ok();
    store.flush().context("failed to flush store")?;
    info!("Clean shutdown complete");

    Ok(())
}

/// Print startup banner.
fn print_banner() {
    println!(
        r#"
    ╦═╗┌─┐┬  ┌─┐┬ ┬┌─┐┬─┐
    ╠╦╝├┤ │  ├─┤└┬┘├┤ ├┬┘
    ╩╚═└─┘┴─┘┴ ┴ ┴ └─┘┴└─
    Transaction Relayer v0.1.0
    "#
    );
}

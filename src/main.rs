//! OCS Account Charging Engine
//!
//! Loads configuration, builds the account store for the configured backend
//! and runs a charging scenario file against the engine. The report is
//! printed as JSON on stdout.
//!
//! Usage: `ocs-charging <scenario.json>`

mod simulator;

use anyhow::{bail, Context};
use ocs_cache::{MemoryAccountStore, RedisAccountStore};
use ocs_core::config::{AppConfig, LoggingConfig, StoreBackend};
use ocs_core::traits::AccountStore;
use ocs_engine::{ChargingEngine, FilterS};
use simulator::{Scenario, ScenarioRunner};
use std::env;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging
fn init_tracing(logging: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "ocs_charging={},ocs_engine={},ocs_cache={},ocs_core={}",
            logging.level, logging.level, logging.level, logging.level
        ))
    });

    // Logs go to stderr, stdout carries the report
    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

async fn run<S: AccountStore + 'static>(
    store: Arc<S>,
    config: &AppConfig,
    scenario: Scenario,
) -> anyhow::Result<()> {
    let filters = Arc::new(FilterS::new());
    let engine = Arc::new(ChargingEngine::new(
        store,
        filters.clone(),
        config.engine.clone(),
    ));

    let report = ScenarioRunner::new(engine, filters)
        .run(scenario)
        .await
        .context("scenario failed")?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    init_tracing(&config.logging);

    info!("Starting OCS charging engine v{}", env!("CARGO_PKG_VERSION"));

    let Some(path) = env::args().nth(1) else {
        bail!("usage: ocs-charging <scenario.json>");
    };
    let raw = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("cannot read scenario {}", path))?;
    let scenario: Scenario =
        serde_json::from_str(&raw).with_context(|| format!("cannot parse scenario {}", path))?;

    match config.store.backend {
        StoreBackend::Memory => {
            info!("Using in-memory account store");
            run(Arc::new(MemoryAccountStore::new()), &config, scenario).await
        }
        StoreBackend::Redis => {
            let Some(url) = config.store.redis_url.as_deref() else {
                bail!("store.redis_url is required for the redis backend");
            };
            info!("Connecting to Redis...");
            let store = RedisAccountStore::new(url)
                .await
                .context("failed to connect to Redis")?;
            store.ping().await.context("Redis ping failed")?;
            info!("Redis account store connected");
            run(Arc::new(store), &config, scenario).await
        }
    }
}

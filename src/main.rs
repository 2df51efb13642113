mod analysis;
mod comfy_table;
mod config;
mod error;
mod find_tickers;
mod indicators;
mod klines;
mod storage_utils;

use clap::Parser;
use std::sync::Arc;

use crate::comfy_table::ComfyTableReporter;
use crate::config::{Cli, ScanConfig};
use crate::find_tickers::{BinanceCatalog, CachedCatalog};
use crate::klines::{BinanceKlines, PriceSeriesSource};
use crate::storage_utils::AsyncStorageManager;

fn init_logging() {
    let (global_level, my_code_level) = if cfg!(debug_assertions) {
        (log::LevelFilter::Warn, log::LevelFilter::Debug)
    } else {
        (log::LevelFilter::Warn, log::LevelFilter::Info)
    };

    // RUST_LOG, when set, wins over both defaults.
    env_logger::Builder::new()
        .filter(None, global_level)
        .filter(Some("rsi_screener"), my_code_level)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    let storage = match &cli.storage_dir {
        Some(dir) => AsyncStorageManager::new(dir.clone()).await?,
        None => AsyncStorageManager::new_relative("storage").await?,
    };
    let config = ScanConfig::resolve(&storage, &cli).await?;
    log::info!(
        "Scanning {} pairs on {} (RSI {} < {}, {} smoothing, {} workers)",
        config.symbol.as_deref().unwrap_or(&config.quote_asset),
        config.interval,
        config.rsi_period,
        config.rsi_threshold,
        config.smoothing,
        config.max_workers
    );

    let client = reqwest::Client::builder()
        .pool_max_idle_per_host(config.max_workers)
        .timeout(config.http_timeout())
        .build()?;
    let source: Arc<dyn PriceSeriesSource> =
        Arc::new(BinanceKlines::new(client.clone(), config.api_base_url.clone()));
    let catalog = CachedCatalog::new(
        Arc::new(BinanceCatalog::new(client, config.api_base_url.clone())),
        storage.clone(),
        config.cache_max_age(),
    );
    let reporter = ComfyTableReporter::default();

    // One listener for the whole run, so a press during a scan is not lost.
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("Could not listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    analysis::run_watch(
        &config,
        &catalog,
        source,
        &storage,
        &reporter,
        &cli,
        shutdown,
    )
    .await?;

    Ok(())
}

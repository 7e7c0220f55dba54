//! Price feeder binary
//!
//! Connects the configured providers and logs the aggregated prices and the
//! chain height on a fixed interval until Ctrl-C. Metrics are logged on exit.

use anyhow::{bail, Context, Result};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use price_feeder::config::AppConfig;
use price_feeder::logging::init_logging;
use price_feeder::metrics;
use price_feeder::oracle::client::ChainRpc;
use price_feeder::oracle::{ProviderRegistry, TendermintRpc};
use price_feeder::types::AggregatedProviderPrices;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load().context("Failed to load configuration")?;
    init_logging(&config.server.log_level, config.server.json_logs);

    info!(config = %config, "Starting price feeder");

    let oracle_config = config.oracle_client_config();
    match oracle_config.validate() {
        Ok(()) => info!(
            chain_id = %oracle_config.chain_id,
            oracle = %oracle_config.oracle_addr,
            validator = %oracle_config.validator_addr,
            gas_adjustment = oracle_config.gas_adjustment,
            gas_prices = %oracle_config.gas_prices,
            "Oracle account configured"
        ),
        Err(e) => warn!(error = %e, "Oracle account incomplete; votes cannot be broadcast"),
    }

    let chain = TendermintRpc::new(&config.rpc.tmrpc_endpoint, config.rpc_timeout())?;

    let provider_pairs = config.provider_pairs()?;
    let registry = ProviderRegistry::connect(
        &provider_pairs,
        &config.provider_endpoints(),
        config.provider_timeout(),
    )
    .await
    .context("Failed to connect providers")?;

    if registry.is_empty() {
        bail!("No providers configured");
    }

    let mut ticker = interval(config.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                match chain.latest_height().await {
                    Ok(height) => debug!(height, "Chain height"),
                    Err(e) => warn!(error = %e, "Failed to query chain height"),
                }

                let prices = registry.get_ticker_prices().await;
                log_prices(&prices);

                let candles = registry.get_candle_prices().await;
                for (provider, by_pair) in &candles {
                    for (pair, series) in by_pair {
                        debug!(provider = %provider, pair = %pair, candles = series.len(), "Candles");
                    }
                }
            }
        }
    }

    registry.shutdown().await;

    match metrics::gather_text() {
        Ok(text) => info!(metrics = %text, "Final metrics"),
        Err(e) => warn!(error = %e, "Failed to render metrics"),
    }
    info!("Price feeder stopped");
    Ok(())
}

fn log_prices(prices: &AggregatedProviderPrices) {
    if prices.is_empty() {
        warn!("No provider returned prices");
        return;
    }

    for (provider, tickers) in prices {
        for (pair, ticker) in tickers {
            info!(
                provider = %provider,
                pair = %pair,
                price = %ticker.price,
                volume = %ticker.volume,
                "Ticker"
            );
        }
    }
}

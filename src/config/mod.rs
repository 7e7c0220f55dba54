//! Configuration management for the price feeder
//!
//! Loads from config files + environment variables via .env

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::oracle::client::OracleClientConfig;
use crate::oracle::provider::{ProviderEndpoints, ProviderName};
use crate::types::CurrencyPair;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub account: AccountConfig,
    pub rpc: RpcConfig,
    pub gas: GasConfig,
    pub provider: ProviderConfig,
    pub currency_pairs: Vec<CurrencyPairConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Default log level when RUST_LOG is not set
    pub log_level: String,
    /// Emit JSON log lines
    pub json_logs: bool,
    /// How often the aggregated prices are collected, in milliseconds
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub chain_id: String,
    /// Oracle feeder account address
    pub address: String,
    /// Validator the feeder votes for
    pub validator: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    /// Tendermint RPC endpoint
    pub tmrpc_endpoint: String,
    /// RPC request timeout in milliseconds
    pub rpc_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GasConfig {
    pub adjustment: f64,
    pub prices: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Per-provider request timeout in milliseconds
    pub timeout_ms: u64,
    pub coinbase_ws_url: String,
    pub osmosis_base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CurrencyPairConfig {
    pub base: String,
    pub quote: String,
    /// Providers that should price this pair
    pub providers: Vec<String>,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Self::builder()?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (PRICE_FEEDER__*)
            .add_source(Environment::with_prefix("PRICE_FEEDER").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(app_config)
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        let builder = Config::builder()
            .set_default("server.log_level", "info")?
            .set_default("server.json_logs", false)?
            .set_default("server.poll_interval_ms", 5000)?
            .set_default("account.chain_id", "umee-1")?
            .set_default("account.address", "")?
            .set_default("account.validator", "")?
            .set_default("rpc.tmrpc_endpoint", "http://localhost:26657")?
            .set_default("rpc.rpc_timeout_ms", 100)?
            .set_default("gas.adjustment", 1.5)?
            .set_default("gas.prices", "")?
            .set_default("provider.timeout_ms", 10_000)?
            .set_default(
                "provider.coinbase_ws_url",
                crate::oracle::provider::COINBASE_WS_URL,
            )?
            .set_default(
                "provider.osmosis_base_url",
                crate::oracle::provider::OSMOSIS_BASE_URL,
            )?
            .set_default("currency_pairs", Vec::<String>::new())?;
        Ok(builder)
    }

    /// Reject configs that would start a feeder with nothing valid to price.
    pub fn validate(&self) -> Result<()> {
        if self.currency_pairs.is_empty() {
            bail!("At least one currency pair must be configured");
        }

        for pair in &self.currency_pairs {
            CurrencyPair::new(&pair.base, &pair.quote)
                .with_context(|| format!("Invalid currency pair {}/{}", pair.base, pair.quote))?;

            if pair.providers.is_empty() {
                bail!("Currency pair {}/{} has no providers", pair.base, pair.quote);
            }
            for provider in &pair.providers {
                provider.parse::<ProviderName>()?;
            }
        }

        if self.server.poll_interval_ms == 0 {
            bail!("server.poll_interval_ms must be positive");
        }

        Ok(())
    }

    /// Pairs grouped by the provider that should price them.
    pub fn provider_pairs(&self) -> Result<HashMap<ProviderName, Vec<CurrencyPair>>> {
        let mut grouped: HashMap<ProviderName, Vec<CurrencyPair>> = HashMap::new();
        for pair in &self.currency_pairs {
            let cp = CurrencyPair::new(&pair.base, &pair.quote)?;
            for provider in &pair.providers {
                let pairs = grouped.entry(provider.parse()?).or_default();
                if !pairs.contains(&cp) {
                    pairs.push(cp.clone());
                }
            }
        }
        Ok(grouped)
    }

    pub fn provider_endpoints(&self) -> ProviderEndpoints {
        ProviderEndpoints {
            coinbase_ws_url: self.provider.coinbase_ws_url.clone(),
            osmosis_base_url: self.provider.osmosis_base_url.clone(),
            http_timeout: self.provider_timeout(),
        }
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider.timeout_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc.rpc_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.server.poll_interval_ms)
    }

    pub fn oracle_client_config(&self) -> OracleClientConfig {
        OracleClientConfig {
            chain_id: self.account.chain_id.clone(),
            oracle_addr: self.account.address.clone(),
            validator_addr: self.account.validator.clone(),
            gas_adjustment: self.gas.adjustment,
            gas_prices: self.gas.prices.clone(),
        }
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        format!(
            "chain_id={} rpc={} pairs={} poll_ms={}",
            self.account.chain_id,
            self.rpc.tmrpc_endpoint,
            self.currency_pairs.len(),
            self.server.poll_interval_ms
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

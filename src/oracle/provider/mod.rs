//! Exchange price providers (Coinbase websocket, Osmosis REST)
//!
//! Every exchange is exposed through the same [`Provider`] contract so the
//! registry can fan out over them without knowing how each one collects data.

mod coinbase;
mod osmosis;

pub use coinbase::{CoinbaseProvider, COINBASE_WS_URL};
pub use osmosis::{OsmosisProvider, OSMOSIS_BASE_URL};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ProviderError;
use crate::types::{CandlePrice, CurrencyPair, TickerPrice};

/// Default timeout for provider HTTP requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Trailing window of trades/candles kept per pair.
pub const PROVIDER_CANDLE_PERIOD: Duration = Duration::from_secs(10 * 60);

/// Trait for exchange price providers
#[async_trait]
pub trait Provider: Send + Sync {
    /// Exchange identity
    fn name(&self) -> ProviderName;

    /// Latest ticker for every requested pair, keyed by pair string.
    ///
    /// Fails rather than returning a partial map when any pair is missing.
    async fn get_ticker_prices(
        &self,
        pairs: &[CurrencyPair],
    ) -> Result<HashMap<String, TickerPrice>, ProviderError>;

    /// Recent candles for every requested pair, keyed by pair string.
    async fn get_candle_prices(
        &self,
        pairs: &[CurrencyPair],
    ) -> Result<HashMap<String, Vec<CandlePrice>>, ProviderError>;

    /// Start receiving data for the given pairs. Re-subscribing is harmless.
    async fn subscribe_currency_pairs(&self, pairs: &[CurrencyPair]) -> Result<(), ProviderError>;

    /// Stop any background work owned by the provider.
    async fn shutdown(&self) {}
}

/// Exchange identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderName {
    Coinbase,
    Osmosis,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::Coinbase => "coinbase",
            ProviderName::Osmosis => "osmosis",
        }
    }
}

impl fmt::Display for ProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderName::Coinbase => write!(f, "Coinbase"),
            ProviderName::Osmosis => write!(f, "Osmosis"),
        }
    }
}

impl FromStr for ProviderName {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "coinbase" => Ok(ProviderName::Coinbase),
            "osmosis" => Ok(ProviderName::Osmosis),
            other => Err(ProviderError::UnknownProvider(other.to_string())),
        }
    }
}

/// Endpoints and timeouts used when constructing providers
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub coinbase_ws_url: String,
    pub osmosis_base_url: String,
    pub http_timeout: Duration,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            coinbase_ws_url: COINBASE_WS_URL.to_string(),
            osmosis_base_url: OSMOSIS_BASE_URL.to_string(),
            http_timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Build the provider for `name`, subscribed to `pairs`.
///
/// Streaming providers dial and spawn their receive task here.
pub async fn new_provider(
    name: ProviderName,
    endpoints: &ProviderEndpoints,
    pairs: &[CurrencyPair],
) -> Result<Arc<dyn Provider>, ProviderError> {
    let provider: Arc<dyn Provider> = match name {
        ProviderName::Coinbase => {
            Arc::new(CoinbaseProvider::with_url(&endpoints.coinbase_ws_url, pairs).await?)
        }
        ProviderName::Osmosis => Arc::new(OsmosisProvider::with_base_url(
            &endpoints.osmosis_base_url,
            endpoints.http_timeout,
        )?),
    };
    Ok(provider)
}

/// HTTP client shared by REST providers.
///
/// Redirects are not followed: a redirect from a pricing API is surfaced to
/// the caller as an unexpected status.
pub(crate) fn new_http_client(timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::none())
        .build()?;
    Ok(client)
}

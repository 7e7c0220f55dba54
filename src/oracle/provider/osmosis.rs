//! Osmosis REST provider
//!
//! Stateless: every call fetches a fresh snapshot from the Imperator API.
//! REF: https://api-osmosis.imperator.co/swagger/

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use super::{new_http_client, Provider, ProviderName, DEFAULT_TIMEOUT};
use crate::error::ProviderError;
use crate::types::{CandlePrice, CurrencyPair, TickerPrice};

pub const OSMOSIS_BASE_URL: &str = "https://api-osmosis.imperator.co";
const OSMOSIS_TOKEN_ENDPOINT: &str = "/tokens/v1";
const OSMOSIS_CANDLE_ENDPOINT: &str = "/tokens/v2/historical";

/// One entry of `GET /tokens/v1/all`. Numbers keep their raw JSON text.
#[derive(Debug, Clone, Deserialize)]
pub struct OsmosisToken {
    pub price: serde_json::Number,
    pub symbol: String,
    #[serde(rename = "volume_24h")]
    pub volume: serde_json::Number,
}

/// One entry of `GET /tokens/v2/historical/{symbol}/chart`
#[derive(Debug, Clone, Deserialize)]
pub struct OsmosisCandle {
    /// Epoch seconds
    pub time: i64,
    pub close: serde_json::Number,
    pub volume: serde_json::Number,
}

#[derive(Debug, Clone)]
pub struct OsmosisProvider {
    base_url: String,
    client: reqwest::Client,
}

impl OsmosisProvider {
    pub fn new() -> Result<Self, ProviderError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, ProviderError> {
        Self::with_base_url(OSMOSIS_BASE_URL, timeout)
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self, ProviderError> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: new_http_client(timeout)?,
        })
    }

    async fn fetch<T: DeserializeOwned>(&self, url: &str) -> Result<T, ProviderError> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::UnexpectedStatus {
                provider: ProviderName::Osmosis,
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl Provider for OsmosisProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Osmosis
    }

    async fn get_ticker_prices(
        &self,
        pairs: &[CurrencyPair],
    ) -> Result<HashMap<String, TickerPrice>, ProviderError> {
        let url = format!("{}{}/all", self.base_url, OSMOSIS_TOKEN_ENDPOINT);
        let tokens: Vec<OsmosisToken> = self.fetch(&url).await?;

        tracing::debug!(
            provider = %ProviderName::Osmosis,
            tokens = tokens.len(),
            "Fetched token snapshot"
        );

        ticker_prices_from_snapshot(&tokens, pairs)
    }

    async fn get_candle_prices(
        &self,
        pairs: &[CurrencyPair],
    ) -> Result<HashMap<String, Vec<CandlePrice>>, ProviderError> {
        let mut candles = HashMap::with_capacity(pairs.len());

        // No multi-symbol endpoint upstream: one request per pair.
        for pair in pairs {
            let url = format!(
                "{}{}/{}/chart?tf=5",
                self.base_url, OSMOSIS_CANDLE_ENDPOINT, pair.base
            );
            let response: Vec<OsmosisCandle> = self.fetch(&url).await?;
            candles.insert(pair.to_string(), candle_prices_from_response(pair, &response)?);
        }

        Ok(candles)
    }

    async fn subscribe_currency_pairs(&self, _pairs: &[CurrencyPair]) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Filter a full token snapshot down to the requested pairs.
///
/// Tokens are matched on base symbol. A symbol appearing twice fails the
/// call, and so does any requested pair absent from the snapshot.
pub fn ticker_prices_from_snapshot(
    tokens: &[OsmosisToken],
    pairs: &[CurrencyPair],
) -> Result<HashMap<String, TickerPrice>, ProviderError> {
    let base_idx: HashMap<String, &CurrencyPair> = pairs
        .iter()
        .map(|cp| (cp.base.to_uppercase(), cp))
        .collect();

    let mut ticker_prices = HashMap::with_capacity(pairs.len());
    for token in tokens {
        let symbol = token.symbol.to_uppercase();

        let Some(pair) = base_idx.get(&symbol) else {
            continue;
        };

        let key = pair.to_string();
        if ticker_prices.contains_key(&key) {
            return Err(ProviderError::DuplicateToken {
                provider: ProviderName::Osmosis,
                symbol,
            });
        }

        let ticker = TickerPrice::new(
            ProviderName::Osmosis,
            &symbol,
            &token.price.to_string(),
            &token.volume.to_string(),
        )?;
        ticker_prices.insert(key, ticker);
    }

    for pair in pairs {
        let key = pair.to_string();
        if !ticker_prices.contains_key(&key) {
            return Err(ProviderError::MissingExchangeRate(key));
        }
    }

    Ok(ticker_prices)
}

/// Map chart entries to candles, oldest first, converting epoch seconds to
/// milliseconds.
pub fn candle_prices_from_response(
    pair: &CurrencyPair,
    response: &[OsmosisCandle],
) -> Result<Vec<CandlePrice>, ProviderError> {
    let symbol = pair.to_string();
    let mut candles = response
        .iter()
        .map(|candle| {
            CandlePrice::new(
                ProviderName::Osmosis,
                &symbol,
                &candle.close.to_string(),
                &candle.volume.to_string(),
                candle.time.saturating_mul(1000),
            )
        })
        .collect::<Result<Vec<_>, _>>()?;
    candles.sort_by_key(|c| c.time_stamp);
    Ok(candles)
}

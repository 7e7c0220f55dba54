//! Provider registry - fans price requests out to every configured provider
//!
//! Each provider is queried for its own subset of pairs. A provider that
//! errors or times out is logged and left out of the aggregate; the others
//! still contribute.

use futures_util::future::join_all;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ProviderError;
use crate::oracle::provider::{new_provider, Provider, ProviderEndpoints, ProviderName};
use crate::types::{AggregatedProviderCandles, AggregatedProviderPrices, CurrencyPair};

struct Entry {
    provider: Arc<dyn Provider>,
    pairs: Vec<CurrencyPair>,
}

pub struct ProviderRegistry {
    entries: HashMap<ProviderName, Entry>,
    timeout: Duration,
}

impl ProviderRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            timeout,
        }
    }

    /// Construct and subscribe one provider per entry of `provider_pairs`.
    pub async fn connect(
        provider_pairs: &HashMap<ProviderName, Vec<CurrencyPair>>,
        endpoints: &ProviderEndpoints,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let mut registry = Self::new(timeout);
        for (name, pairs) in provider_pairs {
            let provider = new_provider(*name, endpoints, pairs).await?;
            tracing::info!(provider = %name, pairs = pairs.len(), "Provider ready");
            registry.insert(provider, pairs.clone());
        }
        Ok(registry)
    }

    pub fn insert(&mut self, provider: Arc<dyn Provider>, pairs: Vec<CurrencyPair>) {
        self.entries.insert(provider.name(), Entry { provider, pairs });
    }

    pub fn providers(&self) -> impl Iterator<Item = ProviderName> + '_ {
        self.entries.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Latest tickers from every provider that answered in time.
    pub async fn get_ticker_prices(&self) -> AggregatedProviderPrices {
        self.fan_out(|entry| async move {
            entry.provider.get_ticker_prices(&entry.pairs).await
        })
        .await
    }

    /// Recent candles from every provider that answered in time.
    pub async fn get_candle_prices(&self) -> AggregatedProviderCandles {
        self.fan_out(|entry| async move {
            entry.provider.get_candle_prices(&entry.pairs).await
        })
        .await
    }

    pub async fn shutdown(&self) {
        join_all(self.entries.values().map(|e| e.provider.shutdown())).await;
    }

    async fn fan_out<'a, T, F, Fut>(&'a self, call: F) -> HashMap<ProviderName, T>
    where
        F: Fn(&'a Entry) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>> + 'a,
    {
        let calls = self.entries.iter().map(|(name, entry)| {
            let fut = call(entry);
            async move { (*name, tokio::time::timeout(self.timeout, fut).await) }
        });

        let mut aggregated = HashMap::with_capacity(self.entries.len());
        for (name, result) in join_all(calls).await {
            match result {
                Ok(Ok(value)) => {
                    aggregated.insert(name, value);
                }
                Ok(Err(e)) => {
                    tracing::warn!(provider = %name, error = %e, "Failed to get prices from provider");
                }
                Err(_) => {
                    tracing::warn!(
                        provider = %name,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Provider timed out"
                    );
                }
            }
        }
        aggregated
    }
}

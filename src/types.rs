//! Core types used throughout the price feeder
//!
//! Defines currency pairs and the normalized ticker/candle prices every
//! provider produces.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ProviderError;
use crate::oracle::provider::ProviderName;

/// A base/quote symbol combination identifying an exchange rate.
///
/// Symbols are stored uppercased. The `Display` form (`ATOMUSDT`) is the key
/// used by every provider cache and result map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrencyPair {
    pub base: String,
    pub quote: String,
}

impl CurrencyPair {
    /// Build a validated pair. Base and quote must be non-empty and distinct.
    pub fn new(base: &str, quote: &str) -> Result<Self, ProviderError> {
        let pair = Self {
            base: base.trim().to_uppercase(),
            quote: quote.trim().to_uppercase(),
        };
        pair.validate()?;
        Ok(pair)
    }

    /// Check the invariants of a pair that was built without `new`.
    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.base.is_empty() || self.quote.is_empty() {
            return Err(ProviderError::InvalidPair(format!(
                "empty symbol in {}/{}",
                self.base, self.quote
            )));
        }
        if self.base.eq_ignore_ascii_case(&self.quote) {
            return Err(ProviderError::InvalidPair(format!(
                "base and quote are both {}",
                self.base
            )));
        }
        Ok(())
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.base, self.quote)
    }
}

/// Latest price and 24h volume for a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickerPrice {
    /// Last trade price
    pub price: Decimal,
    /// 24h volume
    pub volume: Decimal,
}

impl TickerPrice {
    /// Parse raw exchange strings into a ticker. Either field failing to parse
    /// fails the whole ticker.
    pub fn new(
        provider: ProviderName,
        symbol: &str,
        price: &str,
        volume: &str,
    ) -> Result<Self, ProviderError> {
        let price = parse_decimal(price).ok_or_else(|| ProviderError::InvalidPrice {
            provider,
            value: price.to_string(),
            symbol: symbol.to_string(),
        })?;
        let volume = parse_decimal(volume).ok_or_else(|| ProviderError::InvalidVolume {
            provider,
            value: volume.to_string(),
            symbol: symbol.to_string(),
        })?;

        Ok(Self { price, volume })
    }
}

/// Price, volume and time of a single candle (or trade used as one).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandlePrice {
    /// Close / trade price
    pub price: Decimal,
    /// Volume over the candle
    pub volume: Decimal,
    /// Epoch milliseconds
    pub time_stamp: i64,
}

impl CandlePrice {
    pub fn new(
        provider: ProviderName,
        symbol: &str,
        price: &str,
        volume: &str,
        time_stamp: i64,
    ) -> Result<Self, ProviderError> {
        let ticker = TickerPrice::new(provider, symbol, price, volume)?;
        Ok(Self {
            price: ticker.price,
            volume: ticker.volume,
            time_stamp,
        })
    }
}

/// provider -> pair -> ticker
pub type AggregatedProviderPrices = HashMap<ProviderName, HashMap<String, TickerPrice>>;

/// provider -> pair -> candles
pub type AggregatedProviderCandles = HashMap<ProviderName, HashMap<String, Vec<CandlePrice>>>;

/// Parse a numeric string straight into a decimal.
///
/// Accepts scientific notation too, since JSON floats re-rendered by
/// serde_json come out as `1e-7` for small values.
pub fn parse_decimal(raw: &str) -> Option<Decimal> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .ok()
}

/// Epoch milliseconds of `now - ago`.
pub fn past_unix_time(ago: Duration) -> i64 {
    let ago = chrono::Duration::from_std(ago).unwrap_or_else(|_| chrono::Duration::zero());
    (chrono::Utc::now() - ago).timestamp_millis()
}

//! Typed errors for providers and the broadcast client.
//!
//! Every variant carries the identifier needed to diagnose the fault
//! (pair, symbol, offending string, height) without reproducing it.

use thiserror::Error;

use crate::oracle::provider::ProviderName;

/// Errors returned by [`Provider`](crate::oracle::provider::Provider) calls.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("invalid currency pair: {0}")]
    InvalidPair(String),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("missing exchange rate for {0}")]
    MissingExchangeRate(String),

    #[error("duplicate token found in {provider} response: {symbol}")]
    DuplicateToken {
        provider: ProviderName,
        symbol: String,
    },

    #[error("failed to parse {provider} price ({value}) for {symbol}")]
    InvalidPrice {
        provider: ProviderName,
        value: String,
        symbol: String,
    },

    #[error("failed to parse {provider} volume ({value}) for {symbol}")]
    InvalidVolume {
        provider: ProviderName,
        value: String,
        symbol: String,
    },

    #[error("{provider} returned unexpected status {status} for {url}")]
    UnexpectedStatus {
        provider: ProviderName,
        status: u16,
        url: String,
    },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("{0} connection is closed")]
    NotConnected(ProviderName),
}

/// Errors returned by [`OracleClient::broadcast_tx`](crate::oracle::client::OracleClient::broadcast_tx).
#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("invalid oracle client config: {0}")]
    Config(String),

    /// Height query failed; the loop is aborted rather than retried.
    #[error("failed to query chain height: {0}")]
    ChainHeight(#[source] anyhow::Error),

    #[error("broadcasting tx timed out (max height {max_height})")]
    Timeout { max_height: i64 },
}

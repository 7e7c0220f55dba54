//! Oracle module - exchange price providers and vote broadcasting
//!
//! Providers collect tickers and candles from exchanges, the registry fans
//! requests out across them, and the client submits the resulting votes to
//! the chain before a block-height deadline.

pub mod client;
pub mod provider;
pub mod registry;

pub use client::{OracleClient, OracleClientConfig, TendermintRpc};
pub use provider::{new_provider, Provider, ProviderEndpoints, ProviderName};
pub use registry::ProviderRegistry;

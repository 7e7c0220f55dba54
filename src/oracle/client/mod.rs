//! Oracle client - submits price votes to the chain
//!
//! Votes are only valid for a short window of blocks, so broadcasting retries
//! once per new block until the transaction is accepted or the window closes.
//! Signing and the node RPC are consumed through the [`TxSigner`] and
//! [`ChainRpc`] seams.

mod tendermint;

pub use tendermint::TendermintRpc;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::BroadcastError;
use crate::metrics;

/// Opaque message carried by the vote transaction, owned by the on-chain
/// oracle module (protobuf `Any`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxMessage {
    pub type_url: String,
    pub value: Vec<u8>,
}

/// Node response to a submitted transaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxResponse {
    pub height: i64,
    pub tx_hash: String,
    /// Application result code, 0 on success
    pub code: u32,
    pub raw_log: String,
}

/// Everything a signer needs to build the transaction around the messages
#[derive(Debug, Clone, PartialEq)]
pub struct TxFactory {
    pub chain_id: String,
    pub from_address: String,
    pub gas_adjustment: f64,
    pub gas_prices: String,
}

/// Chain-facing RPC: height queries and raw transaction submission
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn latest_height(&self) -> anyhow::Result<i64>;

    async fn broadcast_tx(&self, tx_bytes: Vec<u8>) -> anyhow::Result<TxResponse>;
}

/// Keyring-backed signing, treated as an opaque capability
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TxSigner: Send + Sync {
    async fn sign(&self, factory: &TxFactory, msgs: &[TxMessage]) -> anyhow::Result<Vec<u8>>;
}

#[derive(Debug, Clone)]
pub struct OracleClientConfig {
    pub chain_id: String,
    /// Account that signs and pays for votes
    pub oracle_addr: String,
    /// Validator the oracle account feeds for
    pub validator_addr: String,
    pub gas_adjustment: f64,
    pub gas_prices: String,
}

impl OracleClientConfig {
    /// Chain id and both addresses must be set before votes can be signed.
    pub fn validate(&self) -> Result<(), BroadcastError> {
        if self.chain_id.trim().is_empty() {
            return Err(BroadcastError::Config("chain id is empty".to_string()));
        }
        if self.oracle_addr.trim().is_empty() {
            return Err(BroadcastError::Config("oracle address is empty".to_string()));
        }
        if self.validator_addr.trim().is_empty() {
            return Err(BroadcastError::Config("validator address is empty".to_string()));
        }
        Ok(())
    }
}

pub struct OracleClient {
    config: OracleClientConfig,
    rpc: Arc<dyn ChainRpc>,
    signer: Arc<dyn TxSigner>,
}

impl OracleClient {
    pub fn new(
        config: OracleClientConfig,
        rpc: Arc<dyn ChainRpc>,
        signer: Arc<dyn TxSigner>,
    ) -> Result<Self, BroadcastError> {
        config.validate()?;

        Ok(Self {
            config,
            rpc,
            signer,
        })
    }

    pub fn oracle_addr(&self) -> &str {
        &self.config.oracle_addr
    }

    pub fn validator_addr(&self) -> &str {
        &self.config.validator_addr
    }

    pub fn create_tx_factory(&self) -> TxFactory {
        TxFactory {
            chain_id: self.config.chain_id.clone(),
            from_address: self.config.oracle_addr.clone(),
            gas_adjustment: self.config.gas_adjustment,
            gas_prices: self.config.gas_prices.clone(),
        }
    }

    /// Broadcast `msgs`, retrying once per new block until the chain accepts
    /// the transaction or `next_block_height + timeout_height` is reached.
    ///
    /// A failed height query aborts immediately. Rejections and submission
    /// errors are retried on the next block.
    pub async fn broadcast_tx(
        &self,
        next_block_height: i64,
        timeout_height: i64,
        msgs: &[TxMessage],
    ) -> Result<TxResponse, BroadcastError> {
        let max_block_height = next_block_height + timeout_height;
        let mut last_check_height = next_block_height - 1;
        let factory = self.create_tx_factory();

        while last_check_height < max_block_height {
            let latest_block_height = self
                .rpc
                .latest_height()
                .await
                .map_err(BroadcastError::ChainHeight)?;

            // The height query paces this loop.
            if latest_block_height <= last_check_height {
                continue;
            }
            last_check_height = latest_block_height;

            match self.sign_and_broadcast(&factory, msgs).await {
                Ok(resp) if resp.code == 0 => {
                    tracing::info!(
                        tx_code = resp.code,
                        tx_hash = %resp.tx_hash,
                        tx_height = resp.height,
                        "Successfully broadcasted tx"
                    );
                    return Ok(resp);
                }
                Ok(resp) => {
                    metrics::record_tx_failure(metrics::TX_FAILURE_CODE);
                    tracing::debug!(
                        max_height = max_block_height,
                        last_check_height,
                        tx_hash = %resp.tx_hash,
                        tx_code = resp.code,
                        raw_log = %resp.raw_log,
                        "Invalid response code from tx; retrying..."
                    );
                }
                Err(e) => {
                    metrics::record_tx_failure(metrics::TX_FAILURE_SUBMIT);
                    tracing::debug!(
                        max_height = max_block_height,
                        last_check_height,
                        error = %e,
                        "Failed to broadcast tx; retrying..."
                    );
                }
            }
        }

        metrics::record_tx_failure(metrics::TX_FAILURE_TIMEOUT);
        Err(BroadcastError::Timeout {
            max_height: max_block_height,
        })
    }

    async fn sign_and_broadcast(
        &self,
        factory: &TxFactory,
        msgs: &[TxMessage],
    ) -> anyhow::Result<TxResponse> {
        let tx_bytes = self.signer.sign(factory, msgs).await?;
        self.rpc.broadcast_tx(tx_bytes).await
    }
}

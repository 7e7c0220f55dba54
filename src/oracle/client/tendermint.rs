//! Tendermint JSON-RPC over HTTP
//!
//! Only the two calls the oracle client needs: `/status` for the latest
//! block height and `broadcast_tx_sync` for submission.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::{ChainRpc, TxResponse};

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResult {
    sync_info: SyncInfo,
}

#[derive(Debug, Deserialize)]
struct SyncInfo {
    latest_block_height: String,
}

#[derive(Debug, Deserialize)]
struct BroadcastResult {
    #[serde(default)]
    code: u32,
    #[serde(default)]
    log: String,
    hash: String,
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: BroadcastParams<'a>,
}

#[derive(Debug, Serialize)]
struct BroadcastParams<'a> {
    tx: &'a str,
}

/// HTTP client for a Tendermint node RPC endpoint
pub struct TendermintRpc {
    endpoint: String,
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl TendermintRpc {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create RPC HTTP client")?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
            next_id: AtomicU64::new(1),
        })
    }
}

#[async_trait]
impl ChainRpc for TendermintRpc {
    async fn latest_height(&self) -> Result<i64> {
        let url = format!("{}/status", self.endpoint);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to query node status")?;

        if !response.status().is_success() {
            bail!("Node status returned error: {}", response.status());
        }

        let body = response.text().await.context("Failed to read node status")?;
        parse_status(&body)
    }

    async fn broadcast_tx(&self, tx_bytes: Vec<u8>) -> Result<TxResponse> {
        let tx = general_purpose::STANDARD.encode(tx_bytes);
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method: "broadcast_tx_sync",
            params: BroadcastParams { tx: &tx },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .context("Failed to submit tx")?;

        if !response.status().is_success() {
            bail!("Node broadcast returned error: {}", response.status());
        }

        let body = response.text().await.context("Failed to read broadcast response")?;
        parse_broadcast(&body)
    }
}

fn into_result<T>(response: RpcResponse<T>) -> Result<T> {
    if let Some(err) = response.error {
        bail!(
            "rpc error {}: {} {}",
            err.code,
            err.message,
            err.data.unwrap_or_default()
        );
    }
    response.result.ok_or_else(|| anyhow!("rpc response has no result"))
}

fn parse_status(body: &str) -> Result<i64> {
    let response: RpcResponse<StatusResult> =
        serde_json::from_str(body).context("Failed to parse node status")?;
    let status = into_result(response)?;
    status
        .sync_info
        .latest_block_height
        .parse::<i64>()
        .with_context(|| {
            format!(
                "Invalid latest_block_height {}",
                status.sync_info.latest_block_height
            )
        })
}

/// Sync broadcasts return before inclusion, so the height is unknown (0).
fn parse_broadcast(body: &str) -> Result<TxResponse> {
    let response: RpcResponse<BroadcastResult> =
        serde_json::from_str(body).context("Failed to parse broadcast response")?;
    let result = into_result(response)?;
    Ok(TxResponse {
        height: 0,
        tx_hash: result.hash,
        code: result.code,
        raw_log: result.log,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_latest_height_from_status() {
        let body = r#"{"jsonrpc":"2.0","id":-1,"result":{"node_info":{},"sync_info":{"latest_block_hash":"AB","latest_block_height":"1234","catching_up":false}}}"#;
        assert_eq!(parse_status(body).unwrap(), 1234);
    }

    #[test]
    fn rejects_non_numeric_height() {
        let body = r#"{"result":{"sync_info":{"latest_block_height":"tall"}}}"#;
        let err = parse_status(body).unwrap_err();
        assert!(err.to_string().contains("tall"));
    }

    #[test]
    fn parses_broadcast_result_code_and_hash() {
        let body = r#"{"jsonrpc":"2.0","id":1,"result":{"code":13,"data":"","log":"insufficient fee","codespace":"sdk","hash":"9F86D081"}}"#;
        let resp = parse_broadcast(body).unwrap();
        assert_eq!(resp.code, 13);
        assert_eq!(resp.tx_hash, "9F86D081");
        assert_eq!(resp.raw_log, "insufficient fee");
    }

    #[test]
    fn rpc_error_object_becomes_error() {
        let body = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32603,"message":"Internal error","data":"tx already exists in cache"}}"#;
        let err = parse_broadcast(body).unwrap_err();
        assert!(err.to_string().contains("tx already exists in cache"));
    }

    #[test]
    fn broadcast_request_encodes_tx_as_base64() {
        let tx = general_purpose::STANDARD.encode([0xde, 0xad, 0xbe, 0xef]);
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: 7,
            method: "broadcast_tx_sync",
            params: BroadcastParams { tx: &tx },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["params"]["tx"], "3q2+7w==");
        assert_eq!(json["method"], "broadcast_tx_sync");
    }
}

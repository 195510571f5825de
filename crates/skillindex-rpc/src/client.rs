//! HTTP JSON-RPC chain client backed by `reqwest`.
//!
//! Transient transport failures (connect errors, timeouts, 5xx, 429) are
//! retried with jittered exponential backoff before surfacing
//! `ChainUnavailable`. Malformed responses and node-side error objects are
//! `ChainProtocol` and are never retried.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use skillindex_core::{ChainClient, IndexerError, RawLog, RetryConfig, RetryPolicy};

use crate::request::{JsonRpcRequest, JsonRpcResponse};

/// Configuration for [`HttpChainClient`].
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub retry: RetryConfig,
    pub request_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::rpc(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Outcome of a single request attempt, before retry classification.
enum CallError {
    /// Worth retrying: the node or the network hiccuped.
    Transient(String),
    /// Not worth retrying: we did not understand each other.
    Protocol(String),
}

/// JSON-RPC chain client with built-in retry.
pub struct HttpChainClient {
    url: String,
    http: reqwest::Client,
    retry: RetryPolicy,
    next_id: AtomicU64,
}

impl HttpChainClient {
    pub fn new(url: impl Into<String>, config: HttpClientConfig) -> Result<Self, IndexerError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| IndexerError::ChainProtocol(format!("failed to build http client: {e}")))?;
        Ok(Self {
            url: url.into(),
            http,
            retry: RetryPolicy::new(config.retry),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn default_for(url: impl Into<String>) -> Result<Self, IndexerError> {
        Self::new(url, HttpClientConfig::default())
    }

    async fn send_once(&self, req: &JsonRpcRequest) -> Result<Value, CallError> {
        let resp = self
            .http
            .post(&self.url)
            .json(req)
            .send()
            .await
            .map_err(|e| CallError::Transient(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let detail = format!("HTTP {}: {body}", status.as_u16());
            return if transient_status(status.as_u16()) {
                Err(CallError::Transient(detail))
            } else {
                Err(CallError::Protocol(detail))
            };
        }

        let parsed: JsonRpcResponse = resp
            .json()
            .await
            .map_err(|e| CallError::Protocol(format!("malformed response: {e}")))?;

        parsed
            .into_result()
            .map_err(|e| CallError::Protocol(e.to_string()))
    }

    /// Issue `method` with retry on transient failures.
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, IndexerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.send_once(&req).await {
                Ok(value) => return Ok(value),
                Err(CallError::Protocol(reason)) => {
                    return Err(IndexerError::ChainProtocol(format!("{method}: {reason}")));
                }
                Err(CallError::Transient(reason)) => match self.retry.next_delay(attempt) {
                    Some(delay) => {
                        tracing::warn!(
                            method,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %reason,
                            url = %self.url,
                            "retrying rpc request"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::error!(
                            method,
                            attempt,
                            error = %reason,
                            url = %self.url,
                            "rpc retry budget exhausted"
                        );
                        return Err(IndexerError::ChainUnavailable {
                            reason: format!("{method} after {attempt} attempts: {reason}"),
                        });
                    }
                },
            }
        }
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    async fn current_height(&self) -> Result<u64, IndexerError> {
        let value = self.call("eth_blockNumber", vec![]).await?;
        hex_quantity(&value)
    }

    async fn get_logs(
        &self,
        addresses: &[String],
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLog>, IndexerError> {
        let filter = json!({
            "address": addresses,
            "fromBlock": format!("0x{from:x}"),
            "toBlock": format!("0x{to:x}"),
        });
        let value = self.call("eth_getLogs", vec![filter]).await?;
        serde_json::from_value(value)
            .map_err(|e| IndexerError::ChainProtocol(format!("eth_getLogs: {e}")))
    }

    async fn block_hash_at(&self, number: u64) -> Result<Option<String>, IndexerError> {
        let value = self
            .call(
                "eth_getBlockByNumber",
                vec![json!(format!("0x{number:x}")), json!(false)],
            )
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        value["hash"]
            .as_str()
            .map(|h| Some(h.to_string()))
            .ok_or_else(|| {
                IndexerError::ChainProtocol("eth_getBlockByNumber: block without hash".into())
            })
    }
}

/// 5xx and 429 are worth retrying; other failure statuses are not.
fn transient_status(code: u16) -> bool {
    code >= 500 || code == 429
}

/// Decode a `"0x…"` hex quantity result.
fn hex_quantity(value: &Value) -> Result<u64, IndexerError> {
    let s = value
        .as_str()
        .ok_or_else(|| IndexerError::ChainProtocol(format!("expected hex string, got {value}")))?;
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| IndexerError::ChainProtocol(format!("bad hex quantity {s}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(transient_status(500));
        assert!(transient_status(503));
        assert!(transient_status(429));
        assert!(!transient_status(400));
        assert!(!transient_status(404));
    }

    #[test]
    fn hex_quantity_parsing() {
        assert_eq!(hex_quantity(&json!("0x64")).unwrap(), 100);
        assert!(hex_quantity(&json!(100)).is_err());
        assert!(hex_quantity(&json!("zz")).is_err());
    }

    #[test]
    fn log_filter_shape() {
        // The filter object must carry hex-encoded bounds.
        let filter = json!({
            "address": ["0xaa"],
            "fromBlock": format!("0x{:x}", 95u64),
            "toBlock": format!("0x{:x}", 100u64),
        });
        assert_eq!(filter["fromBlock"], "0x5f");
        assert_eq!(filter["toBlock"], "0x64");
    }
}

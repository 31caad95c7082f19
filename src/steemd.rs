//! Upstream node client
//!
//! Reads chain state from a steemd node over its JSON-RPC HTTP interface.
//! Only the dynamic global properties are needed here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::SteemdConfig;
use crate::error::{Result, ServerError};

const DGP_METHOD: &str = "condenser_api.get_dynamic_global_properties";

#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Most recent block the upstream node considers final.
    async fn last_irreversible_block_num(&self) -> Result<i64>;
}

#[derive(Serialize)]
struct NodeRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Vec<Value>,
}

#[derive(Deserialize)]
struct NodeResponse {
    #[serde(default)]
    result: Option<DynamicGlobalProperties>,
    #[serde(default)]
    error: Option<NodeError>,
}

#[derive(Deserialize)]
struct NodeError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// Subset of `get_dynamic_global_properties` used by the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct DynamicGlobalProperties {
    pub head_block_number: i64,
    pub last_irreversible_block_num: i64,
}

/// HTTP client for a steemd node.
pub struct Steemd {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl Steemd {
    pub fn new(config: &SteemdConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServerError::UpstreamError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: config.url.clone(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn dynamic_global_properties(&self) -> Result<DynamicGlobalProperties> {
        let request = NodeRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method: DGP_METHOD,
            params: Vec::new(),
        };

        let response: NodeResponse = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match (response.result, response.error) {
            (_, Some(err)) => Err(ServerError::UpstreamError(format!(
                "{} failed ({}): {}",
                DGP_METHOD, err.code, err.message
            ))),
            (Some(props), None) => Ok(props),
            (None, None) => Err(ServerError::UpstreamError(format!(
                "{} returned neither result nor error",
                DGP_METHOD
            ))),
        }
    }
}

#[async_trait]
impl NodeClient for Steemd {
    async fn last_irreversible_block_num(&self) -> Result<i64> {
        let props = self.dynamic_global_properties().await?;
        debug!(
            head = props.head_block_number,
            irreversible = props.last_irreversible_block_num,
            "steemd global properties"
        );
        Ok(props.last_irreversible_block_num)
    }
}

/// Node client that reports a fixed height. Used by tests.
#[derive(Clone, Default)]
pub struct StaticNode {
    last_irreversible: Arc<AtomicI64>,
}

impl StaticNode {
    pub fn new(last_irreversible: i64) -> Self {
        Self {
            last_irreversible: Arc::new(AtomicI64::new(last_irreversible)),
        }
    }

    pub fn set_last_irreversible(&self, num: i64) {
        self.last_irreversible.store(num, Ordering::SeqCst);
    }
}

#[async_trait]
impl NodeClient for StaticNode {
    async fn last_irreversible_block_num(&self) -> Result<i64> {
        Ok(self.last_irreversible.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_with_error_object_decodes() {
        let body = r#"{"jsonrpc":"2.0","error":{"code":-32000,"message":"busy"},"id":1}"#;
        let response: NodeResponse = serde_json::from_str(body).unwrap();
        assert!(response.result.is_none());
        let err = response.error.unwrap();
        assert_eq!(err.code, -32000);
        assert_eq!(err.message, "busy");
    }

    #[test]
    fn global_properties_ignore_unknown_fields() {
        let body = r#"{"result":{"head_block_number":1020,"last_irreversible_block_num":1000,"time":"2017-05-01T00:00:00"},"id":1}"#;
        let response: NodeResponse = serde_json::from_str(body).unwrap();
        let props = response.result.unwrap();
        assert_eq!(props.head_block_number, 1020);
        assert_eq!(props.last_irreversible_block_num, 1000);
    }
}

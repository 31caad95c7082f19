//! Methods owned by the gateway itself.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{RpcError, RpcMethod, RpcRegistry};
use crate::api::AppState;
use crate::health::read_chain_head;
use crate::json;

pub const NAMESPACE: &str = "hive";

/// Result of `hive.db_head_state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbHeadState {
    #[serde(with = "json::safe_int")]
    pub last_db_block: i64,
    #[serde(with = "json::safe_int")]
    pub last_irreversible_block: i64,
    #[serde(with = "json::safe_int")]
    pub diff: i64,
    #[serde(with = "json::safe_int")]
    pub max_block_num_diff: i64,
    #[serde(with = "json::timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// Same figures as `GET /health`, reported without applying the threshold.
pub struct DbHeadStateMethod;

#[async_trait]
impl RpcMethod for DbHeadStateMethod {
    async fn call(&self, state: &AppState, params: Option<Value>) -> Result<Value, RpcError> {
        expect_no_params(&params)?;

        let head = read_chain_head(state).await?;
        let result = DbHeadState {
            last_db_block: head.last_db_block,
            last_irreversible_block: head.last_irreversible_block,
            diff: head.diff()?,
            max_block_num_diff: state.config.limits.max_block_num_diff,
            timestamp: Utc::now(),
        };

        Ok(serde_json::to_value(result)?)
    }
}

fn expect_no_params(params: &Option<Value>) -> Result<(), RpcError> {
    match params {
        None => Ok(()),
        Some(Value::Array(a)) if a.is_empty() => Ok(()),
        Some(Value::Object(o)) if o.is_empty() => Ok(()),
        Some(_) => Err(RpcError::invalid_params("method takes no parameters")),
    }
}

/// Registry served by the `hive-server` binary.
pub fn default_registry() -> RpcRegistry {
    let mut registry = RpcRegistry::new(NAMESPACE);
    registry.register("db_head_state", DbHeadStateMethod);
    registry
}

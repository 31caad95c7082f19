//! JSON-RPC 2.0 endpoint
//!
//! Requests arrive as a single object or a batch array on `POST /`. Methods
//! live in an [`RpcRegistry`] scoped by a namespace: `hive.db_head_state`
//! and the bare `db_head_state` resolve to the same method. Requests without
//! an `id` are notifications and get no response entry.

pub mod methods;

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::api::AppState;
use crate::error::ServerError;

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// Error object of a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{message} ({code})")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn parse_error(detail: impl Into<String>) -> Self {
        Self::new(PARSE_ERROR, "Parse error").with_data(Value::String(detail.into()))
    }

    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Self::new(INVALID_REQUEST, "Invalid Request").with_data(Value::String(detail.into()))
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, "Method not found").with_data(Value::String(method.to_string()))
    }

    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, "Invalid params").with_data(Value::String(detail.into()))
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, "Internal error").with_data(Value::String(detail.into()))
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl From<ServerError> for RpcError {
    fn from(err: ServerError) -> Self {
        RpcError::internal(err.to_string())
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::internal(err.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    /// An explicit `null` is `Some(Value::Null)` and fails validation.
    #[serde(default, deserialize_with = "present")]
    pub params: Option<Value>,
    /// `None` when the member is absent (a notification); an explicit
    /// `null` id is `Some(Value::Null)`.
    #[serde(default, deserialize_with = "present")]
    pub id: Option<Value>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl RpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    fn validate(&self) -> Result<(), RpcError> {
        if self.jsonrpc != JSONRPC_VERSION {
            return Err(RpcError::invalid_request(format!(
                "jsonrpc must be \"{}\"",
                JSONRPC_VERSION
            )));
        }
        if let Some(id) = &self.id {
            if !valid_id(id) {
                return Err(RpcError::invalid_request("id must be a string, number or null"));
            }
        }
        match &self.params {
            None | Some(Value::Array(_)) | Some(Value::Object(_)) => Ok(()),
            Some(_) => Err(RpcError::invalid_request("params must be an array or object")),
        }
    }
}

fn valid_id(id: &Value) -> bool {
    matches!(id, Value::Null | Value::String(_) | Value::Number(_))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RpcOutcome {
    #[serde(rename = "result")]
    Result(Value),
    #[serde(rename = "error")]
    Error(RpcError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(flatten)]
    pub outcome: RpcOutcome,
    pub id: Value,
}

impl RpcResponse {
    pub fn new(id: Value, res: Result<Value, RpcError>) -> Self {
        let outcome = match res {
            Ok(result) => RpcOutcome::Result(result),
            Err(error) => RpcOutcome::Error(error),
        };
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            outcome,
            id,
        }
    }

    pub fn error(id: Value, error: RpcError) -> Self {
        Self::new(id, Err(error))
    }
}

/// A callable JSON-RPC method.
#[async_trait]
pub trait RpcMethod: Send + Sync {
    async fn call(&self, state: &AppState, params: Option<Value>) -> Result<Value, RpcError>;
}

/// Methods reachable through the endpoint, keyed by their un-prefixed name.
pub struct RpcRegistry {
    namespace: String,
    methods: BTreeMap<String, Arc<dyn RpcMethod>>,
}

impl RpcRegistry {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            methods: BTreeMap::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Register `method` as `<namespace>.<name>`. Re-registering a name
    /// replaces the earlier method.
    pub fn register<M>(&mut self, name: impl Into<String>, method: M)
    where
        M: RpcMethod + 'static,
    {
        let name = name.into();
        if self.methods.insert(name.clone(), Arc::new(method)).is_some() {
            warn!(namespace = %self.namespace, method = %name, "replacing registered JSON-RPC method");
        }
    }

    /// Fully qualified names of every registered method.
    pub fn method_names(&self) -> Vec<String> {
        self.methods
            .keys()
            .map(|name| format!("{}.{}", self.namespace, name))
            .collect()
    }

    pub fn resolve(&self, method: &str) -> Option<Arc<dyn RpcMethod>> {
        let name = match method.split_once('.') {
            Some((ns, name)) if ns == self.namespace => name,
            Some(_) => return None,
            None => method,
        };
        self.methods.get(name).cloned()
    }
}

/// Dispatch a raw request body. Returns `None` when nothing should be sent
/// back (only notifications were received).
pub async fn dispatch(state: &AppState, body: &[u8]) -> Option<Value> {
    let parsed: Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => {
            return to_value(RpcResponse::error(Value::Null, RpcError::parse_error(e.to_string())));
        }
    };

    match parsed {
        Value::Array(batch) if batch.is_empty() => to_value(RpcResponse::error(
            Value::Null,
            RpcError::invalid_request("empty batch"),
        )),
        Value::Array(batch) => {
            let mut responses = Vec::with_capacity(batch.len());
            for item in batch {
                if let Some(response) = handle_one(state, item).await {
                    responses.push(response);
                }
            }
            if responses.is_empty() {
                None
            } else {
                serde_json::to_value(responses).ok()
            }
        }
        single => handle_one(state, single).await.and_then(to_value),
    }
}

async fn handle_one(state: &AppState, raw: Value) -> Option<RpcResponse> {
    // Best-effort id so malformed requests can still be answered.
    let fallback_id = raw
        .get("id")
        .filter(|id| valid_id(id))
        .cloned()
        .unwrap_or(Value::Null);

    let request: RpcRequest = match serde_json::from_value(raw) {
        Ok(r) => r,
        Err(e) => return Some(RpcResponse::error(fallback_id, RpcError::invalid_request(e.to_string()))),
    };

    if let Err(e) = request.validate() {
        return Some(RpcResponse::error(fallback_id, e));
    }

    let result = match state.rpc.resolve(&request.method) {
        Some(method) => {
            debug!(method = %request.method, "jsonrpc.call");
            method.call(state, request.params).await
        }
        None => Err(RpcError::method_not_found(&request.method)),
    };

    if let Err(e) = &result {
        if e.code == INTERNAL_ERROR {
            warn!(method = %request.method, error = %e, "jsonrpc method failed");
        }
    }

    request.id.map(|id| RpcResponse::new(id, result))
}

fn to_value(response: RpcResponse) -> Option<Value> {
    serde_json::to_value(response).ok()
}

/// `POST /`
pub async fn handle_rpc(State(state): State<AppState>, body: Bytes) -> Response {
    match dispatch(&state, &body).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl RpcMethod for Echo {
        async fn call(&self, _state: &AppState, params: Option<Value>) -> Result<Value, RpcError> {
            Ok(params.unwrap_or(Value::Null))
        }
    }

    #[test]
    fn resolve_honours_namespace() {
        let mut registry = RpcRegistry::new("hive");
        registry.register("echo", Echo);

        assert!(registry.resolve("hive.echo").is_some());
        assert!(registry.resolve("echo").is_some());
        assert!(registry.resolve("condenser_api.echo").is_none());
        assert!(registry.resolve("hive.missing").is_none());
        assert_eq!(registry.method_names(), vec!["hive.echo".to_string()]);
    }

    #[test]
    fn absent_and_null_ids_differ() {
        let notification: RpcRequest =
            serde_json::from_value(json!({"jsonrpc": "2.0", "method": "x"})).unwrap();
        assert!(notification.is_notification());

        let null_id: RpcRequest =
            serde_json::from_value(json!({"jsonrpc": "2.0", "method": "x", "id": null})).unwrap();
        assert_eq!(null_id.id, Some(Value::Null));
    }

    #[test]
    fn validation_rejects_bad_envelopes() {
        let wrong_version: RpcRequest =
            serde_json::from_value(json!({"jsonrpc": "1.0", "method": "x", "id": 1})).unwrap();
        assert_eq!(wrong_version.validate().unwrap_err().code, INVALID_REQUEST);

        let scalar_params: RpcRequest =
            serde_json::from_value(json!({"jsonrpc": "2.0", "method": "x", "params": 3, "id": 1}))
                .unwrap();
        assert_eq!(scalar_params.validate().unwrap_err().code, INVALID_REQUEST);

        let null_params: RpcRequest = serde_json::from_value(
            json!({"jsonrpc": "2.0", "method": "x", "params": null, "id": 1}),
        )
        .unwrap();
        assert_eq!(null_params.params, Some(Value::Null));
        assert_eq!(null_params.validate().unwrap_err().code, INVALID_REQUEST);

        let object_id: RpcRequest =
            serde_json::from_value(json!({"jsonrpc": "2.0", "method": "x", "id": {}})).unwrap();
        assert_eq!(object_id.validate().unwrap_err().code, INVALID_REQUEST);
    }

    #[test]
    fn response_envelope_shape() {
        let ok = serde_json::to_value(RpcResponse::new(json!(7), Ok(Value::Null))).unwrap();
        assert_eq!(ok, json!({"jsonrpc": "2.0", "result": null, "id": 7}));

        let err = serde_json::to_value(RpcResponse::error(
            json!("a"),
            RpcError::new(METHOD_NOT_FOUND, "Method not found"),
        ))
        .unwrap();
        assert_eq!(
            err,
            json!({"jsonrpc": "2.0", "error": {"code": -32601, "message": "Method not found"}, "id": "a"})
        );
    }
}

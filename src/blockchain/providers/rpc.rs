// src/blockchain/providers/rpc.rs

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ethers::types::U256;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{send_json, HttpTransport, ProviderClient};
use crate::blockchain::models::{ChainTarget, ProviderError, ProviderKind};

#[derive(Debug, Serialize)]
pub struct RpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: &'a Value,
}

#[derive(Debug, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub id: Value,
    /// Missing and `null` both decode to `Value::Null` (e.g. a pending receipt).
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Option<ErrorObject>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// JSON-RPC 2.0 client for the chain's node. The endpoint is the method name.
#[derive(Debug, Clone)]
pub struct RpcClient {
    transport: HttpTransport,
    next_id: Arc<AtomicU64>,
}

impl RpcClient {
    pub fn new(transport: HttpTransport) -> Self {
        Self {
            transport,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl ProviderClient for RpcClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Rpc
    }

    async fn call(
        &self,
        chain: &ChainTarget,
        endpoint: &str,
        params: &Value,
    ) -> Result<Value, ProviderError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method: endpoint,
            params,
        };

        let body = send_json(self.transport.client().post(&chain.rpc_url).json(&request)).await?;
        let response: RpcResponse = serde_json::from_value(body)
            .map_err(|e| ProviderError::MalformedResponse(format!("not a JSON-RPC response: {}", e)))?;

        if let Some(error) = response.error {
            return Err(ProviderError::Rejected(error.message));
        }
        Ok(response.result)
    }
}

/// Decode a JSON-RPC hex quantity such as `"0x1b4"`.
pub fn parse_quantity(value: &Value) -> Result<U256, ProviderError> {
    let text = value
        .as_str()
        .ok_or_else(|| ProviderError::MalformedResponse(format!("expected hex quantity, got {}", value)))?;
    let digits = text
        .strip_prefix("0x")
        .ok_or_else(|| ProviderError::MalformedResponse(format!("quantity '{}' lacks 0x prefix", text)))?;
    if digits.is_empty() {
        return Ok(U256::zero());
    }
    U256::from_str_radix(digits, 16)
        .map_err(|_| ProviderError::MalformedResponse(format!("invalid hex quantity '{}'", text)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_quantities() {
        assert_eq!(parse_quantity(&json!("0x0")).unwrap(), U256::zero());
        assert_eq!(parse_quantity(&json!("0x1b4")).unwrap(), U256::from(436u64));
        assert_eq!(parse_quantity(&json!("0x")).unwrap(), U256::zero());
        assert!(parse_quantity(&json!("1b4")).is_err());
        assert!(parse_quantity(&json!(12)).is_err());
    }

    #[test]
    fn null_result_decodes_as_null() {
        let response: RpcResponse =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1, "result": null})).unwrap();
        assert!(response.result.is_null());
        assert!(response.error.is_none());
    }
}

// src/blockchain/providers/explorer.rs

use serde_json::Value;

use super::{query_pairs, send_json, HttpTransport, ProviderClient};
use crate::blockchain::models::{ChainTarget, ProviderError, ProviderKind};

/// Messages an explorer sends with `status = "0"` that only mean "empty".
const EMPTY_RESULT_MESSAGES: &[&str] = &["No transactions found", "No records found"];

/// Etherscan-style explorer client.
///
/// The endpoint is `module/action` (e.g. `account/tokentx`); the key travels
/// as the `apikey` query parameter. Returns the envelope's `result`.
#[derive(Debug, Clone)]
pub struct ExplorerClient {
    transport: HttpTransport,
}

impl ExplorerClient {
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }
}

impl ProviderClient for ExplorerClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Explorer
    }

    async fn call(
        &self,
        chain: &ChainTarget,
        endpoint: &str,
        params: &Value,
    ) -> Result<Value, ProviderError> {
        let api = chain
            .explorer
            .as_ref()
            .ok_or(ProviderError::NotConfigured(ProviderKind::Explorer))?;
        let (module, action) = endpoint.split_once('/').unwrap_or((endpoint, ""));

        let mut query = vec![
            ("module".to_string(), module.to_string()),
            ("action".to_string(), action.to_string()),
        ];
        query.extend(query_pairs(params));
        query.push(("apikey".to_string(), api.api_key.clone()));

        let body = send_json(self.transport.client().get(&api.base_url).query(&query)).await?;
        unwrap_envelope(body)
    }
}

/// Interpret the explorer's `{status, message, result}` envelope. Proxy calls
/// (`module=proxy`) answer with a JSON-RPC shaped body instead.
fn unwrap_envelope(mut body: Value) -> Result<Value, ProviderError> {
    if let Some(error) = body.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(ProviderError::Rejected(message));
    }

    if body.get("status").and_then(Value::as_str) == Some("0") {
        let message = body.get("message").and_then(Value::as_str).unwrap_or("NOTOK");
        if EMPTY_RESULT_MESSAGES.iter().any(|m| message.starts_with(m)) {
            return Ok(Value::Array(Vec::new()));
        }
        let detail = body.get("result").and_then(Value::as_str).unwrap_or_default();
        return Err(ProviderError::Rejected(if detail.is_empty() {
            message.to_string()
        } else {
            format!("{}: {}", message, detail)
        }));
    }

    body.get_mut("result")
        .map(Value::take)
        .ok_or_else(|| ProviderError::MalformedResponse("explorer response has no 'result'".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_history_is_an_empty_list() {
        let body = json!({"status": "0", "message": "No transactions found", "result": []});
        assert_eq!(unwrap_envelope(body).unwrap(), json!([]));
    }

    #[test]
    fn notok_is_rejected_with_upstream_text() {
        let body = json!({"status": "0", "message": "NOTOK", "result": "Invalid API Key"});
        assert_eq!(
            unwrap_envelope(body).unwrap_err(),
            ProviderError::Rejected("NOTOK: Invalid API Key".into())
        );
    }

    #[test]
    fn proxy_result_is_unwrapped() {
        let body = json!({"jsonrpc": "2.0", "id": 1, "result": "0x2a"});
        assert_eq!(unwrap_envelope(body).unwrap(), json!("0x2a"));
    }
}

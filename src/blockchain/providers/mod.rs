//! Upstream data providers.
//!
//! Every provider kind (node RPC, block explorer, indexer, NFT API) is reached
//! through the same [`ProviderClient`] contract: one attempt per call, a JSON
//! value back, or a [`ProviderError`]. Each implementation owns its own
//! authentication convention. Nothing here retries; fallback between providers
//! is the aggregator's business.

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde_json::Value;

use crate::blockchain::models::{ChainTarget, ProviderError, ProviderKind};

pub mod explorer;
pub mod indexer;
pub mod nft;
pub mod rpc;

pub use explorer::ExplorerClient;
pub use indexer::IndexerClient;
pub use nft::NftApiClient;
pub use rpc::RpcClient;

pub trait ProviderClient: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Perform one request against `chain`.
    ///
    /// `params` is a JSON array (positional JSON-RPC params) for the node and a
    /// flat JSON object of query parameters for the REST providers.
    fn call(
        &self,
        chain: &ChainTarget,
        endpoint: &str,
        params: &Value,
    ) -> impl Future<Output = Result<Value, ProviderError>> + Send;
}

/// Shared HTTP client carrying the per-call timeout.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok(Self { client })
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }
}

/// Send a request and decode the body as JSON, mapping failures onto [`ProviderError`].
pub(crate) async fn send_json(request: RequestBuilder) -> Result<Value, ProviderError> {
    let response = request.send().await.map_err(map_reqwest_error)?;
    let status = response.status();
    if !status.is_success() {
        return Err(ProviderError::HttpStatus(status.as_u16()));
    }
    let body = response.text().await.map_err(map_reqwest_error)?;
    serde_json::from_str(&body)
        .map_err(|e| ProviderError::MalformedResponse(format!("body is not JSON: {}", e)))
}

fn map_reqwest_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Transport(err.to_string())
    }
}

/// Flatten a JSON object of parameters into query pairs. Non-string scalars
/// use their JSON text; anything else is ignored.
pub(crate) fn query_pairs(params: &Value) -> Vec<(String, String)> {
    let Some(map) = params.as_object() else {
        return Vec::new();
    };
    map.iter()
        .filter_map(|(key, value)| {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return None,
            };
            Some((key.clone(), text))
        })
        .collect()
}

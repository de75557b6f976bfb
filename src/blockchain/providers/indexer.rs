// src/blockchain/providers/indexer.rs

use serde_json::Value;

use super::{query_pairs, send_json, HttpTransport, ProviderClient};
use crate::blockchain::models::{ChainTarget, ProviderError, ProviderKind};

const API_KEY_HEADER: &str = "X-API-Key";

/// Moralis-style indexer. The endpoint is a path (`/{address}/erc20`), the
/// chain identifier goes in the `chain` query parameter and the key in a header.
#[derive(Debug, Clone)]
pub struct IndexerClient {
    transport: HttpTransport,
}

impl IndexerClient {
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }
}

impl ProviderClient for IndexerClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Indexer
    }

    async fn call(
        &self,
        chain: &ChainTarget,
        endpoint: &str,
        params: &Value,
    ) -> Result<Value, ProviderError> {
        let api = chain
            .indexer
            .as_ref()
            .ok_or(ProviderError::NotConfigured(ProviderKind::Indexer))?;

        let url = format!("{}{}", api.base_url, endpoint);
        let mut query = query_pairs(params);
        query.push(("chain".to_string(), chain.id.clone()));

        send_json(
            self.transport
                .client()
                .get(&url)
                .header(API_KEY_HEADER, &api.api_key)
                .query(&query),
        )
        .await
    }
}

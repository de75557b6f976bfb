// src/blockchain/providers/nft.rs

use serde_json::Value;

use super::{query_pairs, send_json, HttpTransport, ProviderClient};
use crate::blockchain::models::{ChainTarget, ProviderError, ProviderKind};

/// Alchemy-style NFT API: the key is a path segment, `{base}/{key}/getNFTs?owner=...`.
#[derive(Debug, Clone)]
pub struct NftApiClient {
    transport: HttpTransport,
}

impl NftApiClient {
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }
}

impl ProviderClient for NftApiClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::NftApi
    }

    async fn call(
        &self,
        chain: &ChainTarget,
        endpoint: &str,
        params: &Value,
    ) -> Result<Value, ProviderError> {
        let api = chain
            .nft_api
            .as_ref()
            .ok_or(ProviderError::NotConfigured(ProviderKind::NftApi))?;

        let url = format!("{}/{}/{}", api.base_url, api.api_key, endpoint.trim_start_matches('/'));
        send_json(self.transport.client().get(&url).query(&query_pairs(params))).await
    }
}

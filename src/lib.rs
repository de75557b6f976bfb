// src/lib.rs

// Re-export commonly used types
pub use ethers::types::{Address, H256, U256};

pub mod api;
pub mod blockchain;
pub mod config;

use blockchain::cache::ResponseCache;
use blockchain::contract::SimpleStorage;
use blockchain::models::ProviderError;
use blockchain::providers::{ExplorerClient, HttpTransport, IndexerClient, NftApiClient, RpcClient};
use blockchain::services::{TransactionSubmitter, WalletAggregator};

/// Application state shared across all request handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: config::Config,
    /// Cached, multi-provider wallet views
    pub aggregator: WalletAggregator,
    /// Signs, broadcasts and confirms transactions
    pub submitter: TransactionSubmitter,
    pub rpc: RpcClient,
    pub explorer: ExplorerClient,
}

impl AppState {
    /// Wire every client from `config`. All clients share one HTTP connection pool.
    pub fn from_config(config: config::Config) -> Result<Self, ProviderError> {
        let transport = HttpTransport::new(config.provider_timeout)?;
        let rpc = RpcClient::new(transport.clone());
        let explorer = ExplorerClient::new(transport.clone());

        let aggregator = WalletAggregator::new(
            rpc.clone(),
            explorer.clone(),
            IndexerClient::new(transport.clone()),
            NftApiClient::new(transport),
            ResponseCache::new(config.cache_capacity),
            config.cache_ttl,
        );
        let submitter = TransactionSubmitter::new(rpc.clone(), config.confirmation_policy());

        Ok(Self {
            config,
            aggregator,
            submitter,
            rpc,
            explorer,
        })
    }

    /// Binding for the configured storage contract.
    pub fn storage(&self) -> SimpleStorage {
        SimpleStorage::new(self.config.storage_contract, self.rpc.clone(), self.explorer.clone())
    }
}

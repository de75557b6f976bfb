// src/blockchain/services/aggregator.rs

use std::collections::BTreeMap;
use std::time::Duration;

use ethers::types::Address;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::blockchain::cache::{CacheKey, ResponseCache};
use crate::blockchain::key_material::parse_address;
use crate::blockchain::models::{
    AggregationError, Approval, Balance, ChainTarget, Fact, FactFailure, NftAsset, NormalizeError,
    ProviderError, ProviderKind, TokenTransfer, WalletQueryError, WalletSummary,
};
use crate::blockchain::normalizer::{self, Normalized};
use crate::blockchain::providers::{ExplorerClient, IndexerClient, NftApiClient, ProviderClient, RpcClient};

/// Combines provider calls, caching and normalization into wallet views.
#[derive(Clone)]
pub struct WalletAggregator {
    rpc: RpcClient,
    explorer: ExplorerClient,
    indexer: IndexerClient,
    nft_api: NftApiClient,
    cache: ResponseCache,
    ttl: Duration,
}

impl WalletAggregator {
    pub fn new(
        rpc: RpcClient,
        explorer: ExplorerClient,
        indexer: IndexerClient,
        nft_api: NftApiClient,
        cache: ResponseCache,
        ttl: Duration,
    ) -> Self {
        Self {
            rpc,
            explorer,
            indexer,
            nft_api,
            cache,
            ttl,
        }
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Balance, tokens, transfers and NFTs fetched concurrently.
    ///
    /// If any fact fails after its fallback, the error carries the facts that
    /// did succeed as a partial summary.
    pub async fn summary(&self, address: &str, chain: &ChainTarget) -> Result<WalletSummary, WalletQueryError> {
        let wallet = parse_address(address)?;
        info!(chain = %chain.id, wallet = ?wallet, "building wallet summary");

        let (native, tokens, transfers, nfts) = tokio::join!(
            self.resolve(Fact::NativeBalance, chain, wallet, |kind, payload| {
                normalizer::to_balance(kind, payload, &chain.native_symbol)
            }),
            self.list_fact(Fact::TokenBalances, chain, wallet, normalizer::to_token_balances),
            self.list_fact(Fact::Transfers, chain, wallet, |kind, payload| {
                normalizer::to_transfers(kind, payload, wallet)
            }),
            self.list_fact(Fact::Nfts, chain, wallet, normalizer::to_nft_assets),
        );

        let mut summary = WalletSummary {
            address: wallet,
            chain: chain.id.clone(),
            native: None,
            tokens: Vec::new(),
            transfers: Vec::new(),
            totals: BTreeMap::new(),
            nfts: Vec::new(),
            warnings: Vec::new(),
        };
        let mut failures = Vec::new();

        match native {
            Ok(balance) => summary.native = Some(balance),
            Err(failure) => failures.push(failure),
        }
        match tokens {
            Ok(list) => {
                summary.tokens = list.items;
                summary.warnings.extend(list.warnings);
            }
            Err(failure) => failures.push(failure),
        }
        match transfers {
            Ok(list) => {
                let (totals, overflowed) = totals_by_symbol(&list.items);
                summary.totals = totals;
                summary
                    .warnings
                    .extend(overflowed.into_iter().map(|symbol| format!("total for {} overflowed, omitted", symbol)));
                summary.transfers = list.items;
                summary.warnings.extend(list.warnings);
            }
            Err(failure) => failures.push(failure),
        }
        match nfts {
            Ok(list) => {
                summary.nfts = list.items;
                summary.warnings.extend(list.warnings);
            }
            Err(failure) => failures.push(failure),
        }

        if failures.is_empty() {
            Ok(summary)
        } else {
            warn!(chain = %chain.id, wallet = ?wallet, failed = failures.len(), "wallet summary incomplete");
            Err(AggregationError {
                failures,
                partial: Box::new(summary),
            }
            .into())
        }
    }

    pub async fn native_balance(&self, address: &str, chain: &ChainTarget) -> Result<Balance, WalletQueryError> {
        let wallet = parse_address(address)?;
        Ok(self
            .resolve(Fact::NativeBalance, chain, wallet, |kind, payload| {
                normalizer::to_balance(kind, payload, &chain.native_symbol)
            })
            .await?)
    }

    pub async fn token_balances(
        &self,
        address: &str,
        chain: &ChainTarget,
    ) -> Result<Normalized<Balance>, WalletQueryError> {
        let wallet = parse_address(address)?;
        Ok(self
            .list_fact(Fact::TokenBalances, chain, wallet, normalizer::to_token_balances)
            .await?)
    }

    pub async fn transfers(
        &self,
        address: &str,
        chain: &ChainTarget,
    ) -> Result<Normalized<TokenTransfer>, WalletQueryError> {
        let wallet = parse_address(address)?;
        Ok(self
            .list_fact(Fact::Transfers, chain, wallet, |kind, payload| {
                normalizer::to_transfers(kind, payload, wallet)
            })
            .await?)
    }

    pub async fn nfts(&self, address: &str, chain: &ChainTarget) -> Result<Normalized<NftAsset>, WalletQueryError> {
        let wallet = parse_address(address)?;
        Ok(self.list_fact(Fact::Nfts, chain, wallet, normalizer::to_nft_assets).await?)
    }

    pub async fn approvals(
        &self,
        address: &str,
        chain: &ChainTarget,
    ) -> Result<Normalized<Approval>, WalletQueryError> {
        let wallet = parse_address(address)?;
        Ok(self
            .list_fact(Fact::Approvals, chain, wallet, normalizer::to_approvals)
            .await?)
    }

    /// A list fact whose chain has no configured source is empty with a warning.
    async fn list_fact<T, F>(
        &self,
        fact: Fact,
        chain: &ChainTarget,
        wallet: Address,
        normalize: F,
    ) -> Result<Normalized<T>, FactFailure>
    where
        F: Fn(ProviderKind, &Value) -> Result<Normalized<T>, NormalizeError>,
    {
        if sources(fact, chain).is_empty() {
            let warning = format!("{} unavailable: no provider configured for chain '{}'", fact, chain.id);
            warn!("{}", warning);
            return Ok(Normalized::with_warning(warning));
        }
        self.resolve(fact, chain, wallet, normalize).await
    }

    /// Try the fact's primary source, then its fallback. Every failure is kept.
    /// A payload that fails to normalize counts as a failed source and is
    /// evicted, so the next request asks the provider again.
    async fn resolve<T, F>(&self, fact: Fact, chain: &ChainTarget, wallet: Address, normalize: F) -> Result<T, FactFailure>
    where
        F: Fn(ProviderKind, &Value) -> Result<T, NormalizeError>,
    {
        let mut attempts = Vec::new();
        for kind in sources(fact, chain) {
            if !attempts.is_empty() {
                warn!(%fact, chain = %chain.id, fallback = %kind, "primary source failed, falling back");
            }
            let (endpoint, params) = source_request(fact, kind, wallet);
            let key = CacheKey::new(&chain.id, format!("{}:{}", kind, endpoint), &params);
            let outcome = match self.fetch_from(kind, chain, key.clone(), &endpoint, &params).await {
                Ok(payload) => normalize(kind, &payload).map_err(|err| {
                    self.cache.invalidate(&key);
                    ProviderError::from(err)
                }),
                Err(err) => Err(err),
            };
            match outcome {
                Ok(value) => return Ok(value),
                Err(err) => {
                    warn!(%fact, chain = %chain.id, provider = %kind, error = %err, "source failed");
                    attempts.push((kind, err));
                }
            }
        }
        Err(FactFailure { fact, attempts })
    }

    async fn fetch_from(
        &self,
        kind: ProviderKind,
        chain: &ChainTarget,
        key: CacheKey,
        endpoint: &str,
        params: &Value,
    ) -> Result<Value, ProviderError> {
        match kind {
            ProviderKind::Rpc => self.fetch(&self.rpc, chain, key, endpoint, params).await,
            ProviderKind::Explorer => self.fetch(&self.explorer, chain, key, endpoint, params).await,
            ProviderKind::Indexer => self.fetch(&self.indexer, chain, key, endpoint, params).await,
            ProviderKind::NftApi => self.fetch(&self.nft_api, chain, key, endpoint, params).await,
        }
    }

    /// One provider call through the cache. Failed calls leave no entry behind.
    async fn fetch<P: ProviderClient>(
        &self,
        client: &P,
        chain: &ChainTarget,
        key: CacheKey,
        endpoint: &str,
        params: &Value,
    ) -> Result<Value, ProviderError> {
        debug!(provider = %client.kind(), chain = %chain.id, endpoint, "provider request");
        self.cache
            .get_or_fetch(key, self.ttl, || client.call(chain, endpoint, params))
            .await
    }
}

/// Configured providers for `fact`, primary first, at most one fallback.
pub fn sources(fact: Fact, chain: &ChainTarget) -> Vec<ProviderKind> {
    let preference: &[ProviderKind] = match fact {
        Fact::NativeBalance => {
            let primary = if chain.has_provider(ProviderKind::Indexer) {
                ProviderKind::Indexer
            } else {
                ProviderKind::Explorer
            };
            return [primary, ProviderKind::Rpc]
                .into_iter()
                .filter(|kind| chain.has_provider(*kind))
                .collect();
        }
        Fact::TokenBalances | Fact::Approvals => &[ProviderKind::Indexer],
        Fact::Transfers => &[ProviderKind::Explorer, ProviderKind::Indexer],
        Fact::Nfts => &[ProviderKind::Indexer, ProviderKind::NftApi],
    };
    preference
        .iter()
        .copied()
        .filter(|kind| chain.has_provider(*kind))
        .collect()
}

/// Endpoint and parameters for asking `kind` about `fact`.
fn source_request(fact: Fact, kind: ProviderKind, wallet: Address) -> (String, Value) {
    let addr = format!("{:?}", wallet);
    match (fact, kind) {
        (Fact::NativeBalance, ProviderKind::Rpc) => ("eth_getBalance".into(), json!([addr, "latest"])),
        (Fact::NativeBalance, ProviderKind::Explorer) => (
            "account/balance".into(),
            json!({ "address": addr, "tag": "latest" }),
        ),
        (Fact::NativeBalance, _) => (format!("/{}/balance", addr), json!({})),
        (Fact::TokenBalances, _) => (format!("/{}/erc20", addr), json!({})),
        (Fact::Transfers, ProviderKind::Explorer) => (
            "account/tokentx".into(),
            json!({ "address": addr, "startblock": 0, "endblock": 99_999_999, "sort": "desc" }),
        ),
        (Fact::Transfers, _) => (format!("/{}/erc20/transfers", addr), json!({})),
        (Fact::Nfts, ProviderKind::NftApi) => ("getNFTs".into(), json!({ "owner": addr })),
        (Fact::Nfts, _) => (format!("/{}/nft", addr), json!({ "normalizeMetadata": true })),
        (Fact::Approvals, _) => (format!("/wallets/{}/approvals", addr), json!({})),
    }
}

/// Exact per-symbol sum of transfer amounts. Symbols are case-sensitive.
///
/// A symbol whose sum overflows has no total; it is returned in the second list.
pub fn totals_by_symbol(transfers: &[TokenTransfer]) -> (BTreeMap<String, Decimal>, Vec<String>) {
    let mut totals: BTreeMap<String, Decimal> = BTreeMap::new();
    let mut overflowed: Vec<String> = Vec::new();
    for transfer in transfers {
        if overflowed.contains(&transfer.symbol) {
            continue;
        }
        let total = totals.entry(transfer.symbol.clone()).or_insert(Decimal::ZERO);
        match total.checked_add(transfer.amount) {
            Some(sum) => *total = sum,
            None => {
                warn!(symbol = %transfer.symbol, "total overflowed, dropping it");
                totals.remove(&transfer.symbol);
                overflowed.push(transfer.symbol.clone());
            }
        }
    }
    (totals, overflowed)
}

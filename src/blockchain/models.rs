// src/blockchain/models.rs
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use ethers::utils::to_checksum;
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};
use std::time::Duration;
use thiserror::Error;

// --- Error types ---

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// The reason is a fixed phrase; the offending input is never included.
    #[error("invalid private key: {0}")]
    InvalidKey(&'static str),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid address '{0}': expected 0x followed by 40 hex characters")]
    Malformed(String),
    #[error("invalid address '{0}': EIP-55 checksum mismatch")]
    BadChecksum(String),
}

/// Failure of a single upstream call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("request timed out")]
    Timeout,
    #[error("upstream returned HTTP {0}")]
    HttpStatus(u16),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    /// The provider answered but refused the request (JSON-RPC error object,
    /// explorer `NOTOK`). The provider's text is kept verbatim.
    #[error("upstream rejected the request: {0}")]
    Rejected(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("no {0} endpoint configured for this chain")]
    NotConfigured(ProviderKind),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
    #[error("invalid value for '{field}': {detail}")]
    InvalidField { field: &'static str, detail: String },
    #[error("{0} payloads carry no {1}")]
    Unsupported(ProviderKind, &'static str),
}

impl From<NormalizeError> for ProviderError {
    fn from(err: NormalizeError) -> Self {
        ProviderError::MalformedResponse(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error("nonce lookup failed: {0}")]
    Nonce(#[source] ProviderError),
    #[error("signing failed: {0}")]
    Signing(String),
    /// The node refused the transaction; it never entered the chain.
    #[error("broadcast rejected by node: {0}")]
    Broadcast(String),
    #[error("broadcast failed: {0}")]
    BroadcastTransport(#[source] ProviderError),
    /// The transaction was accepted but no receipt appeared in time. Its fate is unknown.
    #[error(
        "transaction {tx_hash:?} was not confirmed within {waited:?}; it may still confirm later, \
         re-check it by hash instead of resubmitting"
    )]
    ConfirmationTimeout { tx_hash: H256, waited: Duration },
}

#[derive(Error, Debug)]
pub enum ContractError {
    #[error("reading stored value failed: {0}")]
    Read(#[source] ProviderError),
    #[error("could not decode contract output: {0}")]
    Decode(String),
}

/// One wallet fact the aggregator can fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Fact {
    NativeBalance,
    TokenBalances,
    Transfers,
    Nfts,
    Approvals,
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Fact::NativeBalance => "native balance",
            Fact::TokenBalances => "token balances",
            Fact::Transfers => "token transfers",
            Fact::Nfts => "NFT holdings",
            Fact::Approvals => "token approvals",
        };
        f.write_str(name)
    }
}

/// Every provider tried for a fact failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactFailure {
    pub fact: Fact,
    pub attempts: Vec<(ProviderKind, ProviderError)>,
}

impl fmt::Display for FactFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.attempts.is_empty() {
            return write!(f, "{} unavailable: no provider configured", self.fact);
        }
        write!(f, "{} unavailable: ", self.fact)?;
        for (i, (kind, err)) in self.attempts.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{kind}: {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for FactFailure {}

/// Some facts of a summary could not be fetched. `partial` holds the rest.
#[derive(Debug)]
pub struct AggregationError {
    pub failures: Vec<FactFailure>,
    pub partial: Box<WalletSummary>,
}

impl fmt::Display for AggregationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wallet summary incomplete: ")?;
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregationError {}

#[derive(Error, Debug)]
pub enum WalletQueryError {
    #[error(transparent)]
    InvalidAddress(#[from] AddressError),
    #[error(transparent)]
    Fact(#[from] FactFailure),
    #[error(transparent)]
    Aggregation(#[from] AggregationError),
}

// --- Chain / session models ---

/// Tagged upstream provider kind. Selects both the client and the normalizer adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    Rpc,
    Explorer,
    Indexer,
    NftApi,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderKind::Rpc => "rpc",
            ProviderKind::Explorer => "explorer",
            ProviderKind::Indexer => "indexer",
            ProviderKind::NftApi => "nft-api",
        };
        f.write_str(name)
    }
}

/// Base URL plus credential of a key-authenticated REST API.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiEndpoint {
    pub base_url: String,
    pub api_key: String,
}

impl ApiEndpoint {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }
}

impl fmt::Debug for ApiEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiEndpoint")
            .field("base_url", &self.base_url)
            .field("api_key", &"[redacted]")
            .finish()
    }
}

/// A network and the endpoints used to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTarget {
    /// Short identifier such as `eth`, `sepolia`, `polygon` or `bsc`.
    pub id: String,
    pub chain_id: u64,
    pub native_symbol: String,
    pub rpc_url: String,
    pub explorer: Option<ApiEndpoint>,
    pub indexer: Option<ApiEndpoint>,
    pub nft_api: Option<ApiEndpoint>,
}

impl ChainTarget {
    pub fn new(id: &str, chain_id: u64, native_symbol: &str, rpc_url: &str) -> Self {
        Self {
            id: id.to_string(),
            chain_id,
            native_symbol: native_symbol.to_string(),
            rpc_url: rpc_url.to_string(),
            explorer: None,
            indexer: None,
            nft_api: None,
        }
    }

    pub fn with_explorer(mut self, endpoint: ApiEndpoint) -> Self {
        self.explorer = Some(endpoint);
        self
    }

    pub fn with_indexer(mut self, endpoint: ApiEndpoint) -> Self {
        self.indexer = Some(endpoint);
        self
    }

    pub fn with_nft_api(mut self, endpoint: ApiEndpoint) -> Self {
        self.nft_api = Some(endpoint);
        self
    }

    pub fn has_provider(&self, kind: ProviderKind) -> bool {
        match kind {
            ProviderKind::Rpc => true,
            ProviderKind::Explorer => self.explorer.is_some(),
            ProviderKind::Indexer => self.indexer.is_some(),
            ProviderKind::NftApi => self.nft_api.is_some(),
        }
    }
}

/// Everything a single user action needs, passed explicitly instead of living in globals.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub chain: ChainTarget,
    pub storage_contract: Address,
    pub gas_limit: U256,
    pub gas_price_wei: U256,
}

// --- Transaction models ---

/// An unsigned contract call. Signing consumes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransaction {
    pub to: Address,
    pub data: ethers::types::Bytes,
    pub from: Address,
    pub nonce: U256,
    pub gas_limit: U256,
    pub gas_price: U256,
    pub chain_id: u64,
}

/// RLP-encoded signed transaction. Broadcasting consumes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub raw: ethers::types::Bytes,
    pub hash: H256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Success,
    Reverted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Receipt {
    pub tx_hash: H256,
    pub block_number: u64,
    pub status: TxStatus,
    #[serde(serialize_with = "u256_as_decimal")]
    pub gas_used: U256,
}

// --- Wallet view models ---

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Balance {
    pub symbol: String,
    /// `None` for the chain's native asset.
    pub token_address: Option<Address>,
    #[serde(serialize_with = "u256_as_decimal")]
    pub raw: U256,
    pub decimals: u32,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenTransfer {
    pub timestamp: Option<DateTime<Utc>>,
    pub symbol: String,
    pub token_address: Option<Address>,
    pub amount: Decimal,
    pub from: Address,
    pub to: Address,
    pub tx_hash: H256,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NftAttribute {
    pub trait_type: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NftMetadata {
    pub description: Option<String>,
    pub attributes: Vec<NftAttribute>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NftAsset {
    pub contract_address: Address,
    #[serde(serialize_with = "u256_as_decimal")]
    pub token_id: U256,
    pub name: String,
    pub image_url: Option<String>,
    pub metadata: Option<NftMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Approval {
    pub token_symbol: String,
    pub token_address: Address,
    pub spender: Address,
    /// Absent when the allowance is unlimited or too large to represent.
    pub amount: Option<Decimal>,
    pub unlimited: bool,
    pub tx_hash: Option<H256>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalletSummary {
    #[serde(serialize_with = "address_checksummed")]
    pub address: Address,
    pub chain: String,
    pub native: Option<Balance>,
    pub tokens: Vec<Balance>,
    pub transfers: Vec<TokenTransfer>,
    /// Sum of transfer amounts per symbol.
    pub totals: BTreeMap<String, Decimal>,
    pub nfts: Vec<NftAsset>,
    pub warnings: Vec<String>,
}

fn u256_as_decimal<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

fn address_checksummed<S: Serializer>(value: &Address, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&to_checksum(value, None))
}

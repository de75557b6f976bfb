// src/config.rs

use std::collections::{BTreeMap, HashMap};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use ethers::types::{Address, U256};
use tracing::warn;
use url::Url;

use crate::blockchain::models::{ApiEndpoint, ChainTarget, SessionContext};
use crate::blockchain::services::transactions::ConfirmationPolicy;

pub const DEFAULT_INDEXER_URL: &str = "https://deep-index.moralis.io/api/v2.2";
pub const DEFAULT_STORAGE_CONTRACT: &str = "0x1c5afd90714E2a40547246DDD92668F2715caF78";

/// A network this service knows how to talk to.
struct KnownChain {
    id: &'static str,
    chain_id: u64,
    symbol: &'static str,
    aliases: &'static [&'static str],
}

const KNOWN_CHAINS: &[KnownChain] = &[
    KnownChain { id: "eth", chain_id: 1, symbol: "ETH", aliases: &["mainnet", "main", "ethereum"] },
    KnownChain { id: "sepolia", chain_id: 11155111, symbol: "ETH", aliases: &["testnet", "test"] },
    KnownChain { id: "holesky", chain_id: 17000, symbol: "ETH", aliases: &[] },
    KnownChain { id: "polygon", chain_id: 137, symbol: "MATIC", aliases: &["matic"] },
    KnownChain { id: "amoy", chain_id: 80002, symbol: "MATIC", aliases: &["polygon-amoy"] },
    KnownChain { id: "bsc", chain_id: 56, symbol: "BNB", aliases: &["bnb", "binance"] },
    KnownChain { id: "bsc-testnet", chain_id: 97, symbol: "BNB", aliases: &["bnb-testnet"] },
    KnownChain { id: "arbitrum", chain_id: 42161, symbol: "ETH", aliases: &["arb", "arbitrum-one"] },
    KnownChain { id: "optimism", chain_id: 10, symbol: "ETH", aliases: &["op"] },
    KnownChain { id: "base", chain_id: 8453, symbol: "ETH", aliases: &[] },
    KnownChain { id: "avalanche", chain_id: 43114, symbol: "AVAX", aliases: &["avax"] },
];

/// Map user input such as `Mainnet`, `1` or `bnb` onto a canonical chain identifier.
pub fn normalize_chain_id(input: &str) -> String {
    let mut s = input.trim().to_lowercase();
    s = s.replace([' ', '_'], "-");
    while s.contains("--") {
        s = s.replace("--", "-");
    }

    KNOWN_CHAINS
        .iter()
        .find(|chain| chain.id == s || chain.aliases.contains(&s.as_str()) || chain.chain_id.to_string() == s)
        .map(|chain| chain.id.to_string())
        .unwrap_or(s)
}

fn known_chain(id: &str) -> Option<&'static KnownChain> {
    KNOWN_CHAINS.iter().find(|chain| chain.id == id)
}

// Loaded once at startup from the environment (and `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,

    /// Chains with at least an RPC URL, keyed by canonical identifier.
    pub chains: BTreeMap<String, ChainTarget>,
    pub default_chain: String,

    // Transaction settings
    pub storage_contract: Address,
    pub default_gas_limit: u64,
    pub default_gas_price: u64,
    pub receipt_poll_interval: Duration,
    pub receipt_timeout: Duration,

    // Provider settings
    pub provider_timeout: Duration,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            chains: BTreeMap::new(),
            default_chain: "sepolia".to_string(),
            storage_contract: Address::from_str(DEFAULT_STORAGE_CONTRACT).unwrap_or_default(),
            default_gas_limit: 100_000,
            default_gas_price: 1_000_000_000,
            receipt_poll_interval: Duration::from_millis(1000),
            receipt_timeout: Duration::from_secs(120),
            provider_timeout: Duration::from_secs(10),
            cache_ttl: Duration::from_secs(60),
            cache_capacity: 256,
        }
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Config::default();

        let rpc_urls_str = var("CHAIN_RPC_URLS")
            .context("CHAIN_RPC_URLS must be set to a JSON map of chain -> RPC URL")?;
        let rpc_urls = parse_url_map(&rpc_urls_str).context("Invalid CHAIN_RPC_URLS")?;
        let explorer_urls = match var("EXPLORER_API_URLS") {
            Some(raw) => parse_url_map(&raw).context("Invalid EXPLORER_API_URLS")?,
            None => HashMap::new(),
        };
        let nft_urls = match var("NFT_API_URLS") {
            Some(raw) => parse_url_map(&raw).context("Invalid NFT_API_URLS")?,
            None => HashMap::new(),
        };

        let explorer_key = var("EXPLORER_API_KEY").unwrap_or_default();
        let nft_key = var("NFT_API_KEY").filter(|k| !k.is_empty());
        let indexer = match var("INDEXER_API_KEY").filter(|k| !k.is_empty()) {
            Some(key) => {
                let base = var("INDEXER_API_URL").unwrap_or_else(|| DEFAULT_INDEXER_URL.to_string());
                validate_url(&base).context("Invalid INDEXER_API_URL")?;
                Some(ApiEndpoint::new(base, key))
            }
            None => None,
        };

        let mut chains = BTreeMap::new();
        for (id, rpc_url) in rpc_urls {
            let Some(known) = known_chain(&id) else {
                warn!(chain = %id, "skipping unknown chain in CHAIN_RPC_URLS");
                continue;
            };
            let mut target = ChainTarget::new(known.id, known.chain_id, known.symbol, &rpc_url);
            if let Some(base) = explorer_urls.get(&id) {
                target = target.with_explorer(ApiEndpoint::new(base.as_str(), explorer_key.as_str()));
            }
            if let Some(endpoint) = &indexer {
                target = target.with_indexer(endpoint.clone());
            }
            if let (Some(base), Some(key)) = (nft_urls.get(&id), &nft_key) {
                target = target.with_nft_api(ApiEndpoint::new(base.as_str(), key.as_str()));
            }
            chains.insert(id, target);
        }
        if chains.is_empty() {
            return Err(anyhow!("CHAIN_RPC_URLS contains no supported chain"));
        }

        let default_chain = normalize_chain_id(&var("DEFAULT_CHAIN").unwrap_or(defaults.default_chain));
        if !chains.contains_key(&default_chain) {
            warn!(chain = %default_chain, "DEFAULT_CHAIN has no RPC URL configured");
        }

        let storage_contract = match var("STORAGE_CONTRACT_ADDRESS") {
            Some(raw) => Address::from_str(raw.trim())
                .map_err(|e| anyhow!("{}", e))
                .context("STORAGE_CONTRACT_ADDRESS must be a valid address")?,
            None => defaults.storage_contract,
        };

        Ok(Config {
            port: parse_var(&var, "PORT", defaults.port)?,
            chains,
            default_chain,
            storage_contract,
            default_gas_limit: parse_var(&var, "DEFAULT_GAS_LIMIT", defaults.default_gas_limit)?,
            default_gas_price: parse_var(&var, "DEFAULT_GAS_PRICE", defaults.default_gas_price)?,
            receipt_poll_interval: Duration::from_millis(parse_var(
                &var,
                "RECEIPT_POLL_INTERVAL_MS",
                defaults.receipt_poll_interval.as_millis() as u64,
            )?),
            receipt_timeout: Duration::from_secs(parse_var(
                &var,
                "RECEIPT_TIMEOUT_SECS",
                defaults.receipt_timeout.as_secs(),
            )?),
            provider_timeout: Duration::from_secs(parse_var(
                &var,
                "PROVIDER_TIMEOUT_SECS",
                defaults.provider_timeout.as_secs(),
            )?),
            cache_ttl: Duration::from_secs(parse_var(&var, "CACHE_TTL_SECS", defaults.cache_ttl.as_secs())?),
            cache_capacity: parse_var(&var, "CACHE_CAPACITY", defaults.cache_capacity)?,
        })
    }

    /// Returns a list of configured chain identifiers
    pub fn supported_chains(&self) -> Vec<String> {
        self.chains.keys().cloned().collect()
    }

    /// Look up a configured chain by identifier or alias.
    pub fn chain(&self, id: &str) -> Option<&ChainTarget> {
        self.chains.get(&normalize_chain_id(id))
    }

    /// Per-action context for `chain` with the configured contract and gas defaults.
    pub fn session(&self, chain: &str) -> Option<SessionContext> {
        self.chain(chain).map(|target| SessionContext {
            chain: target.clone(),
            storage_contract: self.storage_contract,
            gas_limit: U256::from(self.default_gas_limit),
            gas_price_wei: U256::from(self.default_gas_price),
        })
    }

    pub fn confirmation_policy(&self) -> ConfirmationPolicy {
        ConfirmationPolicy {
            poll_interval: self.receipt_poll_interval,
            max_wait: self.receipt_timeout,
        }
    }
}

fn parse_var<T: FromStr>(var: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T> {
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow!("{} must be a valid number, got '{}'", name, raw)),
        None => Ok(default),
    }
}

/// JSON object of chain -> URL, keys normalized to canonical identifiers.
fn parse_url_map(raw: &str) -> Result<HashMap<String, String>> {
    let map: HashMap<String, String> = serde_json::from_str(raw).context("expected a JSON object of strings")?;
    map.into_iter()
        .map(|(chain, url)| {
            validate_url(&url).with_context(|| format!("bad URL for chain '{}'", chain))?;
            Ok((normalize_chain_id(&chain), url))
        })
        .collect()
}

fn validate_url(raw: &str) -> Result<()> {
    let url = Url::parse(raw).with_context(|| format!("'{}' is not a URL", raw))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(anyhow!("unsupported URL scheme '{}'", other)),
    }
}

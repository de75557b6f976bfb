//! Mapping of provider-specific payloads onto canonical wallet records.
//!
//! Each function dispatches on [`ProviderKind`]; the field names and shapes of
//! each provider are listed here and nowhere else. A payload without the
//! expected list is an error, so the caller can try another source. Within a
//! list, a record that cannot be interpreted is dropped with a warning and the
//! rest of the batch survives.

use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use ethers::types::{Address, H256, U256};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;

use crate::blockchain::models::{
    Approval, Balance, Direction, NftAsset, NftAttribute, NftMetadata, NormalizeError, ProviderKind,
    TokenTransfer,
};

/// Symbol (and name) used when a provider omits one.
pub const UNKNOWN_TOKEN: &str = "Unknown Token";
/// Precision assumed when a provider omits decimals.
pub const DEFAULT_DECIMALS: u32 = 18;
/// Largest scale `rust_decimal` represents.
const MAX_SCALE: u32 = 28;

/// Records that survived normalization, plus one warning per dropped record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Normalized<T> {
    pub items: Vec<T>,
    pub warnings: Vec<String>,
}

impl<T> Normalized<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn with_warning(warning: impl Into<String>) -> Self {
        Self {
            items: Vec::new(),
            warnings: vec![warning.into()],
        }
    }
}

// --- Field tables ---

struct TransferFields {
    list: Option<&'static str>,
    value: &'static str,
    symbol: &'static str,
    decimals: &'static str,
    from: &'static str,
    to: &'static str,
    hash: &'static str,
    timestamp: &'static str,
    token: &'static str,
}

const EXPLORER_TRANSFER: TransferFields = TransferFields {
    list: None,
    value: "value",
    symbol: "tokenSymbol",
    decimals: "tokenDecimal",
    from: "from",
    to: "to",
    hash: "hash",
    timestamp: "timeStamp",
    token: "contractAddress",
};

const INDEXER_TRANSFER: TransferFields = TransferFields {
    list: Some("result"),
    value: "value",
    symbol: "token_symbol",
    decimals: "token_decimals",
    from: "from_address",
    to: "to_address",
    hash: "transaction_hash",
    timestamp: "block_timestamp",
    token: "address",
};

// --- Public normalizers ---

/// Native-asset balance. The RPC and explorer payloads are the bare `result`
/// value; the indexer answers `{"balance": "..."}`.
pub fn to_balance(kind: ProviderKind, payload: &Value, native_symbol: &str) -> Result<Balance, NormalizeError> {
    let raw_value = match kind {
        ProviderKind::Rpc | ProviderKind::Explorer => payload,
        ProviderKind::Indexer => payload.get("balance").ok_or(NormalizeError::MissingField("balance"))?,
        ProviderKind::NftApi => return Err(NormalizeError::Unsupported(kind, "native balance")),
    };
    let raw = parse_raw_amount(raw_value).ok_or_else(|| NormalizeError::InvalidField {
        field: "balance",
        detail: format!("not an integer amount: {}", raw_value),
    })?;
    let amount = scale_amount(raw, DEFAULT_DECIMALS).ok_or_else(|| out_of_range("balance"))?;
    Ok(Balance {
        symbol: native_symbol.to_string(),
        token_address: None,
        raw,
        decimals: DEFAULT_DECIMALS,
        amount,
    })
}

/// Fungible token balances (indexer only).
pub fn to_token_balances(kind: ProviderKind, payload: &Value) -> Result<Normalized<Balance>, NormalizeError> {
    if kind != ProviderKind::Indexer {
        return Err(NormalizeError::Unsupported(kind, "token balances"));
    }
    normalize_list(kind, "token balance", record_list(payload, Some("result"))?, |record| {
        let token_address = address_field(record, "token_address")?;
        let raw = raw_field(record, "balance")?;
        let decimals = decimals_of(record.get("decimals"));
        let amount = scale_amount(raw, decimals).ok_or_else(|| out_of_range("balance"))?;
        Ok(Balance {
            symbol: symbol_of(record.get("symbol")),
            token_address: Some(token_address),
            raw,
            decimals,
            amount,
        })
    })
}

/// Token transfer history relative to `wallet`.
pub fn to_transfers(
    kind: ProviderKind,
    payload: &Value,
    wallet: Address,
) -> Result<Normalized<TokenTransfer>, NormalizeError> {
    let fields = match kind {
        ProviderKind::Explorer => &EXPLORER_TRANSFER,
        ProviderKind::Indexer => &INDEXER_TRANSFER,
        _ => return Err(NormalizeError::Unsupported(kind, "token transfers")),
    };
    normalize_list(kind, "transfer", record_list(payload, fields.list)?, |record| {
        let raw = raw_field(record, fields.value)?;
        let decimals = decimals_of(record.get(fields.decimals));
        let amount = scale_amount(raw, decimals).ok_or_else(|| out_of_range(fields.value))?;
        let from = address_field(record, fields.from)?;
        let to = address_field(record, fields.to)?;
        Ok(TokenTransfer {
            timestamp: record.get(fields.timestamp).and_then(parse_timestamp),
            symbol: symbol_of(record.get(fields.symbol)),
            token_address: address_field(record, fields.token).ok(),
            amount,
            from,
            to,
            tx_hash: hash_field(record, fields.hash)?,
            direction: direction_of(to, wallet),
        })
    })
}

/// NFT holdings from the indexer (`result[]`) or the NFT API (`ownedNfts[]`).
pub fn to_nft_assets(kind: ProviderKind, payload: &Value) -> Result<Normalized<NftAsset>, NormalizeError> {
    match kind {
        ProviderKind::Indexer => normalize_list(kind, "NFT", record_list(payload, Some("result"))?, indexer_nft),
        ProviderKind::NftApi => normalize_list(kind, "NFT", record_list(payload, Some("ownedNfts"))?, nft_api_nft),
        _ => Err(NormalizeError::Unsupported(kind, "NFT holdings")),
    }
}

/// ERC-20 spending approvals (indexer only).
pub fn to_approvals(kind: ProviderKind, payload: &Value) -> Result<Normalized<Approval>, NormalizeError> {
    if kind != ProviderKind::Indexer {
        return Err(NormalizeError::Unsupported(kind, "approvals"));
    }
    normalize_list(kind, "approval", record_list(payload, Some("result"))?, |record| {
        let token = record.get("token").ok_or(NormalizeError::MissingField("token"))?;
        let spender = record.get("spender").ok_or(NormalizeError::MissingField("spender"))?;
        let raw = raw_field(record, "value")?;
        let unlimited = raw == U256::MAX;
        let amount = if unlimited {
            None
        } else {
            scale_amount(raw, decimals_of(token.get("decimals")))
        };
        Ok(Approval {
            token_symbol: symbol_of(token.get("symbol")),
            token_address: address_field(token, "address")?,
            spender: address_field(spender, "address")?,
            amount,
            unlimited,
            tx_hash: hash_field(record, "transaction_hash").ok(),
            timestamp: record.get("block_timestamp").and_then(parse_timestamp),
        })
    })
}

// --- Amount handling ---

/// `raw / 10^decimals`, exact while it fits. Fractional digits are truncated
/// beyond a scale of 28, or as far as needed to fit a 96-bit mantissa; `None`
/// only if the integer part alone is too wide.
pub fn scale_amount(raw: U256, decimals: u32) -> Option<Decimal> {
    let ten = U256::from(10u64);
    let mut mantissa = raw;
    let mut scale = decimals;
    while scale > MAX_SCALE || (mantissa.bits() > 96 && scale > 0) {
        mantissa /= ten;
        scale -= 1;
    }
    if mantissa.bits() > 96 {
        return None;
    }
    let mantissa = i128::try_from(mantissa.as_u128()).ok()?;
    Decimal::try_from_i128_with_scale(mantissa, scale).ok()
}

/// Integer amount given as a decimal string, a `0x` hex string, or a JSON integer.
pub fn parse_raw_amount(value: &Value) -> Option<U256> {
    match value {
        Value::String(text) => {
            let text = text.trim();
            if let Some(hex) = text.strip_prefix("0x") {
                if hex.is_empty() {
                    return Some(U256::zero());
                }
                U256::from_str_radix(hex, 16).ok()
            } else if !text.is_empty() && text.chars().all(|c| c.is_ascii_digit()) {
                U256::from_dec_str(text).ok()
            } else {
                None
            }
        }
        Value::Number(n) => n.as_u64().map(U256::from),
        _ => None,
    }
}

fn out_of_range(field: &'static str) -> NormalizeError {
    NormalizeError::InvalidField {
        field,
        detail: "amount out of representable range".into(),
    }
}

// --- Field helpers ---

/// The record array: the payload itself, or its `list_field`. Explorer
/// payloads arrive already unwrapped from their `result` envelope.
fn record_list<'a>(payload: &'a Value, list_field: Option<&'static str>) -> Result<&'a [Value], NormalizeError> {
    if let Some(items) = payload.as_array() {
        return Ok(items);
    }
    let field = list_field.unwrap_or("result");
    match payload.get(field) {
        None | Some(Value::Null) => Err(NormalizeError::MissingField(field)),
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(NormalizeError::InvalidField {
            field,
            detail: format!("expected a list, got {}", other),
        }),
    }
}

fn normalize_list<T, F>(
    kind: ProviderKind,
    what: &str,
    records: &[Value],
    mut convert: F,
) -> Result<Normalized<T>, NormalizeError>
where
    F: FnMut(&Value) -> Result<T, NormalizeError>,
{
    let mut out = Normalized::empty();
    for (index, record) in records.iter().enumerate() {
        match convert(record) {
            Ok(item) => out.items.push(item),
            Err(err) => out
                .warnings
                .push(format!("skipped {} {} #{}: {}", kind, what, index, err)),
        }
    }
    Ok(out)
}

fn non_empty_str<'a>(value: Option<&'a Value>) -> Option<&'a str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn symbol_of(value: Option<&Value>) -> String {
    non_empty_str(value).unwrap_or(UNKNOWN_TOKEN).to_string()
}

fn decimals_of(value: Option<&Value>) -> u32 {
    match value {
        Some(Value::Number(n)) => n.as_u64().and_then(|d| u32::try_from(d).ok()),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
    .unwrap_or(DEFAULT_DECIMALS)
}

fn raw_field(record: &Value, field: &'static str) -> Result<U256, NormalizeError> {
    let value = record.get(field).ok_or(NormalizeError::MissingField(field))?;
    parse_raw_amount(value).ok_or_else(|| NormalizeError::InvalidField {
        field,
        detail: format!("not an integer amount: {}", value),
    })
}

fn address_field(record: &Value, field: &'static str) -> Result<Address, NormalizeError> {
    let text = non_empty_str(record.get(field)).ok_or(NormalizeError::MissingField(field))?;
    Address::from_str(text).map_err(|_| NormalizeError::InvalidField {
        field,
        detail: format!("not an address: {}", text),
    })
}

fn hash_field(record: &Value, field: &'static str) -> Result<H256, NormalizeError> {
    let text = non_empty_str(record.get(field)).ok_or(NormalizeError::MissingField(field))?;
    H256::from_str(text).map_err(|_| NormalizeError::InvalidField {
        field,
        detail: format!("not a transaction hash: {}", text),
    })
}

/// Unix seconds (string or number) or RFC 3339.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let seconds = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(secs) = s.parse::<i64>() {
                Some(secs)
            } else {
                return DateTime::parse_from_rfc3339(s).ok().map(|t| t.with_timezone(&Utc));
            }
        }
        _ => None,
    }?;
    Utc.timestamp_opt(seconds, 0).single()
}

fn direction_of(to: Address, wallet: Address) -> Direction {
    // Parsed addresses compare byte-wise, so the textual case never matters.
    if to == wallet {
        Direction::Inbound
    } else {
        Direction::Outbound
    }
}

fn parse_token_id(value: &Value) -> Option<U256> {
    parse_raw_amount(value)
}

// --- NFT adapters ---

fn indexer_nft(record: &Value) -> Result<NftAsset, NormalizeError> {
    let contract_address = address_field(record, "token_address")?;
    let token_id = record
        .get("token_id")
        .and_then(parse_token_id)
        .ok_or(NormalizeError::MissingField("token_id"))?;

    // `metadata` arrives as a JSON document embedded in a string.
    let raw_metadata = match record.get("metadata") {
        Some(Value::String(text)) => serde_json::from_str::<Value>(text).ok(),
        Some(value @ Value::Object(_)) => Some(value.clone()),
        _ => None,
    };
    let normalized = record.get("normalized_metadata").filter(|v| v.is_object());
    let metadata_source = normalized.or(raw_metadata.as_ref());

    let name = non_empty_str(normalized.and_then(|m| m.get("name")))
        .or_else(|| non_empty_str(raw_metadata.as_ref().and_then(|m| m.get("name"))))
        .or_else(|| non_empty_str(record.get("name")))
        .unwrap_or(UNKNOWN_TOKEN)
        .to_string();
    let image_url = metadata_source
        .and_then(|m| non_empty_str(m.get("image")))
        .map(str::to_string);

    Ok(NftAsset {
        contract_address,
        token_id,
        name,
        image_url,
        metadata: metadata_source.map(metadata_of),
    })
}

fn nft_api_nft(record: &Value) -> Result<NftAsset, NormalizeError> {
    let contract = record.get("contract").ok_or(NormalizeError::MissingField("contract"))?;
    let contract_address = address_field(contract, "address")?;
    let token_id = record
        .get("id")
        .and_then(|id| id.get("tokenId"))
        .and_then(parse_token_id)
        .ok_or(NormalizeError::MissingField("id.tokenId"))?;
    let metadata = record.get("metadata").filter(|v| v.is_object());

    let name = non_empty_str(record.get("title"))
        .or_else(|| non_empty_str(metadata.and_then(|m| m.get("name"))))
        .unwrap_or(UNKNOWN_TOKEN)
        .to_string();
    let image_url = record
        .get("media")
        .and_then(Value::as_array)
        .and_then(|media| media.first())
        .and_then(|m| non_empty_str(m.get("gateway")))
        .or_else(|| non_empty_str(metadata.and_then(|m| m.get("image"))))
        .map(str::to_string);

    Ok(NftAsset {
        contract_address,
        token_id,
        name,
        image_url,
        metadata: metadata.map(metadata_of),
    })
}

fn metadata_of(source: &Value) -> NftMetadata {
    let attributes = source
        .get("attributes")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|attr| {
                    Some(NftAttribute {
                        trait_type: non_empty_str(attr.get("trait_type"))?.to_string(),
                        value: attr.get("value").cloned().unwrap_or(Value::Null),
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    NftMetadata {
        description: non_empty_str(source.get("description")).map(str::to_string),
        attributes,
    }
}

// src/blockchain/contract.rs

use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, U256};
use ethers::utils::id;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::blockchain::key_material::Account;
use crate::blockchain::models::{
    ChainTarget, ContractError, ProviderKind, Receipt, SessionContext, SubmissionError,
};
use crate::blockchain::providers::{ExplorerClient, ProviderClient, RpcClient};
use crate::blockchain::services::transactions::TransactionSubmitter;

pub const GET_SIGNATURE: &str = "get()";
pub const SET_SIGNATURE: &str = "set(uint256)";

/// First four bytes of the keccak hash of a function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    id(signature)
}

/// Decode a single `uint256` return word from `eth_call` output.
pub fn decode_uint(output: &Value) -> Result<U256, ContractError> {
    let text = output
        .as_str()
        .ok_or_else(|| ContractError::Decode(format!("expected hex string, got {}", output)))?;
    let bytes = hex::decode(text.trim_start_matches("0x"))
        .map_err(|e| ContractError::Decode(format!("invalid hex: {}", e)))?;
    if bytes.is_empty() {
        return Err(ContractError::Decode(
            "empty output (is there a contract at this address?)".into(),
        ));
    }
    match abi::decode(&[ParamType::Uint(256)], &bytes) {
        Ok(tokens) => match tokens.into_iter().next() {
            Some(Token::Uint(value)) => Ok(value),
            _ => Err(ContractError::Decode("output is not a uint256".into())),
        },
        Err(e) => Err(ContractError::Decode(e.to_string())),
    }
}

/// Binding for the storage contract exposing `get() -> uint256` and `set(uint256)`.
#[derive(Debug, Clone)]
pub struct SimpleStorage {
    address: Address,
    rpc: RpcClient,
    explorer: ExplorerClient,
}

impl SimpleStorage {
    pub fn new(address: Address, rpc: RpcClient, explorer: ExplorerClient) -> Self {
        Self { address, rpc, explorer }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Read the stored value through the node, falling back to the explorer's
    /// `eth_call` proxy when the node fails and an explorer is configured.
    pub async fn get(&self, chain: &ChainTarget) -> Result<U256, ContractError> {
        let to = format!("{:?}", self.address);
        let data = format!("0x{}", hex::encode(selector(GET_SIGNATURE)));

        let output = match self
            .rpc
            .call(chain, "eth_call", &json!([{ "to": to, "data": data }, "latest"]))
            .await
        {
            Ok(output) => output,
            Err(err) if chain.has_provider(ProviderKind::Explorer) => {
                warn!(chain = %chain.id, error = %err, "eth_call failed, trying explorer proxy");
                self.explorer
                    .call(chain, "proxy/eth_call", &json!({ "to": to, "data": data, "tag": "latest" }))
                    .await
                    .map_err(ContractError::Read)?
            }
            Err(err) => return Err(ContractError::Read(err)),
        };
        decode_uint(&output)
    }

    /// Store `value`, signing with `account`. Waits for the receipt.
    pub async fn set(
        &self,
        submitter: &TransactionSubmitter,
        account: Account,
        session: &SessionContext,
        value: U256,
    ) -> Result<Receipt, SubmissionError> {
        info!(chain = %session.chain.id, contract = ?self.address, %value, "storing value");
        submitter
            .submit(
                account,
                &session.chain,
                self.address,
                selector(SET_SIGNATURE),
                &[Token::Uint(value)],
                session.gas_limit,
                session.gas_price_wei,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::services::transactions::encode_call;

    #[test]
    fn known_selectors() {
        assert_eq!(hex::encode(selector(GET_SIGNATURE)), "6d4ce63c");
        assert_eq!(hex::encode(selector(SET_SIGNATURE)), "60fe47b1");
    }

    #[test]
    fn set_call_data() {
        let data = encode_call(selector(SET_SIGNATURE), &[Token::Uint(U256::from(42u64))]);
        assert_eq!(
            hex::encode(&data),
            "60fe47b1000000000000000000000000000000000000000000000000000000000000002a"
        );
    }

    #[test]
    fn decodes_uint_output() {
        let word = json!("0x000000000000000000000000000000000000000000000000000000000000002a");
        assert_eq!(decode_uint(&word).unwrap(), U256::from(42u64));
        assert!(decode_uint(&json!("0x")).is_err());
        assert!(decode_uint(&json!(42)).is_err());
    }
}

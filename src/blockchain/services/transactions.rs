// src/blockchain/services/transactions.rs

use std::str::FromStr;
use std::time::Duration;

use ethers::abi::{self, Token};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, H256, U256};
use ethers::utils::keccak256;
use ethers_signers::Signer;
use serde_json::{json, Value};
use tokio::time::{sleep, timeout, Instant};
use tracing::{info, warn};

use crate::blockchain::key_material::Account;
use crate::blockchain::models::{
    ChainTarget, PendingTransaction, ProviderError, Receipt, SignedTransaction, SubmissionError, TxStatus,
};
use crate::blockchain::providers::rpc::parse_quantity;
use crate::blockchain::providers::{ProviderClient, RpcClient};

/// How long and how often to look for a receipt after broadcasting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationPolicy {
    pub poll_interval: Duration,
    pub max_wait: Duration,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_wait: Duration::from_secs(120),
        }
    }
}

impl ConfirmationPolicy {
    /// Number of receipt lookups before giving up (at least one).
    pub fn max_attempts(&self) -> u32 {
        let interval = self.poll_interval.as_millis().max(1);
        let attempts = self.max_wait.as_millis().div_ceil(interval);
        u32::try_from(attempts).unwrap_or(u32::MAX).max(1)
    }
}

/// Builds, signs, broadcasts and confirms contract calls against a node.
#[derive(Debug, Clone)]
pub struct TransactionSubmitter {
    rpc: RpcClient,
    policy: ConfirmationPolicy,
}

impl TransactionSubmitter {
    pub fn new(rpc: RpcClient, policy: ConfirmationPolicy) -> Self {
        Self { rpc, policy }
    }

    pub fn policy(&self) -> ConfirmationPolicy {
        self.policy
    }

    /// Send `selector(args)` to `contract` and wait for it to be mined.
    ///
    /// A reverted transaction is still a returned [`Receipt`]; only failures to
    /// get the transaction into a block (or to see it there in time) are errors.
    /// The account is dropped, and its key zeroized, once the transaction is signed.
    #[allow(clippy::too_many_arguments)]
    pub async fn submit(
        &self,
        account: Account,
        chain: &ChainTarget,
        contract: Address,
        selector: [u8; 4],
        args: &[Token],
        gas_limit: U256,
        gas_price_wei: U256,
    ) -> Result<Receipt, SubmissionError> {
        let from = account.address();
        let nonce = self.fetch_nonce(chain, from).await?;
        info!(chain = %chain.id, from = ?from, nonce = %nonce, "nonce fetched");

        let pending = PendingTransaction {
            to: contract,
            data: encode_call(selector, args),
            from,
            nonce,
            gas_limit,
            gas_price: gas_price_wei,
            chain_id: chain.chain_id,
        };

        let signed = pending.sign(&account).await?;
        drop(account);
        info!(tx_hash = ?signed.hash, "transaction signed");

        let tx_hash = self.broadcast(chain, signed).await?;
        info!(chain = %chain.id, tx_hash = ?tx_hash, "transaction broadcast, waiting for receipt");

        let receipt = self.wait_for_receipt(chain, tx_hash).await?;
        info!(
            tx_hash = ?receipt.tx_hash,
            block = receipt.block_number,
            status = ?receipt.status,
            "transaction confirmed"
        );
        Ok(receipt)
    }

    /// One receipt lookup; `None` while the transaction is unknown or pending.
    pub async fn receipt(&self, chain: &ChainTarget, tx_hash: H256) -> Result<Option<Receipt>, ProviderError> {
        let result = self
            .rpc
            .call(chain, "eth_getTransactionReceipt", &json!([format!("{:?}", tx_hash)]))
            .await?;
        parse_receipt(&result, tx_hash)
    }

    async fn fetch_nonce(&self, chain: &ChainTarget, from: Address) -> Result<U256, SubmissionError> {
        let result = self
            .rpc
            .call(chain, "eth_getTransactionCount", &json!([format!("{:?}", from), "latest"]))
            .await
            .map_err(SubmissionError::Nonce)?;
        parse_quantity(&result).map_err(SubmissionError::Nonce)
    }

    async fn broadcast(&self, chain: &ChainTarget, signed: SignedTransaction) -> Result<H256, SubmissionError> {
        let raw = format!("0x{}", hex::encode(&signed.raw));
        let result = self
            .rpc
            .call(chain, "eth_sendRawTransaction", &json!([raw]))
            .await
            .map_err(|err| match err {
                ProviderError::Rejected(message) => SubmissionError::Broadcast(message),
                other => SubmissionError::BroadcastTransport(other),
            })?;

        match result.as_str().map(H256::from_str) {
            Some(Ok(node_hash)) => {
                if node_hash != signed.hash {
                    warn!(local = ?signed.hash, node = ?node_hash, "node reported a different transaction hash");
                }
                Ok(node_hash)
            }
            _ => {
                warn!(result = %result, "node returned no transaction hash, using the locally computed one");
                Ok(signed.hash)
            }
        }
    }

    /// Poll until a receipt appears, the attempts run out or `max_wait` has
    /// passed. A lookup still in flight at the deadline is abandoned.
    async fn wait_for_receipt(&self, chain: &ChainTarget, tx_hash: H256) -> Result<Receipt, SubmissionError> {
        let deadline = Instant::now() + self.policy.max_wait;
        let attempts = self.policy.max_attempts();
        for attempt in 1..=attempts {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, self.receipt(chain, tx_hash)).await {
                Ok(Ok(Some(receipt))) => return Ok(receipt),
                Ok(Ok(None)) => {}
                Ok(Err(err)) => warn!(tx_hash = ?tx_hash, attempt, error = %err, "receipt lookup failed"),
                Err(_) => {
                    warn!(tx_hash = ?tx_hash, attempt, "receipt lookup still pending at the deadline");
                    break;
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if attempt == attempts || remaining.is_zero() {
                break;
            }
            sleep(self.policy.poll_interval.min(remaining)).await;
        }

        Err(SubmissionError::ConfirmationTimeout {
            tx_hash,
            waited: self.policy.max_wait,
        })
    }
}

impl PendingTransaction {
    /// EIP-155 legacy signature over this transaction. Consumes it.
    pub async fn sign(self, account: &Account) -> Result<SignedTransaction, SubmissionError> {
        let request = TransactionRequest::new()
            .from(self.from)
            .to(self.to)
            .data(self.data)
            .nonce(self.nonce)
            .gas(self.gas_limit)
            .gas_price(self.gas_price)
            .chain_id(self.chain_id);
        let tx: TypedTransaction = request.into();

        let wallet = account.signer().clone().with_chain_id(self.chain_id);
        let signature = wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| SubmissionError::Signing(e.to_string()))?;

        let raw = tx.rlp_signed(&signature);
        let hash = H256::from(keccak256(&raw));
        Ok(SignedTransaction { raw, hash })
    }
}

/// Selector followed by the ABI-encoded arguments.
pub fn encode_call(selector: [u8; 4], args: &[Token]) -> Bytes {
    let mut data = selector.to_vec();
    data.extend(abi::encode(args));
    Bytes::from(data)
}

/// Decode an `eth_getTransactionReceipt` result. `null`, or a receipt not yet
/// in a block, is `None`.
pub fn parse_receipt(result: &Value, requested: H256) -> Result<Option<Receipt>, ProviderError> {
    if result.is_null() {
        return Ok(None);
    }
    let block_number = match result.get("blockNumber") {
        None | Some(Value::Null) => return Ok(None),
        Some(value) => parse_quantity(value)?,
    };

    let tx_hash = result
        .get("transactionHash")
        .and_then(Value::as_str)
        .and_then(|s| H256::from_str(s).ok())
        .unwrap_or(requested);

    // Pre-Byzantium receipts carry no status field.
    let status = match result.get("status") {
        None | Some(Value::Null) => TxStatus::Success,
        Some(value) => {
            if parse_quantity(value)?.is_zero() {
                TxStatus::Reverted
            } else {
                TxStatus::Success
            }
        }
    };

    let gas_used = match result.get("gasUsed") {
        None | Some(Value::Null) => U256::zero(),
        Some(value) => parse_quantity(value)?,
    };

    Ok(Some(Receipt {
        tx_hash,
        block_number: block_number.low_u64(),
        status,
        gas_used,
    }))
}

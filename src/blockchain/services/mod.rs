// src/blockchain/services/mod.rs

pub mod aggregator;
pub mod transactions;

pub use aggregator::WalletAggregator;
pub use transactions::{ConfirmationPolicy, TransactionSubmitter};

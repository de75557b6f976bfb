// src/blockchain/mod.rs

pub mod cache;
pub mod contract;
pub mod key_material;
pub mod models;
pub mod normalizer;
pub mod providers;
pub mod services;

// Re-export commonly used types
pub use ethers::{
    types::{Address, H256, U256},
    utils::to_checksum,
};

//! Turning a raw private key string into a signing account, and validating
//! addresses before anything touches the network.

use std::fmt;

use ethers_signers::{LocalWallet, Signer};
use ethers::types::Address;
use ethers::utils::to_checksum;
use ethers_core::k256::ecdsa::SigningKey;
use zeroize::Zeroizing;

use crate::blockchain::models::{AddressError, KeyError};

/// An address together with the key that controls it.
///
/// Lives for one user action only. It is neither `Clone` nor serializable, and
/// its `Debug` output never includes key material.
pub struct Account {
    address: Address,
    wallet: LocalWallet,
}

impl Account {
    /// Derive an account from a hex private key (optional `0x` prefix).
    pub fn load(raw_key: &str) -> Result<Self, KeyError> {
        let trimmed = raw_key.trim();
        let hex_part = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        if hex_part.len() != 64 {
            return Err(KeyError::InvalidKey("expected 32 bytes (64 hex characters)"));
        }

        let bytes = Zeroizing::new(
            hex::decode(hex_part).map_err(|_| KeyError::InvalidKey("not valid hex"))?,
        );

        // Rejects zero and anything at or above the secp256k1 group order.
        let signing_key = SigningKey::from_slice(&bytes)
            .map_err(|_| KeyError::InvalidKey("scalar is zero or not below the curve order"))?;

        let wallet = LocalWallet::from(signing_key);
        Ok(Self {
            address: wallet.address(),
            wallet,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// EIP-55 checksummed form of the address.
    pub fn checksummed(&self) -> String {
        to_checksum(&self.address, None)
    }

    pub(crate) fn signer(&self) -> &LocalWallet {
        &self.wallet
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("address", &self.checksummed())
            .finish_non_exhaustive()
    }
}

/// Parse a `0x`-prefixed address. All-lowercase and all-uppercase input is
/// accepted as-is; mixed case must carry a valid EIP-55 checksum.
pub fn parse_address(input: &str) -> Result<Address, AddressError> {
    let trimmed = input.trim();
    let malformed = || AddressError::Malformed(trimmed.to_string());

    let hex_part = trimmed.strip_prefix("0x").ok_or_else(malformed)?;
    if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(malformed());
    }

    let bytes = hex::decode(hex_part).map_err(|_| malformed())?;
    let address = Address::from_slice(&bytes);

    let has_lower = hex_part.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = hex_part.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper && to_checksum(&address, None) != trimmed {
        return Err(AddressError::BadChecksum(trimmed.to_string()));
    }

    Ok(address)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KNOWN_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
    const KNOWN_ADDRESS: &str = "0x2c7536E3605D9C16a7a3D7b1898e529396a65c23";

    #[test]
    fn derives_known_address() {
        let account = Account::load(KNOWN_KEY).unwrap();
        assert_eq!(account.checksummed(), KNOWN_ADDRESS);
    }

    #[test]
    fn derivation_is_deterministic_and_prefix_insensitive() {
        let a = Account::load(KNOWN_KEY).unwrap();
        let b = Account::load(KNOWN_KEY.trim_start_matches("0x")).unwrap();
        let c = Account::load(&format!("  {}\n", KNOWN_KEY)).unwrap();
        assert_eq!(a.address(), b.address());
        assert_eq!(a.address(), c.address());
    }

    #[test]
    fn scalar_one_maps_to_generator_address() {
        let key = format!("0x{:064x}", 1);
        let account = Account::load(&key).unwrap();
        assert_eq!(
            account.checksummed(),
            "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf"
        );
    }

    #[test]
    fn rejects_malformed_keys() {
        let too_short = "0x1234";
        let non_hex = format!("0x{}", "zz".repeat(32));
        let zero = format!("0x{}", "00".repeat(32));
        let curve_order = "0xFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFEBAAEDCE6AF48A03BBFD25E8CD0364141";
        let above_order = "0xFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF";

        for bad in [too_short, non_hex.as_str(), zero.as_str(), curve_order, above_order, ""] {
            assert!(
                matches!(Account::load(bad), Err(KeyError::InvalidKey(_))),
                "expected InvalidKey for {bad}"
            );
        }
    }

    #[test]
    fn error_and_debug_never_echo_the_key() {
        let bad = format!("0x{}", "ab".repeat(31));
        let err = Account::load(&bad).unwrap_err();
        assert!(!err.to_string().contains(&bad[2..]));

        let account = Account::load(KNOWN_KEY).unwrap();
        let debug = format!("{:?}", account);
        assert!(debug.contains(KNOWN_ADDRESS));
        assert!(!debug.contains(&KNOWN_KEY[2..]));
    }

    #[test]
    fn parses_addresses() {
        let checksummed = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
        let lower = checksummed.to_lowercase();
        assert_eq!(parse_address(checksummed).unwrap(), parse_address(&lower).unwrap());

        let bad_checksum = "0x5aaeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
        assert!(matches!(
            parse_address(bad_checksum),
            Err(AddressError::BadChecksum(_))
        ));

        for malformed in ["", "0x", "5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed", "0x123", "0xZZZeb6053F3E94C9b9A09f33669435E7Ef1BeAed"] {
            assert!(matches!(parse_address(malformed), Err(AddressError::Malformed(_))));
        }
    }
}

//! Fixed-size identifiers shared across the node.
use std::fmt;

use borsh::{
    BorshDeserialize,
    BorshSerialize,
};
use serde::{
    Deserialize,
    Serialize,
};
use sha2::{
    Digest as _,
    Sha256,
};

pub const ADDRESS_LEN: usize = 20;
pub const TX_HASH_LEN: usize = 32;
pub const VALIDATOR_KEY_LEN: usize = 32;

/// A 20 byte account address.
#[derive(
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
#[serde(transparent)]
pub struct Address(#[serde(with = "hex::serde")] [u8; ADDRESS_LEN]);

impl Address {
    #[must_use]
    pub const fn new(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    /// The address controlled by the ed25519 key `key`: the first 20 bytes of its SHA-256 digest.
    #[must_use]
    pub fn from_public_key(key: &[u8; VALIDATOR_KEY_LEN]) -> Self {
        Self(truncate(&Sha256::digest(key)))
    }

    /// Derives the address of a contract created by `creator` with the given sequence number.
    #[must_use]
    pub fn for_contract(creator: &Address, sequence: u64) -> Self {
        let digest = Sha256::new()
            .chain_update(creator.0)
            .chain_update(sequence.to_be_bytes())
            .finalize();
        Self(truncate(&digest))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

/// The SHA-256 hash of a transaction's wire bytes.
#[derive(BorshSerialize, BorshDeserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TxHash([u8; TX_HASH_LEN]);

impl TxHash {
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; TX_HASH_LEN] {
        &self.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

/// An ed25519 validator public key.
#[derive(
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
#[serde(transparent)]
pub struct ValidatorKey(#[serde(with = "hex::serde")] [u8; VALIDATOR_KEY_LEN]);

impl ValidatorKey {
    #[must_use]
    pub const fn new(bytes: [u8; VALIDATOR_KEY_LEN]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; VALIDATOR_KEY_LEN] {
        &self.0
    }

    /// The address tendermint uses for this key, which is also the account the key signs for.
    #[must_use]
    pub fn address(&self) -> Address {
        Address::from_public_key(&self.0)
    }

    /// Returns the key as a tendermint public key, or `None` if the bytes are not a valid
    /// ed25519 point.
    #[must_use]
    pub fn to_tendermint(&self) -> Option<tendermint::PublicKey> {
        tendermint::PublicKey::from_raw_ed25519(&self.0)
    }
}

impl TryFrom<&tendermint::PublicKey> for ValidatorKey {
    type Error = InvalidValidatorKey;

    fn try_from(key: &tendermint::PublicKey) -> Result<Self, Self::Error> {
        if key.ed25519().is_none() {
            return Err(InvalidValidatorKey);
        }
        let bytes = <[u8; VALIDATOR_KEY_LEN]>::try_from(key.to_bytes().as_slice())
            .map_err(|_| InvalidValidatorKey)?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for ValidatorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("validator public key is not an ed25519 key")]
pub struct InvalidValidatorKey;

fn truncate(digest: &[u8]) -> [u8; ADDRESS_LEN] {
    let mut out = [0u8; ADDRESS_LEN];
    out.copy_from_slice(&digest[..ADDRESS_LEN]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_addresses_depend_on_creator_and_sequence() {
        let alice = Address::new([1; ADDRESS_LEN]);
        let bob = Address::new([2; ADDRESS_LEN]);
        assert_ne!(
            Address::for_contract(&alice, 1),
            Address::for_contract(&alice, 2)
        );
        assert_ne!(
            Address::for_contract(&alice, 1),
            Address::for_contract(&bob, 1)
        );
        assert_eq!(
            Address::for_contract(&alice, 1),
            Address::for_contract(&alice, 1)
        );
    }

    #[test]
    fn address_serializes_as_hex() {
        let address = Address::new([0xab; ADDRESS_LEN]);
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(ADDRESS_LEN)));
        let parsed: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, address);
    }

    #[test]
    fn validator_address_matches_tendermint_account_id() {
        // public key of the first RFC 8032 ed25519 test vector
        let key = ValidatorKey::new(
            hex::decode("d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a")
                .unwrap()
                .try_into()
                .unwrap(),
        );
        let public_key = key.to_tendermint().unwrap();
        let account_id = tendermint::account::Id::from(public_key);
        assert_eq!(account_id.as_bytes(), key.address().as_bytes());
        assert_eq!(ValidatorKey::try_from(&public_key).unwrap(), key);
    }
}

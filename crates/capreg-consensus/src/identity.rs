//! Node identity extraction.
//!
//! Operators hand over node key material as hex text. [`extract`] turns it
//! into a [`NodeIdentity`] with fixed-size keys and the packed multi-chain
//! on-chain key, or a [`ValidationError`] naming the offending field.

use std::collections::BTreeMap;

use capreg_core::ids::decode_hex;
use capreg_core::{Key32, P2pId, ValidationError};
use serde::{Deserialize, Serialize};

use crate::keys::{marshal_multichain_public_key, ChainFamily};

/// Raw key material for one node, as found in a topology file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeKeys {
    pub p2p_id: String,
    /// Ledger signer. Derived from the EVM on-chain key when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer: Option<String>,
    pub encryption_public_key: String,
    pub onchain_keys: BTreeMap<ChainFamily, String>,
    pub offchain_public_key: String,
    pub config_encryption_public_key: String,
    pub transmit_account: String,
}

/// Canonical identity of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub p2p_id: P2pId,
    #[serde(with = "onchain_keys_hex")]
    pub onchain_keys: BTreeMap<ChainFamily, Vec<u8>>,
    /// Packed form of `onchain_keys`.
    #[serde(with = "capreg_core::ids::hex_bytes")]
    pub onchain_public_key: Vec<u8>,
    pub offchain_public_key: Key32,
    pub config_encryption_public_key: Key32,
    pub transmit_account: String,
    pub signer: Key32,
    pub encryption_public_key: Key32,
}

impl NodeIdentity {
    /// On-chain key for one chain family.
    pub fn onchain_key(&self, family: ChainFamily) -> Option<&[u8]> {
        self.onchain_keys.get(&family).map(Vec::as_slice)
    }
}

/// Decode and check raw node key material.
pub fn extract(keys: &NodeKeys) -> Result<NodeIdentity, ValidationError> {
    let p2p_id = P2pId::from_hex_field("p2p_id", &keys.p2p_id)?;

    let mut onchain_keys = BTreeMap::new();
    for (family, key) in &keys.onchain_keys {
        onchain_keys.insert(*family, decode_hex("on-chain key", key)?);
    }
    let onchain_public_key = marshal_multichain_public_key(&onchain_keys)?;

    let offchain_public_key = Key32::from_hex_field("offchain_public_key", &keys.offchain_public_key)?;
    let config_encryption_public_key = Key32::from_hex_field(
        "config_encryption_public_key",
        &keys.config_encryption_public_key,
    )?;
    let encryption_public_key =
        Key32::from_hex_field("encryption_public_key", &keys.encryption_public_key)?;

    let signer = match &keys.signer {
        Some(signer) => Key32::from_hex_field("signer", signer)?,
        None => derive_signer(&onchain_keys)?,
    };

    if keys.transmit_account.trim().is_empty() {
        return Err(ValidationError::Empty("transmit_account"));
    }

    Ok(NodeIdentity {
        p2p_id,
        onchain_keys,
        onchain_public_key,
        offchain_public_key,
        config_encryption_public_key,
        transmit_account: keys.transmit_account.clone(),
        signer,
        encryption_public_key,
    })
}

/// EVM on-chain key, left-aligned in a zeroed 32-byte word.
fn derive_signer(onchain_keys: &BTreeMap<ChainFamily, Vec<u8>>) -> Result<Key32, ValidationError> {
    let evm = onchain_keys.get(&ChainFamily::Evm).ok_or_else(|| {
        ValidationError::Invalid("no signer given and no EVM on-chain key to derive one from".into())
    })?;
    if evm.len() > Key32::LEN {
        return Err(ValidationError::InvalidLength {
            field: "signer",
            expected: Key32::LEN,
            actual: evm.len(),
        });
    }
    let mut word = [0u8; 32];
    word[..evm.len()].copy_from_slice(evm);
    Ok(Key32::from_bytes(word))
}

mod onchain_keys_hex {
    use std::collections::BTreeMap;

    use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

    use crate::keys::ChainFamily;

    pub fn serialize<S: Serializer>(
        keys: &BTreeMap<ChainFamily, Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let text: BTreeMap<ChainFamily, String> =
            keys.iter().map(|(f, k)| (*f, hex::encode(k))).collect();
        text.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<ChainFamily, Vec<u8>>, D::Error> {
        let text = BTreeMap::<ChainFamily, String>::deserialize(deserializer)?;
        text.into_iter()
            .map(|(f, k)| {
                capreg_core::ids::decode_hex("on-chain key", &k)
                    .map(|bytes| (f, bytes))
                    .map_err(de::Error::custom)
            })
            .collect()
    }
}

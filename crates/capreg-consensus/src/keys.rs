//! Chain families and multi-chain on-chain public key encoding.
//!
//! A node holds at most one on-chain signing key per chain family. The
//! packed form becomes part of the signed consensus configuration, so every
//! node must derive the same bytes independently:
//!
//! ```text
//! for (family, key) in keys sorted by family:
//!     family: u8 ‖ len(key): u16 little-endian ‖ key
//! ```

use std::collections::BTreeMap;
use std::fmt;

use capreg_core::ValidationError;
use serde::{Deserialize, Serialize};

/// Chain family an on-chain key belongs to. Ordering is the encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainFamily {
    Evm,
    Solana,
    Aptos,
    Starknet,
}

impl ChainFamily {
    /// Wire tag.
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Evm => 0,
            Self::Solana => 1,
            Self::Aptos => 2,
            Self::Starknet => 3,
        }
    }

    /// Parse a wire tag.
    pub const fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Evm),
            1 => Some(Self::Solana),
            2 => Some(Self::Aptos),
            3 => Some(Self::Starknet),
            _ => None,
        }
    }

    /// Whether transmit accounts must be converted to a native address type.
    pub const fn has_native_address(self) -> bool {
        matches!(self, Self::Evm)
    }
}

impl fmt::Display for ChainFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Evm => write!(f, "evm"),
            Self::Solana => write!(f, "solana"),
            Self::Aptos => write!(f, "aptos"),
            Self::Starknet => write!(f, "starknet"),
        }
    }
}

impl std::str::FromStr for ChainFamily {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "evm" => Ok(Self::Evm),
            "solana" => Ok(Self::Solana),
            "aptos" => Ok(Self::Aptos),
            "starknet" => Ok(Self::Starknet),
            other => Err(ValidationError::Invalid(format!("unknown chain family {other:?}"))),
        }
    }
}

/// Pack per-family on-chain keys into one canonical byte string.
pub fn marshal_multichain_public_key(
    keys: &BTreeMap<ChainFamily, Vec<u8>>,
) -> Result<Vec<u8>, ValidationError> {
    if keys.is_empty() {
        return Err(ValidationError::Empty("on-chain keys"));
    }

    let mut seen: BTreeMap<&[u8], ChainFamily> = BTreeMap::new();
    let mut out = Vec::with_capacity(keys.values().map(|k| k.len() + 3).sum());
    for (family, key) in keys {
        if key.is_empty() {
            return Err(ValidationError::Empty("on-chain key"));
        }
        let len = u16::try_from(key.len()).map_err(|_| ValidationError::InvalidLength {
            field: "on-chain key",
            expected: u16::MAX as usize,
            actual: key.len(),
        })?;
        if let Some(first) = seen.insert(key.as_slice(), *family) {
            return Err(ValidationError::DuplicateChainKey {
                first: first.to_string(),
                second: family.to_string(),
            });
        }
        out.push(family.as_u8());
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(key);
    }
    Ok(out)
}

/// Reverse of [`marshal_multichain_public_key`].
pub fn unmarshal_multichain_public_key(
    mut data: &[u8],
) -> Result<BTreeMap<ChainFamily, Vec<u8>>, ValidationError> {
    let mut keys = BTreeMap::new();
    let mut last: Option<ChainFamily> = None;
    while !data.is_empty() {
        if data.len() < 3 {
            return Err(ValidationError::Invalid("truncated multi-chain key header".into()));
        }
        let family = ChainFamily::from_u8(data[0])
            .ok_or_else(|| ValidationError::Invalid(format!("unknown chain family tag {}", data[0])))?;
        if last.is_some_and(|prev| prev >= family) {
            return Err(ValidationError::Invalid("multi-chain key is not canonical".into()));
        }
        let len = u16::from_le_bytes([data[1], data[2]]) as usize;
        let rest = &data[3..];
        if rest.len() < len {
            return Err(ValidationError::InvalidLength {
                field: "on-chain key",
                expected: len,
                actual: rest.len(),
            });
        }
        keys.insert(family, rest[..len].to_vec());
        last = Some(family);
        data = &rest[len..];
    }
    if keys.is_empty() {
        return Err(ValidationError::Empty("on-chain keys"));
    }
    Ok(keys)
}

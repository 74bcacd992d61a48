//! Fixed-size identifiers and keys.
//!
//! Every identifier is a plain byte array with a lowercase hex text form.
//! Parsing accepts an optional `0x` prefix. Serde uses the hex form so that
//! topology files and ledger snapshots stay readable.

use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ValidationError;

/// Decode a hex string (optional `0x` prefix) into exactly `N` bytes.
pub fn decode_fixed<const N: usize>(field: &'static str, s: &str) -> Result<[u8; N], ValidationError> {
    let bytes = decode_hex(field, s)?;
    if bytes.len() != N {
        return Err(ValidationError::InvalidLength {
            field,
            expected: N,
            actual: bytes.len(),
        });
    }
    let mut arr = [0u8; N];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

/// Decode a hex string of any length (optional `0x` prefix).
pub fn decode_hex(field: &'static str, s: &str) -> Result<Vec<u8>, ValidationError> {
    let trimmed = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(trimmed).map_err(|e| ValidationError::InvalidHex {
        field,
        reason: e.to_string(),
    })
}

/// Serde adapter for opaque byte payloads as hex strings.
pub mod hex_bytes {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::decode_hex("bytes", &s).map_err(de::Error::custom)
    }
}

macro_rules! fixed_bytes {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            /// Length in bytes.
            pub const LEN: usize = $len;

            /// Create from raw bytes.
            pub const fn from_bytes(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// Get the raw bytes.
            pub const fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Convert to lowercase hex (no prefix).
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Parse from hex, reporting errors against the type name.
            pub fn from_hex(s: &str) -> Result<Self, ValidationError> {
                Self::from_hex_field(stringify!($name), s)
            }

            /// Parse from hex, reporting errors against `field`.
            pub fn from_hex_field(field: &'static str, s: &str) -> Result<Self, ValidationError> {
                decode_fixed::<$len>(field, s).map(Self)
            }

            /// Check for the all-zero value.
            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                // Short form for logs
                write!(f, "{}..", &self.to_hex()[..8])
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }

        impl std::str::FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_hex(s)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(de::Error::custom)
            }
        }
    };
}

fixed_bytes!(
    /// Stable peer identifier of a node.
    P2pId, 32
);

fixed_bytes!(
    /// Deterministic identity of a capability, derived from name and version.
    HashedCapabilityId, 32
);

fixed_bytes!(
    /// A 32-byte public key (ledger signer, encryption keys, off-chain keys).
    Key32, 32
);

fixed_bytes!(
    /// A 20-byte account address.
    Address, 20
);

fixed_bytes!(
    /// Ledger transaction identifier.
    TxId, 32
);

fixed_bytes!(
    /// Order-independent hash of a DON member set.
    MemberSetHash, 32
);

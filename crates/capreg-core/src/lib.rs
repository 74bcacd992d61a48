//! Capability Registry Core
//!
//! Data model, identities and ledger interface shared by the capreg crates.
//!
//! # Identities
//!
//! The ledger assigns numeric ids to node operators and DONs only after they
//! are created, so reconciliation never matches on those. Instead:
//!
//! - a capability is identified by a Blake3 hash of `(labelled_name, version)`
//! - a node is identified by its 32-byte peer id
//! - a DON is identified by a Blake3 hash of its **sorted** member set
//!
//! Hash inputs are length-prefixed, so `("ab", "c")` and `("a", "bc")`
//! never collide.

pub mod error;
pub mod ids;
pub mod ledger;
pub mod memory;
pub mod models;

pub use error::{EntityKind, Error, Result, ValidationError};
pub use ids::{Address, HashedCapabilityId, Key32, MemberSetHash, P2pId, TxId};
pub use ledger::{PendingTx, Receipt, RegistryLedger};
pub use memory::{LedgerSnapshot, MemoryLedger};
pub use models::{
    Capability, CapabilityConfiguration, CapabilityInfo, CapabilityKey, CapabilityType, DonInfo,
    DonParams, NodeInfo, NodeOperator, NodeOperatorInfo, NodeParams, ResponseType,
};

const CAPABILITY_DOMAIN: &[u8] = b"capreg:capability:v1";
const MEMBER_SET_DOMAIN: &[u8] = b"capreg:don-members:v1";

fn update_prefixed(hasher: &mut blake3::Hasher, data: &[u8]) {
    hasher.update(&(data.len() as u64).to_le_bytes());
    hasher.update(data);
}

/// Hash a capability name and version to its registry identity.
pub fn hashed_capability_id(labelled_name: &str, version: &str) -> HashedCapabilityId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(CAPABILITY_DOMAIN);
    update_prefixed(&mut hasher, labelled_name.as_bytes());
    update_prefixed(&mut hasher, version.as_bytes());
    HashedCapabilityId(*hasher.finalize().as_bytes())
}

/// Hash a DON member set. Order and repeats do not affect the result.
pub fn member_set_hash(members: &[P2pId]) -> MemberSetHash {
    let mut sorted = members.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut hasher = blake3::Hasher::new();
    hasher.update(MEMBER_SET_DOMAIN);
    hasher.update(&(sorted.len() as u64).to_le_bytes());
    for member in &sorted {
        hasher.update(member.as_bytes());
    }
    MemberSetHash(*hasher.finalize().as_bytes())
}

//! Error types shared by every capreg crate.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::ids::{HashedCapabilityId, P2pId, TxId};

/// Result type for capreg operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Kind of registry entity named in an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Capability,
    NodeOperator,
    Node,
    Don,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Capability => write!(f, "capability"),
            Self::NodeOperator => write!(f, "node operator"),
            Self::Node => write!(f, "node"),
            Self::Don => write!(f, "DON"),
        }
    }
}

/// Malformed desired state, detected before any ledger mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Input was not valid hex.
    #[error("invalid hex in {field}: {reason}")]
    InvalidHex { field: &'static str, reason: String },

    /// Input decoded to the wrong number of bytes.
    #[error("{field} must be {expected} bytes, got {actual}")]
    InvalidLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A node is referenced without a node operator assignment.
    #[error("node {p2p_id} has no node operator assignment")]
    MissingNodeOperator { p2p_id: P2pId },

    /// One node is declared twice with different operators or keys.
    #[error("node {p2p_id} is declared with conflicting {what}")]
    ConflictingNode { p2p_id: P2pId, what: &'static str },

    /// The same on-chain key value is used for two chain families.
    #[error("on-chain key reused across chain families {first} and {second}")]
    DuplicateChainKey { first: String, second: String },

    /// Two distinct nodes share an on-chain signing key.
    #[error("nodes {first} and {second} share an on-chain signing key")]
    DuplicateSigningKey { first: P2pId, second: P2pId },

    /// A node appears twice in one member list.
    #[error("node {p2p_id} appears twice in {context}")]
    DuplicateMember { p2p_id: P2pId, context: String },

    /// Fault tolerance violates `n >= 3f + 1`.
    #[error("fault tolerance f={f} is invalid for {n} members (need n >= 3f+1)")]
    FaultTolerance { n: usize, f: u8 },

    /// Two capability configurations for one DON share a capability.
    #[error("capability {capability_id} is configured twice for one DON")]
    DuplicateDonCapability { capability_id: HashedCapabilityId },

    /// Two desired DONs have the same member set.
    #[error("DONs {first} and {second} have identical member sets")]
    DuplicateDonMembers { first: String, second: String },

    /// A required input was empty.
    #[error("{0} must not be empty")]
    Empty(&'static str),

    /// Any other malformed input.
    #[error("{0}")]
    Invalid(String),
}

/// Errors that can occur while reconciling a registry.
#[derive(Debug, Error)]
pub enum Error {
    /// Desired state is malformed.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The ledger already holds the entity.
    #[error("{entity} already exists: {key}")]
    AlreadyExists { entity: EntityKind, key: String },

    /// An update targeted an entity the ledger does not hold.
    #[error("{entity} not found: {key}")]
    NotFound { entity: EntityKind, key: String },

    /// A transaction reverted or could not be confirmed.
    #[error("ledger error ({}): {reason}", tx_label(.tx))]
    Ledger { tx: Option<TxId>, reason: String },

    /// An internal invariant does not hold.
    #[error("consistency error: {0}")]
    Consistency(String),

    /// Confirmation did not complete before the deadline.
    #[error("confirmation of tx {} timed out after {after:?}", .tx.to_hex())]
    Timeout { tx: TxId, after: Duration },

    /// Confirmation was cancelled by the caller.
    #[error("confirmation of tx {} cancelled", .tx.to_hex())]
    Cancelled { tx: TxId },

    /// The external consensus config generator failed.
    #[error("consensus config generator failed: {0}")]
    Generator(String),
}

fn tx_label(tx: &Option<TxId>) -> String {
    match tx {
        Some(tx) => format!("tx {}", tx.to_hex()),
        None => "not submitted".to_string(),
    }
}

impl Error {
    /// Build a generic revert for `tx`.
    pub fn reverted(tx: Option<TxId>, reason: impl Into<String>) -> Self {
        Self::Ledger {
            tx,
            reason: reason.into(),
        }
    }

    /// Check whether this is an "already exists" collision.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Outside the capability registrar a collision means the desired
    /// topology disagrees with the ledger.
    pub fn collision_as_consistency(self, context: &str) -> Self {
        match self {
            Self::AlreadyExists { entity, key } => {
                Self::Consistency(format!("{context}: unexpected existing {entity} {key}"))
            }
            other => other,
        }
    }

    /// Check whether the error was raised before any ledger mutation.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

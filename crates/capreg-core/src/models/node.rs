//! Node operator and node models.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::ids::{Address, HashedCapabilityId, Key32, P2pId};

/// Administrative owner of one or more nodes.
///
/// Matched against the ledger by `(admin, name)`; the numeric id is only
/// known once the ledger has assigned it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeOperator {
    pub admin: Address,
    pub name: String,
}

impl NodeOperator {
    pub fn new(admin: Address, name: impl Into<String>) -> Self {
        Self {
            admin,
            name: name.into(),
        }
    }
}

/// A registered node operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeOperatorInfo {
    pub id: u32,
    #[serde(flatten)]
    pub operator: NodeOperator,
}

/// Parameters for adding or updating a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeParams {
    pub node_operator_id: u32,
    pub signer: Key32,
    pub p2p_id: P2pId,
    pub encryption_public_key: Key32,
    pub hashed_capability_ids: BTreeSet<HashedCapabilityId>,
}

/// A node as read back from the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_operator_id: u32,
    /// Bumped on every update.
    pub config_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_don_id: Option<u32>,
    pub signer: Key32,
    pub p2p_id: P2pId,
    pub encryption_public_key: Key32,
    pub hashed_capability_ids: BTreeSet<HashedCapabilityId>,
    #[serde(default)]
    pub capabilities_don_ids: BTreeSet<u32>,
}

impl NodeInfo {
    /// The writable part of this node.
    pub fn params(&self) -> NodeParams {
        NodeParams {
            node_operator_id: self.node_operator_id,
            signer: self.signer,
            p2p_id: self.p2p_id,
            encryption_public_key: self.encryption_public_key,
            hashed_capability_ids: self.hashed_capability_ids.clone(),
        }
    }

    /// Check whether the node advertises a capability.
    pub fn supports(&self, capability_id: &HashedCapabilityId) -> bool {
        self.hashed_capability_ids.contains(capability_id)
    }
}

//! Per-node capability sets.
//!
//! Desired capabilities arrive already flattened per node across every DON
//! of the pass. The builder hashes them, merges with what the ledger holds
//! according to [`CapabilityMode`], and decides whether each node must be
//! added, updated or left alone.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use capreg_core::{
    Capability, Error, HashedCapabilityId, Key32, NodeParams, P2pId, RegistryLedger, Result,
    ValidationError,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How desired capabilities combine with a node's current set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityMode {
    /// Current set plus desired. Never removes a capability.
    #[default]
    Append,
    /// Exactly the desired set.
    Replace,
}

impl fmt::Display for CapabilityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Append => write!(f, "append"),
            Self::Replace => write!(f, "replace"),
        }
    }
}

impl FromStr for CapabilityMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "append" => Ok(Self::Append),
            "replace" => Ok(Self::Replace),
            other => Err(format!("expected append or replace, got {other:?}")),
        }
    }
}

/// Merge a node's current capability set with the desired one.
pub fn merge_capabilities(
    current: Option<&BTreeSet<HashedCapabilityId>>,
    desired: &BTreeSet<HashedCapabilityId>,
    mode: CapabilityMode,
) -> BTreeSet<HashedCapabilityId> {
    match (mode, current) {
        (CapabilityMode::Append, Some(current)) => current.union(desired).copied().collect(),
        _ => desired.clone(),
    }
}

/// Operator and keys a node is registered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeAssignment {
    pub node_operator_id: u32,
    pub signer: Key32,
    pub encryption_public_key: Key32,
}

/// What a node write will do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeAction {
    Add,
    Update,
    Unchanged,
}

/// Planned write for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePlan {
    pub action: NodeAction,
    pub params: NodeParams,
}

/// Builds [`NodePlan`]s from desired capabilities and ledger state.
pub struct NodeParamsBuilder<'a> {
    ledger: &'a dyn RegistryLedger,
    capability_ids: &'a BTreeMap<Capability, HashedCapabilityId>,
}

impl<'a> NodeParamsBuilder<'a> {
    pub fn new(
        ledger: &'a dyn RegistryLedger,
        capability_ids: &'a BTreeMap<Capability, HashedCapabilityId>,
    ) -> Self {
        Self {
            ledger,
            capability_ids,
        }
    }

    /// Plan one write per node, sorted by peer id.
    pub async fn build(
        &self,
        desired: &BTreeMap<P2pId, BTreeSet<Capability>>,
        assignment: &BTreeMap<P2pId, NodeAssignment>,
        mode: CapabilityMode,
    ) -> Result<Vec<NodePlan>> {
        let mut plans = Vec::with_capacity(desired.len());
        for (p2p_id, capabilities) in desired {
            let assigned = assignment
                .get(p2p_id)
                .ok_or(ValidationError::MissingNodeOperator { p2p_id: *p2p_id })?;
            let wanted = self.hash_all(capabilities)?;
            let current = self.ledger.get_node(p2p_id).await?;

            let params = NodeParams {
                node_operator_id: assigned.node_operator_id,
                signer: assigned.signer,
                p2p_id: *p2p_id,
                encryption_public_key: assigned.encryption_public_key,
                hashed_capability_ids: merge_capabilities(
                    current.as_ref().map(|n| &n.hashed_capability_ids),
                    &wanted,
                    mode,
                ),
            };

            let action = match &current {
                None => NodeAction::Add,
                Some(node) if node.params() == params => NodeAction::Unchanged,
                Some(_) => NodeAction::Update,
            };
            debug!(
                p2p_id = %p2p_id,
                ?action,
                %mode,
                capabilities = params.hashed_capability_ids.len(),
                "Planned node"
            );
            plans.push(NodePlan { action, params });
        }
        Ok(plans)
    }

    fn hash_all(&self, capabilities: &BTreeSet<Capability>) -> Result<BTreeSet<HashedCapabilityId>> {
        capabilities
            .iter()
            .map(|cap| {
                self.capability_ids.get(cap).copied().ok_or_else(|| {
                    Error::Consistency(format!("capability {} was not registered", cap.key()))
                })
            })
            .collect()
    }
}

//! Desired topology input.
//!
//! A [`DesiredTopology`] is what operators write: a list of DONs, each with
//! its capabilities and the node operators whose nodes form it. It is
//! validated once into a [`ValidatedTopology`] before any ledger call.
//! Consensus configurations are assembled during validation, so generator
//! failures also surface before the ledger is touched.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use capreg_consensus::{
    check_fault_tolerance, extract, ConsensusConfigAssembler, NodeIdentity, NodeKeys,
    TimingParameters,
};
use capreg_core::ids::hex_bytes;
use capreg_core::{
    Address, Capability, CapabilityConfiguration, CapabilityKey, Error, Key32, MemberSetHash,
    NodeOperator, P2pId, Result, ValidationError,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::node_params::NodeAssignment;

fn default_true() -> bool {
    true
}

/// Full desired state for one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredTopology {
    pub dons: Vec<DonSpec>,
}

/// One desired DON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonSpec {
    /// Label for logs and reports. Not stored on the ledger.
    pub name: String,
    pub f: u8,
    #[serde(default = "default_true")]
    pub is_public: bool,
    #[serde(default = "default_true")]
    pub accepts_workflows: bool,
    pub capabilities: Vec<CapabilitySpec>,
    pub node_operators: Vec<OperatorSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus: Option<ConsensusSpec>,
}

/// A capability the DON exposes, with its DON-specific configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySpec {
    #[serde(flatten)]
    pub capability: Capability,
    #[serde(default, with = "hex_bytes")]
    pub config: Vec<u8>,
}

/// A node operator and the nodes it contributes to a DON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorSpec {
    pub admin: Address,
    pub name: String,
    pub nodes: Vec<NodeKeys>,
}

impl OperatorSpec {
    pub fn operator(&self) -> NodeOperator {
        NodeOperator::new(self.admin, self.name.clone())
    }
}

/// Request for an assembled consensus configuration.
///
/// The packed config becomes the DON's configuration for `capability`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusSpec {
    pub capability: CapabilityKey,
    #[serde(default)]
    pub timing: TimingParameters,
}

/// A node after key extraction, with its operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedNode {
    pub identity: NodeIdentity,
    pub operator: NodeOperator,
}

/// A DON after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedDon {
    pub name: String,
    pub f: u8,
    pub is_public: bool,
    pub accepts_workflows: bool,
    /// Declared order.
    pub members: Vec<P2pId>,
    pub capabilities: Vec<Capability>,
    /// One per capability, in declared order.
    pub configs: Vec<(Capability, Vec<u8>)>,
}

/// Desired state that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedTopology {
    /// Every capability of every DON, first occurrence order.
    pub capabilities: Vec<Capability>,
    /// Every operator, first occurrence order.
    pub operators: Vec<NodeOperator>,
    pub nodes: BTreeMap<P2pId, ValidatedNode>,
    pub dons: Vec<ValidatedDon>,
}

impl DesiredTopology {
    /// Parse from JSON.
    pub fn from_json(json: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Validate without consensus config assembly.
    ///
    /// Fails if any DON requests a consensus config.
    pub fn validate(&self) -> Result<ValidatedTopology> {
        self.validate_with(None)
    }

    /// Validate, assembling consensus configs with `assembler`.
    pub fn validate_with(
        &self,
        assembler: Option<&ConsensusConfigAssembler>,
    ) -> Result<ValidatedTopology> {
        if self.dons.is_empty() {
            return Err(ValidationError::Empty("DONs").into());
        }

        let mut capabilities: Vec<Capability> = Vec::new();
        let mut capability_by_key: HashMap<CapabilityKey, Capability> = HashMap::new();
        let mut operators: Vec<NodeOperator> = Vec::new();
        let mut nodes: BTreeMap<P2pId, ValidatedNode> = BTreeMap::new();
        let mut signers: HashMap<Key32, P2pId> = HashMap::new();
        let mut member_sets: HashMap<MemberSetHash, &str> = HashMap::new();
        let mut dons = Vec::with_capacity(self.dons.len());

        for spec in &self.dons {
            if spec.capabilities.is_empty() {
                return Err(ValidationError::Invalid(format!("DON {} has no capabilities", spec.name)).into());
            }

            let mut don_caps = Vec::with_capacity(spec.capabilities.len());
            let mut don_ids = BTreeSet::new();
            for cap_spec in &spec.capabilities {
                let cap = &cap_spec.capability;
                if !don_ids.insert(cap.id()) {
                    return Err(ValidationError::DuplicateDonCapability {
                        capability_id: cap.id(),
                    }
                    .into());
                }
                match capability_by_key.get(&cap.key()) {
                    Some(known) if known != cap => {
                        return Err(ValidationError::Invalid(format!(
                            "capability {} is declared with conflicting attributes",
                            cap.key()
                        ))
                        .into());
                    }
                    Some(_) => {}
                    None => {
                        capability_by_key.insert(cap.key(), cap.clone());
                        capabilities.push(cap.clone());
                    }
                }
                don_caps.push(cap.clone());
            }

            let mut members = Vec::new();
            let mut member_ids = Vec::new();
            for op_spec in &spec.node_operators {
                let operator = op_spec.operator();
                if !operators.contains(&operator) {
                    operators.push(operator.clone());
                }
                for keys in &op_spec.nodes {
                    let identity = extract(keys)?;
                    let p2p_id = identity.p2p_id;
                    if member_ids.contains(&p2p_id) {
                        return Err(ValidationError::DuplicateMember {
                            p2p_id,
                            context: format!("DON {}", spec.name),
                        }
                        .into());
                    }

                    match nodes.get(&p2p_id) {
                        Some(known) if known.operator != operator => {
                            return Err(ValidationError::ConflictingNode {
                                p2p_id,
                                what: "node operator",
                            }
                            .into());
                        }
                        Some(known) if known.identity != identity => {
                            return Err(ValidationError::ConflictingNode { p2p_id, what: "keys" }.into());
                        }
                        Some(_) => {}
                        None => {
                            if let Some(first) = signers.insert(identity.signer, p2p_id) {
                                return Err(ValidationError::DuplicateSigningKey {
                                    first,
                                    second: p2p_id,
                                }
                                .into());
                            }
                            nodes.insert(
                                p2p_id,
                                ValidatedNode {
                                    identity: identity.clone(),
                                    operator: operator.clone(),
                                },
                            );
                        }
                    }
                    member_ids.push(p2p_id);
                    members.push(identity);
                }
            }

            check_fault_tolerance(member_ids.len(), spec.f)?;

            let hash = capreg_core::member_set_hash(&member_ids);
            if let Some(first) = member_sets.insert(hash, &spec.name) {
                return Err(ValidationError::DuplicateDonMembers {
                    first: first.to_string(),
                    second: spec.name.clone(),
                }
                .into());
            }

            let mut configs: Vec<(Capability, Vec<u8>)> = spec
                .capabilities
                .iter()
                .map(|c| (c.capability.clone(), c.config.clone()))
                .collect();
            if let Some(consensus) = &spec.consensus {
                let packed = assemble_consensus(spec, consensus, &members, assembler)?;
                let slot = configs
                    .iter_mut()
                    .find(|(cap, _)| cap.key() == consensus.capability)
                    .ok_or_else(|| {
                        ValidationError::Invalid(format!(
                            "DON {} requests a consensus config for {} which it does not expose",
                            spec.name, consensus.capability
                        ))
                    })?;
                if !slot.1.is_empty() {
                    return Err(ValidationError::Invalid(format!(
                        "DON {} sets an explicit config for consensus capability {}",
                        spec.name, consensus.capability
                    ))
                    .into());
                }
                slot.1 = packed;
            }

            debug!(
                don = %spec.name,
                members = member_ids.len(),
                f = spec.f,
                capabilities = don_caps.len(),
                "Validated DON"
            );
            dons.push(ValidatedDon {
                name: spec.name.clone(),
                f: spec.f,
                is_public: spec.is_public,
                accepts_workflows: spec.accepts_workflows,
                members: member_ids,
                capabilities: don_caps,
                configs,
            });
        }

        Ok(ValidatedTopology {
            capabilities,
            operators,
            nodes,
            dons,
        })
    }
}

fn assemble_consensus(
    spec: &DonSpec,
    consensus: &ConsensusSpec,
    members: &[NodeIdentity],
    assembler: Option<&ConsensusConfigAssembler>,
) -> Result<Vec<u8>> {
    let assembler = assembler.ok_or_else(|| {
        ValidationError::Invalid(format!(
            "DON {} requests a consensus config but no generator is configured",
            spec.name
        ))
    })?;
    let config = assembler.assemble(members, &consensus.timing, spec.f)?;
    debug!(
        don = %spec.name,
        oracles = config.n(),
        version = config.offchain_config_version,
        "Assembled consensus config"
    );
    config.to_bytes()
}

impl ValidatedTopology {
    /// Desired capabilities per node, flattened across every DON.
    pub fn desired_capabilities(&self) -> BTreeMap<P2pId, BTreeSet<Capability>> {
        let mut desired: BTreeMap<P2pId, BTreeSet<Capability>> = BTreeMap::new();
        for don in &self.dons {
            for member in &don.members {
                desired
                    .entry(*member)
                    .or_default()
                    .extend(don.capabilities.iter().cloned());
            }
        }
        desired
    }

    /// Operator and keys per node, given ledger-assigned operator ids.
    pub fn assignment(
        &self,
        operator_ids: &BTreeMap<NodeOperator, u32>,
    ) -> Result<BTreeMap<P2pId, NodeAssignment>> {
        self.nodes
            .iter()
            .map(|(p2p_id, node)| {
                let node_operator_id = *operator_ids.get(&node.operator).ok_or_else(|| {
                    Error::Consistency(format!(
                        "node operator {} was not registered",
                        node.operator.name
                    ))
                })?;
                Ok((
                    *p2p_id,
                    NodeAssignment {
                        node_operator_id,
                        signer: node.identity.signer,
                        encryption_public_key: node.identity.encryption_public_key,
                    },
                ))
            })
            .collect()
    }
}

impl ValidatedDon {
    /// Capability configurations with resolved ids.
    pub fn capability_configurations(
        &self,
        ids: &BTreeMap<Capability, capreg_core::HashedCapabilityId>,
    ) -> Result<Vec<CapabilityConfiguration>> {
        self.configs
            .iter()
            .map(|(cap, config)| {
                let id = ids.get(cap).ok_or_else(|| {
                    Error::Consistency(format!("capability {} was not registered", cap.key()))
                })?;
                Ok(CapabilityConfiguration::new(*id, config.clone()))
            })
            .collect()
    }
}

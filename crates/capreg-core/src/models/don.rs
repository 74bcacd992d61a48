//! DON (Decentralized Oracle Network) model.

use serde::{Deserialize, Serialize};

use crate::ids::{HashedCapabilityId, MemberSetHash, P2pId};
use crate::models::CapabilityConfiguration;

/// Parameters for creating or updating a DON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonParams {
    /// On-ledger member order.
    pub members: Vec<P2pId>,
    pub capability_configurations: Vec<CapabilityConfiguration>,
    pub is_public: bool,
    pub accepts_workflows: bool,
    pub f: u8,
}

impl DonParams {
    /// Identity of the member set.
    pub fn member_hash(&self) -> MemberSetHash {
        crate::member_set_hash(&self.members)
    }
}

/// A DON as read back from the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonInfo {
    /// Assigned by the ledger; not used for matching.
    pub id: u32,
    pub config_count: u32,
    pub f: u8,
    pub is_public: bool,
    pub accepts_workflows: bool,
    pub members: Vec<P2pId>,
    pub capability_configurations: Vec<CapabilityConfiguration>,
}

impl DonInfo {
    /// Identity of the member set.
    pub fn member_hash(&self) -> MemberSetHash {
        crate::member_set_hash(&self.members)
    }

    /// Configuration for one capability, if the DON exposes it.
    pub fn config_for(&self, capability_id: &HashedCapabilityId) -> Option<&CapabilityConfiguration> {
        self.capability_configurations
            .iter()
            .find(|c| &c.capability_id == capability_id)
    }

    /// The writable part of this DON.
    pub fn params(&self) -> DonParams {
        DonParams {
            members: self.members.clone(),
            capability_configurations: self.capability_configurations.clone(),
            is_public: self.is_public,
            accepts_workflows: self.accepts_workflows,
            f: self.f,
        }
    }
}

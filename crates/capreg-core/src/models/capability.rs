//! Capability model.

use serde::{Deserialize, Serialize};

use crate::ids::{hex_bytes, Address, HashedCapabilityId};

/// Role a capability plays in a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityType {
    Trigger,
    Action,
    Consensus,
    Target,
}

impl CapabilityType {
    /// Ledger encoding.
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Trigger => 0,
            Self::Action => 1,
            Self::Consensus => 2,
            Self::Target => 3,
        }
    }
}

/// Shape of the response a capability produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    #[default]
    Report,
    ObservationIdentical,
}

/// The `(labelled_name, version)` pair a capability identity is derived from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CapabilityKey {
    pub labelled_name: String,
    pub version: String,
}

impl CapabilityKey {
    /// Hashed identity of this key.
    pub fn id(&self) -> HashedCapabilityId {
        crate::hashed_capability_id(&self.labelled_name, &self.version)
    }
}

impl std::fmt::Display for CapabilityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.labelled_name, self.version)
    }
}

/// A declared, versioned unit of functionality a node can host.
///
/// Two capabilities with equal name and version are the same registry
/// entity; the remaining fields only matter when it is first registered.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Capability {
    pub labelled_name: String,
    /// Opaque, matched exactly.
    pub version: String,
    pub capability_type: CapabilityType,
    #[serde(default)]
    pub response_type: ResponseType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration_contract: Option<Address>,
}

impl Capability {
    /// Create a capability with a report response and no config contract.
    pub fn new(
        labelled_name: impl Into<String>,
        version: impl Into<String>,
        capability_type: CapabilityType,
    ) -> Self {
        Self {
            labelled_name: labelled_name.into(),
            version: version.into(),
            capability_type,
            response_type: ResponseType::Report,
            configuration_contract: None,
        }
    }

    /// Set the response type.
    #[must_use]
    pub fn with_response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    /// Set the configuration contract.
    #[must_use]
    pub fn with_configuration_contract(mut self, contract: Address) -> Self {
        self.configuration_contract = Some(contract);
        self
    }

    /// Identity key.
    pub fn key(&self) -> CapabilityKey {
        CapabilityKey {
            labelled_name: self.labelled_name.clone(),
            version: self.version.clone(),
        }
    }

    /// Hashed identity.
    pub fn id(&self) -> HashedCapabilityId {
        crate::hashed_capability_id(&self.labelled_name, &self.version)
    }
}

/// A registered capability as read back from the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityInfo {
    pub hashed_id: HashedCapabilityId,
    #[serde(flatten)]
    pub capability: Capability,
    #[serde(default)]
    pub is_deprecated: bool,
}

/// Per-DON configuration of one capability.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CapabilityConfiguration {
    pub capability_id: HashedCapabilityId,
    #[serde(with = "hex_bytes", default)]
    pub config: Vec<u8>,
}

impl CapabilityConfiguration {
    pub fn new(capability_id: HashedCapabilityId, config: Vec<u8>) -> Self {
        Self { capability_id, config }
    }
}

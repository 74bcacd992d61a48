//! Registry data model.
//!
//! # Core Types
//!
//! - [`Capability`] - versioned unit of functionality, identified by name and version
//! - [`NodeOperator`] - administrative owner of nodes
//! - [`NodeParams`] / [`NodeInfo`] - a node as written to / read from the ledger
//! - [`DonParams`] / [`DonInfo`] - a DON as written to / read from the ledger

mod capability;
mod don;
mod node;

pub use capability::{
    Capability, CapabilityConfiguration, CapabilityInfo, CapabilityKey, CapabilityType,
    ResponseType,
};
pub use don::{DonInfo, DonParams};
pub use node::{NodeInfo, NodeOperator, NodeOperatorInfo, NodeParams};

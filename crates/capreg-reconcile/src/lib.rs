//! Capability Registry Reconciliation
//!
//! Brings a registry ledger in line with a desired topology of DONs,
//! writing only what differs:
//!
//! - [`registrar`]: capability registration with collision fallback and a
//!   shared id cache
//! - [`node_params`]: per-node capability sets in Append or Replace mode
//! - [`don`]: DON matching by member set and create/update planning
//! - [`reconciler`]: the step-by-step pass and its report
//! - [`topology`]: desired-state input and boundary validation
//! - [`confirm`]: confirmation deadlines and cancellation
//! - [`config`]: environment-driven settings
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use capreg_core::MemoryLedger;
//! use capreg_reconcile::{DesiredTopology, DonReconciler, ReconcileConfig};
//!
//! # async fn run(json: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let desired = DesiredTopology::from_json(json)?;
//! let ledger = Arc::new(MemoryLedger::new());
//! let reconciler = DonReconciler::new(ledger, ReconcileConfig::from_env()?);
//! let report = reconciler.reconcile(&desired).await?;
//! println!("{}", report.to_json()?);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod confirm;
pub mod don;
pub mod error;
pub mod node_params;
pub mod reconciler;
pub mod registrar;
pub mod topology;

pub use config::ReconcileConfig;
pub use confirm::{confirm, ConfirmOptions};
pub use don::{plan_don, DesiredDon, DonAction, DonMatcher, DonOperation};
pub use error::{ConfigError, Error, PassError, Result, Step};
pub use node_params::{
    merge_capabilities, CapabilityMode, NodeAction, NodeAssignment, NodeParamsBuilder, NodePlan,
};
pub use reconciler::{
    CapabilityOutcome, DonReconciler, DonReport, NodeOutcome, ReconcileReport,
};
pub use registrar::{CapabilityCache, CapabilityRegistrar, Registration};
pub use topology::{
    CapabilitySpec, ConsensusSpec, DesiredTopology, DonSpec, OperatorSpec, ValidatedDon,
    ValidatedNode, ValidatedTopology,
};

//! Registry ledger interface.
//!
//! The ledger is the service of record for capabilities, node operators,
//! nodes and DONs. Writes return a [`PendingTx`] that must be confirmed
//! before any dependent step reads the result. Reads are point-in-time.

use async_trait::async_trait;

use crate::error::Result;
use crate::ids::{HashedCapabilityId, P2pId, TxId};
use crate::models::{
    Capability, CapabilityInfo, DonInfo, DonParams, NodeInfo, NodeOperator, NodeOperatorInfo,
    NodeParams,
};

/// A submitted, not yet confirmed, ledger write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTx {
    pub id: TxId,
    /// Ledger method that produced the transaction (for diagnostics).
    pub method: &'static str,
}

/// Proof that a write was durably committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    pub tx: TxId,
    pub block: u64,
}

/// Typed access to a capability registry.
///
/// Implementations must not be mutated by two reconciliation passes at once;
/// callers serialize access externally.
#[async_trait]
pub trait RegistryLedger: Send + Sync {
    async fn add_capabilities(&self, capabilities: &[Capability]) -> Result<PendingTx>;

    async fn add_node_operators(&self, operators: &[NodeOperator]) -> Result<PendingTx>;

    async fn add_nodes(&self, nodes: &[NodeParams]) -> Result<PendingTx>;

    async fn update_nodes(&self, nodes: &[NodeParams]) -> Result<PendingTx>;

    async fn add_don(&self, don: &DonParams) -> Result<PendingTx>;

    async fn update_don(&self, don_id: u32, don: &DonParams) -> Result<PendingTx>;

    async fn get_capabilities(&self) -> Result<Vec<CapabilityInfo>>;

    async fn get_hashed_capability_id(
        &self,
        labelled_name: &str,
        version: &str,
    ) -> Result<HashedCapabilityId>;

    /// `None` when the node was never registered.
    async fn get_node(&self, p2p_id: &P2pId) -> Result<Option<NodeInfo>>;

    async fn get_node_operators(&self) -> Result<Vec<NodeOperatorInfo>>;

    async fn get_dons(&self) -> Result<Vec<DonInfo>>;

    /// Wait until `tx` is committed. Reverts surface as [`crate::Error::Ledger`]
    /// carrying the transaction id.
    async fn confirm(&self, tx: &PendingTx) -> Result<Receipt>;
}

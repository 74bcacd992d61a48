//! In-memory registry ledger.
//!
//! Enforces the same rules as the on-chain registry:
//!
//! - a capability batch is rejected as a whole if any entry already exists
//! - nodes are added once per peer id and must reference a known operator
//!   and known, non-deprecated capabilities
//! - DON members must exist, be unique and support every configured
//!   capability; `f` must satisfy `n >= 3f + 1`
//! - a node belongs to at most one workflow DON and may not drop a
//!   capability one of its DONs is configured with
//!
//! Writes are applied at submission; a rejected write is never recorded.
//! [`MemoryLedger::revert_next_write`] and
//! [`MemoryLedger::set_confirm_delay`] simulate reverts and slow blocks.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::error::{EntityKind, Error, Result};
use crate::ids::{HashedCapabilityId, P2pId, TxId};
use crate::ledger::{PendingTx, Receipt, RegistryLedger};
use crate::models::{
    Capability, CapabilityInfo, DonInfo, DonParams, NodeInfo, NodeOperator, NodeOperatorInfo,
    NodeParams,
};

/// Serializable copy of the full ledger state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    #[serde(default)]
    pub capabilities: Vec<CapabilityInfo>,
    #[serde(default)]
    pub node_operators: Vec<NodeOperatorInfo>,
    #[serde(default)]
    pub nodes: Vec<NodeInfo>,
    #[serde(default)]
    pub dons: Vec<DonInfo>,
}

#[derive(Debug, Clone)]
enum TxOutcome {
    Committed { block: u64 },
    Reverted(String),
}

#[derive(Debug, Default)]
struct LedgerState {
    capabilities: Vec<CapabilityInfo>,
    node_operators: Vec<NodeOperatorInfo>,
    nodes: BTreeMap<P2pId, NodeInfo>,
    dons: BTreeMap<u32, DonInfo>,
    next_don_id: u32,
    txs: HashMap<TxId, TxOutcome>,
    tx_counter: u64,
    block: u64,
    write_count: usize,
    confirm_delay: Option<Duration>,
    revert_next: Option<String>,
}

impl LedgerState {
    fn capability(&self, id: &HashedCapabilityId) -> Option<&CapabilityInfo> {
        self.capabilities.iter().find(|c| &c.hashed_id == id)
    }

    fn next_tx_id(&mut self, method: &str) -> TxId {
        self.tx_counter += 1;
        let mut hasher = blake3::Hasher::new();
        hasher.update(method.as_bytes());
        hasher.update(&self.tx_counter.to_le_bytes());
        TxId(*hasher.finalize().as_bytes())
    }

    fn check_node_params(&self, node: &NodeParams) -> Result<()> {
        if !self
            .node_operators
            .iter()
            .any(|op| op.id == node.node_operator_id)
        {
            return Err(Error::NotFound {
                entity: EntityKind::NodeOperator,
                key: node.node_operator_id.to_string(),
            });
        }
        if node.signer.is_zero() {
            return Err(Error::reverted(None, format!("InvalidNodeSigner: {}", node.p2p_id)));
        }
        if node.encryption_public_key.is_zero() {
            return Err(Error::reverted(
                None,
                format!("InvalidNodeEncryptionPublicKey: {}", node.p2p_id),
            ));
        }
        if node.hashed_capability_ids.is_empty() {
            return Err(Error::reverted(
                None,
                format!("InvalidNodeCapabilities: {} has none", node.p2p_id),
            ));
        }
        for id in &node.hashed_capability_ids {
            match self.capability(id) {
                None => {
                    return Err(Error::NotFound {
                        entity: EntityKind::Capability,
                        key: id.to_hex(),
                    })
                }
                Some(info) if info.is_deprecated => {
                    return Err(Error::reverted(
                        None,
                        format!("CapabilityIsDeprecated: {}", info.capability.key()),
                    ))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    fn check_don_params(&self, don: &DonParams, don_id: Option<u32>) -> Result<()> {
        let n = don.members.len();
        if 3 * usize::from(don.f) + 1 > n {
            return Err(Error::reverted(
                None,
                format!("InvalidFaultTolerance: f={} n={}", don.f, n),
            ));
        }

        let mut seen = BTreeSet::new();
        for member in &don.members {
            if !seen.insert(*member) {
                return Err(Error::reverted(None, format!("DuplicateDONNode: {member}")));
            }
        }

        let mut seen_caps = BTreeSet::new();
        for cfg in &don.capability_configurations {
            if !seen_caps.insert(cfg.capability_id) {
                return Err(Error::reverted(
                    None,
                    format!("DuplicateDONCapability: {}", cfg.capability_id),
                ));
            }
            match self.capability(&cfg.capability_id) {
                None => {
                    return Err(Error::NotFound {
                        entity: EntityKind::Capability,
                        key: cfg.capability_id.to_hex(),
                    })
                }
                Some(info) if info.is_deprecated => {
                    return Err(Error::reverted(
                        None,
                        format!("CapabilityIsDeprecated: {}", info.capability.key()),
                    ))
                }
                Some(_) => {}
            }
        }

        for member in &don.members {
            let node = self.nodes.get(member).ok_or_else(|| Error::NotFound {
                entity: EntityKind::Node,
                key: member.to_hex(),
            })?;
            for cfg in &don.capability_configurations {
                if !node.supports(&cfg.capability_id) {
                    return Err(Error::reverted(
                        None,
                        format!(
                            "NodeDoesNotSupportCapability: {} lacks {}",
                            member, cfg.capability_id
                        ),
                    ));
                }
            }
            if don.accepts_workflows {
                if let Some(existing) = node.workflow_don_id {
                    if Some(existing) != don_id {
                        return Err(Error::reverted(
                            None,
                            format!("NodePartOfWorkflowDON: {member} in DON {existing}"),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn detach_don(&mut self, don_id: u32) {
        for node in self.nodes.values_mut() {
            if node.workflow_don_id == Some(don_id) {
                node.workflow_don_id = None;
            }
            node.capabilities_don_ids.remove(&don_id);
        }
    }

    fn attach_don(&mut self, don_id: u32, don: &DonParams) {
        for member in &don.members {
            if let Some(node) = self.nodes.get_mut(member) {
                if don.accepts_workflows {
                    node.workflow_don_id = Some(don_id);
                } else {
                    node.capabilities_don_ids.insert(don_id);
                }
            }
        }
    }
}

/// A registry ledger held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ledger holding `snapshot`.
    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Self {
        let next_don_id = snapshot
            .dons
            .iter()
            .map(|d| d.id)
            .max()
            .map_or(1, |max| max.saturating_add(1));
        let state = LedgerState {
            capabilities: snapshot.capabilities,
            node_operators: snapshot.node_operators,
            nodes: snapshot.nodes.into_iter().map(|n| (n.p2p_id, n)).collect(),
            dons: snapshot.dons.into_iter().map(|d| (d.id, d)).collect(),
            next_don_id,
            ..Default::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    /// Copy out the current state.
    pub async fn snapshot(&self) -> LedgerSnapshot {
        let st = self.state.lock().await;
        LedgerSnapshot {
            capabilities: st.capabilities.clone(),
            node_operators: st.node_operators.clone(),
            nodes: st.nodes.values().cloned().collect(),
            dons: st.dons.values().cloned().collect(),
        }
    }

    /// Number of writes committed since creation.
    pub async fn write_count(&self) -> usize {
        self.state.lock().await.write_count
    }

    /// Delay every confirmation by `delay`.
    pub async fn set_confirm_delay(&self, delay: Option<Duration>) {
        self.state.lock().await.confirm_delay = delay;
    }

    /// Accept the next write but revert it at confirmation.
    pub async fn revert_next_write(&self, reason: impl Into<String>) {
        self.state.lock().await.revert_next = Some(reason.into());
    }

    /// Mark a capability deprecated. This is one-way.
    pub async fn deprecate_capability(&self, id: &HashedCapabilityId) -> Result<()> {
        let mut st = self.state.lock().await;
        let info = st
            .capabilities
            .iter_mut()
            .find(|c| &c.hashed_id == id)
            .ok_or_else(|| Error::NotFound {
                entity: EntityKind::Capability,
                key: id.to_hex(),
            })?;
        info.is_deprecated = true;
        Ok(())
    }

    async fn submit<F>(&self, method: &'static str, apply: F) -> Result<PendingTx>
    where
        F: FnOnce(&mut LedgerState) -> Result<()> + Send,
    {
        let mut st = self.state.lock().await;
        let id = st.next_tx_id(method);

        if let Some(reason) = st.revert_next.take() {
            debug!(method, tx = %id, %reason, "Forcing revert");
            st.txs.insert(id, TxOutcome::Reverted(reason));
            return Ok(PendingTx { id, method });
        }

        apply(&mut st)?;
        st.block += 1;
        st.write_count += 1;
        let block = st.block;
        st.txs.insert(id, TxOutcome::Committed { block });
        trace!(method, tx = %id, block, "Applied write");
        Ok(PendingTx { id, method })
    }
}

#[async_trait]
impl RegistryLedger for MemoryLedger {
    async fn add_capabilities(&self, capabilities: &[Capability]) -> Result<PendingTx> {
        let capabilities = capabilities.to_vec();
        self.submit("add_capabilities", move |st| {
            let mut batch = BTreeSet::new();
            for cap in &capabilities {
                let id = cap.id();
                if st.capability(&id).is_some() || !batch.insert(id) {
                    return Err(Error::AlreadyExists {
                        entity: EntityKind::Capability,
                        key: cap.key().to_string(),
                    });
                }
            }
            for cap in capabilities {
                st.capabilities.push(CapabilityInfo {
                    hashed_id: cap.id(),
                    capability: cap,
                    is_deprecated: false,
                });
            }
            Ok(())
        })
        .await
    }

    async fn add_node_operators(&self, operators: &[NodeOperator]) -> Result<PendingTx> {
        let operators = operators.to_vec();
        self.submit("add_node_operators", move |st| {
            if let Some(op) = operators.iter().find(|op| op.admin.is_zero()) {
                return Err(Error::reverted(
                    None,
                    format!("InvalidNodeOperatorAdmin: {}", op.name),
                ));
            }
            let start = st.node_operators.len();
            let ids = (start + 1..=start + operators.len())
                .map(u32::try_from)
                .collect::<std::result::Result<Vec<u32>, _>>()
                .map_err(|_| Error::reverted(None, "NodeOperatorIdsExhausted"))?;
            for (id, operator) in ids.into_iter().zip(operators) {
                st.node_operators.push(NodeOperatorInfo { id, operator });
            }
            Ok(())
        })
        .await
    }

    async fn add_nodes(&self, nodes: &[NodeParams]) -> Result<PendingTx> {
        let nodes = nodes.to_vec();
        self.submit("add_nodes", move |st| {
            let mut batch = BTreeSet::new();
            for node in &nodes {
                if st.nodes.contains_key(&node.p2p_id) || !batch.insert(node.p2p_id) {
                    return Err(Error::AlreadyExists {
                        entity: EntityKind::Node,
                        key: node.p2p_id.to_hex(),
                    });
                }
                st.check_node_params(node)?;
            }
            for node in nodes {
                st.nodes.insert(
                    node.p2p_id,
                    NodeInfo {
                        node_operator_id: node.node_operator_id,
                        config_count: 1,
                        workflow_don_id: None,
                        signer: node.signer,
                        p2p_id: node.p2p_id,
                        encryption_public_key: node.encryption_public_key,
                        hashed_capability_ids: node.hashed_capability_ids,
                        capabilities_don_ids: BTreeSet::new(),
                    },
                );
            }
            Ok(())
        })
        .await
    }

    async fn update_nodes(&self, nodes: &[NodeParams]) -> Result<PendingTx> {
        let nodes = nodes.to_vec();
        self.submit("update_nodes", move |st| {
            for node in &nodes {
                if !st.nodes.contains_key(&node.p2p_id) {
                    return Err(Error::NotFound {
                        entity: EntityKind::Node,
                        key: node.p2p_id.to_hex(),
                    });
                }
                st.check_node_params(node)?;
                for don in st.dons.values().filter(|d| d.members.contains(&node.p2p_id)) {
                    for cfg in &don.capability_configurations {
                        if !node.hashed_capability_ids.contains(&cfg.capability_id) {
                            return Err(Error::reverted(
                                None,
                                format!(
                                    "CapabilityRequiredByDON: {} needed by DON {}",
                                    cfg.capability_id, don.id
                                ),
                            ));
                        }
                    }
                }
            }
            for node in nodes {
                if let Some(existing) = st.nodes.get_mut(&node.p2p_id) {
                    existing.node_operator_id = node.node_operator_id;
                    existing.signer = node.signer;
                    existing.encryption_public_key = node.encryption_public_key;
                    existing.hashed_capability_ids = node.hashed_capability_ids;
                    existing.config_count += 1;
                }
            }
            Ok(())
        })
        .await
    }

    async fn add_don(&self, don: &DonParams) -> Result<PendingTx> {
        let don = don.clone();
        self.submit("add_don", move |st| {
            st.check_don_params(&don, None)?;
            let id = st.next_don_id.max(1);
            if st.dons.contains_key(&id) {
                return Err(Error::reverted(None, "DonIdsExhausted"));
            }
            st.next_don_id = id.saturating_add(1);
            st.attach_don(id, &don);
            st.dons.insert(
                id,
                DonInfo {
                    id,
                    config_count: 1,
                    f: don.f,
                    is_public: don.is_public,
                    accepts_workflows: don.accepts_workflows,
                    members: don.members,
                    capability_configurations: don.capability_configurations,
                },
            );
            Ok(())
        })
        .await
    }

    async fn update_don(&self, don_id: u32, don: &DonParams) -> Result<PendingTx> {
        let don = don.clone();
        self.submit("update_don", move |st| {
            if !st.dons.contains_key(&don_id) {
                return Err(Error::NotFound {
                    entity: EntityKind::Don,
                    key: don_id.to_string(),
                });
            }
            st.check_don_params(&don, Some(don_id))?;
            st.detach_don(don_id);
            st.attach_don(don_id, &don);
            if let Some(existing) = st.dons.get_mut(&don_id) {
                existing.config_count += 1;
                existing.f = don.f;
                existing.is_public = don.is_public;
                existing.accepts_workflows = don.accepts_workflows;
                existing.members = don.members;
                existing.capability_configurations = don.capability_configurations;
            }
            Ok(())
        })
        .await
    }

    async fn get_capabilities(&self) -> Result<Vec<CapabilityInfo>> {
        Ok(self.state.lock().await.capabilities.clone())
    }

    async fn get_hashed_capability_id(
        &self,
        labelled_name: &str,
        version: &str,
    ) -> Result<HashedCapabilityId> {
        Ok(crate::hashed_capability_id(labelled_name, version))
    }

    async fn get_node(&self, p2p_id: &P2pId) -> Result<Option<NodeInfo>> {
        Ok(self.state.lock().await.nodes.get(p2p_id).cloned())
    }

    async fn get_node_operators(&self) -> Result<Vec<NodeOperatorInfo>> {
        Ok(self.state.lock().await.node_operators.clone())
    }

    async fn get_dons(&self) -> Result<Vec<DonInfo>> {
        Ok(self.state.lock().await.dons.values().cloned().collect())
    }

    async fn confirm(&self, tx: &PendingTx) -> Result<Receipt> {
        let delay = self.state.lock().await.confirm_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let st = self.state.lock().await;
        match st.txs.get(&tx.id) {
            Some(TxOutcome::Committed { block }) => Ok(Receipt {
                tx: tx.id,
                block: *block,
            }),
            Some(TxOutcome::Reverted(reason)) => Err(Error::Ledger {
                tx: Some(tx.id),
                reason: reason.clone(),
            }),
            None => Err(Error::Ledger {
                tx: Some(tx.id),
                reason: "unknown transaction".to_string(),
            }),
        }
    }
}

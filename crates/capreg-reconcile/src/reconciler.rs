//! DON Reconciler - one idempotent pass from desired topology to ledger.
//!
//! A pass runs these steps in order and stops at the first failure:
//!
//! ```text
//! Start → RegisterCapabilities → RegisterNodeOperators → BuildNodeParams
//!       → WriteNodes → { per DON: MatchDON → WriteDON } → Done
//! ```
//!
//! Every write is confirmed before the next step starts. Nothing is rolled
//! back on failure; the ledger keeps whatever earlier steps wrote, and
//! running the pass again from `Start` converges to the same state.
//!
//! Only one pass may mutate a given ledger at a time. The reconciler does
//! no locking of its own.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use capreg_consensus::{ConsensusConfigAssembler, ConsensusConfigGenerator};
use capreg_core::{
    Capability, CapabilityConfiguration, DonInfo, Error, HashedCapabilityId, NodeOperator,
    NodeOperatorInfo, NodeParams, P2pId, RegistryLedger, Result,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::ReconcileConfig;
use crate::confirm::{confirm, ConfirmOptions};
use crate::don::{plan_don, DesiredDon, DonAction, DonMatcher, DonOperation};
use crate::error::{PassError, Step};
use crate::node_params::{CapabilityMode, NodeAction, NodeParamsBuilder, NodePlan};
use crate::registrar::{CapabilityCache, CapabilityRegistrar};
use crate::topology::{DesiredTopology, ValidatedDon, ValidatedTopology};

/// A registered capability and its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityOutcome {
    #[serde(flatten)]
    pub capability: Capability,
    pub hashed_id: HashedCapabilityId,
    /// Already registered by another writer when this pass tried to add it.
    #[serde(default)]
    pub skipped: bool,
}

/// What happened to one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeOutcome {
    pub p2p_id: P2pId,
    pub action: NodeAction,
    pub hashed_capability_ids: BTreeSet<HashedCapabilityId>,
}

/// One DON as it stands after the pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonReport {
    pub name: String,
    pub action: DonAction,
    pub id: u32,
    pub f: u8,
    pub is_public: bool,
    pub accepts_workflows: bool,
    pub members: Vec<P2pId>,
    pub capability_configurations: Vec<CapabilityConfiguration>,
}

impl DonReport {
    fn new(name: &str, action: DonAction, info: DonInfo) -> Self {
        Self {
            name: name.to_string(),
            action,
            id: info.id,
            f: info.f,
            is_public: info.is_public,
            accepts_workflows: info.accepts_workflows,
            members: info.members,
            capability_configurations: info.capability_configurations,
        }
    }
}

/// Result of a completed pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub mode: CapabilityMode,
    pub capabilities: Vec<CapabilityOutcome>,
    pub node_operators: Vec<NodeOperatorInfo>,
    pub nodes: Vec<NodeOutcome>,
    pub dons: Vec<DonReport>,
}

impl ReconcileReport {
    /// Pretty JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Number of DONs created or updated.
    pub fn don_writes(&self) -> usize {
        self.dons
            .iter()
            .filter(|d| d.action != DonAction::Unchanged)
            .count()
    }

    /// Number of nodes added or updated.
    pub fn node_writes(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.action != NodeAction::Unchanged)
            .count()
    }
}

/// Tracks the last completed step of a pass.
struct Progress {
    last_completed: Step,
}

impl Progress {
    fn new() -> Self {
        Self {
            last_completed: Step::Start,
        }
    }

    fn complete(&mut self, step: Step) {
        debug!(%step, "Step complete");
        self.last_completed = step;
    }

    fn fail(&self, failed: Step, don: Option<&str>, source: Error) -> PassError {
        PassError {
            last_completed: self.last_completed,
            failed,
            don: don.map(str::to_string),
            source,
        }
    }
}

/// Drives reconciliation passes against one ledger.
pub struct DonReconciler {
    ledger: Arc<dyn RegistryLedger>,
    cache: Arc<CapabilityCache>,
    config: ReconcileConfig,
    confirm: ConfirmOptions,
    generator: Option<Arc<dyn ConsensusConfigGenerator>>,
}

impl DonReconciler {
    pub fn new(ledger: Arc<dyn RegistryLedger>, config: ReconcileConfig) -> Self {
        let confirm = config.confirm_options();
        Self {
            ledger,
            cache: Arc::new(CapabilityCache::new()),
            config,
            confirm,
            generator: None,
        }
    }

    /// Share a capability cache with other reconcilers.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<CapabilityCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Abort pending confirmations once `cancel` reads `true`.
    #[must_use]
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.confirm = self.confirm.with_cancel(cancel);
        self
    }

    /// Generator for DONs that request a consensus config.
    #[must_use]
    pub fn with_generator(mut self, generator: Arc<dyn ConsensusConfigGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn cache(&self) -> &Arc<CapabilityCache> {
        &self.cache
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Validate `desired`, assembling consensus configs for the target chain.
    pub fn validate(&self, desired: &DesiredTopology) -> Result<ValidatedTopology> {
        let assembler = self
            .generator
            .as_ref()
            .map(|g| ConsensusConfigAssembler::new(g.clone(), self.config.target_chain));
        desired.validate_with(assembler.as_ref())
    }

    /// Validate and run one pass with the configured capability mode.
    pub async fn reconcile(
        &self,
        desired: &DesiredTopology,
    ) -> std::result::Result<ReconcileReport, PassError> {
        let topology = self
            .validate(desired)
            .map_err(|e| Progress::new().fail(Step::Start, None, e))?;
        self.run(&topology).await
    }

    /// Run one pass with the configured capability mode.
    pub async fn run(
        &self,
        topology: &ValidatedTopology,
    ) -> std::result::Result<ReconcileReport, PassError> {
        self.run_with_mode(topology, self.config.capability_mode).await
    }

    /// Run one pass with an explicit capability mode.
    pub async fn run_with_mode(
        &self,
        topology: &ValidatedTopology,
        mode: CapabilityMode,
    ) -> std::result::Result<ReconcileReport, PassError> {
        info!(
            dons = topology.dons.len(),
            nodes = topology.nodes.len(),
            capabilities = topology.capabilities.len(),
            %mode,
            "Starting reconciliation pass"
        );
        let mut pass = Progress::new();

        let registrar =
            CapabilityRegistrar::new(self.ledger.clone(), self.cache.clone(), self.confirm.clone());
        let registration = registrar
            .register_all(&topology.capabilities)
            .await
            .map_err(|e| pass.fail(Step::RegisterCapabilities, None, e))?;
        let capability_ids = registration.ids;
        pass.complete(Step::RegisterCapabilities);

        let (operator_ids, node_operators) = self
            .register_operators(&topology.operators)
            .await
            .map_err(|e| pass.fail(Step::RegisterNodeOperators, None, e))?;
        pass.complete(Step::RegisterNodeOperators);

        let plans = self
            .build_nodes(topology, &capability_ids, &operator_ids, mode)
            .await
            .map_err(|e| pass.fail(Step::BuildNodeParams, None, e))?;
        pass.complete(Step::BuildNodeParams);

        self.write_nodes(&plans)
            .await
            .map_err(|e| pass.fail(Step::WriteNodes, None, e))?;
        pass.complete(Step::WriteNodes);

        let mut dons = Vec::with_capacity(topology.dons.len());
        for don in &topology.dons {
            let op = self
                .match_don(don, &capability_ids)
                .await
                .map_err(|e| pass.fail(Step::MatchDon, Some(&don.name), e))?;
            pass.complete(Step::MatchDon);

            let report = self
                .write_don(don, op)
                .await
                .map_err(|e| pass.fail(Step::WriteDon, Some(&don.name), e))?;
            pass.complete(Step::WriteDon);
            dons.push(report);
        }
        pass.complete(Step::Done);

        let report = ReconcileReport {
            mode,
            capabilities: capability_ids
                .into_iter()
                .map(|(capability, hashed_id)| CapabilityOutcome {
                    skipped: registration.skipped.contains(&capability.key()),
                    capability,
                    hashed_id,
                })
                .collect(),
            node_operators,
            nodes: plans
                .into_iter()
                .map(|plan| NodeOutcome {
                    p2p_id: plan.params.p2p_id,
                    action: plan.action,
                    hashed_capability_ids: plan.params.hashed_capability_ids,
                })
                .collect(),
            dons,
        };
        info!(
            node_writes = report.node_writes(),
            don_writes = report.don_writes(),
            "Reconciliation pass complete"
        );
        Ok(report)
    }

    async fn register_operators(
        &self,
        wanted: &[NodeOperator],
    ) -> Result<(BTreeMap<NodeOperator, u32>, Vec<NodeOperatorInfo>)> {
        let existing = self.ledger.get_node_operators().await?;
        let known: BTreeSet<&NodeOperator> = existing.iter().map(|info| &info.operator).collect();
        let missing: Vec<NodeOperator> = wanted
            .iter()
            .filter(|op| !known.contains(op))
            .cloned()
            .collect();

        let infos = if missing.is_empty() {
            existing
        } else {
            let tx = self
                .ledger
                .add_node_operators(&missing)
                .await
                .map_err(|e| e.collision_as_consistency("add_node_operators"))?;
            confirm(self.ledger.as_ref(), &tx, &self.confirm).await?;
            info!(count = missing.len(), "Registered node operators");
            self.ledger.get_node_operators().await?
        };

        let mut ids = BTreeMap::new();
        let mut registered = Vec::with_capacity(wanted.len());
        for op in wanted {
            let info = infos
                .iter()
                .find(|info| &info.operator == op)
                .ok_or_else(|| {
                    Error::Consistency(format!("node operator {} missing after registration", op.name))
                })?;
            ids.insert(op.clone(), info.id);
            registered.push(info.clone());
        }
        Ok((ids, registered))
    }

    async fn build_nodes(
        &self,
        topology: &ValidatedTopology,
        capability_ids: &BTreeMap<Capability, HashedCapabilityId>,
        operator_ids: &BTreeMap<NodeOperator, u32>,
        mode: CapabilityMode,
    ) -> Result<Vec<NodePlan>> {
        let assignment = topology.assignment(operator_ids)?;
        NodeParamsBuilder::new(self.ledger.as_ref(), capability_ids)
            .build(&topology.desired_capabilities(), &assignment, mode)
            .await
    }

    async fn write_nodes(&self, plans: &[NodePlan]) -> Result<()> {
        let select = |action: NodeAction| -> Vec<NodeParams> {
            plans
                .iter()
                .filter(|p| p.action == action)
                .map(|p| p.params.clone())
                .collect()
        };
        let adds = select(NodeAction::Add);
        let updates = select(NodeAction::Update);

        if !adds.is_empty() {
            let tx = self
                .ledger
                .add_nodes(&adds)
                .await
                .map_err(|e| e.collision_as_consistency("add_nodes"))?;
            confirm(self.ledger.as_ref(), &tx, &self.confirm).await?;
            info!(count = adds.len(), "Added nodes");
        }
        if !updates.is_empty() {
            let tx = self.ledger.update_nodes(&updates).await?;
            confirm(self.ledger.as_ref(), &tx, &self.confirm).await?;
            info!(count = updates.len(), "Updated nodes");
        }
        debug!(
            unchanged = plans.len() - adds.len() - updates.len(),
            "Skipped unchanged nodes"
        );
        Ok(())
    }

    async fn match_don(
        &self,
        don: &ValidatedDon,
        capability_ids: &BTreeMap<Capability, HashedCapabilityId>,
    ) -> Result<DonOperation> {
        let existing = self.ledger.get_dons().await?;
        let matched = DonMatcher::find(&existing, &don.members)?;
        if let Some(found) = matched {
            debug!(don = %don.name, id = found.id, "Matched existing DON");
        }
        let desired = DesiredDon {
            members: don.members.clone(),
            capability_configurations: don.capability_configurations(capability_ids)?,
            f: don.f,
            is_public: don.is_public,
            accepts_workflows: don.accepts_workflows,
        };
        plan_don(matched, &desired)
    }

    async fn write_don(&self, don: &ValidatedDon, op: DonOperation) -> Result<DonReport> {
        let action = op.action();
        let don_id = match op {
            DonOperation::Create(params) => {
                let tx = self
                    .ledger
                    .add_don(&params)
                    .await
                    .map_err(|e| e.collision_as_consistency("add_don"))?;
                confirm(self.ledger.as_ref(), &tx, &self.confirm).await?;
                let dons = self.ledger.get_dons().await?;
                let created = DonMatcher::find(&dons, &params.members)?.ok_or_else(|| {
                    Error::Consistency(format!("DON {} missing after creation", don.name))
                })?;
                info!(
                    don = %don.name,
                    id = created.id,
                    members = params.members.len(),
                    f = params.f,
                    "Created DON"
                );
                created.id
            }
            DonOperation::Update { don_id, params } => {
                let tx = self.ledger.update_don(don_id, &params).await?;
                confirm(self.ledger.as_ref(), &tx, &self.confirm).await?;
                info!(
                    don = %don.name,
                    id = don_id,
                    members = params.members.len(),
                    f = params.f,
                    "Updated DON"
                );
                don_id
            }
            DonOperation::Unchanged { don_id } => {
                debug!(don = %don.name, id = don_id, "DON unchanged");
                don_id
            }
        };

        let info = self
            .ledger
            .get_dons()
            .await?
            .into_iter()
            .find(|d| d.id == don_id)
            .ok_or_else(|| Error::Consistency(format!("DON {don_id} missing after write")))?;
        Ok(DonReport::new(&don.name, action, info))
    }
}

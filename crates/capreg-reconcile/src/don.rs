//! DON matching and planning.
//!
//! A DON has no stable name on the ledger and its numeric id is assigned
//! on creation, so a desired DON is matched to an existing one by the hash
//! of its sorted member set.

use std::collections::BTreeSet;

use capreg_consensus::check_fault_tolerance;
use capreg_core::{
    member_set_hash, CapabilityConfiguration, DonInfo, DonParams, Error, P2pId, Result,
    ValidationError,
};
use serde::{Deserialize, Serialize};

/// Locates existing DONs by member set.
#[derive(Debug, Clone, Copy, Default)]
pub struct DonMatcher;

impl DonMatcher {
    /// Find the DON whose member set equals `members`, in any order.
    ///
    /// Two matches mean the ledger holds duplicate DONs.
    pub fn find<'a>(existing: &'a [DonInfo], members: &[P2pId]) -> Result<Option<&'a DonInfo>> {
        let wanted = member_set_hash(members);
        let mut matches = existing.iter().filter(|d| d.member_hash() == wanted);
        let first = matches.next();
        if let Some(second) = matches.next() {
            return Err(Error::Consistency(format!(
                "DONs {} and {} have the same member set",
                first.map(|d| d.id).unwrap_or_default(),
                second.id
            )));
        }
        Ok(first)
    }
}

/// Desired state of one DON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredDon {
    pub members: Vec<P2pId>,
    pub capability_configurations: Vec<CapabilityConfiguration>,
    pub f: u8,
    pub is_public: bool,
    pub accepts_workflows: bool,
}

/// Write needed to bring one DON in line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DonOperation {
    Create(DonParams),
    Update { don_id: u32, params: DonParams },
    Unchanged { don_id: u32 },
}

/// Kind of [`DonOperation`], for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DonAction {
    Create,
    Update,
    Unchanged,
}

impl DonOperation {
    pub fn action(&self) -> DonAction {
        match self {
            Self::Create(_) => DonAction::Create,
            Self::Update { .. } => DonAction::Update,
            Self::Unchanged { .. } => DonAction::Unchanged,
        }
    }
}

/// Plan the write for `desired` given the matched DON, if any.
///
/// Create sorts members. Update keeps existing members in their order and
/// appends new ones sorted; existing configurations are kept unless the
/// desired state re-specifies them.
pub fn plan_don(existing: Option<&DonInfo>, desired: &DesiredDon) -> Result<DonOperation> {
    check_duplicate_configs(&desired.capability_configurations)?;

    let Some(don) = existing else {
        let mut members = desired.members.clone();
        members.sort_unstable();
        members.dedup();
        check_fault_tolerance(members.len(), desired.f)?;
        return Ok(DonOperation::Create(DonParams {
            members,
            capability_configurations: desired.capability_configurations.clone(),
            is_public: desired.is_public,
            accepts_workflows: desired.accepts_workflows,
            f: desired.f,
        }));
    };

    let params = DonParams {
        members: union_members(&don.members, &desired.members),
        capability_configurations: merge_configs(
            &don.capability_configurations,
            &desired.capability_configurations,
        ),
        is_public: desired.is_public,
        accepts_workflows: desired.accepts_workflows,
        f: desired.f,
    };
    check_fault_tolerance(params.members.len(), params.f)?;

    if params == don.params() {
        Ok(DonOperation::Unchanged { don_id: don.id })
    } else {
        Ok(DonOperation::Update {
            don_id: don.id,
            params,
        })
    }
}

fn check_duplicate_configs(configs: &[CapabilityConfiguration]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for cfg in configs {
        if !seen.insert(cfg.capability_id) {
            return Err(ValidationError::DuplicateDonCapability {
                capability_id: cfg.capability_id,
            }
            .into());
        }
    }
    Ok(())
}

fn union_members(existing: &[P2pId], desired: &[P2pId]) -> Vec<P2pId> {
    let known: BTreeSet<&P2pId> = existing.iter().collect();
    let added: BTreeSet<P2pId> = desired.iter().filter(|p| !known.contains(p)).copied().collect();
    existing.iter().copied().chain(added).collect()
}

fn merge_configs(
    existing: &[CapabilityConfiguration],
    desired: &[CapabilityConfiguration],
) -> Vec<CapabilityConfiguration> {
    let mut merged: Vec<CapabilityConfiguration> = existing
        .iter()
        .map(|cfg| {
            desired
                .iter()
                .find(|d| d.capability_id == cfg.capability_id)
                .unwrap_or(cfg)
                .clone()
        })
        .collect();
    for cfg in desired {
        if !existing.iter().any(|e| e.capability_id == cfg.capability_id) {
            merged.push(cfg.clone());
        }
    }
    merged
}

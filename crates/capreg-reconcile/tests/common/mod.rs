//! Shared fixtures for reconciliation tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use capreg_consensus::{ChainFamily, NodeKeys};
use capreg_core::{
    Address, Capability, CapabilityType, HashedCapabilityId, Key32, MemoryLedger, NodeOperator,
    NodeParams, P2pId, RegistryLedger,
};
use capreg_reconcile::{
    CapabilityMode, CapabilitySpec, DesiredTopology, DonReconciler, DonSpec, OperatorSpec,
    ReconcileConfig,
};

pub const OPERATOR_NAME: &str = "operator-a";

pub fn admin() -> Address {
    Address::from_bytes([0xad; 20])
}

pub fn p2p(seed: u8) -> P2pId {
    P2pId::from_bytes([seed; 32])
}

pub fn cap(name: &str) -> Capability {
    Capability::new(name, "1.0.0", CapabilityType::Action)
}

pub fn keys(seed: u8) -> NodeKeys {
    let mut onchain_keys = BTreeMap::new();
    onchain_keys.insert(ChainFamily::Evm, hex::encode([seed; 20]));
    NodeKeys {
        p2p_id: hex::encode([seed; 32]),
        signer: None,
        encryption_public_key: hex::encode([seed.wrapping_add(100); 32]),
        onchain_keys,
        offchain_public_key: hex::encode([seed.wrapping_add(1); 32]),
        config_encryption_public_key: hex::encode([seed.wrapping_add(2); 32]),
        transmit_account: format!("0x{}", hex::encode([seed; 20])),
    }
}

/// Signer the extractor derives from [`keys`].
pub fn signer(seed: u8) -> Key32 {
    let mut word = [0u8; 32];
    word[..20].copy_from_slice(&[seed; 20]);
    Key32::from_bytes(word)
}

pub fn don(name: &str, seeds: &[u8], caps: &[(Capability, &str)], f: u8) -> DonSpec {
    DonSpec {
        name: name.to_string(),
        f,
        is_public: true,
        accepts_workflows: false,
        capabilities: caps
            .iter()
            .map(|(capability, config)| CapabilitySpec {
                capability: capability.clone(),
                config: config.as_bytes().to_vec(),
            })
            .collect(),
        node_operators: vec![OperatorSpec {
            admin: admin(),
            name: OPERATOR_NAME.to_string(),
            nodes: seeds.iter().map(|s| keys(*s)).collect(),
        }],
        consensus: None,
    }
}

pub fn topology(dons: Vec<DonSpec>) -> DesiredTopology {
    DesiredTopology { dons }
}

pub fn reconciler(ledger: &Arc<MemoryLedger>, mode: CapabilityMode) -> DonReconciler {
    DonReconciler::new(
        ledger.clone(),
        ReconcileConfig::default().with_capability_mode(mode),
    )
}

/// Register capabilities, the test operator and nodes directly on the ledger.
pub async fn seed_nodes(ledger: &MemoryLedger, nodes: &[(u8, Vec<Capability>)]) {
    let mut caps: BTreeSet<Capability> = BTreeSet::new();
    for (_, node_caps) in nodes {
        caps.extend(node_caps.iter().cloned());
    }
    let existing: BTreeSet<HashedCapabilityId> = ledger
        .get_capabilities()
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.hashed_id)
        .collect();
    let novel: Vec<Capability> = caps.into_iter().filter(|c| !existing.contains(&c.id())).collect();
    if !novel.is_empty() {
        let tx = ledger.add_capabilities(&novel).await.unwrap();
        ledger.confirm(&tx).await.unwrap();
    }

    if ledger.get_node_operators().await.unwrap().is_empty() {
        let tx = ledger
            .add_node_operators(&[NodeOperator::new(admin(), OPERATOR_NAME)])
            .await
            .unwrap();
        ledger.confirm(&tx).await.unwrap();
    }

    let params: Vec<NodeParams> = nodes
        .iter()
        .map(|(seed, node_caps)| NodeParams {
            node_operator_id: 1,
            signer: signer(*seed),
            p2p_id: p2p(*seed),
            encryption_public_key: Key32::from_bytes([seed.wrapping_add(100); 32]),
            hashed_capability_ids: node_caps.iter().map(Capability::id).collect(),
        })
        .collect();
    let tx = ledger.add_nodes(&params).await.unwrap();
    ledger.confirm(&tx).await.unwrap();
}

pub async fn node_caps(ledger: &MemoryLedger, seed: u8) -> BTreeSet<HashedCapabilityId> {
    ledger
        .get_node(&p2p(seed))
        .await
        .unwrap()
        .map(|n| n.hashed_capability_ids)
        .unwrap_or_default()
}

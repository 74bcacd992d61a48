//! End-to-end reconciliation passes against the in-memory ledger.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use capreg_core::{
    CapabilityConfiguration, DonParams, Error, MemoryLedger, RegistryLedger, ValidationError,
};
use capreg_reconcile::{
    CapabilityCache, CapabilityMode, CapabilityRegistrar, ConfirmOptions, DonAction, DonReconciler,
    NodeAction, ReconcileConfig, Step,
};
use common::*;
use proptest::prelude::*;
use tokio::sync::watch;

#[tokio::test]
async fn two_passes_leave_identical_state() {
    let ledger = Arc::new(MemoryLedger::new());
    let desired = topology(vec![
        don("workflow", &[1, 2, 3, 4], &[(cap("trigger"), "t"), (cap("compute"), "")], 1),
        don("assets", &[5, 6, 7, 8], &[(cap("write_chain"), "w")], 1),
    ]);
    let reconciler = reconciler(&ledger, CapabilityMode::Append);

    reconciler.reconcile(&desired).await.unwrap();
    let first = ledger.snapshot().await;
    let writes = ledger.write_count().await;

    let report = reconciler.reconcile(&desired).await.unwrap();
    assert_eq!(ledger.snapshot().await, first);
    assert_eq!(ledger.write_count().await, writes);
    assert!(report.dons.iter().all(|d| d.action == DonAction::Unchanged));
    assert!(report.nodes.iter().all(|n| n.action == NodeAction::Unchanged));
}

#[tokio::test]
async fn fresh_reconciler_is_also_idempotent() {
    let ledger = Arc::new(MemoryLedger::new());
    let desired = topology(vec![don("a", &[1, 2, 3, 4], &[(cap("x"), "")], 1)]);
    reconciler(&ledger, CapabilityMode::Append)
        .reconcile(&desired)
        .await
        .unwrap();
    let first = ledger.snapshot().await;

    // Cold cache: the capability batch collides and falls back per item
    reconciler(&ledger, CapabilityMode::Append)
        .reconcile(&desired)
        .await
        .unwrap();
    assert_eq!(ledger.snapshot().await, first);
}

#[tokio::test]
async fn append_keeps_existing_capabilities() {
    let ledger = Arc::new(MemoryLedger::new());
    seed_nodes(&ledger, &[(1, vec![cap("legacy")])]).await;
    let before = node_caps(&ledger, 1).await;

    let desired = topology(vec![don("solo", &[1], &[(cap("fresh"), "")], 0)]);
    let report = reconciler(&ledger, CapabilityMode::Append)
        .reconcile(&desired)
        .await
        .unwrap();

    let after = node_caps(&ledger, 1).await;
    assert!(after.is_superset(&before));
    assert!(after.contains(&cap("fresh").id()));
    assert_eq!(after.len(), 2);
    assert_eq!(report.nodes[0].action, NodeAction::Update);
}

#[tokio::test]
async fn replace_sets_exact_capabilities() {
    let ledger = Arc::new(MemoryLedger::new());
    seed_nodes(&ledger, &[(1, vec![cap("legacy"), cap("other")])]).await;

    let desired = topology(vec![don("solo", &[1], &[(cap("fresh"), "")], 0)]);
    reconciler(&ledger, CapabilityMode::Replace)
        .reconcile(&desired)
        .await
        .unwrap();

    let expected: BTreeSet<_> = [cap("fresh").id()].into_iter().collect();
    assert_eq!(node_caps(&ledger, 1).await, expected);
}

#[tokio::test]
async fn rerunning_append_with_granted_capabilities_keeps_size() {
    let ledger = Arc::new(MemoryLedger::new());
    seed_nodes(&ledger, &[(1, vec![cap("a"), cap("b")])]).await;

    let desired = topology(vec![don("solo", &[1], &[(cap("a"), "")], 0)]);
    let reconciler = reconciler(&ledger, CapabilityMode::Append);
    reconciler.reconcile(&desired).await.unwrap();
    let once = node_caps(&ledger, 1).await;
    reconciler.reconcile(&desired).await.unwrap();

    assert_eq!(once.len(), 2);
    assert_eq!(node_caps(&ledger, 1).await, once);
}

#[tokio::test]
async fn single_node_single_capability() {
    let ledger = Arc::new(MemoryLedger::new());
    let desired = topology(vec![don("solo", &[9], &[(cap("lonely"), "")], 0)]);
    reconciler(&ledger, CapabilityMode::Append)
        .reconcile(&desired)
        .await
        .unwrap();

    let caps = node_caps(&ledger, 9).await;
    let expected = ledger
        .get_hashed_capability_id("lonely", "1.0.0")
        .await
        .unwrap();
    assert_eq!(caps.len(), 1);
    assert!(caps.contains(&expected));
}

#[tokio::test]
async fn bulk_collision_registers_only_new_capability() {
    let ledger = Arc::new(MemoryLedger::new());
    let tx = ledger.add_capabilities(&[cap("capY")]).await.unwrap();
    ledger.confirm(&tx).await.unwrap();

    let registrar = CapabilityRegistrar::new(
        ledger.clone(),
        Arc::new(CapabilityCache::new()),
        ConfirmOptions::default(),
    );
    let ids = registrar.register(&[cap("capX"), cap("capY")]).await.unwrap();

    assert_eq!(ids.len(), 2);
    let names: BTreeSet<String> = ledger
        .get_capabilities()
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.capability.labelled_name)
        .collect();
    assert!(names.contains("capX"));
    assert_eq!(names.len(), 2);
}

#[tokio::test]
async fn report_marks_capabilities_registered_by_another_writer() {
    let ledger = Arc::new(MemoryLedger::new());
    let tx = ledger.add_capabilities(&[cap("capY")]).await.unwrap();
    ledger.confirm(&tx).await.unwrap();

    let desired = topology(vec![don(
        "workflow",
        &[1, 2, 3, 4],
        &[(cap("capX"), ""), (cap("capY"), "")],
        1,
    )]);
    let report = reconciler(&ledger, CapabilityMode::Append)
        .reconcile(&desired)
        .await
        .unwrap();

    let skipped: Vec<String> = report
        .capabilities
        .iter()
        .filter(|c| c.skipped)
        .map(|c| c.capability.labelled_name.clone())
        .collect();
    assert_eq!(skipped, vec!["capY".to_string()]);
    assert_eq!(report.capabilities.len(), 2);
}

#[tokio::test]
async fn shared_capability_registered_once_with_independent_configs() {
    let ledger = Arc::new(MemoryLedger::new());
    let shared = cap("shared");
    let desired = topology(vec![
        don("left", &[1, 2, 3, 4], &[(shared.clone(), "left")], 1),
        don("right", &[5, 6, 7, 8], &[(shared.clone(), "right")], 1),
    ]);
    let report = reconciler(&ledger, CapabilityMode::Append)
        .reconcile(&desired)
        .await
        .unwrap();

    let registered = ledger.get_capabilities().await.unwrap();
    assert_eq!(registered.len(), 1);
    assert_eq!(report.capabilities.len(), 1);

    let dons = ledger.get_dons().await.unwrap();
    assert_eq!(dons.len(), 2);
    let configs: BTreeSet<Vec<u8>> = dons
        .iter()
        .map(|d| d.config_for(&shared.id()).unwrap().config.clone())
        .collect();
    assert_eq!(configs, [b"left".to_vec(), b"right".to_vec()].into());
}

#[tokio::test]
async fn existing_don_matched_regardless_of_member_order() {
    let ledger = Arc::new(MemoryLedger::new());
    let nodes: Vec<_> = (1..=4).map(|i| (i, vec![cap("x")])).collect();
    seed_nodes(&ledger, &nodes).await;
    let tx = ledger
        .add_don(&DonParams {
            members: vec![p2p(4), p2p(3), p2p(2), p2p(1)],
            capability_configurations: vec![CapabilityConfiguration::new(cap("x").id(), b"7".to_vec())],
            is_public: true,
            accepts_workflows: false,
            f: 1,
        })
        .await
        .unwrap();
    ledger.confirm(&tx).await.unwrap();

    let desired = topology(vec![don("existing", &[2, 1, 4, 3], &[(cap("x"), "7")], 1)]);
    let report = reconciler(&ledger, CapabilityMode::Append)
        .reconcile(&desired)
        .await
        .unwrap();

    assert_eq!(report.dons[0].action, DonAction::Unchanged);
    assert_eq!(ledger.get_dons().await.unwrap().len(), 1);
}

#[tokio::test]
async fn update_keeps_unmentioned_configs() {
    let ledger = Arc::new(MemoryLedger::new());
    let first = topology(vec![don(
        "evolving",
        &[1, 2, 3, 4],
        &[(cap("keep"), "k"), (cap("change"), "old")],
        1,
    )]);
    let reconciler = reconciler(&ledger, CapabilityMode::Append);
    reconciler.reconcile(&first).await.unwrap();

    let second = topology(vec![don(
        "evolving",
        &[1, 2, 3, 4],
        &[(cap("change"), "new"), (cap("added"), "a")],
        1,
    )]);
    let report = reconciler.reconcile(&second).await.unwrap();
    assert_eq!(report.dons[0].action, DonAction::Update);

    let don = &ledger.get_dons().await.unwrap()[0];
    assert_eq!(don.config_for(&cap("keep").id()).unwrap().config, b"k".to_vec());
    assert_eq!(don.config_for(&cap("change").id()).unwrap().config, b"new".to_vec());
    assert_eq!(don.config_for(&cap("added").id()).unwrap().config, b"a".to_vec());
    assert_eq!(don.config_count, 2);
}

#[tokio::test]
async fn fault_tolerance_bound_enforced() {
    let ledger = Arc::new(MemoryLedger::new());
    let ok = topology(vec![don("ok", &[1, 2, 3, 4], &[(cap("x"), "")], 1)]);
    assert!(reconciler(&ledger, CapabilityMode::Append)
        .reconcile(&ok)
        .await
        .is_ok());

    let other = Arc::new(MemoryLedger::new());
    let bad = topology(vec![don("bad", &[1, 2, 3, 4], &[(cap("x"), "")], 2)]);
    let err = reconciler(&other, CapabilityMode::Append)
        .reconcile(&bad)
        .await
        .unwrap_err();
    assert!(matches!(
        err.source,
        Error::Validation(ValidationError::FaultTolerance { n: 4, f: 2 })
    ));
    assert_eq!(other.write_count().await, 0);
}

#[tokio::test]
async fn deprecated_capability_stops_node_write() {
    let ledger = Arc::new(MemoryLedger::new());
    let tx = ledger.add_capabilities(&[cap("old")]).await.unwrap();
    ledger.confirm(&tx).await.unwrap();
    ledger.deprecate_capability(&cap("old").id()).await.unwrap();

    let desired = topology(vec![don("solo", &[1], &[(cap("old"), "")], 0)]);
    let err = reconciler(&ledger, CapabilityMode::Append)
        .reconcile(&desired)
        .await
        .unwrap_err();
    assert_eq!(err.failed, Step::WriteNodes);
    assert!(matches!(err.source, Error::Ledger { .. }));
}

#[tokio::test]
async fn replace_cannot_drop_capability_a_don_needs() {
    let ledger = Arc::new(MemoryLedger::new());
    let reconciler = reconciler(&ledger, CapabilityMode::Replace);
    reconciler
        .reconcile(&topology(vec![don("d", &[1, 2, 3, 4], &[(cap("x"), "")], 1)]))
        .await
        .unwrap();

    // Same members, different capability: nodes would lose "x" which the DON still uses
    let err = reconciler
        .reconcile(&topology(vec![don("d", &[1, 2, 3, 4], &[(cap("y"), "")], 1)]))
        .await
        .unwrap_err();
    assert_eq!(err.failed, Step::WriteNodes);
    assert_eq!(err.last_completed, Step::BuildNodeParams);
}

#[tokio::test(start_paused = true)]
async fn slow_confirmation_times_out() {
    let ledger = Arc::new(MemoryLedger::new());
    ledger.set_confirm_delay(Some(Duration::from_secs(600))).await;
    let reconciler = DonReconciler::new(
        ledger.clone(),
        ReconcileConfig::default().with_confirm_timeout(Duration::from_secs(30)),
    );

    let err = reconciler
        .reconcile(&topology(vec![don("d", &[1], &[(cap("x"), "")], 0)]))
        .await
        .unwrap_err();
    assert_eq!(err.failed, Step::RegisterCapabilities);
    assert_eq!(err.last_completed, Step::Start);
    assert!(matches!(err.source, Error::Timeout { .. }));
}

#[tokio::test(start_paused = true)]
async fn cancellation_aborts_pass() {
    let ledger = Arc::new(MemoryLedger::new());
    ledger.set_confirm_delay(Some(Duration::from_secs(600))).await;
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let reconciler = DonReconciler::new(
        ledger.clone(),
        ReconcileConfig::default().without_confirm_timeout(),
    )
    .with_cancel(cancel_rx);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        let _ = cancel_tx.send(true);
    });

    let err = reconciler
        .reconcile(&topology(vec![don("d", &[1], &[(cap("x"), "")], 0)]))
        .await
        .unwrap_err();
    assert!(matches!(err.source, Error::Cancelled { .. }));
}

#[tokio::test]
async fn node_in_two_workflow_dons_is_rejected_by_ledger() {
    let ledger = Arc::new(MemoryLedger::new());
    let mut first = don("w1", &[1, 2, 3, 4], &[(cap("x"), "")], 1);
    first.accepts_workflows = true;
    let mut second = don("w2", &[1, 5, 6, 7], &[(cap("y"), "")], 1);
    second.accepts_workflows = true;

    let err = reconciler(&ledger, CapabilityMode::Append)
        .reconcile(&topology(vec![first, second]))
        .await
        .unwrap_err();
    assert_eq!(err.failed, Step::WriteDon);
    assert_eq!(err.don.as_deref(), Some("w2"));
    assert_eq!(ledger.get_dons().await.unwrap().len(), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn append_is_monotone_over_passes(
        seeded in proptest::collection::btree_set(0u8..6, 1..4),
        wanted in proptest::collection::btree_set(0u8..6, 1..4),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let ledger = Arc::new(MemoryLedger::new());
            let seeded_caps: Vec<_> = seeded.iter().map(|i| cap(&format!("c{i}"))).collect();
            seed_nodes(&ledger, &[(1, seeded_caps)]).await;
            let before = node_caps(&ledger, 1).await;

            let wanted_caps: Vec<_> = wanted.iter().map(|i| (cap(&format!("c{i}")), "")).collect();
            let desired = topology(vec![don("solo", &[1], &wanted_caps, 0)]);
            reconciler(&ledger, CapabilityMode::Append)
                .reconcile(&desired)
                .await
                .unwrap();

            let after = node_caps(&ledger, 1).await;
            assert!(after.is_superset(&before));
            for (c, _) in &wanted_caps {
                assert!(after.contains(&c.id()));
            }
        });
    }
}

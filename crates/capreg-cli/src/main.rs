//! capreg-plan
//!
//! Runs one reconciliation pass against an in-memory ledger seeded from a
//! snapshot and prints what the pass did.
//!
//! Usage:
//!   capreg-plan <topology.json> [ledger-snapshot.json]

use std::path::Path;
use std::sync::Arc;

use capreg_core::{LedgerSnapshot, MemoryLedger};
use capreg_reconcile::{DesiredTopology, DonReconciler, ReconcileConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn print_usage() {
    eprintln!("capreg-plan - Plan a capability registry reconciliation");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  capreg-plan <topology.json> [ledger-snapshot.json]");
    eprintln!();
    eprintln!("Prints the pass report as JSON. Without a snapshot the ledger starts empty.");
    eprintln!("DONs that request a consensus config are rejected: no generator is available.");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  CAPREG_CONFIRM_TIMEOUT_SECS  Confirmation deadline, 0 for none (default: 60)");
    eprintln!("  CAPREG_CAPABILITY_MODE       append | replace (default: append)");
    eprintln!("  CAPREG_TARGET_CHAIN          evm | solana | aptos | starknet (default: evm)");
    eprintln!("  CAPREG_SNAPSHOT_OUT          Write the post-pass ledger snapshot here");
    eprintln!("  RUST_LOG                     Log filter (default: capreg=info)");
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("reading {}: {e}", path.display()))?;
    let value = serde_json::from_str(&text)
        .map_err(|e| format!("parsing {}: {e}", path.display()))?;
    Ok(value)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "capreg=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (topology_path, snapshot_path) = match args.as_slice() {
        [topology] => (Path::new(topology), None),
        [topology, snapshot] => (Path::new(topology), Some(Path::new(snapshot))),
        _ => {
            print_usage();
            std::process::exit(2);
        }
    };

    let config = ReconcileConfig::from_env()?;
    let desired: DesiredTopology = read_json(topology_path)?;
    let ledger = match snapshot_path {
        Some(path) => MemoryLedger::from_snapshot(read_json::<LedgerSnapshot>(path)?),
        None => MemoryLedger::new(),
    };
    let ledger = Arc::new(ledger);

    tracing::info!(
        topology = %topology_path.display(),
        dons = desired.dons.len(),
        mode = %config.capability_mode,
        "Planning reconciliation"
    );

    let reconciler = DonReconciler::new(ledger.clone(), config);
    let report = reconciler.reconcile(&desired).await?;
    println!("{}", report.to_json()?);

    if let Ok(out) = std::env::var("CAPREG_SNAPSHOT_OUT") {
        let snapshot = ledger.snapshot().await;
        std::fs::write(&out, serde_json::to_string_pretty(&snapshot)?)
            .map_err(|e| format!("writing {out}: {e}"))?;
        tracing::info!(path = %out, "Wrote ledger snapshot");
    }

    Ok(())
}

//! Transaction confirmation with a deadline and cancellation.

use std::time::Duration;

use capreg_core::{Error, PendingTx, Receipt, RegistryLedger, Result};
use tokio::sync::watch;
use tracing::{debug, warn};

/// How long to wait for a confirmation, and how to give up early.
#[derive(Debug, Clone, Default)]
pub struct ConfirmOptions {
    /// `None` waits forever.
    pub timeout: Option<Duration>,
    /// Confirmation aborts once this reads `true`.
    pub cancel: Option<watch::Receiver<bool>>,
}

impl ConfirmOptions {
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }
}

/// Wait for `tx`, honoring the deadline and cancellation in `opts`.
pub async fn confirm(
    ledger: &dyn RegistryLedger,
    tx: &PendingTx,
    opts: &ConfirmOptions,
) -> Result<Receipt> {
    if opts.is_cancelled() {
        return Err(Error::Cancelled { tx: tx.id });
    }

    let wait = async {
        match opts.timeout {
            Some(after) => tokio::time::timeout(after, ledger.confirm(tx))
                .await
                .map_err(|_| {
                    warn!(tx = %tx.id, method = tx.method, ?after, "Confirmation timed out");
                    Error::Timeout { tx: tx.id, after }
                })?,
            None => ledger.confirm(tx).await,
        }
    };

    let receipt = match opts.cancel.clone() {
        Some(mut rx) => {
            tokio::select! {
                res = wait => res,
                _ = cancelled(&mut rx) => {
                    warn!(tx = %tx.id, method = tx.method, "Confirmation cancelled");
                    Err(Error::Cancelled { tx: tx.id })
                }
            }
        }
        None => wait.await,
    }?;

    debug!(tx = %tx.id, method = tx.method, block = receipt.block, "Confirmed");
    Ok(receipt)
}

async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender dropped without cancelling
            std::future::pending::<()>().await;
        }
    }
}

//! Capability registration.
//!
//! Capabilities are registered with one bulk write. If the ledger rejects
//! the batch because some entries already exist, the registrar falls back
//! to one write per capability and skips the collisions. Identities are
//! resolved through a [`CapabilityCache`] shared by every pass that holds
//! the same `Arc`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use capreg_core::{
    Capability, CapabilityKey, HashedCapabilityId, RegistryLedger, Result,
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::confirm::{confirm, ConfirmOptions};

/// Resolved capability identities keyed by `(labelled_name, version)`.
#[derive(Debug, Default)]
pub struct CapabilityCache {
    ids: RwLock<HashMap<CapabilityKey, HashedCapabilityId>>,
}

impl CapabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &CapabilityKey) -> Option<HashedCapabilityId> {
        self.ids.read().await.get(key).copied()
    }

    pub async fn insert(&self, key: CapabilityKey, id: HashedCapabilityId) {
        self.ids.write().await.insert(key, id);
    }

    pub async fn contains(&self, key: &CapabilityKey) -> bool {
        self.ids.read().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.ids.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.ids.read().await.is_empty()
    }
}

/// Outcome of one registration call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registration {
    pub ids: BTreeMap<Capability, HashedCapabilityId>,
    /// Capabilities another writer registered first, found during the
    /// per-item fallback.
    pub skipped: BTreeSet<CapabilityKey>,
}

/// Registers capabilities and resolves their hashed ids.
pub struct CapabilityRegistrar {
    ledger: Arc<dyn RegistryLedger>,
    cache: Arc<CapabilityCache>,
    confirm: ConfirmOptions,
}

impl CapabilityRegistrar {
    pub fn new(
        ledger: Arc<dyn RegistryLedger>,
        cache: Arc<CapabilityCache>,
        confirm: ConfirmOptions,
    ) -> Self {
        Self {
            ledger,
            cache,
            confirm,
        }
    }

    pub fn cache(&self) -> &Arc<CapabilityCache> {
        &self.cache
    }

    /// Register `capabilities` and return the id of each.
    ///
    /// Idempotent. Capabilities already in the cache are never written.
    pub async fn register(
        &self,
        capabilities: &[Capability],
    ) -> Result<BTreeMap<Capability, HashedCapabilityId>> {
        Ok(self.register_all(capabilities).await?.ids)
    }

    /// Like [`register`](Self::register), also reporting collisions skipped
    /// during the per-item fallback.
    pub async fn register_all(&self, capabilities: &[Capability]) -> Result<Registration> {
        let mut seen = BTreeSet::new();
        let unique: Vec<&Capability> = capabilities.iter().filter(|c| seen.insert(*c)).collect();

        let mut novel = Vec::new();
        for cap in &unique {
            if !self.cache.contains(&cap.key()).await {
                novel.push((*cap).clone());
            }
        }

        let skipped = if novel.is_empty() {
            BTreeSet::new()
        } else {
            self.add_batch(&novel).await?
        };

        let mut resolved = BTreeMap::new();
        for cap in unique {
            let key = cap.key();
            let id = match self.cache.get(&key).await {
                Some(id) => id,
                None => {
                    let id = self
                        .ledger
                        .get_hashed_capability_id(&cap.labelled_name, &cap.version)
                        .await?;
                    self.cache.insert(key, id).await;
                    id
                }
            };
            resolved.insert(cap.clone(), id);
        }

        self.warn_deprecated(&resolved).await?;
        Ok(Registration {
            ids: resolved,
            skipped,
        })
    }

    /// Returns the keys that collided during the per-item fallback.
    async fn add_batch(&self, batch: &[Capability]) -> Result<BTreeSet<CapabilityKey>> {
        let mut skipped = BTreeSet::new();
        match self.write(batch).await {
            Ok(()) => {
                info!(count = batch.len(), "Registered capabilities");
                Ok(skipped)
            }
            Err(e) if e.is_already_exists() => {
                debug!(
                    count = batch.len(),
                    error = %e,
                    "Bulk registration collided, registering individually"
                );
                for cap in batch {
                    match self.write(std::slice::from_ref(cap)).await {
                        Ok(()) => info!(capability = %cap.key(), "Registered capability"),
                        Err(e) if e.is_already_exists() => {
                            warn!(capability = %cap.key(), "Capability already registered, skipping");
                            skipped.insert(cap.key());
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(skipped)
            }
            Err(e) => Err(e),
        }
    }

    async fn write(&self, batch: &[Capability]) -> Result<()> {
        let tx = self.ledger.add_capabilities(batch).await?;
        confirm(self.ledger.as_ref(), &tx, &self.confirm).await?;
        Ok(())
    }

    async fn warn_deprecated(&self, resolved: &BTreeMap<Capability, HashedCapabilityId>) -> Result<()> {
        let wanted: BTreeSet<&HashedCapabilityId> = resolved.values().collect();
        for info in self.ledger.get_capabilities().await? {
            if info.is_deprecated && wanted.contains(&info.hashed_id) {
                warn!(
                    capability = %info.capability.key(),
                    id = %info.hashed_id,
                    "Capability is deprecated"
                );
            }
        }
        Ok(())
    }
}

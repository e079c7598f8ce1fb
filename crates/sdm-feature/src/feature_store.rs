// feature_store.rs — Ideal values and last observations per feature.
//
// Two record shapes live in the backing store:
//
//   ideal_<feature name>   → FingerprintRecord (the current target)
//   <repository url>       → { <feature name>: FingerprintRecord, ... }
//
// Repository URLs always carry a `scheme://` prefix and `_` is not a legal
// scheme character, so the two key spaces cannot collide.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use sdm_goal::RepoRef;

use crate::error::StoreError;
use crate::fingerprint::FingerprintRecord;
use crate::store::Store;

/// Source of truth for feature ideals. Every decision re-reads it.
pub trait FeatureStore: Send + Sync {
    /// The current ideal for `name`; `Ok(None)` when none was ever set.
    fn ideal(&self, name: &str) -> Result<Option<FingerprintRecord>, StoreError>;

    /// Overwrite the ideal for `record.name`.
    fn set_ideal(&self, record: &FingerprintRecord) -> Result<(), StoreError>;

    /// Record the latest observation of a feature in a repository.
    fn store(&self, repo: &RepoRef, record: &FingerprintRecord) -> Result<(), StoreError>;

    /// The latest observation recorded by [`FeatureStore::store`].
    fn last_observed(&self, repo: &RepoRef, name: &str) -> Result<Option<FingerprintRecord>, StoreError>;
}

pub fn ideal_key(name: &str) -> String {
    format!("ideal_{}", name)
}

pub fn observation_key(repo: &RepoRef) -> String {
    repo.url.clone()
}

/// [`FeatureStore`] over any key/value [`Store`].
pub struct StoreFeatureStore {
    inner: Arc<dyn Store>,
    // Serializes read-modify-write of per-repository observation maps.
    observations: Mutex<()>,
}

impl StoreFeatureStore {
    pub fn new(inner: Arc<dyn Store>) -> Self {
        Self {
            inner,
            observations: Mutex::new(()),
        }
    }

    /// Create a feature store and seed it with `ideals`.
    pub fn create(
        inner: Arc<dyn Store>,
        ideals: impl IntoIterator<Item = FingerprintRecord>,
    ) -> Result<Self, StoreError> {
        let store = Self::new(inner);
        for ideal in ideals {
            store.set_ideal(&ideal)?;
        }
        Ok(store)
    }

    fn observations(&self, repo: &RepoRef) -> Result<BTreeMap<String, FingerprintRecord>, StoreError> {
        match self.inner.load(&observation_key(repo))? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(BTreeMap::new()),
        }
    }
}

impl FeatureStore for StoreFeatureStore {
    fn ideal(&self, name: &str) -> Result<Option<FingerprintRecord>, StoreError> {
        match self.inner.load(&ideal_key(name))? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    fn set_ideal(&self, record: &FingerprintRecord) -> Result<(), StoreError> {
        let value = serde_json::to_value(record)?;
        self.inner.save(&ideal_key(&record.name), &value)?;
        tracing::info!(feature = %record.name, sha = %record.sha, "ideal updated");
        Ok(())
    }

    fn store(&self, repo: &RepoRef, record: &FingerprintRecord) -> Result<(), StoreError> {
        let _guard = self.observations.lock().map_err(|_| StoreError::LockPoisoned)?;
        let mut observed = self.observations(repo)?;
        observed.insert(record.name.clone(), record.clone());
        let value = serde_json::to_value(&observed)?;
        self.inner.save(&observation_key(repo), &value)?;
        tracing::debug!(repo = %repo, feature = %record.name, "observation stored");
        Ok(())
    }

    fn last_observed(&self, repo: &RepoRef, name: &str) -> Result<Option<FingerprintRecord>, StoreError> {
        Ok(self.observations(repo)?.remove(name))
    }
}

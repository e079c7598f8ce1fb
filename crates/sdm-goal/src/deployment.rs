// deployment.rs — Deployment freeze and per-repository deploy enablement.
//
// This state is passed into push evaluation explicitly (via PushContext)
// rather than living in a process-wide singleton, so each test or each
// delivery machine instance can own an independent copy. A poisoned lock is
// an error, never a default: an unreadable freeze must not let deploys
// through.

use std::collections::BTreeSet;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GoalError;
use crate::push::RepoRef;

/// Snapshot of the global deployment freeze.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploymentStatus {
    pub frozen: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed_at: Option<DateTime<Utc>>,
}

/// Everything the manager knows, in a form that can be persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploymentState {
    #[serde(default)]
    pub status: DeploymentStatus,
    /// `owner/repo` slugs with deployment enabled.
    #[serde(default)]
    pub enabled: BTreeSet<String>,
}

/// In-memory deployment status: freeze flag plus the set of repositories
/// that have deployment enabled.
#[derive(Debug, Default)]
pub struct DeploymentStatusManager {
    inner: RwLock<DeploymentState>,
}

impl DeploymentStatusManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a previously saved state.
    pub fn from_state(state: DeploymentState) -> Self {
        Self {
            inner: RwLock::new(state),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, DeploymentState>, GoalError> {
        self.inner
            .read()
            .map_err(|_| GoalError::DeploymentStatusUnavailable("lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, DeploymentState>, GoalError> {
        self.inner
            .write()
            .map_err(|_| GoalError::DeploymentStatusUnavailable("lock poisoned".into()))
    }

    /// Freeze all deployments.
    pub fn freeze(&self, note: impl Into<String>) -> Result<(), GoalError> {
        self.set_status(true, Some(note.into()))
    }

    pub fn unfreeze(&self) -> Result<(), GoalError> {
        self.set_status(false, None)
    }

    fn set_status(&self, frozen: bool, note: Option<String>) -> Result<(), GoalError> {
        self.write()?.status = DeploymentStatus {
            frozen,
            note,
            changed_at: Some(Utc::now()),
        };
        tracing::info!(frozen, "deployment status changed");
        Ok(())
    }

    pub fn status(&self) -> Result<DeploymentStatus, GoalError> {
        Ok(self.read()?.status.clone())
    }

    pub fn is_frozen(&self) -> Result<bool, GoalError> {
        Ok(self.read()?.status.frozen)
    }

    pub fn enable_deploy(&self, repo: &RepoRef) -> Result<(), GoalError> {
        if self.write()?.enabled.insert(repo.slug()) {
            tracing::info!(repo = %repo, "deployment enabled");
        }
        Ok(())
    }

    pub fn disable_deploy(&self, repo: &RepoRef) -> Result<(), GoalError> {
        if self.write()?.enabled.remove(&repo.slug()) {
            tracing::info!(repo = %repo, "deployment disabled");
        }
        Ok(())
    }

    pub fn is_deploy_enabled(&self, repo: &RepoRef) -> Result<bool, GoalError> {
        Ok(self.read()?.enabled.contains(&repo.slug()))
    }

    /// Copy of the whole state, for persisting.
    pub fn snapshot(&self) -> Result<DeploymentState, GoalError> {
        Ok(self.read()?.clone())
    }

    /// Poison the lock the way a panicking writer would.
    #[cfg(test)]
    pub(crate) fn poison(&self) {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = self.inner.write();
            panic!("writer died");
        }));
    }
}

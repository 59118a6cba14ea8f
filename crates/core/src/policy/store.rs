//! Atomically swapped policy snapshot.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::info;

use super::error::PolicyError;
use super::types::PolicySnapshot;

/// Holds the active [`PolicySnapshot`].
///
/// Readers take an `Arc` to the whole snapshot and keep using it for the rest
/// of their computation, so a concurrent replacement is never observed half
/// applied.
#[derive(Debug)]
pub struct PolicyStore {
    current: ArcSwap<PolicySnapshot>,
}

impl PolicyStore {
    /// Creates a store holding a validated snapshot.
    pub fn new(snapshot: PolicySnapshot) -> Result<Self, PolicyError> {
        snapshot.validate()?;
        Ok(Self {
            current: ArcSwap::from_pointee(snapshot),
        })
    }

    /// The active snapshot.
    pub fn current(&self) -> Arc<PolicySnapshot> {
        self.current.load_full()
    }

    /// Replaces the whole snapshot and returns the installed one.
    ///
    /// The version is assigned here, one above the snapshot it replaces.
    pub fn replace(&self, snapshot: PolicySnapshot) -> Result<Arc<PolicySnapshot>, PolicyError> {
        snapshot.validate()?;

        let mut installed = None;
        self.current.rcu(|current| {
            let next = Arc::new(PolicySnapshot {
                version: current.version + 1,
                ..snapshot.clone()
            });
            installed = Some(Arc::clone(&next));
            next
        });

        let installed = installed.unwrap_or_else(|| self.current());
        info!(version = installed.version, "Installed policy snapshot");
        Ok(installed)
    }
}

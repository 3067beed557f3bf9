//! Per-namespace version counters.
//!
//! Each namespace owns one integer in the shared store. Reading an absent
//! counter yields 0, bumping uses the backend's atomic `INCR`, so concurrent
//! invalidations from any number of processes never lose an increment. The
//! counter is never decremented; only [`VersionStore::reset_version`] (test and
//! ops tooling) deletes it.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use super::backend::KvBackend;
use super::namespace::Namespace;
use crate::error::{CacheError, CacheResult};
use crate::metrics::Metrics;

/// Key prefix for version counters.
pub const VERSION_KEY_PREFIX: &str = "cache:version:";

/// Backend key holding the version of `namespace`.
pub fn version_key(namespace: &Namespace) -> String {
    format!("{VERSION_KEY_PREFIX}{namespace}")
}

/// Thin wrapper over the backend's counters.
#[derive(Clone)]
pub struct VersionStore {
    backend: Arc<dyn KvBackend>,
    metrics: Arc<Metrics>,
}

impl VersionStore {
    /// Create a store over `backend`.
    pub fn new(backend: Arc<dyn KvBackend>, metrics: Arc<Metrics>) -> Self {
        Self { backend, metrics }
    }

    /// Current version of `namespace`; 0 when it was never bumped.
    pub async fn get_version(&self, namespace: &Namespace) -> CacheResult<u64> {
        let key = version_key(namespace);
        match self.backend.get(&key).await? {
            None => Ok(0),
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map_err(|_| CacheError::InvalidValue { key }),
        }
    }

    /// Atomically increment the version and return the new value (>= 1).
    ///
    /// On error the bump must be treated as not having happened.
    #[instrument(skip(self), fields(namespace = %namespace))]
    pub async fn bump_version(&self, namespace: &Namespace) -> CacheResult<u64> {
        let key = version_key(namespace);
        match self.backend.incr(&key).await {
            Ok(next) if next >= 1 => {
                debug!(version = next, "Namespace version bumped");
                self.metrics.record_version_bump(namespace.kind());
                Ok(next as u64)
            }
            Ok(_) => {
                // A negative counter can only come from outside tampering.
                self.metrics.record_version_bump_failure(namespace.kind());
                Err(CacheError::InvalidValue { key })
            }
            Err(e) => {
                warn!(error = %e, "Namespace version bump failed");
                self.metrics.record_version_bump_failure(namespace.kind());
                Err(e)
            }
        }
    }

    /// Delete the counter, returning the namespace to version 0.
    #[instrument(skip(self), fields(namespace = %namespace))]
    pub async fn reset_version(&self, namespace: &Namespace) -> CacheResult<()> {
        let existed = self.backend.del(&version_key(namespace)).await?;
        debug!(existed, "Namespace version reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::UnreachableBackend;
    use crate::cache::InMemoryBackend;

    fn store() -> VersionStore {
        VersionStore::new(Arc::new(InMemoryBackend::new()), Arc::new(Metrics::new()))
    }

    #[tokio::test]
    async fn test_absent_version_is_zero() {
        let versions = store();
        assert_eq!(versions.get_version(&Namespace::trips()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bump_after_reset_returns_one() {
        let versions = store();
        let ns = Namespace::trips();

        versions.bump_version(&ns).await.unwrap();
        versions.bump_version(&ns).await.unwrap();
        versions.reset_version(&ns).await.unwrap();
        assert_eq!(versions.get_version(&ns).await.unwrap(), 0);

        assert_eq!(versions.bump_version(&ns).await.unwrap(), 1);
        assert_eq!(versions.get_version(&ns).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_namespaces_are_independent() {
        let versions = store();
        versions.bump_version(&Namespace::trips()).await.unwrap();
        assert_eq!(
            versions
                .get_version(&Namespace::trip_schedules("t1"))
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_concurrent_bumps_are_not_lost() {
        let versions = store();
        let ns = Namespace::trips();
        let bumps = (0..50).map(|_| versions.bump_version(&ns));
        let mut results = futures::future::try_join_all(bumps).await.unwrap();
        results.sort_unstable();
        assert_eq!(results, (1..=50).collect::<Vec<u64>>());
        assert_eq!(versions.get_version(&ns).await.unwrap(), 50);
    }

    #[tokio::test]
    async fn test_unreachable_backend_surfaces_error() {
        let metrics = Arc::new(Metrics::new());
        let versions = VersionStore::new(Arc::new(UnreachableBackend), metrics.clone());
        let err = versions.bump_version(&Namespace::trips()).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(metrics.snapshot().version_bump_failures, 1);
    }

    #[tokio::test]
    async fn test_corrupt_version_is_reported() {
        let backend = Arc::new(InMemoryBackend::new());
        backend
            .set("cache:version:trips", "not-a-number", None)
            .await
            .unwrap();
        let versions = VersionStore::new(backend, Arc::new(Metrics::new()));
        assert!(matches!(
            versions.get_version(&Namespace::trips()).await,
            Err(CacheError::InvalidValue { .. })
        ));
    }
}

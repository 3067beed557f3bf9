//! Write-path invalidation.
//!
//! Every mutation of catalog data is described as a [`CatalogChange`] and fed
//! to [`InvalidationTrigger::invalidate`], which bumps each namespace whose
//! responses could embed the changed data.

use futures::future::join_all;
use tracing::{info, instrument, warn};

use super::namespace::Namespace;
use super::version::VersionStore;
use crate::error::CacheResult;

/// A mutation of data served through cached reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogChange {
    /// A new trip was published; only listings can contain it.
    TripCreated,
    /// An existing trip was edited or removed.
    TripChanged {
        /// Trip identifier
        trip_id: String,
    },
    /// A trip's schedules were added, edited or removed.
    SchedulesChanged {
        /// Trip identifier
        trip_id: String,
    },
    /// Explicit namespace, for ops tooling.
    Namespace(Namespace),
}

impl CatalogChange {
    /// Namespaces whose cached responses the change makes stale.
    ///
    /// Listings embed schedules when `incSchedules` is set, so schedule changes
    /// also invalidate `trips`.
    pub fn namespaces(&self) -> Vec<Namespace> {
        match self {
            Self::TripCreated => vec![Namespace::trips()],
            Self::TripChanged { trip_id } | Self::SchedulesChanged { trip_id } => {
                vec![Namespace::trips(), Namespace::trip_schedules(trip_id)]
            }
            Self::Namespace(ns) => vec![ns.clone()],
        }
    }
}

/// Bumps namespace versions on behalf of write paths.
#[derive(Clone)]
pub struct InvalidationTrigger {
    versions: VersionStore,
}

impl InvalidationTrigger {
    /// Create a trigger over `versions`.
    pub fn new(versions: VersionStore) -> Self {
        Self { versions }
    }

    /// Bump every namespace touched by `change`.
    ///
    /// All bumps are attempted. If any fails the first error is returned and
    /// the caller must treat the invalidation as not having happened (retry
    /// it or fail the write).
    #[instrument(skip(self), fields(change = ?change))]
    pub async fn invalidate(&self, change: &CatalogChange) -> CacheResult<Vec<(Namespace, u64)>> {
        let namespaces = change.namespaces();
        let results = join_all(namespaces.iter().map(|ns| self.versions.bump_version(ns))).await;

        let mut bumped = Vec::new();
        let mut first_error = None;
        for (namespace, result) in namespaces.into_iter().zip(results) {
            match result {
                Ok(version) => bumped.push((namespace, version)),
                Err(e) => {
                    warn!(namespace = %namespace, error = %e, "Invalidation bump failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!(namespaces = bumped.len(), "Invalidated cached reads");
                Ok(bumped)
            }
        }
    }
}

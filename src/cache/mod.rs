//! Read-path caching: namespace versions, versioned keys and conditional GETs.
//!
//! Invalidation never deletes cached entries. Write paths bump a namespace's
//! version through [`InvalidationTrigger`]; every key built afterwards embeds
//! the new version, so ETags stored under older keys are orphaned and expire on
//! their own TTL.

pub mod backend;
pub mod conditional;
pub mod etag;
pub mod keys;
pub(crate) mod memory;
pub mod namespace;
pub mod trigger;
pub mod version;

pub use backend::{KvBackend, RedisBackend};
pub use conditional::{
    etag_key, if_none_match, CacheStatus, ConditionalResponder, ConditionalResponse, Payload,
    X_CACHE,
};
pub use etag::{compute_etag, if_none_match_matches};
pub use keys::{
    join_key, labeled, versioned_key, KeyBuilder, KeySegment, VersionedKey, PLACEHOLDER,
};
pub use memory::InMemoryBackend;
pub use namespace::{Namespace, TRIPS, TRIP_SCHEDULES};
pub use trigger::{CatalogChange, InvalidationTrigger};
pub use version::{version_key, VersionStore};

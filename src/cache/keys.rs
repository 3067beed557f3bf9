//! Versioned cache key construction.
//!
//! Keys have the shape `namespace:v<version>:<p1>:<p2>:...`. The version is
//! read from the [`VersionStore`] on every build, so a bump makes every key
//! issued before it unreachable; stale entries are left for the backend's
//! expiry to reclaim instead of being enumerated and deleted.
//!
//! Parameters are serialized through [`KeySegment`] so the same logical value
//! always renders the same way, and absent filters render as the
//! [`PLACEHOLDER`] token instead of being dropped.

use std::borrow::Cow;
use std::fmt;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

use super::namespace::Namespace;
use super::version::VersionStore;
use crate::error::CacheResult;

/// Token standing in for an absent or wildcard parameter.
pub const PLACEHOLDER: &str = "_";

/// Separator between key segments.
pub const SEPARATOR: char = ':';

/// Stable string form of a key parameter value.
pub trait KeySegment {
    /// Render the value. Implementations must be deterministic.
    fn segment(&self) -> Cow<'_, str>;
}

impl KeySegment for str {
    fn segment(&self) -> Cow<'_, str> {
        escape(self)
    }
}

impl KeySegment for String {
    fn segment(&self) -> Cow<'_, str> {
        escape(self)
    }
}

impl<T: KeySegment + ?Sized> KeySegment for &T {
    fn segment(&self) -> Cow<'_, str> {
        (**self).segment()
    }
}

impl KeySegment for bool {
    fn segment(&self) -> Cow<'_, str> {
        Cow::Borrowed(if *self { "true" } else { "false" })
    }
}

macro_rules! integer_segment {
    ($($ty:ty),*) => {
        $(
            impl KeySegment for $ty {
                fn segment(&self) -> Cow<'_, str> {
                    Cow::Owned(self.to_string())
                }
            }
        )*
    };
}

integer_segment!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);

impl KeySegment for NaiveDate {
    fn segment(&self) -> Cow<'_, str> {
        Cow::Owned(self.format("%Y-%m-%d").to_string())
    }
}

impl KeySegment for DateTime<Utc> {
    fn segment(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

impl<T: KeySegment> KeySegment for Option<T> {
    fn segment(&self) -> Cow<'_, str> {
        match self {
            Some(value) => value.segment(),
            None => Cow::Borrowed(PLACEHOLDER),
        }
    }
}

/// Escape characters that would make two different values render the same.
///
/// `%` and `:` are percent-encoded, and a value that is literally the
/// placeholder is encoded so it cannot be mistaken for an absent filter.
fn escape(raw: &str) -> Cow<'_, str> {
    if raw == PLACEHOLDER {
        return Cow::Borrowed("%5F");
    }
    if !raw.contains(['%', SEPARATOR]) {
        return Cow::Borrowed(raw);
    }
    let mut out = String::with_capacity(raw.len() + 8);
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            SEPARATOR => out.push_str("%3A"),
            other => out.push(other),
        }
    }
    Cow::Owned(out)
}

/// Render `label:value`, the form used for named filter parameters.
pub fn labeled(label: &str, value: impl KeySegment) -> String {
    format!("{label}{SEPARATOR}{}", value.segment())
}

/// Join a prefix and pre-rendered segments with `:`.
///
/// This is the pure composition step: no version lookup and no escaping, the
/// segments are expected to come from [`labeled`] or [`KeySegment`].
pub fn join_key<S: AsRef<str>>(prefix: &str, segments: &[S]) -> String {
    let capacity = prefix.len() + segments.iter().map(|s| s.as_ref().len() + 1).sum::<usize>();
    let mut key = String::with_capacity(capacity);
    key.push_str(prefix);
    for segment in segments {
        key.push(SEPARATOR);
        key.push_str(segment.as_ref());
    }
    key
}

/// Compose a versioned key from already known parts.
pub fn versioned_key<S: AsRef<str>>(namespace: &Namespace, version: u64, segments: &[S]) -> String {
    join_key(&format!("{namespace}{SEPARATOR}v{version}"), segments)
}

/// A key bound to the namespace version it was built under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionedKey {
    namespace: Namespace,
    version: u64,
    key: String,
}

impl VersionedKey {
    /// Build from parts without consulting the store.
    pub fn new<S: AsRef<str>>(namespace: Namespace, version: u64, segments: &[S]) -> Self {
        let key = versioned_key(&namespace, version, segments);
        Self {
            namespace,
            version,
            key,
        }
    }

    /// The namespace this key belongs to.
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// The namespace version the key was built under.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The full key string.
    pub fn as_str(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for VersionedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// Builds keys against the live namespace versions.
#[derive(Clone)]
pub struct KeyBuilder {
    versions: VersionStore,
}

impl KeyBuilder {
    /// Create a builder reading versions from `versions`.
    pub fn new(versions: VersionStore) -> Self {
        Self { versions }
    }

    /// Build the key for `namespace` and `segments` under the current version.
    ///
    /// Only fails when the version cannot be read.
    pub async fn build_key<S: AsRef<str>>(
        &self,
        namespace: &Namespace,
        segments: &[S],
    ) -> CacheResult<VersionedKey> {
        let version = self.versions.get_version(namespace).await?;
        Ok(VersionedKey::new(namespace.clone(), version, segments))
    }

    /// The version store backing this builder.
    pub fn versions(&self) -> &VersionStore {
        &self.versions
    }
}

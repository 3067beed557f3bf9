//! Cache namespaces.
//!
//! A namespace names a group of cached responses that are invalidated together
//! by a single version bump. Unrelated response types must never share one, so
//! the known namespaces are built through constructors rather than ad-hoc
//! strings.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};

/// Namespace kind for the trip listing endpoint.
pub const TRIPS: &str = "trips";

/// Namespace kind for one trip's schedule listing.
pub const TRIP_SCHEDULES: &str = "trip-schedules";

/// A validated namespace string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Namespace(String);

impl Namespace {
    /// Validate an arbitrary namespace string.
    ///
    /// Empty strings and strings containing whitespace or control characters
    /// are rejected since they would make keys ambiguous in logs and tooling.
    pub fn new(raw: impl Into<String>) -> CacheResult<Self> {
        let raw = raw.into();
        if raw.is_empty() || raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(CacheError::InvalidNamespace(raw));
        }
        Ok(Self(raw))
    }

    /// The trip listing namespace.
    pub fn trips() -> Self {
        Self(TRIPS.to_string())
    }

    /// The schedule listing of a single trip.
    ///
    /// Any trip id yields a valid namespace: `%`, whitespace and control
    /// characters are percent-encoded, so distinct ids stay distinct.
    pub fn trip_schedules(trip_id: &str) -> Self {
        Self(format!("{TRIP_SCHEDULES}:{}", encode_id(trip_id)))
    }

    /// The namespace string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading segment before the first `:`, used to look up per-kind TTLs.
    pub fn kind(&self) -> &str {
        self.0.split(':').next().unwrap_or(&self.0)
    }
}

fn encode_id(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == '%' || c.is_whitespace() || c.is_control() {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{byte:02X}"));
            }
        } else {
            out.push(c);
        }
    }
    out
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Namespace {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Namespace {
    type Error = CacheError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Namespace> for String {
    fn from(value: Namespace) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_namespaces() {
        assert_eq!(Namespace::trips().as_str(), "trips");
        assert_eq!(
            Namespace::trip_schedules("trp_42").as_str(),
            "trip-schedules:trp_42"
        );
    }

    #[test]
    fn test_trip_schedules_accepts_any_trip_id() {
        let ns = Namespace::trip_schedules("t 1");
        assert_eq!(ns.as_str(), "trip-schedules:t%201");
        assert_eq!(Namespace::new(ns.as_str()).unwrap(), ns);
        assert_ne!(ns, Namespace::trip_schedules("t%201"));
        assert!(Namespace::new(Namespace::trip_schedules("a\tb").as_str()).is_ok());
    }

    #[test]
    fn test_kind() {
        assert_eq!(Namespace::trips().kind(), TRIPS);
        assert_eq!(Namespace::trip_schedules("x").kind(), TRIP_SCHEDULES);
    }

    #[test]
    fn test_rejects_invalid() {
        assert!(Namespace::new("").is_err());
        assert!(Namespace::new("trips list").is_err());
        assert!(Namespace::new("trips\n").is_err());
        assert!(Namespace::new("bookings:by-user").is_ok());
    }

    #[test]
    fn test_serde_validates() {
        let ns: Namespace = serde_json::from_str("\"trips\"").unwrap();
        assert_eq!(ns, Namespace::trips());
        assert!(serde_json::from_str::<Namespace>("\"\"").is_err());
    }
}

//! Trip catalog: the primary data behind the cacheable read endpoints.
//!
//! The relational booking store is an external collaborator reached through
//! [`TripCatalog`]. [`StaticCatalog`] is the in-process implementation used by
//! the development binary (loaded from a JSON file) and by tests; it counts
//! queries so callers can observe whether a read reached the primary store.

#![allow(missing_docs)]

pub mod routes;

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::cache::{labeled, CatalogChange};
use crate::error::ConfigError;

pub use routes::{catalog_router, ApiError, CatalogState};

/// Default page size for trip listings.
pub const DEFAULT_LIMIT: u32 = 20;

/// Largest accepted page size.
pub const MAX_LIMIT: u32 = 100;

/// One departure of a trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub departs_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arrives_at: Option<DateTime<Utc>>,
    pub seats_available: u32,
    /// Fare in the currency's minor unit
    pub price_minor: i64,
    pub currency: String,
}

/// A bookable trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trip {
    pub id: String,
    pub name: String,
    pub category: String,
    pub operator: String,
    pub origin: String,
    pub destination: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub schedules: Vec<Schedule>,
}

/// Listing entry; schedules only when requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripSummary {
    pub id: String,
    pub name: String,
    pub category: String,
    pub operator: String,
    pub origin: String,
    pub destination: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedules: Option<Vec<Schedule>>,
}

/// One page of a trip listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripPage {
    pub trips: Vec<TripSummary>,
    /// Matches before pagination
    pub total: usize,
    pub limit: u32,
    pub offset: u32,
}

/// Filters accepted by `GET /api/trips`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TripQuery {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub operator: Option<String>,
    /// Free-text search over name, route and description
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub include_schedules: bool,
    /// Earliest departure date
    #[serde(default)]
    pub start: Option<NaiveDate>,
    /// Latest departure date
    #[serde(default)]
    pub end: Option<NaiveDate>,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    DEFAULT_LIMIT
}

impl Default for TripQuery {
    fn default() -> Self {
        Self {
            category: None,
            operator: None,
            q: None,
            include_schedules: false,
            start: None,
            end: None,
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

fn normalize_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
}

impl TripQuery {
    /// Canonical form: text filters trimmed and lower-cased, empty filters
    /// dropped, limit clamped to `1..=MAX_LIMIT`.
    ///
    /// Requests that mean the same thing therefore share a cache key.
    pub fn normalized(self) -> Self {
        Self {
            category: normalize_text(self.category),
            operator: normalize_text(self.operator),
            q: normalize_text(self.q),
            limit: self.limit.clamp(1, MAX_LIMIT),
            ..self
        }
    }

    /// Ordered, labeled key segments for this query.
    pub fn key_params(&self) -> Vec<String> {
        vec![
            labeled("cat", self.category.as_deref()),
            labeled("op", self.operator.as_deref()),
            labeled("q", self.q.as_deref()),
            labeled("incSchedules", self.include_schedules),
            labeled("start", self.start),
            labeled("end", self.end),
            labeled("l", self.limit),
            labeled("o", self.offset),
        ]
    }

    fn has_date_window(&self) -> bool {
        self.start.is_some() || self.end.is_some()
    }

    fn in_window(&self, schedule: &Schedule) -> bool {
        let day = schedule.departs_at.date_naive();
        self.start.map_or(true, |start| day >= start) && self.end.map_or(true, |end| day <= end)
    }
}

/// Read access to trips and schedules.
#[async_trait]
pub trait TripCatalog: Send + Sync + 'static {
    /// One page of trips matching `query`.
    async fn list_trips(&self, query: &TripQuery) -> anyhow::Result<TripPage>;

    /// Schedules of `trip_id`, or `None` if the trip does not exist.
    async fn trip_schedules(&self, trip_id: &str) -> anyhow::Result<Option<Vec<Schedule>>>;
}

/// In-memory catalog.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    trips: RwLock<Vec<Trip>>,
    queries: AtomicU64,
}

impl StaticCatalog {
    pub fn new(trips: Vec<Trip>) -> Self {
        Self {
            trips: RwLock::new(trips),
            queries: AtomicU64::new(0),
        }
    }

    /// Load trips from a JSON array file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let catalog_err = |reason: String| ConfigError::Catalog {
            path: path.display().to_string(),
            reason,
        };
        let raw = std::fs::read_to_string(path).map_err(|e| catalog_err(e.to_string()))?;
        let trips: Vec<Trip> = serde_json::from_str(&raw).map_err(|e| catalog_err(e.to_string()))?;
        Ok(Self::new(trips))
    }

    /// Number of queries served so far.
    pub fn queries(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    /// Insert or replace a trip, returning the change to invalidate.
    #[must_use = "cached reads stay stale until the change is invalidated"]
    pub fn upsert_trip(&self, trip: Trip) -> CatalogChange {
        let mut trips = self.trips.write();
        match trips.iter_mut().find(|t| t.id == trip.id) {
            Some(existing) => {
                let trip_id = trip.id.clone();
                *existing = trip;
                CatalogChange::TripChanged { trip_id }
            }
            None => {
                trips.push(trip);
                CatalogChange::TripCreated
            }
        }
    }

    /// Replace a trip's schedules. `None` if the trip does not exist.
    #[must_use = "cached reads stay stale until the change is invalidated"]
    pub fn replace_schedules(&self, trip_id: &str, schedules: Vec<Schedule>) -> Option<CatalogChange> {
        let mut trips = self.trips.write();
        let trip = trips.iter_mut().find(|t| t.id == trip_id)?;
        trip.schedules = schedules;
        Some(CatalogChange::SchedulesChanged {
            trip_id: trip_id.to_string(),
        })
    }
}

fn matches_text(trip: &Trip, needle: &str) -> bool {
    [
        Some(trip.name.as_str()),
        Some(trip.origin.as_str()),
        Some(trip.destination.as_str()),
        trip.description.as_deref(),
    ]
    .into_iter()
    .flatten()
    .any(|field| field.to_lowercase().contains(needle))
}

#[async_trait]
impl TripCatalog for StaticCatalog {
    async fn list_trips(&self, query: &TripQuery) -> anyhow::Result<TripPage> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let trips = self.trips.read();

        let mut matched: Vec<&Trip> = trips
            .iter()
            .filter(|t| {
                query
                    .category
                    .as_deref()
                    .map_or(true, |c| t.category.eq_ignore_ascii_case(c))
            })
            .filter(|t| {
                query
                    .operator
                    .as_deref()
                    .map_or(true, |o| t.operator.eq_ignore_ascii_case(o))
            })
            .filter(|t| query.q.as_deref().map_or(true, |q| matches_text(t, q)))
            .filter(|t| !query.has_date_window() || t.schedules.iter().any(|s| query.in_window(s)))
            .collect();
        matched.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));

        let total = matched.len();
        let page = matched
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .map(|t| TripSummary {
                id: t.id.clone(),
                name: t.name.clone(),
                category: t.category.clone(),
                operator: t.operator.clone(),
                origin: t.origin.clone(),
                destination: t.destination.clone(),
                schedules: query.include_schedules.then(|| {
                    let mut schedules: Vec<Schedule> = t
                        .schedules
                        .iter()
                        .filter(|s| query.in_window(s))
                        .cloned()
                        .collect();
                    schedules.sort_by_key(|s| s.departs_at);
                    schedules
                }),
            })
            .collect();

        Ok(TripPage {
            trips: page,
            total,
            limit: query.limit,
            offset: query.offset,
        })
    }

    async fn trip_schedules(&self, trip_id: &str) -> anyhow::Result<Option<Vec<Schedule>>> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let trips = self.trips.read();
        Ok(trips.iter().find(|t| t.id == trip_id).map(|t| {
            let mut schedules = t.schedules.clone();
            schedules.sort_by_key(|s| s.departs_at);
            schedules
        }))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn schedule(id: &str, day: u32) -> Schedule {
        Schedule {
            id: id.to_string(),
            departs_at: Utc.with_ymd_and_hms(2026, 3, day, 8, 0, 0).unwrap(),
            arrives_at: None,
            seats_available: 40,
            price_minor: 1_500_000,
            currency: "NGN".to_string(),
        }
    }

    pub(crate) fn trips() -> Vec<Trip> {
        vec![
            Trip {
                id: "t1".to_string(),
                name: "Lagos Express".to_string(),
                category: "bus".to_string(),
                operator: "GoTravel".to_string(),
                origin: "Lagos".to_string(),
                destination: "Abuja".to_string(),
                description: Some("Overnight coach".to_string()),
                schedules: vec![schedule("s1", 10), schedule("s2", 12)],
            },
            Trip {
                id: "t2".to_string(),
                name: "Coastal Ferry".to_string(),
                category: "ferry".to_string(),
                operator: "BlueLine".to_string(),
                origin: "Lagos".to_string(),
                destination: "Badagry".to_string(),
                description: None,
                schedules: vec![schedule("s3", 20)],
            },
        ]
    }
}

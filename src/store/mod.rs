//! Storage abstraction for incidents.
//!
//! The [`IncidentStore`] trait is the persistence seam of the ingestion
//! cycle. Records are keyed by the external thread id; an upsert for a known
//! thread merges into the existing row and keeps its internal id and
//! creation time. There is no versioning: last writer wins.
//!
//! Two implementations ship with the crate:
//!
//! | Type | Backing |
//! |------|---------|
//! | [`SqliteIncidentStore`] | `sqlx` SQLite pool (production) |
//! | [`MemoryIncidentStore`] | `HashMap` behind a `RwLock` (tests, embedding) |

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;

use crate::models::{Incident, IncidentUpsert};

pub use memory::MemoryIncidentStore;
pub use sqlite::SqliteIncidentStore;

/// Filter for [`IncidentStore::incidents_since`].
#[derive(Debug, Clone)]
pub struct IncidentQuery {
    /// Only incidents that occurred at or after this instant.
    pub since: DateTime<Utc>,
    /// Include records whose severity is unset.
    pub include_unrated: bool,
    pub limit: Option<i64>,
}

/// Per-district breakdown used by `blip stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DistrictCount {
    pub district: String,
    pub total: i64,
    pub active: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IncidentCounts {
    pub total: i64,
    pub active: i64,
    pub inactive: i64,
    pub by_district: Vec<DistrictCount>,
}

#[async_trait]
pub trait IncidentStore: Send + Sync {
    /// Which of `thread_ids` already have a record, in any activity state.
    async fn existing_thread_ids(&self, thread_ids: &[String]) -> Result<HashSet<String>>;

    /// All records with `is_active = true`.
    async fn active_incidents(&self) -> Result<Vec<Incident>>;

    async fn get_by_thread(&self, thread_id: &str) -> Result<Option<Incident>>;

    /// Insert or merge by `thread_id`. Returns the record's internal id.
    async fn upsert(&self, incident: &IncidentUpsert) -> Result<String>;

    /// Mark the record inactive. Unknown ids are ignored.
    async fn deactivate(&self, thread_id: &str) -> Result<()>;

    /// Records ordered by `occurred_at` descending.
    async fn incidents_since(&self, query: &IncidentQuery) -> Result<Vec<Incident>>;

    async fn counts(&self) -> Result<IncidentCounts>;
}

/// Convert stored unix seconds back into a UTC timestamp.
pub(crate) fn from_unix(ts: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(ts, 0).unwrap_or_default()
}

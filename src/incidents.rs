//! Marker-data query over stored incidents.
//!
//! Shared by `blip incidents` and `GET /api/blip/incidents`.

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

use crate::config::Config;
use crate::db;
use crate::models::{Incident, Severity};
use crate::store::{IncidentQuery, IncidentStore, SqliteIncidentStore};

/// One map marker.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Marker {
    pub id: String,
    pub thread_id: String,
    pub lat: f64,
    pub lng: f64,
    pub location: String,
    #[serde(rename = "type")]
    pub incident_type: String,
    pub severity: Option<Severity>,
    pub summary: String,
    pub district: String,
    pub municipality: String,
    pub category: String,
    pub updates: i64,
    pub occurred_at: String,
    pub last_activity_at: String,
    pub is_active: bool,
}

impl From<Incident> for Marker {
    fn from(i: Incident) -> Self {
        Self {
            id: i.id,
            thread_id: i.thread_id,
            lat: i.lat,
            lng: i.lng,
            location: i.location,
            incident_type: i.incident_type,
            severity: i.severity,
            summary: i.summary,
            district: i.district,
            municipality: i.municipality,
            category: i.category,
            updates: i.updates,
            occurred_at: format_ts_iso(i.occurred_at),
            last_activity_at: format_ts_iso(i.last_activity_at),
            is_active: i.is_active,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerResponse {
    pub from_date: String,
    pub marker_data: Vec<Marker>,
}

/// Parse a `from`/`--since` value: RFC 3339, or a bare `YYYY-MM-DD` taken
/// as midnight UTC.
pub fn parse_since(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }
    bail!("invalid date '{}': expected RFC 3339 or YYYY-MM-DD", raw)
}

/// Incidents that occurred at or after `since`, newest first.
pub async fn list_incidents(
    store: &dyn IncidentStore,
    since: DateTime<Utc>,
    include_unrated: bool,
    limit: Option<i64>,
) -> Result<MarkerResponse> {
    let found = store
        .incidents_since(&IncidentQuery {
            since,
            include_unrated,
            limit,
        })
        .await?;

    Ok(MarkerResponse {
        from_date: format_ts_iso(since),
        marker_data: found.into_iter().map(Marker::from).collect(),
    })
}

/// CLI entry point for `blip incidents`.
pub async fn run_incidents(
    config: &Config,
    since: Option<&str>,
    all: bool,
    limit: Option<i64>,
    json: bool,
) -> Result<()> {
    let since = match since {
        Some(raw) => parse_since(raw)?,
        None => Utc::now() - Duration::hours(24),
    };

    let pool = db::connect(config).await?;
    let store = SqliteIncidentStore::new(pool.clone());
    let response = list_incidents(&store, since, all, limit).await?;
    pool.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    if response.marker_data.is_empty() {
        println!("No incidents since {}.", response.from_date);
        return Ok(());
    }

    for (i, m) in response.marker_data.iter().enumerate() {
        let severity = m.severity.map(|s| s.as_str()).unwrap_or("-");
        let state = if m.is_active { "active" } else { "inactive" };
        println!("{}. [{}] {} ({})", i + 1, severity, m.incident_type, state);
        println!("    at: {} ({:.5}, {:.5})", m.location, m.lat, m.lng);
        println!("    district: {}", m.district);
        println!("    occurred: {}  updates: {}", m.occurred_at, m.updates);
        println!("    > {}", m.summary);
        println!();
    }

    Ok(())
}

fn format_ts_iso(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

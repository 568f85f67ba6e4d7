//! Core data models used throughout blip.
//!
//! [`MessageThread`] and [`ThreadMessage`] mirror the police-log feed's wire
//! format. [`Incident`] is what we persist. [`ExtractedIncident`] is the
//! structured output the language model is constrained to.

use chrono::{DateTime, NaiveDateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// A chain of messages from the external feed describing one incident.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageThread {
    pub id: String,
    pub district: String,
    #[serde(default)]
    pub district_id: i64,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub municipality: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub area: String,
    #[serde(deserialize_with = "feed_timestamp")]
    pub created_on: DateTime<Utc>,
    #[serde(deserialize_with = "feed_timestamp")]
    pub updated_on: DateTime<Utc>,
    #[serde(deserialize_with = "feed_timestamp")]
    pub last_message_on: DateTime<Utc>,
    pub is_active: bool,
    #[serde(default)]
    pub messages: Vec<ThreadMessage>,
}

impl MessageThread {
    /// Number of messages, which is what we store as the update counter.
    pub fn update_count(&self) -> i64 {
        self.messages.len() as i64
    }
}

/// A single timestamped message within a [`MessageThread`].
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadMessage {
    pub id: String,
    pub text: String,
    #[serde(deserialize_with = "feed_timestamp")]
    pub created_on: DateTime<Utc>,
    #[serde(deserialize_with = "feed_timestamp")]
    pub updated_on: DateTime<Utc>,
    #[serde(default)]
    pub has_image: bool,
    #[serde(default)]
    pub previously_included_image: bool,
    #[serde(rename = "type", default)]
    pub message_type: String,
}

/// One page of the time-ranged feed query.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadPage {
    pub message_threads: Vec<MessageThread>,
    #[serde(default)]
    pub count: i64,
}

/// Three-level severity assigned by the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Med,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Med => "MED",
            Severity::High => "HIGH",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(Severity::Low),
            "MED" | "MEDIUM" => Ok(Severity::Med),
            "HIGH" => Ok(Severity::High),
            other => anyhow::bail!("unknown severity: '{}'", other),
        }
    }
}

/// Fields the language model must return for a thread.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct ExtractedIncident {
    /// Disambiguated location, "Primary, secondary, [tertiary]".
    pub location: String,
    /// Short phrase, e.g. "Traffic obstruction".
    #[serde(rename = "type")]
    pub incident_type: String,
    pub severity: Severity,
    /// Short summary, or "N/A".
    pub summary: String,
}

/// A WGS84 coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

/// Persisted, enriched record derived from a thread.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Incident {
    pub id: String,
    pub thread_id: String,
    pub district: String,
    pub municipality: String,
    pub category: String,
    pub lat: f64,
    pub lng: f64,
    pub location: String,
    pub incident_type: String,
    pub severity: Option<Severity>,
    pub summary: String,
    pub updates: i64,
    pub occurred_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Everything needed to insert or merge one incident, keyed by `thread_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct IncidentUpsert {
    pub thread_id: String,
    pub district: String,
    pub municipality: String,
    pub category: String,
    pub coordinates: Coordinates,
    pub location: String,
    pub incident_type: String,
    pub severity: Option<Severity>,
    pub summary: String,
    pub updates: i64,
    pub occurred_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub is_active: bool,
}

impl IncidentUpsert {
    pub fn from_thread(
        thread: &MessageThread,
        extracted: &ExtractedIncident,
        coordinates: Coordinates,
    ) -> Self {
        Self {
            thread_id: thread.id.clone(),
            district: thread.district.clone(),
            municipality: thread.municipality.clone(),
            category: thread.category.clone(),
            coordinates,
            location: extracted.location.clone(),
            incident_type: extracted.incident_type.clone(),
            severity: Some(extracted.severity),
            summary: extracted.summary.clone(),
            updates: thread.update_count(),
            occurred_at: thread.created_on,
            last_activity_at: thread.last_message_on,
            is_active: thread.is_active,
        }
    }
}

/// Counters reported by one ingestion cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleStats {
    pub total_fetched: u64,
    pub count_upserted: u64,
    pub count_skipped: u64,
    pub count_disabled: u64,
    pub count_updated: u64,
}

impl CycleStats {
    pub fn merge(self, other: CycleStats) -> CycleStats {
        CycleStats {
            total_fetched: self.total_fetched + other.total_fetched,
            count_upserted: self.count_upserted + other.count_upserted,
            count_skipped: self.count_skipped + other.count_skipped,
            count_disabled: self.count_disabled + other.count_disabled,
            count_updated: self.count_updated + other.count_updated,
        }
    }
}

/// Parse a feed timestamp. Accepts RFC 3339 and offset-less ISO 8601
/// (the latter is taken as UTC).
pub fn parse_feed_timestamp(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map_err(|e| anyhow::anyhow!("invalid timestamp '{}': {}", raw, e))?;
    Ok(naive.and_utc())
}

fn feed_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_feed_timestamp(&raw).map_err(serde::de::Error::custom)
}

fn nullable_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

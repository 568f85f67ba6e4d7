//! Seams between the ingestion cycle and its external collaborators.
//!
//! The pipeline never constructs HTTP clients itself. Instead it receives
//! implementations of these traits, which keeps the cycle testable with
//! in-memory fakes and lets a binary swap providers without touching the
//! orchestration.
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌────────────┐   ┌───────────────┐
//! │ ReportSource │──▶│  Extractor  │──▶│  Geocoder  │──▶│ IncidentStore │
//! │ police feed  │   │  LLM schema │   │  Places    │   │ SQLite/memory │
//! └──────────────┘   └─────────────┘   └────────────┘   └───────────────┘
//! ```
//!
//! The store trait lives in [`crate::store`].

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{Coordinates, ExtractedIncident, MessageThread};

/// A feed of message threads.
///
/// # Example
///
/// ```rust
/// use anyhow::Result;
/// use async_trait::async_trait;
/// use chrono::{DateTime, Utc};
/// use blip::models::MessageThread;
/// use blip::traits::ReportSource;
///
/// struct EmptyFeed;
///
/// #[async_trait]
/// impl ReportSource for EmptyFeed {
///     async fn threads_between(
///         &self,
///         _from: DateTime<Utc>,
///         _to: DateTime<Utc>,
///     ) -> Result<Vec<MessageThread>> {
///         Ok(vec![])
///     }
///
///     async fn thread(&self, id: &str) -> Result<MessageThread> {
///         anyhow::bail!("thread not found: {}", id)
///     }
/// }
/// ```
#[async_trait]
pub trait ReportSource: Send + Sync {
    /// All threads with activity in `[from, to]`, across every page.
    async fn threads_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<MessageThread>>;

    /// Current state of a single thread.
    async fn thread(&self, id: &str) -> Result<MessageThread>;
}

/// Turns rendered report text into structured incident fields.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Returns `Ok(None)` when the model produced nothing that fits the
    /// schema. Transport failures are `Err`.
    async fn extract(&self, report: &str) -> Result<Option<ExtractedIncident>>;
}

/// Resolves free-text locations to coordinates.
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// `district` only selects a bias point. Returns `Ok(None)` when the
    /// service has no usable candidate.
    async fn locate(&self, district: &str, query: &str) -> Result<Option<Coordinates>>;
}

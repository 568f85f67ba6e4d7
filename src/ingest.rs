//! Ingestion cycle orchestration.
//!
//! One cycle runs two passes:
//!
//! 1. **Recent pass** ([`Pipeline::upsert_recent_incidents`]): fetch every
//!    thread active within the poll window, drop the ones already stored,
//!    extract the rest in fixed-width concurrent chunks, then geocode and
//!    upsert them one at a time.
//! 2. **Refresh pass** ([`Pipeline::refresh_active_incidents`]): walk the
//!    active incidents. Stale ones are disabled without touching the feed;
//!    the rest are refetched and re-extracted only if their thread gained
//!    messages since the last write.
//!
//! Per-thread failures (no extraction, blank location, no coordinates,
//! refetch error) are logged and skipped; the thread qualifies again on the
//! next cycle. Nothing is written for a thread until extraction *and*
//! geocoding have both succeeded. Feed and store failures abort the cycle.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::db;
use crate::extract::{render_report, OpenAiExtractor};
use crate::geocode::PlacesGeocoder;
use crate::migrate;
use crate::models::{CycleStats, ExtractedIncident, IncidentUpsert, MessageThread};
use crate::source::PolitiloggenSource;
use crate::store::{IncidentStore, SqliteIncidentStore};
use crate::traits::{Extractor, Geocoder, ReportSource};

/// Policy knobs for a cycle.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    /// How far back the recent pass looks.
    pub window: Duration,
    /// Width of each concurrent extraction chunk.
    pub batch_size: usize,
    /// Active incidents idle longer than this are disabled.
    pub staleness: Duration,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            window: hours(config.source.window_hours, "source.window_hours")?,
            batch_size: config.extraction.batch_size.max(1),
            staleness: hours(config.lifecycle.staleness_hours, "lifecycle.staleness_hours")?,
        })
    }
}

fn hours(value: i64, key: &str) -> Result<Duration> {
    Duration::try_hours(value).ok_or_else(|| anyhow!("{} out of range: {}", key, value))
}

/// `now - span`, failing instead of overflowing.
fn instant_before(now: DateTime<Utc>, span: Duration) -> Result<DateTime<Utc>> {
    now.checked_sub_signed(span)
        .ok_or_else(|| anyhow!("{} minus {} is out of range", now, span))
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            window: Duration::hours(6),
            batch_size: 12,
            staleness: Duration::days(7),
        }
    }
}

/// What a dry run would process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DryRunReport {
    pub fetched: usize,
    pub new_threads: usize,
    pub active_incidents: usize,
}

/// The ingestion pipeline with its collaborators injected.
pub struct Pipeline {
    source: Arc<dyn ReportSource>,
    extractor: Arc<dyn Extractor>,
    geocoder: Arc<dyn Geocoder>,
    store: Arc<dyn IncidentStore>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn ReportSource>,
        extractor: Arc<dyn Extractor>,
        geocoder: Arc<dyn Geocoder>,
        store: Arc<dyn IncidentStore>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            source,
            extractor,
            geocoder,
            store,
            settings,
        }
    }

    /// Production wiring: police-log feed, OpenAI extractor, Places
    /// geocoder and the configured SQLite database. API keys come from the
    /// environment.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;

        Ok(Self::new(
            Arc::new(PolitiloggenSource::new(&config.source)?),
            Arc::new(OpenAiExtractor::from_env(&config.extraction)?),
            Arc::new(PlacesGeocoder::from_env(&config.geocoding)?),
            Arc::new(SqliteIncidentStore::new(pool)),
            PipelineSettings::from_config(config)?,
        ))
    }

    pub fn store(&self) -> &Arc<dyn IncidentStore> {
        &self.store
    }

    pub async fn run_cycle(&self) -> Result<CycleStats> {
        self.run_cycle_at(Utc::now()).await
    }

    /// Recent pass followed by refresh pass, evaluated at `now`.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> Result<CycleStats> {
        let recent = self.upsert_recent_incidents(now).await?;
        let refreshed = self.refresh_active_incidents(now).await?;
        let stats = recent.merge(refreshed);
        tracing::info!(
            total_fetched = stats.total_fetched,
            upserted = stats.count_upserted,
            skipped = stats.count_skipped,
            disabled = stats.count_disabled,
            updated = stats.count_updated,
            "ingestion cycle finished"
        );
        Ok(stats)
    }

    /// Insert threads from the poll window that are not stored yet.
    pub async fn upsert_recent_incidents(&self, now: DateTime<Utc>) -> Result<CycleStats> {
        let threads = self
            .source
            .threads_between(instant_before(now, self.settings.window)?, now)
            .await?;
        tracing::info!(count = threads.len(), "fetched recent threads");

        let mut stats = CycleStats {
            total_fetched: threads.len() as u64,
            ..Default::default()
        };

        let new_threads = unseen(self.store.as_ref(), threads).await?;
        if new_threads.is_empty() {
            return Ok(stats);
        }

        let extracted = self.extract_in_batches(&new_threads).await;
        for thread in &new_threads {
            let written = match extracted.get(&thread.id) {
                Some(parsed) => self.enrich_and_store(thread, parsed).await?,
                None => false,
            };
            if written {
                stats.count_upserted += 1;
            } else {
                stats.count_skipped += 1;
            }
        }

        Ok(stats)
    }

    /// Disable stale incidents and re-extract the ones whose thread grew.
    pub async fn refresh_active_incidents(&self, now: DateTime<Utc>) -> Result<CycleStats> {
        let active = self.store.active_incidents().await?;
        tracing::info!(count = active.len(), "refreshing active incidents");

        let cutoff = instant_before(now, self.settings.staleness)?;
        let mut stats = CycleStats::default();
        let mut to_update: Vec<MessageThread> = Vec::new();

        for incident in &active {
            if incident.last_activity_at < cutoff {
                self.store.deactivate(&incident.thread_id).await?;
                stats.count_disabled += 1;
                continue;
            }

            match self.source.thread(&incident.thread_id).await {
                Ok(thread) => {
                    if thread.update_count() > incident.updates {
                        to_update.push(thread);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        thread_id = %incident.thread_id,
                        error = %e,
                        "could not refresh thread"
                    );
                }
            }
        }

        if to_update.is_empty() {
            return Ok(stats);
        }

        let extracted = self.extract_in_batches(&to_update).await;
        for thread in &to_update {
            let written = match extracted.get(&thread.id) {
                Some(parsed) => self.enrich_and_store(thread, parsed).await?,
                None => false,
            };
            if written {
                stats.count_updated += 1;
            } else {
                stats.count_skipped += 1;
            }
        }

        Ok(stats)
    }

    /// Count what a cycle would touch without extracting or writing.
    pub async fn preview_at(&self, now: DateTime<Utc>) -> Result<DryRunReport> {
        preview(
            self.source.as_ref(),
            self.store.as_ref(),
            self.settings.window,
            now,
        )
        .await
    }

    /// Extract every thread, `batch_size` at a time. Threads whose
    /// extraction failed are absent from the result.
    async fn extract_in_batches(
        &self,
        threads: &[MessageThread],
    ) -> HashMap<String, ExtractedIncident> {
        let mut results = HashMap::with_capacity(threads.len());

        for chunk in threads.chunks(self.settings.batch_size) {
            let calls = chunk.iter().map(|thread| async move {
                let report = render_report(thread);
                let outcome = self.extractor.extract(&report).await;
                (thread, outcome)
            });

            for (thread, outcome) in join_all(calls).await {
                match outcome {
                    Ok(Some(parsed)) => {
                        results.insert(thread.id.clone(), parsed);
                    }
                    Ok(None) => {
                        tracing::warn!(
                            thread_id = %thread.id,
                            "skipping thread, extractor had no valid response"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(
                            thread_id = %thread.id,
                            error = %e,
                            "skipping thread, extraction failed"
                        );
                    }
                }
            }
        }

        results
    }

    /// Geocode and upsert one thread. Returns `false` when skipped.
    async fn enrich_and_store(
        &self,
        thread: &MessageThread,
        parsed: &ExtractedIncident,
    ) -> Result<bool> {
        if parsed.location.trim().is_empty() {
            tracing::warn!(thread_id = %thread.id, "skipping thread, extraction has no location");
            return Ok(false);
        }

        let coordinates = match self.geocoder.locate(&thread.district, &parsed.location).await {
            Ok(Some(c)) => c,
            Ok(None) => {
                tracing::warn!(
                    thread_id = %thread.id,
                    location = %parsed.location,
                    "skipping thread, coordinate lookup failed"
                );
                return Ok(false);
            }
            Err(e) => {
                tracing::warn!(
                    thread_id = %thread.id,
                    location = %parsed.location,
                    error = %e,
                    "skipping thread, coordinate lookup errored"
                );
                return Ok(false);
            }
        };

        let record = IncidentUpsert::from_thread(thread, parsed, coordinates);
        self.store.upsert(&record).await?;
        Ok(true)
    }
}

/// Dry-run counts over a feed and a store. Only reads: no extractor or
/// geocoder is involved.
pub async fn preview(
    source: &dyn ReportSource,
    store: &dyn IncidentStore,
    window: Duration,
    now: DateTime<Utc>,
) -> Result<DryRunReport> {
    let threads = source
        .threads_between(instant_before(now, window)?, now)
        .await?;
    let fetched = threads.len();
    let new_threads = unseen(store, threads).await?.len();
    let active_incidents = store.active_incidents().await?.len();
    Ok(DryRunReport {
        fetched,
        new_threads,
        active_incidents,
    })
}

/// Threads with no stored incident, whatever its state.
async fn unseen(
    store: &dyn IncidentStore,
    threads: Vec<MessageThread>,
) -> Result<Vec<MessageThread>> {
    let ids: Vec<String> = threads.iter().map(|t| t.id.clone()).collect();
    let existing = store.existing_thread_ids(&ids).await?;
    Ok(threads
        .into_iter()
        .filter(|t| !existing.contains(&t.id))
        .collect())
}

/// CLI entry point for `blip sync`.
pub async fn run_sync(config: &Config, dry_run: bool) -> Result<()> {
    if dry_run {
        // Read-only: no API keys, no migrations.
        let settings = PipelineSettings::from_config(config)?;
        let source = PolitiloggenSource::new(&config.source)?;
        let pool = db::connect(config).await?;
        let store = SqliteIncidentStore::new(pool.clone());
        let report = preview(&source, &store, settings.window, Utc::now()).await;
        pool.close().await;
        let report = report?;

        println!("sync (dry-run)");
        println!("  threads fetched: {}", report.fetched);
        println!("  new threads: {}", report.new_threads);
        println!("  active incidents: {}", report.active_incidents);
        return Ok(());
    }

    let pipeline = Pipeline::from_config(config).await?;
    let started = Utc::now();
    let stats = pipeline.run_cycle_at(started).await?;

    println!("sync");
    println!("  fetched: {} threads", stats.total_fetched);
    println!("  upserted: {}", stats.count_upserted);
    println!("  updated: {}", stats.count_updated);
    println!("  disabled: {}", stats.count_disabled);
    println!("  skipped: {}", stats.count_skipped);
    println!(
        "  elapsed: {}s",
        (Utc::now() - started).num_milliseconds() as f64 / 1000.0
    );
    println!("ok");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn unvalidated(toml_src: &str) -> Config {
        toml::from_str(toml_src).unwrap()
    }

    #[test]
    fn test_settings_from_config() {
        let config = unvalidated(
            "[db]\npath = \"x\"\n[source]\nwindow_hours = 3\n[lifecycle]\nstaleness_hours = 48\n",
        );
        let settings = PipelineSettings::from_config(&config).unwrap();
        assert_eq!(settings.window, Duration::hours(3));
        assert_eq!(settings.staleness, Duration::hours(48));
        assert_eq!(settings.batch_size, 12);
    }

    #[test]
    fn test_settings_reject_hours_out_of_range() {
        let config =
            unvalidated("[db]\npath = \"x\"\n[source]\nwindow_hours = 9000000000000000\n");
        let err = PipelineSettings::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("source.window_hours out of range"));

        let config = unvalidated(
            "[db]\npath = \"x\"\n[lifecycle]\nstaleness_hours = 9000000000000000\n",
        );
        let err = PipelineSettings::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("lifecycle.staleness_hours out of range"));
    }

    #[test]
    fn test_instant_before_does_not_overflow() {
        let now = Utc.with_ymd_and_hms(2024, 3, 2, 12, 0, 0).unwrap();
        assert_eq!(
            instant_before(now, Duration::hours(6)).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 2, 6, 0, 0).unwrap()
        );

        let huge = Duration::try_hours(i64::MAX / 3600 / 1000).unwrap();
        assert!(instant_before(now, huge).is_err());
    }
}

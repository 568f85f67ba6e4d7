//! SQLite-backed [`IncidentStore`].

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{Incident, IncidentUpsert, Severity};

use super::{from_unix, DistrictCount, IncidentCounts, IncidentQuery, IncidentStore};

/// SQLite's default bound-parameter limit is 999; stay well under it.
const ID_LOOKUP_CHUNK: usize = 500;

const INCIDENT_COLUMNS: &str = "id, thread_id, district, municipality, category, lat, lng, \
     location, incident_type, severity, summary, updates, occurred_at, last_activity_at, \
     is_active, created_at, updated_at";

pub struct SqliteIncidentStore {
    pool: SqlitePool,
}

impl SqliteIncidentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_incident(row: &SqliteRow) -> Incident {
    let severity: Option<String> = row.get("severity");
    Incident {
        id: row.get("id"),
        thread_id: row.get("thread_id"),
        district: row.get("district"),
        municipality: row.get("municipality"),
        category: row.get("category"),
        lat: row.get("lat"),
        lng: row.get("lng"),
        location: row.get("location"),
        incident_type: row.get("incident_type"),
        // Unknown labels read back as unrated rather than failing the row.
        severity: severity.and_then(|s| s.parse::<Severity>().ok()),
        summary: row.get("summary"),
        updates: row.get("updates"),
        occurred_at: from_unix(row.get("occurred_at")),
        last_activity_at: from_unix(row.get("last_activity_at")),
        is_active: row.get::<i64, _>("is_active") != 0,
        created_at: from_unix(row.get("created_at")),
        updated_at: from_unix(row.get("updated_at")),
    }
}

#[async_trait]
impl IncidentStore for SqliteIncidentStore {
    async fn existing_thread_ids(&self, thread_ids: &[String]) -> Result<HashSet<String>> {
        let mut existing = HashSet::new();

        for chunk in thread_ids.chunks(ID_LOOKUP_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT thread_id FROM incidents WHERE thread_id IN ({})",
                placeholders
            );
            let mut query = sqlx::query_scalar::<sqlx::Sqlite, String>(&sql);
            for id in chunk {
                query = query.bind(id);
            }
            existing.extend(query.fetch_all(&self.pool).await?);
        }

        Ok(existing)
    }

    async fn active_incidents(&self) -> Result<Vec<Incident>> {
        let sql = format!(
            "SELECT {} FROM incidents WHERE is_active = 1 ORDER BY thread_id ASC",
            INCIDENT_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_incident).collect())
    }

    async fn get_by_thread(&self, thread_id: &str) -> Result<Option<Incident>> {
        let sql = format!(
            "SELECT {} FROM incidents WHERE thread_id = ?",
            INCIDENT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_incident))
    }

    async fn upsert(&self, incident: &IncidentUpsert) -> Result<String> {
        let existing_id: Option<String> =
            sqlx::query_scalar("SELECT id FROM incidents WHERE thread_id = ?")
                .bind(&incident.thread_id)
                .fetch_optional(&self.pool)
                .await?;

        let id = existing_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO incidents (id, thread_id, district, municipality, category, lat, lng,
                                   location, incident_type, severity, summary, updates,
                                   occurred_at, last_activity_at, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(thread_id) DO UPDATE SET
                district = excluded.district,
                municipality = excluded.municipality,
                category = excluded.category,
                lat = excluded.lat,
                lng = excluded.lng,
                location = excluded.location,
                incident_type = excluded.incident_type,
                severity = excluded.severity,
                summary = excluded.summary,
                updates = excluded.updates,
                occurred_at = excluded.occurred_at,
                last_activity_at = excluded.last_activity_at,
                is_active = excluded.is_active,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&id)
        .bind(&incident.thread_id)
        .bind(&incident.district)
        .bind(&incident.municipality)
        .bind(&incident.category)
        .bind(incident.coordinates.lat)
        .bind(incident.coordinates.lng)
        .bind(&incident.location)
        .bind(&incident.incident_type)
        .bind(incident.severity.map(|s| s.as_str()))
        .bind(&incident.summary)
        .bind(incident.updates)
        .bind(incident.occurred_at.timestamp())
        .bind(incident.last_activity_at.timestamp())
        .bind(incident.is_active as i64)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn deactivate(&self, thread_id: &str) -> Result<()> {
        sqlx::query("UPDATE incidents SET is_active = 0, updated_at = ? WHERE thread_id = ?")
            .bind(Utc::now().timestamp())
            .bind(thread_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn incidents_since(&self, query: &IncidentQuery) -> Result<Vec<Incident>> {
        let mut sql = format!(
            "SELECT {} FROM incidents WHERE occurred_at >= ?",
            INCIDENT_COLUMNS
        );
        if !query.include_unrated {
            sql.push_str(" AND severity IS NOT NULL");
        }
        sql.push_str(" ORDER BY occurred_at DESC, thread_id ASC");
        if query.limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut q = sqlx::query(&sql).bind(query.since.timestamp());
        if let Some(limit) = query.limit {
            q = q.bind(limit.max(0));
        }
        let rows = q.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_incident).collect())
    }

    async fn counts(&self) -> Result<IncidentCounts> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM incidents")
            .fetch_one(&self.pool)
            .await?;
        let active: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM incidents WHERE is_active = 1")
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(
            r#"
            SELECT district,
                   COUNT(*) AS total,
                   COALESCE(SUM(CASE WHEN is_active = 1 THEN 1 ELSE 0 END), 0) AS active
            FROM incidents
            GROUP BY district
            ORDER BY total DESC, district ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let by_district = rows
            .iter()
            .map(|row| DistrictCount {
                district: row.get("district"),
                total: row.get("total"),
                active: row.get("active"),
            })
            .collect();

        Ok(IncidentCounts {
            total,
            active,
            inactive: total - active,
            by_district,
        })
    }
}

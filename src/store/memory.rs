//! In-memory [`IncidentStore`] for tests and embedding.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::models::{Incident, IncidentUpsert};

use super::{DistrictCount, IncidentCounts, IncidentQuery, IncidentStore};

pub struct MemoryIncidentStore {
    incidents: RwLock<HashMap<String, Incident>>,
}

impl MemoryIncidentStore {
    pub fn new() -> Self {
        Self {
            incidents: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.incidents.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryIncidentStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("incident store lock poisoned")
}

#[async_trait]
impl IncidentStore for MemoryIncidentStore {
    async fn existing_thread_ids(&self, thread_ids: &[String]) -> Result<HashSet<String>> {
        let map = self.incidents.read().map_err(poisoned)?;
        Ok(thread_ids
            .iter()
            .filter(|id| map.contains_key(*id))
            .cloned()
            .collect())
    }

    async fn active_incidents(&self) -> Result<Vec<Incident>> {
        let map = self.incidents.read().map_err(poisoned)?;
        let mut active: Vec<Incident> = map.values().filter(|i| i.is_active).cloned().collect();
        active.sort_by(|a, b| a.thread_id.cmp(&b.thread_id));
        Ok(active)
    }

    async fn get_by_thread(&self, thread_id: &str) -> Result<Option<Incident>> {
        let map = self.incidents.read().map_err(poisoned)?;
        Ok(map.get(thread_id).cloned())
    }

    async fn upsert(&self, incident: &IncidentUpsert) -> Result<String> {
        let mut map = self.incidents.write().map_err(poisoned)?;
        let now = Utc::now();
        let (id, created_at) = match map.get(&incident.thread_id) {
            Some(existing) => (existing.id.clone(), existing.created_at),
            None => (Uuid::new_v4().to_string(), now),
        };

        map.insert(
            incident.thread_id.clone(),
            Incident {
                id: id.clone(),
                thread_id: incident.thread_id.clone(),
                district: incident.district.clone(),
                municipality: incident.municipality.clone(),
                category: incident.category.clone(),
                lat: incident.coordinates.lat,
                lng: incident.coordinates.lng,
                location: incident.location.clone(),
                incident_type: incident.incident_type.clone(),
                severity: incident.severity,
                summary: incident.summary.clone(),
                updates: incident.updates,
                occurred_at: incident.occurred_at,
                last_activity_at: incident.last_activity_at,
                is_active: incident.is_active,
                created_at,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn deactivate(&self, thread_id: &str) -> Result<()> {
        let mut map = self.incidents.write().map_err(poisoned)?;
        if let Some(incident) = map.get_mut(thread_id) {
            incident.is_active = false;
            incident.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn incidents_since(&self, query: &IncidentQuery) -> Result<Vec<Incident>> {
        let map = self.incidents.read().map_err(poisoned)?;
        let mut found: Vec<Incident> = map
            .values()
            .filter(|i| i.occurred_at >= query.since)
            .filter(|i| query.include_unrated || i.severity.is_some())
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            b.occurred_at
                .cmp(&a.occurred_at)
                .then_with(|| a.thread_id.cmp(&b.thread_id))
        });
        if let Some(limit) = query.limit {
            found.truncate(limit.max(0) as usize);
        }
        Ok(found)
    }

    async fn counts(&self) -> Result<IncidentCounts> {
        let map = self.incidents.read().map_err(poisoned)?;
        let mut per_district: BTreeMap<&str, (i64, i64)> = BTreeMap::new();
        for incident in map.values() {
            let entry = per_district.entry(incident.district.as_str()).or_default();
            entry.0 += 1;
            if incident.is_active {
                entry.1 += 1;
            }
        }

        let total = map.len() as i64;
        let active = map.values().filter(|i| i.is_active).count() as i64;
        let mut by_district: Vec<DistrictCount> = per_district
            .into_iter()
            .map(|(district, (total, active))| DistrictCount {
                district: district.to_string(),
                total,
                active,
            })
            .collect();
        by_district.sort_by(|a, b| b.total.cmp(&a.total).then(a.district.cmp(&b.district)));

        Ok(IncidentCounts {
            total,
            active,
            inactive: total - active,
            by_district,
        })
    }
}

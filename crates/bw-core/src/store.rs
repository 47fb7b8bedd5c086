//! Incident persistence trait and the in-memory implementation.
//!
//! Writes are versioned: `put` succeeds only when the caller's copy carries
//! the stored version, so the ingest path and the escalation sweep can write
//! the same incident without losing updates.

use crate::incident::{Incident, IncidentCategory, IncidentStatus, Severity};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors surfaced by an incident store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Incident not found: {0}")]
    NotFound(String),

    #[error("Incident id already exists: {0}")]
    DuplicateId(String),

    #[error("Version conflict on {id}: put carried {attempted}, store holds {current}")]
    VersionConflict {
        id: String,
        attempted: u64,
        current: u64,
    },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether the caller may retry the operation after a fresh read.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::VersionConflict { .. } | StoreError::Unavailable(_)
        )
    }
}

/// Filter for incident listing.
#[derive(Debug, Clone, Default)]
pub struct IncidentFilter {
    pub status: Option<IncidentStatus>,
    pub severity: Option<Severity>,
    pub category: Option<IncidentCategory>,
    pub limit: Option<usize>,
}

impl IncidentFilter {
    fn matches(&self, incident: &Incident) -> bool {
        if let Some(status) = self.status {
            if incident.status != status {
                return false;
            }
        }
        if let Some(severity) = self.severity {
            if incident.severity != severity {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if incident.category != *category {
                return false;
            }
        }
        true
    }
}

/// Persistence seam for incidents.
///
/// The engine only depends on this trait; production deployments may back
/// it with a database, tests and single-node use get [`MemoryIncidentStore`].
#[async_trait]
pub trait IncidentStore: Send + Sync {
    /// Fetches an incident by id.
    async fn get(&self, id: &str) -> Result<Option<Incident>, StoreError>;

    /// Inserts a new incident. The stored copy starts at version 1.
    /// Fails with [`StoreError::DuplicateId`] if the id is taken.
    async fn create(&self, incident: Incident) -> Result<Incident, StoreError>;

    /// Replaces an existing incident. The caller's copy must carry the
    /// currently stored version; on success the stored version is bumped
    /// and the updated copy returned.
    async fn put(&self, incident: Incident) -> Result<Incident, StoreError>;

    /// Finds the open incident with the given dedup key whose most recent
    /// alert is at or after `since`. Resolved and closed incidents never
    /// match.
    async fn find_open_by_dedup_key(
        &self,
        dedup_key: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Incident>, StoreError>;

    /// Lists all open incidents (not resolved, not closed).
    async fn list_open(&self) -> Result<Vec<Incident>, StoreError>;

    /// Lists incidents matching the filter, newest first.
    async fn list(&self, filter: &IncidentFilter) -> Result<Vec<Incident>, StoreError>;
}

/// In-memory incident store backed by a `HashMap`.
#[derive(Default)]
pub struct MemoryIncidentStore {
    incidents: Arc<RwLock<HashMap<String, Incident>>>,
}

impl MemoryIncidentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored incidents, open or not.
    pub async fn len(&self) -> usize {
        self.incidents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.incidents.read().await.is_empty()
    }
}

#[async_trait]
impl IncidentStore for MemoryIncidentStore {
    async fn get(&self, id: &str) -> Result<Option<Incident>, StoreError> {
        Ok(self.incidents.read().await.get(id).cloned())
    }

    async fn create(&self, mut incident: Incident) -> Result<Incident, StoreError> {
        let mut incidents = self.incidents.write().await;
        if incidents.contains_key(&incident.id) {
            return Err(StoreError::DuplicateId(incident.id));
        }
        incident.version = 1;
        incidents.insert(incident.id.clone(), incident.clone());
        Ok(incident)
    }

    async fn put(&self, mut incident: Incident) -> Result<Incident, StoreError> {
        let mut incidents = self.incidents.write().await;
        let current = incidents
            .get(&incident.id)
            .ok_or_else(|| StoreError::NotFound(incident.id.clone()))?;
        if current.version != incident.version {
            return Err(StoreError::VersionConflict {
                id: incident.id,
                attempted: incident.version,
                current: current.version,
            });
        }
        incident.version += 1;
        incidents.insert(incident.id.clone(), incident.clone());
        Ok(incident)
    }

    async fn find_open_by_dedup_key(
        &self,
        dedup_key: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Incident>, StoreError> {
        let incidents = self.incidents.read().await;
        Ok(incidents
            .values()
            .filter(|i| {
                i.dedup_key == dedup_key && i.status.is_open() && i.latest_alert_at() >= since
            })
            .max_by_key(|i| i.latest_alert_at())
            .cloned())
    }

    async fn list_open(&self) -> Result<Vec<Incident>, StoreError> {
        let incidents = self.incidents.read().await;
        Ok(incidents
            .values()
            .filter(|i| i.status.is_open())
            .cloned()
            .collect())
    }

    async fn list(&self, filter: &IncidentFilter) -> Result<Vec<Incident>, StoreError> {
        let incidents = self.incidents.read().await;
        let mut matched: Vec<Incident> = incidents
            .values()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Delegating store that applies one out-of-band mutation right before
    /// the caller's first `put`, forcing a version conflict on that write.
    pub struct ContendedStore {
        inner: MemoryIncidentStore,
        mutate: Box<dyn Fn(&mut Incident) + Send + Sync>,
        injected: AtomicBool,
    }

    impl ContendedStore {
        pub fn new(mutate: impl Fn(&mut Incident) + Send + Sync + 'static) -> Self {
            Self {
                inner: MemoryIncidentStore::new(),
                mutate: Box::new(mutate),
                injected: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl IncidentStore for ContendedStore {
        async fn get(&self, id: &str) -> Result<Option<Incident>, StoreError> {
            self.inner.get(id).await
        }

        async fn create(&self, incident: Incident) -> Result<Incident, StoreError> {
            self.inner.create(incident).await
        }

        async fn put(&self, incident: Incident) -> Result<Incident, StoreError> {
            if !self.injected.swap(true, Ordering::SeqCst) {
                if let Some(mut fresh) = self.inner.get(&incident.id).await? {
                    (self.mutate)(&mut fresh);
                    self.inner.put(fresh).await?;
                }
            }
            self.inner.put(incident).await
        }

        async fn find_open_by_dedup_key(
            &self,
            dedup_key: &str,
            since: DateTime<Utc>,
        ) -> Result<Option<Incident>, StoreError> {
            self.inner.find_open_by_dedup_key(dedup_key, since).await
        }

        async fn list_open(&self) -> Result<Vec<Incident>, StoreError> {
            self.inner.list_open().await
        }

        async fn list(&self, filter: &IncidentFilter) -> Result<Vec<Incident>, StoreError> {
            self.inner.list(filter).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::Alert;
    use chrono::Duration;
    use uuid::Uuid;

    fn incident(id: &str, key_ip: &str) -> Incident {
        let alert = Alert {
            id: Uuid::new_v4(),
            rule_id: "rule-1".to_string(),
            severity: Severity::High,
            category: IncidentCategory::AuthenticationAttack,
            source_ip: Some(key_ip.to_string()),
            actor: None,
            timestamp: Utc::now(),
            triggering_event_ids: vec!["evt-1".to_string()],
        };
        Incident::from_alert(id.to_string(), alert)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = MemoryIncidentStore::new();
        let stored = store.create(incident("INC-20260828-0001", "203.0.113.5")).await.unwrap();
        assert_eq!(stored.version, 1);

        let fetched = store.get("INC-20260828-0001").await.unwrap().unwrap();
        assert_eq!(fetched.id, "INC-20260828-0001");
    }

    #[tokio::test]
    async fn test_create_duplicate_id_rejected() {
        let store = MemoryIncidentStore::new();
        store.create(incident("INC-20260828-0001", "203.0.113.5")).await.unwrap();

        let err = store
            .create(incident("INC-20260828-0001", "203.0.113.6"))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::DuplicateId("INC-20260828-0001".to_string()));
    }

    #[tokio::test]
    async fn test_put_bumps_version() {
        let store = MemoryIncidentStore::new();
        let mut stored = store.create(incident("INC-20260828-0001", "203.0.113.5")).await.unwrap();

        stored.assigned_to = Some("analyst1".to_string());
        let updated = store.put(stored).await.unwrap();
        assert_eq!(updated.version, 2);
    }

    #[tokio::test]
    async fn test_put_detects_version_conflict() {
        let store = MemoryIncidentStore::new();
        let stored = store.create(incident("INC-20260828-0001", "203.0.113.5")).await.unwrap();

        // Two readers take the same copy; the second writer loses.
        let copy_a = stored.clone();
        let copy_b = stored;
        store.put(copy_a).await.unwrap();

        let err = store.put(copy_b).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_find_open_by_dedup_key_respects_window() {
        let store = MemoryIncidentStore::new();
        let inc = incident("INC-20260828-0001", "203.0.113.5");
        let key = inc.dedup_key.clone();
        let alert_at = inc.latest_alert_at();
        store.create(inc).await.unwrap();

        let found = store
            .find_open_by_dedup_key(&key, alert_at - Duration::hours(1))
            .await
            .unwrap();
        assert!(found.is_some());

        // An incident whose latest alert predates the window is not a match.
        let stale = store
            .find_open_by_dedup_key(&key, alert_at + Duration::seconds(1))
            .await
            .unwrap();
        assert!(stale.is_none());
    }

    #[tokio::test]
    async fn test_resolved_incident_excluded_from_dedup_lookup() {
        let store = MemoryIncidentStore::new();
        let mut inc = incident("INC-20260828-0001", "203.0.113.5");
        let key = inc.dedup_key.clone();
        inc.status = IncidentStatus::Resolved;
        store.create(inc).await.unwrap();

        let found = store
            .find_open_by_dedup_key(&key, Utc::now() - Duration::hours(1))
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_list_filters_and_limits() {
        let store = MemoryIncidentStore::new();
        store.create(incident("INC-20260828-0001", "203.0.113.1")).await.unwrap();
        store.create(incident("INC-20260828-0002", "203.0.113.2")).await.unwrap();

        let all = store.list(&IncidentFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);

        let filter = IncidentFilter {
            status: Some(IncidentStatus::Detected),
            limit: Some(1),
            ..Default::default()
        };
        assert_eq!(store.list(&filter).await.unwrap().len(), 1);

        let filter = IncidentFilter {
            severity: Some(Severity::Low),
            ..Default::default()
        };
        assert!(store.list(&filter).await.unwrap().is_empty());
    }
}

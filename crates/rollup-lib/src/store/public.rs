//! Kind-agnostic advisory records keyed by scope

use super::snapshot;
use crate::error::StoreError;
use crate::models::{PublicData, PublicMetrics, ScopeKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Field group written by one update. Other groups of the record are left alone.
#[derive(Debug, Clone, PartialEq)]
pub enum PublicDataUpdate {
    RequestSnapshot {
        cpu_request: f64,
        memory_request: f64,
    },
    Suggestion {
        suggest_cpu: f64,
        suggest_memory: f64,
        period: String,
    },
}

impl PublicDataUpdate {
    fn apply(&self, metrics: &mut PublicMetrics) {
        match self {
            PublicDataUpdate::RequestSnapshot {
                cpu_request,
                memory_request,
            } => {
                metrics.cpu_request = *cpu_request;
                metrics.memory_request = *memory_request;
            }
            PublicDataUpdate::Suggestion {
                suggest_cpu,
                suggest_memory,
                period,
            } => {
                metrics.suggest_cpu = *suggest_cpu;
                metrics.suggest_memory = *suggest_memory;
                metrics.period = period.clone();
            }
        }
    }
}

#[async_trait]
pub trait PublicDataStore: Send + Sync {
    async fn upsert(
        &self,
        scope: &ScopeKey,
        update: PublicDataUpdate,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn get(&self, scope: &ScopeKey) -> Result<Option<PublicData>, StoreError>;

    /// Records whose scope matches `filter`, sorted by scope
    async fn list(&self, filter: &ScopeKey) -> Result<Vec<PublicData>, StoreError>;

    async fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryPublicDataStore {
    records: DashMap<ScopeKey, PublicData>,
    persistence_path: Option<PathBuf>,
    dirty: AtomicBool,
}

impl MemoryPublicDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let store = Self {
            persistence_path: Some(path.clone()),
            ..Self::default()
        };

        if let Some(records) = snapshot::load::<Vec<PublicData>>(&path)? {
            for record in records {
                store.records.insert(record.scope.clone(), record);
            }
            info!(path = %path.display(), records = store.records.len(), "Loaded public data from disk");
        }

        Ok(store)
    }
}

#[async_trait]
impl PublicDataStore for MemoryPublicDataStore {
    async fn upsert(
        &self,
        scope: &ScopeKey,
        update: PublicDataUpdate,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut record = self
            .records
            .entry(scope.clone())
            .or_insert_with(|| PublicData {
                scope: scope.clone(),
                object_kind: scope.object_kind,
                metrics: PublicMetrics::default(),
                update_time: at,
            });
        update.apply(&mut record.metrics);
        record.update_time = at;
        drop(record);

        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    async fn get(&self, scope: &ScopeKey) -> Result<Option<PublicData>, StoreError> {
        Ok(self.records.get(scope).map(|r| r.value().clone()))
    }

    async fn list(&self, filter: &ScopeKey) -> Result<Vec<PublicData>, StoreError> {
        let mut found: Vec<PublicData> = self
            .records
            .iter()
            .filter(|r| r.key().object_kind == filter.object_kind && r.key().matches(filter))
            .map(|r| r.value().clone())
            .collect();
        found.sort_by(|a, b| a.scope.cmp(&b.scope));
        Ok(found)
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let Some(path) = &self.persistence_path else {
            return Ok(());
        };
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let mut records: Vec<PublicData> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.scope.cmp(&b.scope));
        if let Err(e) = snapshot::save(path, &records) {
            self.dirty.store(true, Ordering::Release);
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ClusterEngine;

    fn workload() -> ScopeKey {
        ScopeKey::cluster("p1", "c1", ClusterEngine::K8s)
            .namespace("default")
            .workload("Deployment", "web")
    }

    #[tokio::test]
    async fn test_updates_touch_only_their_fields() {
        let store = MemoryPublicDataStore::new();
        let now = Utc::now();

        store
            .upsert(
                &workload(),
                PublicDataUpdate::RequestSnapshot {
                    cpu_request: 0.5,
                    memory_request: 512.0,
                },
                now,
            )
            .await
            .unwrap();
        store
            .upsert(
                &workload(),
                PublicDataUpdate::Suggestion {
                    suggest_cpu: 0.6,
                    suggest_memory: 600.0,
                    period: "2024-03-01".to_string(),
                },
                now,
            )
            .await
            .unwrap();

        let record = store.get(&workload()).await.unwrap().unwrap();
        assert_eq!(record.metrics.cpu_request, 0.5);
        assert_eq!(record.metrics.memory_request, 512.0);
        assert_eq!(record.metrics.suggest_cpu, 0.6);
        assert_eq!(record.metrics.period, "2024-03-01");
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("public.json");

        let store = MemoryPublicDataStore::open(&path).unwrap();
        store
            .upsert(
                &workload(),
                PublicDataUpdate::RequestSnapshot {
                    cpu_request: 1.0,
                    memory_request: 2.0,
                },
                Utc::now(),
            )
            .await
            .unwrap();
        store.flush().await.unwrap();

        let reopened = MemoryPublicDataStore::open(&path).unwrap();
        let listed = reopened.list(&ScopeKey::project("p1").as_kind(workload().object_kind)).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].metrics.memory_request, 2.0);
    }
}

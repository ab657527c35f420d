//! Snapshot collection with per-entity failure tolerance.

use crate::entity::Entity;
use crate::source::DataSource;
use crate::types::{
    BackupConfig, EntityDump, EntityFailure, FilePayload, Snapshot, SnapshotMetadata,
    SNAPSHOT_FORMAT_VERSION,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Progress callback: `(entities_done, entities_total)`.
pub type CollectProgress<'a> = &'a (dyn Fn(usize, usize) + Send + Sync);

/// Reads the configured entities into a [`Snapshot`].
#[derive(Clone)]
pub struct DataCollector {
    source: Arc<dyn DataSource>,
}

impl DataCollector {
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        Self { source }
    }

    /// Collects every entity of `config` in order.
    ///
    /// A failed entity read is recorded in [`Snapshot::failures`] and
    /// collection moves on to the next entity. Failing to list files is
    /// treated the same way and leaves an empty file section.
    pub async fn collect(
        &self,
        config: &BackupConfig,
        job_id: Uuid,
        on_progress: CollectProgress<'_>,
    ) -> Snapshot {
        let entities = config.entities();
        let total = entities.len();
        let mut dumps = Vec::with_capacity(total);
        let mut failures = Vec::new();

        for (index, entity) in entities.iter().copied().enumerate() {
            match self.source.read(entity).await {
                Ok(records) => {
                    info!(job_id = %job_id, "Collected {} {} records", records.len(), entity);
                    dumps.push(EntityDump { entity, records });
                }
                Err(e) => {
                    warn!(job_id = %job_id, "⚠️  Failed to read {}: {}", entity, e);
                    failures.push(EntityFailure {
                        entity,
                        error: e.to_string(),
                    });
                }
            }
            on_progress(index + 1, total);
        }

        let files = if config.include_files {
            match self.source.list_files().await {
                Ok(entries) => Some(FilePayload { entries }),
                Err(e) => {
                    warn!(job_id = %job_id, "⚠️  Failed to list files: {}", e);
                    Some(FilePayload::default())
                }
            }
        } else {
            None
        };

        Snapshot {
            metadata: SnapshotMetadata {
                version: SNAPSHOT_FORMAT_VERSION,
                config_id: config.id,
                config_name: config.name.clone(),
                job_id,
                created_at: Utc::now(),
                entities,
            },
            entities: dumps,
            failures,
            files,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BackupError, Result};
    use crate::types::{FileEntry, Schedule};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    struct FakeSource {
        failing: Vec<Entity>,
        reads: Mutex<Vec<Entity>>,
    }

    #[async_trait]
    impl DataSource for FakeSource {
        async fn read(&self, entity: Entity) -> Result<Vec<Value>> {
            self.reads.lock().unwrap().push(entity);
            if self.failing.contains(&entity) {
                return Err(BackupError::store(format!("{} table locked", entity)));
            }
            Ok(vec![json!({ "entity": entity.as_str() })])
        }

        async fn list_files(&self) -> Result<Vec<FileEntry>> {
            Ok(vec![FileEntry {
                path: "uploads/contract.pdf".to_string(),
                size: 42,
            }])
        }
    }

    fn config(tables: Vec<Entity>, include_files: bool) -> BackupConfig {
        BackupConfig {
            id: Uuid::new_v4(),
            name: "nightly".to_string(),
            schedule: Schedule::Daily,
            enabled: true,
            retention_days: 7,
            include_files,
            compression: false,
            encryption: false,
            destinations: Vec::new(),
            tables,
        }
    }

    fn source(failing: Vec<Entity>) -> Arc<FakeSource> {
        Arc::new(FakeSource {
            failing,
            reads: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn entity_failure_does_not_abort_collection() {
        let source = source(vec![Entity::Company]);
        let collector = DataCollector::new(source.clone());
        let cfg = config(vec![Entity::User, Entity::Company, Entity::Document], false);

        let snapshot = collector.collect(&cfg, Uuid::new_v4(), &|_, _| {}).await;

        assert_eq!(snapshot.entities.len(), 2);
        assert_eq!(snapshot.failures.len(), 1);
        assert_eq!(snapshot.failures[0].entity, Entity::Company);
        assert!(snapshot.failures[0].error.contains("locked"));
        assert!(snapshot.files.is_none());
    }

    #[tokio::test]
    async fn reads_follow_configured_order() {
        let source = source(vec![]);
        let collector = DataCollector::new(source.clone());
        let cfg = config(vec![Entity::Document, Entity::User], false);

        collector.collect(&cfg, Uuid::new_v4(), &|_, _| {}).await;

        assert_eq!(*source.reads.lock().unwrap(), vec![Entity::Document, Entity::User]);
    }

    #[tokio::test]
    async fn empty_tables_collect_full_entity_set() {
        let source = source(vec![]);
        let collector = DataCollector::new(source.clone());

        let snapshot = collector
            .collect(&config(vec![], false), Uuid::new_v4(), &|_, _| {})
            .await;

        assert_eq!(snapshot.metadata.entities, Entity::ALL.to_vec());
        assert_eq!(snapshot.entities.len(), Entity::ALL.len());
    }

    #[tokio::test]
    async fn reports_progress_per_entity_and_includes_files() {
        let collector = DataCollector::new(source(vec![]));
        let seen = Mutex::new(Vec::new());

        let snapshot = collector
            .collect(
                &config(vec![Entity::User, Entity::Company], true),
                Uuid::new_v4(),
                &|done, total| seen.lock().unwrap().push((done, total)),
            )
            .await;

        assert_eq!(*seen.lock().unwrap(), vec![(1, 2), (2, 2)]);
        assert_eq!(snapshot.files.unwrap().entries[0].size, 42);
    }
}

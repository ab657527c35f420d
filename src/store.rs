//! Metadata store for configs, jobs and backup files.

use crate::error::{BackupError, Result};
use crate::types::{BackupConfig, BackupFile, BackupJob, JobKind, JobStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// Persistence for engine records. Implementations must tolerate concurrent
/// calls from many running jobs.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn insert_config(&self, config: BackupConfig) -> Result<()>;
    async fn update_config(&self, config: BackupConfig) -> Result<()>;
    async fn delete_config(&self, id: Uuid) -> Result<()>;
    async fn get_config(&self, id: Uuid) -> Result<Option<BackupConfig>>;
    async fn list_configs(&self) -> Result<Vec<BackupConfig>>;

    /// Inserts or replaces a job record.
    async fn save_job(&self, job: BackupJob) -> Result<()>;
    async fn get_job(&self, id: Uuid) -> Result<Option<BackupJob>>;
    async fn list_jobs(&self, config_id: Option<Uuid>) -> Result<Vec<BackupJob>>;

    /// Inserts or replaces a file record.
    async fn save_file(&self, file: BackupFile) -> Result<()>;
    async fn get_file(&self, id: Uuid) -> Result<Option<BackupFile>>;
    async fn list_files(&self, config_id: Option<Uuid>) -> Result<Vec<BackupFile>>;
    /// Removes a file record; returns whether it existed.
    async fn delete_file(&self, id: Uuid) -> Result<bool>;

    /// Completion time of the latest completed backup job of a config.
    async fn last_completed_at(&self, config_id: Uuid) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .list_jobs(Some(config_id))
            .await?
            .into_iter()
            .filter(|j| j.kind == JobKind::Backup && j.status == JobStatus::Completed)
            .filter_map(|j| j.completed_at)
            .max())
    }

    /// Files whose `expires_at` lies before `now`.
    async fn expired_files(&self, now: DateTime<Utc>) -> Result<Vec<BackupFile>> {
        Ok(self
            .list_files(None)
            .await?
            .into_iter()
            .filter(|f| f.is_expired(now))
            .collect())
    }
}

#[derive(Serialize, Deserialize, Debug, Default, Clone)]
struct Tables {
    configs: HashMap<Uuid, BackupConfig>,
    jobs: HashMap<Uuid, BackupJob>,
    files: HashMap<Uuid, BackupFile>,
}

/// In-process store, optionally mirrored to a JSON file after every write.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    persist_path: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a store backed by `path`, loading existing records if present.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let tables = match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let tables: Tables = serde_json::from_str(&content)?;
                info!(
                    "Loaded {} configs, {} jobs, {} files from {}",
                    tables.configs.len(),
                    tables.jobs.len(),
                    tables.files.len(),
                    path.display()
                );
                tables
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Tables::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            tables: RwLock::new(tables),
            persist_path: Some(path),
        })
    }

    /// Applies `change` and persists the result. With persistence on, the
    /// change is made to a copy that replaces the live tables only once it
    /// is on disk, so a failed write leaves the store as it was.
    async fn mutate<R: Send>(
        &self,
        change: impl FnOnce(&mut Tables) -> Result<R> + Send,
    ) -> Result<R> {
        let mut tables = self.tables.write().await;
        if self.persist_path.is_none() {
            return change(&mut *tables);
        }
        let mut next = tables.clone();
        let result = change(&mut next)?;
        self.persist(&next).await?;
        *tables = next;
        Ok(result)
    }

    /// Writes the tables out while the caller still holds the write lock,
    /// so persisted snapshots are never interleaved.
    async fn persist(&self, tables: &Tables) -> Result<()> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(tables)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!("Persisted metadata to {}", path.display());
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn insert_config(&self, config: BackupConfig) -> Result<()> {
        self.mutate(move |tables| {
            if tables.configs.contains_key(&config.id) {
                return Err(BackupError::invalid_config(format!(
                    "config {} already exists",
                    config.id
                )));
            }
            if tables.configs.values().any(|c| c.name == config.name) {
                return Err(BackupError::invalid_config(format!(
                    "a config named '{}' already exists",
                    config.name
                )));
            }
            tables.configs.insert(config.id, config);
            Ok(())
        })
        .await
    }

    async fn update_config(&self, config: BackupConfig) -> Result<()> {
        self.mutate(move |tables| {
            if !tables.configs.contains_key(&config.id) {
                return Err(BackupError::ConfigNotFound(config.id));
            }
            tables.configs.insert(config.id, config);
            Ok(())
        })
        .await
    }

    async fn delete_config(&self, id: Uuid) -> Result<()> {
        self.mutate(move |tables| match tables.configs.remove(&id) {
            Some(_) => Ok(()),
            None => Err(BackupError::ConfigNotFound(id)),
        })
        .await
    }

    async fn get_config(&self, id: Uuid) -> Result<Option<BackupConfig>> {
        Ok(self.tables.read().await.configs.get(&id).cloned())
    }

    async fn list_configs(&self) -> Result<Vec<BackupConfig>> {
        let mut configs: Vec<_> = self.tables.read().await.configs.values().cloned().collect();
        configs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(configs)
    }

    async fn save_job(&self, job: BackupJob) -> Result<()> {
        self.mutate(move |tables| {
            tables.jobs.insert(job.id, job);
            Ok(())
        })
        .await
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<BackupJob>> {
        Ok(self.tables.read().await.jobs.get(&id).cloned())
    }

    async fn list_jobs(&self, config_id: Option<Uuid>) -> Result<Vec<BackupJob>> {
        let mut jobs: Vec<_> = self
            .tables
            .read()
            .await
            .jobs
            .values()
            .filter(|j| config_id.map_or(true, |id| j.config_id == id))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(jobs)
    }

    async fn save_file(&self, file: BackupFile) -> Result<()> {
        self.mutate(move |tables| {
            tables.files.insert(file.id, file);
            Ok(())
        })
        .await
    }

    async fn get_file(&self, id: Uuid) -> Result<Option<BackupFile>> {
        Ok(self.tables.read().await.files.get(&id).cloned())
    }

    async fn list_files(&self, config_id: Option<Uuid>) -> Result<Vec<BackupFile>> {
        let mut files: Vec<_> = self
            .tables
            .read()
            .await
            .files
            .values()
            .filter(|f| config_id.map_or(true, |id| f.config_id == id))
            .cloned()
            .collect();
        files.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(files)
    }

    async fn delete_file(&self, id: Uuid) -> Result<bool> {
        if !self.tables.read().await.files.contains_key(&id) {
            return Ok(false);
        }
        self.mutate(move |tables| Ok(tables.files.remove(&id).is_some()))
            .await
    }
}

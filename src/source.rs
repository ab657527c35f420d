//! Data Source and Data Sink collaborators.
//!
//! The engine reads entities through [`DataSource`] when backing up and
//! replays them through [`DataSink`] when restoring. [`JsonDirStore`] is a
//! directory-backed implementation of both, one `<Entity>.json` array per
//! entity.

use crate::entity::Entity;
use crate::error::{BackupError, Result};
use crate::types::FileEntry;
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Read access to application entities.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Reads every record of one entity.
    async fn read(&self, entity: Entity) -> Result<Vec<Value>>;

    /// Files to reference in the snapshot when `includeFiles` is set.
    async fn list_files(&self) -> Result<Vec<FileEntry>> {
        Ok(Vec::new())
    }
}

/// Write access used to replay a snapshot.
#[async_trait]
pub trait DataSink: Send + Sync {
    /// Replaces every record of `entity` with `records`.
    async fn replace(&self, entity: Entity, records: Vec<Value>) -> Result<()>;
}

/// Stores each entity as a JSON array in `<root>/<Entity>.json`.
#[derive(Debug, Clone)]
pub struct JsonDirStore {
    root: PathBuf,
    files_dir: Option<PathBuf>,
}

impl JsonDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            files_dir: None,
        }
    }

    /// Directory whose regular files are listed in the snapshot's file section.
    pub fn with_files_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.files_dir = Some(dir.into());
        self
    }

    fn entity_path(&self, entity: Entity) -> PathBuf {
        self.root.join(format!("{}.json", entity))
    }
}

#[async_trait]
impl DataSource for JsonDirStore {
    async fn read(&self, entity: Entity) -> Result<Vec<Value>> {
        let path = self.entity_path(entity);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            // An entity that was never written has no rows.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let records: Vec<Value> = serde_json::from_str(&content)?;
        debug!("Read {} {} records from {}", records.len(), entity, path.display());
        Ok(records)
    }

    async fn list_files(&self) -> Result<Vec<FileEntry>> {
        let Some(dir) = &self.files_dir else {
            return Ok(Vec::new());
        };
        list_regular_files(dir).await
    }
}

#[async_trait]
impl DataSink for JsonDirStore {
    async fn replace(&self, entity: Entity, records: Vec<Value>) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.entity_path(entity);
        let json = serde_json::to_vec_pretty(&records)?;
        let tmp = self.root.join(format!(".{}.json.tmp", entity));
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| BackupError::Replay {
            entity: entity.to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }
}

async fn list_regular_files(dir: &Path) -> Result<Vec<FileEntry>> {
    let mut entries = Vec::new();
    let mut read_dir = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        let metadata = entry.metadata().await?;
        if metadata.is_file() {
            entries.push(FileEntry {
                path: entry.path().to_string_lossy().to_string(),
                size: metadata.len(),
            });
        }
    }
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn replace_then_read_returns_same_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonDirStore::new(dir.path());
        let records = vec![json!({"id": 1, "name": "Ana"}), json!({"id": 2, "name": "Rui"})];

        store.replace(Entity::User, records.clone()).await.unwrap();

        assert_eq!(store.read(Entity::User).await.unwrap(), records);
    }

    #[tokio::test]
    async fn missing_entity_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonDirStore::new(dir.path());
        assert!(store.read(Entity::Company).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_entity_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Document.json"), "{not json").unwrap();
        let store = JsonDirStore::new(dir.path());
        assert!(store.read(Entity::Document).await.is_err());
    }

    #[tokio::test]
    async fn lists_files_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("uploads");
        std::fs::create_dir_all(uploads.join("nested")).unwrap();
        std::fs::write(uploads.join("a.pdf"), b"12345").unwrap();

        let store = JsonDirStore::new(dir.path()).with_files_dir(&uploads);
        let files = store.list_files().await.unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].size, 5);
        assert!(files[0].path.ends_with("a.pdf"));
    }
}

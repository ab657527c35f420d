//! Retention sweeps: delete artifacts whose retention window has passed.

use crate::error::{BackupError, Result};
use crate::store::MetadataStore;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of one sweep.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Metadata records removed.
    pub deleted: usize,
    /// Problems met along the way; none of them stop the sweep.
    pub errors: Vec<BackupError>,
}

#[derive(Clone)]
pub struct RetentionManager {
    store: Arc<dyn MetadataStore>,
    backup_dir: PathBuf,
}

impl RetentionManager {
    pub fn new(store: Arc<dyn MetadataStore>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            backup_dir: backup_dir.into(),
        }
    }

    pub async fn sweep(&self) -> Result<SweepReport> {
        self.sweep_at(Utc::now()).await
    }

    /// Deletes every backup file with `expires_at < now`.
    ///
    /// The artifact on disk and the metadata record are removed
    /// independently: a missing or undeletable artifact is reported and the
    /// record is still dropped, so it cannot block later sweeps.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let expired = self.store.expired_files(now).await?;
        let mut report = SweepReport::default();

        for file in expired {
            let path = self.backup_dir.join(&file.filename);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => info!("🗑️  Deleted expired artifact {}", file.filename),
                Err(e) => {
                    warn!(
                        "⚠️  Could not delete artifact {}: {}; removing its record anyway",
                        path.display(),
                        e
                    );
                    report.errors.push(e.into());
                }
            }

            match self.store.delete_file(file.id).await {
                Ok(true) => report.deleted += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!("⚠️  Could not delete record for {}: {}", file.filename, e);
                    report.errors.push(e);
                }
            }
        }

        info!(
            "Retention sweep removed {} records ({} problems)",
            report.deleted,
            report.errors.len()
        );
        Ok(report)
    }
}

//! Restore pipeline: Fetch → Decode → Replay.
//!
//! Replaying overwrites live data in the sink. The engine only provides the
//! mechanism; confirming that a restore is wanted is the caller's job.

use crate::error::{BackupError, Result};
use crate::package::Packager;
use crate::runner::within;
use crate::settings::EngineSettings;
use crate::source::DataSink;
use crate::tracker::{JobHandle, JobTracker};
use crate::types::{BackupFile, BackupJob};
use crate::verify::sha256_hex;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const FETCHED: u8 = 25;
const DECODED: u8 = 50;
/// Replay spans DECODED..=REPLAYED.
const REPLAYED: u8 = 95;

/// Replays packaged artifacts into a [`DataSink`].
#[derive(Clone)]
pub struct RestoreRunner {
    inner: Arc<RestoreInner>,
}

struct RestoreInner {
    tracker: Arc<JobTracker>,
    packager: Packager,
    sink: Arc<dyn DataSink>,
    settings: EngineSettings,
}

impl RestoreRunner {
    pub fn new(
        tracker: Arc<JobTracker>,
        packager: Packager,
        sink: Arc<dyn DataSink>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            inner: Arc::new(RestoreInner {
                tracker,
                packager,
                sink,
                settings,
            }),
        }
    }

    /// Starts restoring backup file `file_id` and returns the restore job id.
    pub async fn restore(&self, file_id: Uuid) -> Result<Uuid> {
        let file = self
            .inner
            .tracker
            .store()
            .get_file(file_id)
            .await?
            .ok_or(BackupError::FileNotFound(file_id))?;

        let job = BackupJob::new_restore(file.config_id, file.id);
        let job_id = job.id;
        self.inner.tracker.register(job.clone()).await?;
        info!(job_id = %job_id, "Restore of {} queued", file.filename);

        let runner = self.clone();
        tokio::spawn(async move {
            runner.run(job, file).await;
        });
        Ok(job_id)
    }

    async fn run(&self, job: BackupJob, file: BackupFile) {
        let handle = JobHandle::new(job, Arc::clone(&self.inner.tracker));
        handle.start().await;

        let outcome = AssertUnwindSafe(self.pipeline(&handle, &file))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => handle.complete(Some(file.id)).await,
            Ok(Err(e)) => handle.fail(e.to_string()).await,
            Err(_) => handle.fail("restore pipeline panicked".to_string()).await,
        }
    }

    async fn pipeline(&self, handle: &JobHandle, file: &BackupFile) -> Result<()> {
        let inner = &self.inner;
        let limit = inner.settings.stage_timeout;

        // Fetch
        handle.update(|job| job.advance(0, "fetching"));
        let path = inner.packager.backup_dir().join(&file.filename);
        let bytes = within("fetch", limit, async {
            let bytes = tokio::fs::read(&path).await?;
            let (bytes, actual) = tokio::task::spawn_blocking(move || {
                let actual = sha256_hex(&bytes);
                (bytes, actual)
            })
            .await?;
            if actual != file.checksum {
                return Err(BackupError::ChecksumMismatch {
                    filename: file.filename.clone(),
                    expected: file.checksum.clone(),
                    actual,
                });
            }
            Ok(bytes)
        })
        .await?;
        handle.update(|job| job.advance(FETCHED, "fetched"));

        // Decode
        let packager = inner.packager.clone();
        let (compressed, encrypted) = (file.compressed, file.encrypted);
        let snapshot = within("decode", limit, async move {
            tokio::task::spawn_blocking(move || packager.unpack(bytes, compressed, encrypted))
                .await?
        })
        .await?;
        let total = snapshot.entities.len();
        handle.update(|job| {
            job.details.total_tables = total;
            if let Some(files) = &snapshot.files {
                job.details.total_files = files.entries.len();
            }
            job.advance(DECODED, "decoded");
        });
        for failure in &snapshot.failures {
            handle.warn(format!(
                "{} was not captured in this backup: {}",
                failure.entity, failure.error
            ));
        }
        handle.checkpoint().await;

        // Replay
        within("replay", limit, async {
            for (index, dump) in snapshot.entities.iter().enumerate() {
                let entity = dump.entity;
                let count = dump.records.len();
                inner
                    .sink
                    .replace(entity, dump.records.clone())
                    .await
                    .map_err(|e| BackupError::Replay {
                        entity: entity.to_string(),
                        reason: e.to_string(),
                    })?;
                info!(job_id = %handle.id(), "Restored {} {} records", count, entity);

                let done = index + 1;
                let span = usize::from(REPLAYED - DECODED);
                let pct = usize::from(DECODED) + done * span / total.max(1);
                handle.update(|job| {
                    job.details.tables_processed = done;
                    job.advance(pct as u8, format!("replaying {}/{}", done, total));
                });
            }
            Ok(())
        })
        .await?;
        if let Some(files) = &snapshot.files {
            handle.update(|job| job.details.files_processed = files.entries.len());
        }
        handle.checkpoint().await;
        Ok(())
    }
}

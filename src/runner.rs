//! Backup pipeline: Collect → Package → Distribute → Finalize.

use crate::collect::DataCollector;
use crate::destination::{upload_with_retry, DestinationError, DestinationRegistry};
use crate::error::{BackupError, Result};
use crate::package::{PackagedArtifact, Packager};
use crate::settings::EngineSettings;
use crate::tracker::{JobHandle, JobTracker, RunClaim};
use crate::types::{BackupConfig, BackupFile, BackupJob, DestinationKind};
use futures_util::future::join_all;
use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Progress reached when collection finishes; entity reads share 0..=50.
const COLLECT_DONE: u8 = 50;
const PACKAGED: u8 = 60;
const DISTRIBUTION_ATTEMPTED: u8 = 80;
const DISTRIBUTED: u8 = 90;

/// Awaits `fut`, failing with [`BackupError::StageTimeout`] past `limit`.
pub(crate) async fn within<T>(
    stage: &'static str,
    limit: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| BackupError::StageTimeout { stage, limit })?
}

/// Launches backup jobs and reports their state.
#[derive(Clone)]
pub struct JobRunner {
    inner: Arc<RunnerInner>,
}

struct RunnerInner {
    tracker: Arc<JobTracker>,
    collector: DataCollector,
    packager: Packager,
    destinations: DestinationRegistry,
    settings: EngineSettings,
}

impl JobRunner {
    pub fn new(
        tracker: Arc<JobTracker>,
        collector: DataCollector,
        packager: Packager,
        destinations: DestinationRegistry,
        settings: EngineSettings,
    ) -> Self {
        Self {
            inner: Arc::new(RunnerInner {
                tracker,
                collector,
                packager,
                destinations,
                settings,
            }),
        }
    }

    /// Starts a backup of `config_id` and returns its job id immediately.
    ///
    /// The pipeline runs on its own task; follow it with
    /// [`JobRunner::get_status`] or the event bus.
    pub async fn execute(&self, config_id: Uuid) -> Result<Uuid> {
        let inner = &self.inner;
        let config = inner
            .tracker
            .store()
            .get_config(config_id)
            .await?
            .ok_or(BackupError::ConfigNotFound(config_id))?;

        let claim = inner
            .tracker
            .claim(config_id, inner.settings.exclusive_runs)
            .ok_or(BackupError::AlreadyRunning(config_id))?;

        let job = BackupJob::new_backup(config_id);
        let job_id = job.id;
        inner.tracker.register(job.clone()).await?;
        info!(job_id = %job_id, config = %config.name, "Backup job queued");

        let runner = self.clone();
        tokio::spawn(async move {
            runner.run(job, config, claim).await;
        });
        Ok(job_id)
    }

    pub async fn get_status(&self, job_id: Uuid) -> Result<BackupJob> {
        self.inner
            .tracker
            .get(job_id)
            .await?
            .ok_or(BackupError::JobNotFound(job_id))
    }

    async fn run(&self, job: BackupJob, config: BackupConfig, _claim: RunClaim) {
        let handle = JobHandle::new(job, Arc::clone(&self.inner.tracker));
        handle.start().await;

        let outcome = AssertUnwindSafe(self.pipeline(&handle, &config))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(file_id)) => handle.complete(Some(file_id)).await,
            Ok(Err(e)) => handle.fail(e.to_string()).await,
            Err(_) => handle.fail("backup pipeline panicked".to_string()).await,
        }
    }

    async fn pipeline(&self, handle: &JobHandle, config: &BackupConfig) -> Result<Uuid> {
        let inner = &self.inner;
        let limit = inner.settings.stage_timeout;
        let job_id = handle.id();

        // Collect
        let total = config.entities().len();
        handle.update(|job| {
            job.details.total_tables = total;
            job.advance(0, "collecting");
        });
        let snapshot = within("collect", limit, async {
            Ok(inner
                .collector
                .collect(config, job_id, &|done, total| {
                    handle.update(|job| {
                        job.details.tables_processed = done;
                        let pct = (done * usize::from(COLLECT_DONE)) / total.max(1);
                        job.advance(pct as u8, format!("collecting {}/{}", done, total));
                    })
                })
                .await)
        })
        .await?;

        for failure in &snapshot.failures {
            handle.warn(format!(
                "collection warning: {}: {}",
                failure.entity, failure.error
            ));
        }
        if let Some(files) = &snapshot.files {
            handle.update(|job| {
                job.details.total_files = files.entries.len();
                job.details.files_processed = files.entries.len();
            });
        }
        handle.checkpoint().await;

        // Package
        handle.update(|job| job.advance(COLLECT_DONE, "packaging"));
        let artifact = within("package", limit, inner.packager.package(&snapshot, config)).await?;
        if config.encryption && !artifact.encrypted {
            handle.warn(format!(
                "encryption requested but encryptor '{}' does not encrypt; artifact stored unencrypted",
                inner.packager.encryptor().name()
            ));
        }

        let created_at = chrono::Utc::now();
        let Some(expires_at) = created_at.checked_add_signed(config.retention()) else {
            discard(&artifact).await;
            return Err(BackupError::invalid_config(format!(
                "retentionDays {} puts expiry out of range (config '{}')",
                config.retention_days, config.name
            )));
        };
        let mut file = BackupFile {
            id: Uuid::new_v4(),
            config_id: config.id,
            job_id,
            filename: artifact.filename.clone(),
            size: artifact.size,
            checksum: artifact.checksum.clone(),
            compressed: artifact.compressed,
            encrypted: artifact.encrypted,
            destinations: Vec::new(),
            created_at,
            expires_at,
        };
        if let Err(e) = inner.tracker.store().save_file(file.clone()).await {
            discard(&artifact).await;
            return Err(e);
        }
        handle.update(|job| job.advance(PACKAGED, "packaged"));
        handle.checkpoint().await;

        // Distribute
        handle.update(|job| job.advance(PACKAGED, "distributing"));
        let results = self.distribute(&artifact, config).await;
        handle.update(|job| job.advance(DISTRIBUTION_ATTEMPTED, "distribution attempted"));

        for (kind, result) in results {
            match result {
                Ok(()) => file.destinations.push(kind),
                Err(e) => handle.warn(format!("destination {} failed: {}", kind, e)),
            }
        }
        if let Err(e) = inner.tracker.store().save_file(file.clone()).await {
            handle.warn(format!("could not record delivered destinations: {}", e));
        }
        handle.update(|job| job.advance(DISTRIBUTED, "distributed"));
        handle.checkpoint().await;

        info!(
            job_id = %job_id,
            "Artifact {} delivered to {}/{} destinations",
            file.filename,
            file.destinations.len(),
            config.destinations.iter().filter(|d| d.enabled).count()
        );
        Ok(file.id)
    }

    /// Uploads to every enabled destination concurrently. One destination's
    /// failure never affects the others.
    ///
    /// The whole stage shares one deadline; uploads still running when it
    /// passes are reported as failed for their destination.
    async fn distribute(
        &self,
        artifact: &PackagedArtifact,
        config: &BackupConfig,
    ) -> Vec<(DestinationKind, std::result::Result<(), DestinationError>)> {
        let inner = &self.inner;
        let path: &Path = &artifact.path;
        let limit = inner.settings.stage_timeout;
        let deadline = Instant::now() + limit;
        let uploads = config.destinations.iter().filter(|d| d.enabled).map(|spec| async move {
            let upload = async {
                match inner.destinations.get(spec.kind) {
                    Some(adapter) => {
                        upload_with_retry(
                            adapter.as_ref(),
                            path,
                            &spec.config,
                            inner.settings.upload_retry,
                            limit,
                        )
                        .await
                    }
                    None => Err(DestinationError::permanent(format!(
                        "no adapter registered for destination type '{}'",
                        spec.kind
                    ))),
                }
            };
            let result = match tokio::time::timeout_at(deadline, upload).await {
                Ok(result) => result,
                Err(_) => Err(DestinationError::transient(format!(
                    "upload still pending at the {:?} stage deadline",
                    limit
                ))),
            };
            (spec.kind, result)
        });
        join_all(uploads).await
    }
}

/// Removes an artifact that will not get a metadata record.
async fn discard(artifact: &PackagedArtifact) {
    if let Err(e) = tokio::fs::remove_file(&artifact.path).await {
        warn!(
            "⚠️  Could not remove unrecorded artifact {}: {}",
            artifact.path.display(),
            e
        );
    }
}

//! The engine facade consumed by the surrounding application.

use crate::collect::DataCollector;
use crate::destination::{DestinationAdapter, DestinationRegistry};
use crate::encryption::{Encryptor, NoopEncryptor};
use crate::error::{BackupError, Result};
use crate::events::{EventBus, JobEvent};
use crate::package::Packager;
use crate::restore::RestoreRunner;
use crate::retention::{RetentionManager, SweepReport};
use crate::runner::JobRunner;
use crate::scheduler::{Scheduler, SchedulerHandle};
use crate::settings::EngineSettings;
use crate::source::{DataSink, DataSource};
use crate::store::{MemoryStore, MetadataStore};
use crate::tracker::JobTracker;
use crate::types::{BackupConfig, BackupFile, BackupJob, BackupStats, JobKind, JobStatus};
use crate::verify::verify_checksum;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::info;
use uuid::Uuid;

/// A fully wired backup engine. Build one with [`BackupEngine::builder`].
///
/// # Example
///
/// ```no_run
/// use snapkeep::{BackupEngine, EngineSettings, JsonDirStore};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let data = Arc::new(JsonDirStore::new("data"));
/// let engine = BackupEngine::builder()
///     .settings(EngineSettings::default())
///     .source(data.clone())
///     .sink(data)
///     .build()?;
///
/// for config in engine.list_configs().await? {
///     let job_id = engine.trigger_backup(config.id).await?;
///     let job = engine.wait_for_job(job_id).await?;
///     println!("{} finished with status {}", config.name, job.status);
/// }
/// # Ok(())
/// # }
/// ```
pub struct BackupEngine {
    store: Arc<dyn MetadataStore>,
    events: Arc<EventBus>,
    runner: JobRunner,
    restorer: RestoreRunner,
    retention: RetentionManager,
    packager: Packager,
    settings: EngineSettings,
}

pub struct BackupEngineBuilder {
    settings: EngineSettings,
    store: Option<Arc<dyn MetadataStore>>,
    source: Option<Arc<dyn DataSource>>,
    sink: Option<Arc<dyn DataSink>>,
    destinations: DestinationRegistry,
    encryptor: Arc<dyn Encryptor>,
}

impl Default for BackupEngineBuilder {
    fn default() -> Self {
        Self {
            settings: EngineSettings::default(),
            store: None,
            source: None,
            sink: None,
            destinations: DestinationRegistry::with_defaults(),
            encryptor: Arc::new(NoopEncryptor),
        }
    }
}

impl BackupEngineBuilder {
    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Metadata store; defaults to a non-persistent [`MemoryStore`].
    pub fn store(mut self, store: Arc<dyn MetadataStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn source(mut self, source: Arc<dyn DataSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn DataSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Replaces the whole destination registry.
    pub fn destinations(mut self, destinations: DestinationRegistry) -> Self {
        self.destinations = destinations;
        self
    }

    /// Adds or overrides the adapter for one destination kind.
    pub fn register_destination(mut self, adapter: Arc<dyn DestinationAdapter>) -> Self {
        self.destinations.register(adapter);
        self
    }

    pub fn encryptor(mut self, encryptor: Arc<dyn Encryptor>) -> Self {
        self.encryptor = encryptor;
        self
    }

    pub fn build(self) -> Result<BackupEngine> {
        let source = self
            .source
            .ok_or_else(|| BackupError::invalid_config("a data source is required"))?;
        let sink = self
            .sink
            .ok_or_else(|| BackupError::invalid_config("a data sink is required"))?;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn MetadataStore>);
        let settings = self.settings;

        let events = Arc::new(EventBus::new(settings.event_capacity));
        let tracker = Arc::new(JobTracker::new(Arc::clone(&store), Arc::clone(&events)));
        let packager = Packager::new(settings.backup_dir.clone(), self.encryptor);

        let runner = JobRunner::new(
            Arc::clone(&tracker),
            DataCollector::new(source),
            packager.clone(),
            self.destinations,
            settings.clone(),
        );
        let restorer = RestoreRunner::new(
            Arc::clone(&tracker),
            packager.clone(),
            sink,
            settings.clone(),
        );
        let retention = RetentionManager::new(Arc::clone(&store), settings.backup_dir.clone());

        Ok(BackupEngine {
            store,
            events,
            runner,
            restorer,
            retention,
            packager,
            settings,
        })
    }
}

impl BackupEngine {
    pub fn builder() -> BackupEngineBuilder {
        BackupEngineBuilder::default()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub async fn create_config(&self, config: BackupConfig) -> Result<BackupConfig> {
        config.validate().map_err(BackupError::InvalidConfig)?;
        self.store.insert_config(config.clone()).await?;
        info!("Created backup config '{}' ({})", config.name, config.id);
        Ok(config)
    }

    pub async fn update_config(&self, config: BackupConfig) -> Result<BackupConfig> {
        config.validate().map_err(BackupError::InvalidConfig)?;
        self.store.update_config(config.clone()).await?;
        Ok(config)
    }

    pub async fn delete_config(&self, config_id: Uuid) -> Result<()> {
        self.store.delete_config(config_id).await
    }

    pub async fn list_configs(&self) -> Result<Vec<BackupConfig>> {
        self.store.list_configs().await
    }

    pub async fn find_config(&self, name: &str) -> Result<Option<BackupConfig>> {
        Ok(self
            .store
            .list_configs()
            .await?
            .into_iter()
            .find(|c| c.name == name))
    }

    pub async fn trigger_backup(&self, config_id: Uuid) -> Result<Uuid> {
        self.runner.execute(config_id).await
    }

    pub async fn get_job_status(&self, job_id: Uuid) -> Result<BackupJob> {
        self.runner.get_status(job_id).await
    }

    /// Polls a job until it reaches a terminal state.
    pub async fn wait_for_job(&self, job_id: Uuid) -> Result<BackupJob> {
        loop {
            let job = self.get_job_status(job_id).await?;
            if job.status.is_terminal() {
                return Ok(job);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    pub async fn list_jobs(&self, config_id: Option<Uuid>) -> Result<Vec<BackupJob>> {
        self.store.list_jobs(config_id).await
    }

    pub async fn list_files(&self, config_id: Option<Uuid>) -> Result<Vec<BackupFile>> {
        self.store.list_files(config_id).await
    }

    pub async fn restore_backup(&self, file_id: Uuid) -> Result<Uuid> {
        self.restorer.restore(file_id).await
    }

    /// Re-hashes a stored artifact and compares it with its recorded checksum.
    pub async fn verify_file(&self, file_id: Uuid) -> Result<()> {
        let file = self
            .store
            .get_file(file_id)
            .await?
            .ok_or(BackupError::FileNotFound(file_id))?;
        verify_checksum(&self.packager.backup_dir().join(&file.filename), &file.checksum).await
    }

    pub async fn get_stats(&self) -> Result<BackupStats> {
        let files = self.store.list_files(None).await?;
        let jobs: Vec<BackupJob> = self
            .store
            .list_jobs(None)
            .await?
            .into_iter()
            .filter(|j| j.kind == JobKind::Backup)
            .collect();

        let completed = jobs
            .iter()
            .filter(|j| j.status == JobStatus::Completed)
            .count();
        let finished = jobs.iter().filter(|j| j.status.is_terminal()).count();
        let success_rate_pct = if finished == 0 {
            0.0
        } else {
            completed as f64 * 100.0 / finished as f64
        };

        Ok(BackupStats {
            total_backups: files.len(),
            total_size_bytes: files.iter().map(|f| f.size).sum(),
            success_rate_pct,
            last_backup_at: jobs
                .iter()
                .filter(|j| j.status == JobStatus::Completed)
                .filter_map(|j| j.completed_at)
                .max(),
        })
    }

    pub async fn sweep_retention(&self) -> Result<SweepReport> {
        self.retention.sweep().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Terminal job events, delivered without loss while the receiver lives.
    pub fn notifications(&self) -> mpsc::UnboundedReceiver<JobEvent> {
        self.events.notifications()
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            Arc::clone(&self.store),
            self.runner.clone(),
            self.retention.clone(),
            self.settings.schedule_tick,
            self.settings.retention_tick,
        )
    }

    pub fn start_scheduler(&self) -> SchedulerHandle {
        self.scheduler().spawn()
    }
}

//! Live job state shared between running tasks and status readers.

use crate::error::Result;
use crate::events::{EventBus, JobEvent};
use crate::store::MetadataStore;
use crate::types::BackupJob;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Holds the in-flight copy of every running job and persists checkpoints.
pub struct JobTracker {
    store: Arc<dyn MetadataStore>,
    events: Arc<EventBus>,
    live: RwLock<HashMap<Uuid, BackupJob>>,
    /// Number of live runs per config.
    active: Mutex<HashMap<Uuid, usize>>,
}

impl JobTracker {
    pub fn new(store: Arc<dyn MetadataStore>, events: Arc<EventBus>) -> Self {
        Self {
            store,
            events,
            live: RwLock::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Live state if the job is running, else the persisted record.
    pub async fn get(&self, job_id: Uuid) -> Result<Option<BackupJob>> {
        let live = self
            .live
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&job_id)
            .cloned();
        match live {
            Some(job) => Ok(Some(job)),
            None => self.store.get_job(job_id).await,
        }
    }

    /// Marks a run of `config_id` as live. With `exclusive`, refuses when one
    /// is already live.
    pub fn claim(self: &Arc<Self>, config_id: Uuid, exclusive: bool) -> Option<RunClaim> {
        let mut active = self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let count = active.entry(config_id).or_insert(0);
        if exclusive && *count > 0 {
            return None;
        }
        *count += 1;
        Some(RunClaim {
            tracker: Arc::clone(self),
            config_id,
        })
    }

    fn release(&self, config_id: Uuid) {
        let mut active = self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(count) = active.get_mut(&config_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                active.remove(&config_id);
            }
        }
    }

    /// Records a new pending job before its task is spawned.
    pub async fn register(&self, job: BackupJob) -> Result<()> {
        self.store.save_job(job.clone()).await?;
        self.live
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(job.id, job);
        Ok(())
    }

    fn publish_live(&self, job: BackupJob) {
        self.live
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(job.id, job);
    }

    fn retire(&self, job_id: Uuid) {
        self.live
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&job_id);
    }
}

/// Keeps a config counted as active until dropped.
pub struct RunClaim {
    tracker: Arc<JobTracker>,
    config_id: Uuid,
}

impl Drop for RunClaim {
    fn drop(&mut self) {
        self.tracker.release(self.config_id);
    }
}

/// The single writer of one job's state.
pub struct JobHandle {
    job: Mutex<BackupJob>,
    tracker: Arc<JobTracker>,
}

impl JobHandle {
    pub fn new(job: BackupJob, tracker: Arc<JobTracker>) -> Self {
        Self {
            job: Mutex::new(job),
            tracker,
        }
    }

    pub fn snapshot(&self) -> BackupJob {
        self.job
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn id(&self) -> Uuid {
        self.snapshot().id
    }

    /// Applies `f` and makes the result visible to status readers.
    pub fn update<R>(&self, f: impl FnOnce(&mut BackupJob) -> R) -> R {
        let (result, job, progress_changed) = {
            let mut job = self
                .job
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let before = (job.progress, job.details.current_operation.clone());
            let result = f(&mut job);
            let changed = before != (job.progress, job.details.current_operation.clone());
            (result, job.clone(), changed)
        };
        if progress_changed && !job.status.is_terminal() {
            self.tracker.events.publish(JobEvent::Progress {
                job_id: job.id,
                progress: job.progress,
                operation: job.details.current_operation.clone(),
            });
        }
        self.tracker.publish_live(job);
        result
    }

    /// Records a non-fatal problem and announces it.
    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        let job_id = self.update(|job| {
            job.warn(message.clone());
            job.id
        });
        warn!(job_id = %job_id, "⚠️  {}", message);
        self.tracker.events.publish(JobEvent::Warning { job_id, message });
    }

    /// Moves the job to `running` and announces it.
    pub async fn start(&self) {
        let started = self.update(|job| job.start(Utc::now()));
        let job = self.snapshot();
        if !started {
            warn!(job_id = %job.id, "Job was already {} when its task started", job.status);
            return;
        }
        info!(job_id = %job.id, "🚀 {:?} job started", job.kind);
        self.tracker.events.publish(JobEvent::Started {
            job_id: job.id,
            config_id: job.config_id,
            kind: job.kind,
        });
        self.checkpoint().await;
    }

    /// Persists the current state. A store failure is logged, not fatal:
    /// the live copy stays authoritative until the job finishes.
    pub async fn checkpoint(&self) {
        let job = self.snapshot();
        if let Err(e) = self.tracker.store.save_job(job.clone()).await {
            warn!(job_id = %job.id, "Failed to persist job checkpoint: {}", e);
        }
    }

    pub async fn complete(&self, file_id: Option<Uuid>) {
        if !self.settle(|job| job.complete(Utc::now())) {
            return;
        }
        let job = self.snapshot();
        info!(job_id = %job.id, "✅ {:?} job completed", job.kind);
        self.finish(JobEvent::Completed {
            job_id: job.id,
            config_id: job.config_id,
            kind: job.kind,
            file_id,
        })
        .await;
    }

    pub async fn fail(&self, error: String) {
        if !self.settle(|job| job.fail(error.clone(), Utc::now())) {
            return;
        }
        let job = self.snapshot();
        error!(job_id = %job.id, "❌ {:?} job failed: {}", job.kind, error);
        self.finish(JobEvent::Failed {
            job_id: job.id,
            config_id: job.config_id,
            kind: job.kind,
            error,
        })
        .await;
    }

    /// Applies a terminal transition without exposing it to readers yet;
    /// [`JobHandle::finish`] makes it visible once it is persisted.
    fn settle(&self, f: impl FnOnce(&mut BackupJob) -> bool) -> bool {
        let mut job = self
            .job
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut job)
    }

    async fn finish(&self, event: JobEvent) {
        let job = self.snapshot();
        match self.tracker.store.save_job(job.clone()).await {
            Ok(()) => self.tracker.retire(job.id),
            Err(e) => {
                error!(job_id = %job.id, "Failed to persist final job state: {}", e);
                self.tracker.publish_live(job);
            }
        }
        self.tracker.events.publish(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::JobStatus;

    fn tracker() -> Arc<JobTracker> {
        Arc::new(JobTracker::new(
            Arc::new(MemoryStore::new()),
            Arc::new(EventBus::default()),
        ))
    }

    #[tokio::test]
    async fn live_state_wins_until_job_finishes() {
        let tracker = tracker();
        let job = BackupJob::new_backup(Uuid::new_v4());
        let id = job.id;
        tracker.register(job.clone()).await.unwrap();
        let handle = JobHandle::new(job, Arc::clone(&tracker));

        handle.start().await;
        handle.update(|j| j.advance(40, "collecting"));
        assert_eq!(tracker.get(id).await.unwrap().unwrap().progress, 40);
        let stored = tracker.store().get_job(id).await.unwrap().unwrap();
        assert_eq!(stored.progress, 0, "only checkpoints reach the store");

        handle.complete(None).await;
        let stored = tracker.store().get_job(id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(tracker.get(id).await.unwrap().unwrap(), stored);
    }

    #[tokio::test]
    async fn failing_a_completed_job_is_ignored() {
        let tracker = tracker();
        let mut notifications = tracker.events().notifications();
        let job = BackupJob::new_backup(Uuid::new_v4());
        tracker.register(job.clone()).await.unwrap();
        let handle = JobHandle::new(job, Arc::clone(&tracker));

        handle.start().await;
        handle.complete(None).await;
        handle.fail("too late".to_string()).await;

        assert!(matches!(
            notifications.recv().await,
            Some(JobEvent::Completed { .. })
        ));
        assert!(notifications.try_recv().is_err());
        assert_eq!(handle.snapshot().status, JobStatus::Completed);
    }

    #[test]
    fn exclusive_claims_block_second_run() {
        let tracker = tracker();
        let config = Uuid::new_v4();

        let first = tracker.claim(config, true).unwrap();
        assert!(tracker.claim(config, true).is_none());
        let shared = tracker.claim(config, false).unwrap();

        drop(first);
        assert!(tracker.claim(config, true).is_none(), "shared run still live");
        drop(shared);
        assert!(tracker.claim(config, true).is_some());
    }
}

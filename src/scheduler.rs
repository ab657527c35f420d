//! Periodic scheduling of due backups and retention sweeps.

use crate::retention::RetentionManager;
use crate::runner::JobRunner;
use crate::store::MetadataStore;
use crate::types::{BackupConfig, Schedule};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const MIN_TICK: Duration = Duration::from_millis(10);

/// Whether a config on `schedule`, last completed at `last_completed`, is due at `now`.
///
/// Configs that never completed are due immediately. A completion time in
/// the future (clock skew) is treated as not due.
pub fn is_due(schedule: Schedule, last_completed: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match last_completed {
        None => true,
        Some(last) => match (now - last).to_std() {
            Ok(elapsed) => elapsed >= schedule.interval(),
            Err(_) => false,
        },
    }
}

pub struct Scheduler {
    store: Arc<dyn MetadataStore>,
    runner: JobRunner,
    retention: RetentionManager,
    schedule_tick: Duration,
    retention_tick: Duration,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        runner: JobRunner,
        retention: RetentionManager,
        schedule_tick: Duration,
        retention_tick: Duration,
    ) -> Self {
        Self {
            store,
            runner,
            retention,
            schedule_tick: schedule_tick.max(MIN_TICK),
            retention_tick: retention_tick.max(MIN_TICK),
        }
    }

    async fn evaluate(&self, config: &BackupConfig, now: DateTime<Utc>) -> crate::Result<bool> {
        let last = self.store.last_completed_at(config.id).await?;
        Ok(is_due(config.schedule, last, now))
    }

    /// Launches a backup for every enabled config that is due at `now`.
    ///
    /// Returns the ids of the launched jobs. A failure while evaluating or
    /// launching one config is logged and the remaining configs still run.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let configs = match self.store.list_configs().await {
            Ok(configs) => configs,
            Err(e) => {
                error!("Scheduler could not list configs: {}", e);
                return Vec::new();
            }
        };

        let mut launched = Vec::new();
        for config in configs.iter().filter(|c| c.enabled) {
            match self.evaluate(config, now).await {
                Ok(true) => match self.runner.execute(config.id).await {
                    Ok(job_id) => {
                        info!(job_id = %job_id, config = %config.name, "⏰ Scheduled backup started");
                        launched.push(job_id);
                    }
                    Err(e) => warn!(config = %config.name, "Could not start scheduled backup: {}", e),
                },
                Ok(false) => debug!(config = %config.name, "Not due yet"),
                Err(e) => error!(config = %config.name, "Failed to evaluate schedule: {}", e),
            }
        }
        launched
    }

    /// Runs both tick loops until `shutdown` flips to `true` or its sender drops.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut schedule = tokio::time::interval(self.schedule_tick);
        schedule.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut retention = tokio::time::interval(self.retention_tick);
        retention.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Scheduler running (backup check every {}, retention sweep every {})",
            humantime::format_duration(self.schedule_tick),
            humantime::format_duration(self.retention_tick)
        );

        loop {
            tokio::select! {
                _ = schedule.tick() => {
                    self.tick_at(Utc::now()).await;
                }
                _ = retention.tick() => {
                    if let Err(e) = self.retention.sweep().await {
                        error!("Retention sweep failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Scheduler stopped");
    }

    /// Spawns [`Scheduler::run`] and returns a handle to stop it.
    pub fn spawn(self) -> SchedulerHandle {
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(self.run(rx));
        SchedulerHandle { shutdown: tx, task }
    }
}

pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signals the loops to stop and waits for them. Running jobs are not
    /// interrupted.
    pub async fn shutdown(self) -> crate::Result<()> {
        let _ = self.shutdown.send(true);
        self.task.await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn never_completed_is_due() {
        assert!(is_due(Schedule::Monthly, None, Utc::now()));
    }

    #[test]
    fn due_exactly_at_interval() {
        let now = Utc::now();
        let day = ChronoDuration::hours(24);
        assert!(is_due(Schedule::Daily, Some(now - day), now));
        assert!(!is_due(Schedule::Daily, Some(now - day + ChronoDuration::seconds(1)), now));
    }

    #[test]
    fn weekly_and_monthly_use_fixed_days() {
        let now = Utc::now();
        assert!(!is_due(Schedule::Weekly, Some(now - ChronoDuration::days(6)), now));
        assert!(is_due(Schedule::Weekly, Some(now - ChronoDuration::days(7)), now));
        assert!(!is_due(Schedule::Monthly, Some(now - ChronoDuration::days(29)), now));
        assert!(is_due(Schedule::Monthly, Some(now - ChronoDuration::days(30)), now));
    }

    #[test]
    fn future_completion_is_not_due() {
        let now = Utc::now();
        assert!(!is_due(Schedule::Daily, Some(now + ChronoDuration::hours(1)), now));
    }
}

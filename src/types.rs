//! Data structures for backup configs, jobs, artifacts and snapshots.

use crate::entity::Entity;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// How often a config should run.
///
/// Intervals are fixed durations, not calendar periods: a "monthly"
/// backup runs every 30 days regardless of month length.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Schedule {
    Daily,
    Weekly,
    Monthly,
}

impl Schedule {
    pub fn interval(&self) -> Duration {
        const DAY: u64 = 24 * 60 * 60;
        match self {
            Schedule::Daily => Duration::from_secs(DAY),
            Schedule::Weekly => Duration::from_secs(7 * DAY),
            Schedule::Monthly => Duration::from_secs(30 * DAY),
        }
    }
}

/// Kind of delivery target an artifact can be shipped to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum DestinationKind {
    Local,
    #[serde(alias = "s3", alias = "gcs", alias = "azure")]
    ObjectStore,
    Ftp,
}

impl fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DestinationKind::Local => "local",
            DestinationKind::ObjectStore => "object-store",
            DestinationKind::Ftp => "ftp",
        })
    }
}

/// One configured destination of a backup config.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DestinationSpec {
    #[serde(rename = "type")]
    pub kind: DestinationKind,
    /// Adapter-specific settings (endpoint, credentials, ...).
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// A backup definition. Created and edited outside the engine; read-only
/// while a run is in progress.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupConfig {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    pub schedule: Schedule,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub retention_days: u32,
    #[serde(default)]
    pub include_files: bool,
    #[serde(default)]
    pub compression: bool,
    #[serde(default)]
    pub encryption: bool,
    #[serde(default)]
    pub destinations: Vec<DestinationSpec>,
    /// Entities to back up, in collection order. Empty means [`Entity::ALL`].
    #[serde(default)]
    pub tables: Vec<Entity>,
}

/// Longest retention a config may ask for (100 years).
pub const MAX_RETENTION_DAYS: u32 = 36_500;

impl BackupConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".to_string());
        }
        if self.retention_days == 0 {
            return Err(format!(
                "retentionDays must be greater than 0 (config '{}')",
                self.name
            ));
        }
        if self.retention_days > MAX_RETENTION_DAYS {
            return Err(format!(
                "retentionDays must be at most {} (config '{}')",
                MAX_RETENTION_DAYS, self.name
            ));
        }
        Ok(())
    }

    pub fn entities(&self) -> Vec<Entity> {
        Entity::resolve(&self.tables)
    }

    pub fn retention(&self) -> ChronoDuration {
        ChronoDuration::days(i64::from(self.retention_days))
    }
}

/// Lifecycle state of a job. Transitions only move forward.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        })
    }
}

/// Whether a job produces an artifact or replays one.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Backup,
    Restore,
}

/// Fine-grained progress of a running job.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobDetails {
    pub tables_processed: usize,
    pub total_tables: usize,
    pub files_processed: usize,
    pub total_files: usize,
    pub current_operation: String,
    /// Non-fatal problems: entity read failures, destination upload errors.
    pub warnings: Vec<String>,
}

/// One backup or restore run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupJob {
    pub id: Uuid,
    pub config_id: Uuid,
    pub kind: JobKind,
    /// Source artifact of a restore job.
    pub file_id: Option<Uuid>,
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: u8,
    pub error: Option<String>,
    pub details: JobDetails,
}

impl BackupJob {
    pub fn new_backup(config_id: Uuid) -> Self {
        Self::new(config_id, JobKind::Backup, None)
    }

    pub fn new_restore(config_id: Uuid, file_id: Uuid) -> Self {
        Self::new(config_id, JobKind::Restore, Some(file_id))
    }

    fn new(config_id: Uuid, kind: JobKind, file_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            config_id,
            kind,
            file_id,
            status: JobStatus::Pending,
            started_at: None,
            completed_at: None,
            progress: 0,
            error: None,
            details: JobDetails::default(),
        }
    }

    fn transition(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        true
    }

    /// `pending -> running`.
    pub fn start(&mut self, now: DateTime<Utc>) -> bool {
        if !self.transition(JobStatus::Running) {
            return false;
        }
        self.started_at = Some(now);
        self.progress = 0;
        true
    }

    /// Raises progress; lower values and updates after a terminal state are ignored.
    pub fn advance(&mut self, progress: u8, operation: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.progress = self.progress.max(progress.min(100));
        self.details.current_operation = operation.into();
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        if !self.status.is_terminal() {
            self.details.warnings.push(warning.into());
        }
    }

    /// `running -> completed`.
    pub fn complete(&mut self, now: DateTime<Utc>) -> bool {
        if !self.transition(JobStatus::Completed) {
            return false;
        }
        self.progress = 100;
        self.completed_at = Some(now);
        self.details.current_operation = "completed".to_string();
        true
    }

    /// `running -> failed`.
    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> bool {
        if !self.transition(JobStatus::Failed) {
            return false;
        }
        self.error = Some(error.into());
        self.completed_at = Some(now);
        self.details.current_operation = "failed".to_string();
        true
    }
}

/// Metadata for one packaged artifact.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupFile {
    pub id: Uuid,
    pub config_id: Uuid,
    pub job_id: Uuid,
    pub filename: String,
    pub size: u64,
    /// Lowercase hex sha-256 of the bytes on disk.
    pub checksum: String,
    pub compressed: bool,
    pub encrypted: bool,
    /// Destinations that accepted the artifact.
    pub destinations: Vec<DestinationKind>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl BackupFile {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// Aggregate health numbers over all backups.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupStats {
    pub total_backups: usize,
    pub total_size_bytes: u64,
    pub success_rate_pct: f64,
    pub last_backup_at: Option<DateTime<Utc>>,
}

/// Format version written into every snapshot.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Header of a snapshot, describing where it came from.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub version: u32,
    pub config_id: Uuid,
    pub config_name: String,
    pub job_id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Entities that were requested, in collection order.
    pub entities: Vec<Entity>,
}

/// All records read for one entity.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EntityDump {
    pub entity: Entity,
    pub records: Vec<serde_json::Value>,
}

/// An entity that could not be read.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EntityFailure {
    pub entity: Entity,
    pub error: String,
}

/// A file reference carried in the optional file section.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FileEntry {
    pub path: String,
    pub size: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct FilePayload {
    pub entries: Vec<FileEntry>,
}

/// In-memory structured representation of collected data.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub metadata: SnapshotMetadata,
    pub entities: Vec<EntityDump>,
    #[serde(default)]
    pub failures: Vec<EntityFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<FilePayload>,
}

impl Snapshot {
    pub fn record_count(&self) -> usize {
        self.entities.iter().map(|d| d.records.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_intervals_are_fixed() {
        assert_eq!(Schedule::Daily.interval(), Duration::from_secs(86_400));
        assert_eq!(Schedule::Weekly.interval(), Duration::from_secs(7 * 86_400));
        assert_eq!(Schedule::Monthly.interval(), Duration::from_secs(30 * 86_400));
    }

    #[test]
    fn job_transitions_are_one_way() {
        let mut job = BackupJob::new_backup(Uuid::new_v4());
        let now = Utc::now();
        assert!(!job.complete(now), "pending jobs cannot complete");
        assert!(job.start(now));
        assert!(!job.start(now));
        assert!(job.complete(now));
        assert_eq!(job.progress, 100);
        assert!(!job.fail("late", now));
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.error.is_none());
    }

    #[test]
    fn progress_never_decreases() {
        let mut job = BackupJob::new_backup(Uuid::new_v4());
        job.start(Utc::now());
        job.advance(60, "packaged");
        job.advance(30, "stale");
        assert_eq!(job.progress, 60);
        assert_eq!(job.details.current_operation, "stale");
    }

    #[test]
    fn terminal_jobs_ignore_updates() {
        let mut job = BackupJob::new_backup(Uuid::new_v4());
        job.start(Utc::now());
        job.fail("boom", Utc::now());
        job.advance(90, "distributing");
        job.warn("ignored");
        assert_eq!(job.progress, 0);
        assert!(job.details.warnings.is_empty());
    }

    #[test]
    fn config_parses_camel_case_json() {
        let json = r#"{
            "name": "daily-full",
            "schedule": "daily",
            "retentionDays": 7,
            "compression": true,
            "destinations": [{"type": "local", "enabled": true}, {"type": "s3", "config": {"endpoint": "http://x"}}],
            "tables": ["User", "Company"]
        }"#;
        let config: BackupConfig = serde_json::from_str(json).unwrap();
        assert!(config.enabled);
        assert_eq!(config.retention_days, 7);
        assert_eq!(config.destinations[1].kind, DestinationKind::ObjectStore);
        assert!(config.destinations[1].enabled);
        assert_eq!(config.entities(), vec![Entity::User, Entity::Company]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_retention_is_rejected() {
        let json = r#"{"name": "x", "schedule": "weekly", "retentionDays": 0}"#;
        let config: BackupConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn retention_beyond_a_century_is_rejected() {
        let json = r#"{"name": "x", "schedule": "weekly", "retentionDays": 4294967295}"#;
        let config: BackupConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().unwrap_err().contains("at most"));

        let json = r#"{"name": "x", "schedule": "weekly", "retentionDays": 36500}"#;
        let config: BackupConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_table_is_rejected() {
        let json = r#"{"name": "x", "schedule": "weekly", "retentionDays": 3, "tables": ["Invoices"]}"#;
        assert!(serde_json::from_str::<BackupConfig>(json).is_err());
    }
}

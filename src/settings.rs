//! Engine-wide settings and config-file loading.

use crate::destination::RetryPolicy;
use crate::error::{BackupError, Result};
use crate::types::BackupConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Settings shared by every run of the engine.
///
/// # Example
///
/// ```
/// use snapkeep::EngineSettings;
/// use std::time::Duration;
///
/// let settings = EngineSettings {
///     backup_dir: "/var/backups/licita".into(),
///     stage_timeout: Duration::from_secs(10 * 60),
///     ..EngineSettings::default()
/// };
/// assert!(!settings.exclusive_runs);
/// ```
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Directory holding packaged artifacts and `metadata.json`.
    pub backup_dir: PathBuf,
    /// Deadline for each pipeline stage and each upload attempt (default: 30 minutes).
    pub stage_timeout: Duration,
    /// How often the scheduler checks for due configs (default: 1 hour).
    pub schedule_tick: Duration,
    /// How often expired artifacts are swept (default: 6 hours).
    pub retention_tick: Duration,
    /// Retry policy for transient upload failures.
    pub upload_retry: RetryPolicy,
    /// Capacity of the broadcast event channel.
    pub event_capacity: usize,
    /// Reject a run while another run of the same config is live (default: false).
    ///
    /// Off means two runs of one config may overlap; each still writes its
    /// own uniquely named artifact.
    pub exclusive_runs: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from("backups"),
            stage_timeout: Duration::from_secs(30 * 60),
            schedule_tick: Duration::from_secs(60 * 60),
            retention_tick: Duration::from_secs(6 * 60 * 60),
            upload_retry: RetryPolicy::default(),
            event_capacity: 256,
            exclusive_runs: false,
        }
    }
}

impl EngineSettings {
    pub fn metadata_path(&self) -> PathBuf {
        self.backup_dir.join("metadata.json")
    }
}

/// Loads a JSON array of backup configs and validates each one.
pub async fn load_configs(path: &Path) -> Result<Vec<BackupConfig>> {
    let content = tokio::fs::read_to_string(path).await?;
    let configs: Vec<BackupConfig> = serde_json::from_str(&content).map_err(|e| {
        BackupError::invalid_config(format!("{}: {}", path.display(), e))
    })?;
    for config in &configs {
        config.validate().map_err(BackupError::InvalidConfig)?;
    }
    info!("Loaded {} backup configs from {}", configs.len(), path.display());
    Ok(configs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_documented_intervals() {
        let settings = EngineSettings::default();
        assert_eq!(settings.stage_timeout, Duration::from_secs(1800));
        assert_eq!(settings.schedule_tick, Duration::from_secs(3600));
        assert_eq!(settings.retention_tick, Duration::from_secs(21_600));
        assert_eq!(settings.metadata_path(), PathBuf::from("backups/metadata.json"));
    }

    #[tokio::test]
    async fn loads_and_validates_configs() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("configs.json");
        std::fs::write(
            &good,
            r#"[{"name": "daily-full", "schedule": "daily", "retentionDays": 7, "tables": ["User"]}]"#,
        )
        .unwrap();
        let configs = load_configs(&good).await.unwrap();
        assert_eq!(configs[0].name, "daily-full");

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, r#"[{"name": "x", "schedule": "daily", "retentionDays": 0}]"#).unwrap();
        assert!(matches!(
            load_configs(&bad).await,
            Err(BackupError::InvalidConfig(_))
        ));
    }
}

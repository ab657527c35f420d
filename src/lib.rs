//! SnapKeep - Scheduled backup and restore engine for application data
//!
//! This library snapshots the entities of an application into compressed,
//! checksummed artifacts, ships them to one or more destinations, keeps them
//! for a configurable retention window, and replays them on demand.
//!
//! # Features
//!
//! - **Scheduled Backups**: Daily, weekly and monthly configs evaluated on a fixed tick
//! - **Multiple Destinations**: Local disk, HTTP object stores and FTP, uploaded concurrently
//! - **SHA-256 Verification**: Every artifact carries a checksum checked before restore
//! - **Progress Tracking**: Live job progress through polling or an event stream
//! - **Automatic Retry**: Transient upload failures are retried per destination
//! - **Retention Sweeps**: Expired artifacts and their records are removed periodically
//!
//! # Example
//!
//! ```no_run
//! use snapkeep::{BackupConfig, BackupEngine, EngineSettings, JsonDirStore, Schedule};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let data = Arc::new(JsonDirStore::new("data"));
//! let engine = BackupEngine::builder()
//!     .settings(EngineSettings::default())
//!     .source(data.clone())
//!     .sink(data)
//!     .build()?;
//!
//! let config: BackupConfig = serde_json::from_str(
//!     r#"{"name":"daily-full","schedule":"daily","retentionDays":7,
//!         "destinations":[{"type":"local","config":{}}]}"#,
//! )?;
//! let config = engine.create_config(config).await?;
//! let job = engine.wait_for_job(engine.trigger_backup(config.id).await?).await?;
//! println!("backup finished: {}", job.status);
//! # Ok(())
//! # }
//! ```

pub mod collect;
pub mod destination;
pub mod encryption;
pub mod engine;
pub mod entity;
pub mod error;
pub mod events;
pub mod package;
pub mod restore;
pub mod retention;
pub mod runner;
pub mod scheduler;
pub mod settings;
pub mod source;
pub mod store;
pub mod tracker;
pub mod types;
pub mod verify;

pub use collect::DataCollector;
pub use destination::{
    DestinationAdapter, DestinationError, DestinationRegistry, RetryPolicy,
};
pub use encryption::{Encryptor, NoopEncryptor};
pub use engine::{BackupEngine, BackupEngineBuilder};
pub use entity::Entity;
pub use error::{BackupError, Result};
pub use events::{EventBus, JobEvent};
pub use package::{PackagedArtifact, Packager};
pub use restore::RestoreRunner;
pub use retention::{RetentionManager, SweepReport};
pub use runner::JobRunner;
pub use scheduler::{Scheduler, SchedulerHandle};
pub use settings::{load_configs, EngineSettings};
pub use source::{DataSink, DataSource, JsonDirStore};
pub use store::{MemoryStore, MetadataStore};
pub use types::{
    BackupConfig, BackupFile, BackupJob, BackupStats, DestinationKind, DestinationSpec,
    JobKind, JobStatus, Schedule, Snapshot,
};

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use snapkeep::{
    load_configs, BackupEngine, BackupJob, EngineSettings, JobStatus, JsonDirStore, MemoryStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "snapkeep")]
#[command(about = "Scheduled backups of application data with retention and restore", long_about = None)]
#[command(version)]
struct Args {
    /// Directory for artifacts and metadata.json
    #[arg(long, default_value = "backups")]
    backup_dir: PathBuf,

    /// Directory holding one <Entity>.json array per entity
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Directory of uploaded files referenced when includeFiles is set
    #[arg(long)]
    files_dir: Option<PathBuf>,

    /// JSON array of backup configs to register before running
    #[arg(short, long)]
    configs: Option<PathBuf>,

    /// Deadline for each pipeline stage (e.g. "30m", "90s")
    #[arg(long, default_value = "30m", value_parser = humantime::parse_duration)]
    stage_timeout: Duration,

    /// Refuse to start a backup while another run of the same config is live
    #[arg(long)]
    exclusive: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler until interrupted
    Daemon {
        /// How often due configs are checked
        #[arg(long, default_value = "1h", value_parser = humantime::parse_duration)]
        schedule_tick: Duration,

        /// How often expired artifacts are swept
        #[arg(long, default_value = "6h", value_parser = humantime::parse_duration)]
        retention_tick: Duration,
    },
    /// Run one backup of the named config and wait for it
    Backup { name: String },
    /// Replay a backup file into the data directory
    Restore {
        file_id: Uuid,

        /// Confirm that live data will be overwritten
        #[arg(long)]
        yes: bool,
    },
    /// Delete expired artifacts now
    Sweep,
    /// Print backup statistics as JSON
    Stats,
    /// List backup files as JSON
    Files {
        #[arg(long)]
        config: Option<String>,
    },
    /// List jobs as JSON
    Jobs {
        #[arg(long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let log_level = if args.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("snapkeep={}", log_level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut settings = EngineSettings {
        backup_dir: args.backup_dir.clone(),
        stage_timeout: args.stage_timeout,
        exclusive_runs: args.exclusive,
        ..EngineSettings::default()
    };
    if let Command::Daemon {
        schedule_tick,
        retention_tick,
    } = &args.command
    {
        settings.schedule_tick = *schedule_tick;
        settings.retention_tick = *retention_tick;
    }

    info!("🚀 SnapKeep - Backup Engine");
    info!("Backup directory: {:?}", settings.backup_dir);
    info!("Data directory: {:?}", args.data_dir);

    let store = MemoryStore::open(settings.metadata_path())
        .await
        .with_context(|| format!("opening {}", settings.metadata_path().display()))?;
    let mut data = JsonDirStore::new(&args.data_dir);
    if let Some(files_dir) = &args.files_dir {
        data = data.with_files_dir(files_dir);
    }
    let data = Arc::new(data);

    let engine = BackupEngine::builder()
        .settings(settings)
        .store(Arc::new(store))
        .source(data.clone())
        .sink(data)
        .build()?;

    if let Some(path) = &args.configs {
        register_configs(&engine, path).await?;
    }

    match args.command {
        Command::Daemon { .. } => {
            let scheduler = engine.start_scheduler();
            tokio::signal::ctrl_c().await?;
            info!("Interrupt received, stopping scheduler");
            scheduler.shutdown().await?;
        }
        Command::Backup { name } => {
            let config = engine
                .find_config(&name)
                .await?
                .ok_or_else(|| anyhow!("no backup config named '{}'", name))?;
            let job_id = engine.trigger_backup(config.id).await?;
            let job = follow(&engine, job_id, &format!("💾 Backing up {}", name)).await?;
            report(&job)?;
        }
        Command::Restore { file_id, yes } => {
            if !yes {
                bail!("restoring overwrites live data; pass --yes to confirm");
            }
            let job_id = engine.restore_backup(file_id).await?;
            let job = follow(&engine, job_id, "♻️  Restoring").await?;
            report(&job)?;
        }
        Command::Sweep => {
            let report = engine.sweep_retention().await?;
            for e in &report.errors {
                warn!("{}", e);
            }
            info!("🗑️  Removed {} expired backups", report.deleted);
        }
        Command::Stats => {
            println!("{}", serde_json::to_string_pretty(&engine.get_stats().await?)?);
        }
        Command::Files { config } => {
            let config_id = resolve_config(&engine, config.as_deref()).await?;
            let files = engine.list_files(config_id).await?;
            println!("{}", serde_json::to_string_pretty(&files)?);
        }
        Command::Jobs { config } => {
            let config_id = resolve_config(&engine, config.as_deref()).await?;
            let jobs = engine.list_jobs(config_id).await?;
            println!("{}", serde_json::to_string_pretty(&jobs)?);
        }
    }
    Ok(())
}

/// Creates configs from `path`, updating any that already exist by name.
async fn register_configs(engine: &BackupEngine, path: &std::path::Path) -> anyhow::Result<()> {
    for mut config in load_configs(path).await? {
        match engine.find_config(&config.name).await? {
            Some(existing) => {
                config.id = existing.id;
                engine.update_config(config).await?;
            }
            None => {
                engine.create_config(config).await?;
            }
        }
    }
    Ok(())
}

async fn resolve_config(engine: &BackupEngine, name: Option<&str>) -> anyhow::Result<Option<Uuid>> {
    match name {
        None => Ok(None),
        Some(name) => engine
            .find_config(name)
            .await?
            .map(|c| Some(c.id))
            .ok_or_else(|| anyhow!("no backup config named '{}'", name)),
    }
}

/// Polls a job, mirroring its progress on a bar when stderr is a terminal.
async fn follow(engine: &BackupEngine, job_id: Uuid, label: &str) -> anyhow::Result<BackupJob> {
    let pb = if atty::is(atty::Stream::Stderr) {
        let pb = indicatif::ProgressBar::new(100);
        pb.set_style(
            indicatif::ProgressStyle::default_bar()
                .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}% {msg} | {elapsed_precise} elapsed")?
                .progress_chars("█▓▒░ "),
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    } else {
        indicatif::ProgressBar::hidden()
    };

    loop {
        let job = engine.get_job_status(job_id).await?;
        pb.set_position(u64::from(job.progress));
        pb.set_message(format!("{} | {}", label, job.details.current_operation));
        if job.status.is_terminal() {
            match job.status {
                JobStatus::Completed => pb.finish_with_message(format!("✅ {} done", label)),
                _ => pb.abandon_with_message(format!("❌ {} failed", label)),
            }
            return Ok(job);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

fn report(job: &BackupJob) -> anyhow::Result<()> {
    for warning in &job.details.warnings {
        warn!("⚠️  {}", warning);
    }
    match job.status {
        JobStatus::Completed => {
            info!("✅ Job {} completed", job.id);
            Ok(())
        }
        _ => Err(anyhow!(
            "job {} failed: {}",
            job.id,
            job.error.as_deref().unwrap_or("unknown error")
        )),
    }
}

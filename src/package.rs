//! Packaging snapshots into artifacts, and unpacking them again.

use crate::encryption::Encryptor;
use crate::error::{BackupError, Result};
use crate::types::{BackupConfig, Snapshot, SNAPSHOT_FORMAT_VERSION};
use crate::verify::sha256_hex;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::info;
use uuid::Uuid;

/// First two bytes of every gzip stream.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Result of packaging one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct PackagedArtifact {
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
    pub checksum: String,
    pub compressed: bool,
    pub encrypted: bool,
}

/// Serializes snapshots to `backup_*.json[.gz]` files in the backup directory.
#[derive(Clone)]
pub struct Packager {
    backup_dir: PathBuf,
    encryptor: Arc<dyn Encryptor>,
}

impl Packager {
    pub fn new(backup_dir: impl Into<PathBuf>, encryptor: Arc<dyn Encryptor>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            encryptor,
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn encryptor(&self) -> &Arc<dyn Encryptor> {
        &self.encryptor
    }

    /// Whether artifacts for `config` will really be encrypted.
    pub fn will_encrypt(&self, config: &BackupConfig) -> bool {
        config.encryption && self.encryptor.encrypts()
    }

    /// Writes `snapshot` to disk and returns what was written.
    ///
    /// The artifact is written to a hidden temp file in the backup directory
    /// and renamed into place, so readers never see a partial artifact. The
    /// checksum covers the exact bytes on disk.
    pub async fn package(
        &self,
        snapshot: &Snapshot,
        config: &BackupConfig,
    ) -> Result<PackagedArtifact> {
        let compressed = config.compression;
        let encrypted = self.will_encrypt(config);

        let filename = artifact_filename(
            &config.name,
            snapshot.metadata.job_id,
            snapshot.metadata.created_at,
            compressed,
        );

        let json = serde_json::to_vec(snapshot)
            .map_err(|e| BackupError::packaging(format!("serialize snapshot: {}", e)))?;
        let encryptor = Arc::clone(&self.encryptor);
        let bytes = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            let bytes = if compressed {
                gzip(&json).map_err(|e| BackupError::packaging(format!("compress: {}", e)))?
            } else {
                json
            };
            if encrypted {
                encryptor
                    .encrypt(bytes)
                    .map_err(|e| BackupError::packaging(format!("encrypt: {}", e)))
            } else {
                Ok(bytes)
            }
        })
        .await??;

        let checksum = sha256_hex(&bytes);
        let path = write_atomic(&self.backup_dir, &filename, &bytes)
            .await
            .map_err(|e| BackupError::packaging(format!("write {}: {}", filename, e)))?;

        info!(
            "📦 Packaged {} ({} bytes, {} records)",
            filename,
            bytes.len(),
            snapshot.record_count()
        );

        Ok(PackagedArtifact {
            filename,
            path,
            size: bytes.len() as u64,
            checksum,
            compressed,
            encrypted,
        })
    }

    /// Reverses [`Packager::package`]: decrypt, decompress, parse.
    ///
    /// Gzip is also detected from the stream header, so an artifact whose
    /// `compressed` flag was lost still restores.
    pub fn unpack(&self, bytes: Vec<u8>, compressed: bool, encrypted: bool) -> Result<Snapshot> {
        let bytes = if encrypted {
            self.encryptor
                .decrypt(bytes)
                .map_err(|e| BackupError::restore_parse(format!("decrypt: {}", e)))?
        } else {
            bytes
        };

        let json = if compressed || is_gzip(&bytes) {
            gunzip(&bytes).map_err(|e| BackupError::restore_parse(format!("decompress: {}", e)))?
        } else {
            bytes
        };

        let snapshot: Snapshot = serde_json::from_slice(&json)
            .map_err(|e| BackupError::restore_parse(format!("parse snapshot: {}", e)))?;

        if snapshot.metadata.version > SNAPSHOT_FORMAT_VERSION {
            return Err(BackupError::restore_parse(format!(
                "snapshot format version {} is newer than supported version {}",
                snapshot.metadata.version, SNAPSHOT_FORMAT_VERSION
            )));
        }
        Ok(snapshot)
    }
}

/// Builds `backup_{name}_{timestamp}_{job}.json[.gz]`.
///
/// The timestamp is ISO-8601 UTC with `:` and `.` replaced by `-`; the job id
/// prefix keeps names unique when two runs of one config start in the same
/// millisecond.
pub fn artifact_filename(
    config_name: &str,
    job_id: Uuid,
    at: DateTime<Utc>,
    compressed: bool,
) -> String {
    let name: String = config_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let timestamp = at.format("%Y-%m-%dT%H-%M-%S-%3fZ");
    let job = job_id.simple().to_string();
    let extension = if compressed { "json.gz" } else { "json" };
    format!("backup_{}_{}_{}.{}", name, timestamp, &job[..8], extension)
}

pub fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[..2] == GZIP_MAGIC
}

fn gzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(bytes.len() / 4), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

fn gunzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut buffer = Vec::new();
    decoder.read_to_end(&mut buffer)?;
    Ok(buffer)
}

/// Writes `bytes` to `dir/filename` via a temp file and rename.
async fn write_atomic(dir: &Path, filename: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let final_path = dir.join(filename);
    let tmp_path = dir.join(format!(".{}.tmp", filename));

    let mut file = tokio::fs::File::create(&tmp_path).await?;
    if let Err(e) = async {
        file.write_all(bytes).await?;
        file.sync_all().await
    }
    .await
    {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }
    drop(file);

    tokio::fs::rename(&tmp_path, &final_path).await?;
    Ok(final_path)
}

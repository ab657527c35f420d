//! Artifact integrity checks (sha-256 checksums).

use crate::error::BackupError;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::info;

/// Computes the sha-256 of an in-memory buffer as lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Computes the sha-256 hash of a local file.
///
/// This function reads the file in chunks to avoid loading large files
/// entirely into memory. It runs in a blocking task to avoid blocking
/// the async runtime.
pub async fn sha256_file(path: &Path) -> Result<String, BackupError> {
    let path = path.to_path_buf();

    tokio::task::spawn_blocking(move || -> Result<String, BackupError> {
        use std::io::Read;

        let file = std::fs::File::open(&path)?;
        let mut reader = std::io::BufReader::with_capacity(1024 * 1024, file);
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; 1024 * 1024];

        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }

        Ok(hex::encode(hasher.finalize()))
    })
    .await?
}

/// Verifies that the file at `path` still hashes to `expected`.
pub async fn verify_checksum(path: &Path, expected: &str) -> Result<(), BackupError> {
    let file_display_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();

    let actual = sha256_file(path).await?;
    if actual != expected {
        return Err(BackupError::ChecksumMismatch {
            filename: file_display_name,
            expected: expected.to_string(),
            actual,
        });
    }

    info!("✅ Checksum verified for {}", file_display_name);
    Ok(())
}

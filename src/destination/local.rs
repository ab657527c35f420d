//! The managed backup directory as a destination.

use super::{DestinationAdapter, DestinationError};
use crate::types::DestinationKind;
use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

/// Artifacts are packaged straight into the backup directory, so "uploading"
/// locally only confirms the artifact is there.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalAdapter;

#[async_trait]
impl DestinationAdapter for LocalAdapter {
    fn kind(&self) -> DestinationKind {
        DestinationKind::Local
    }

    async fn upload(
        &self,
        artifact: &Path,
        _config: &serde_json::Value,
    ) -> Result<(), DestinationError> {
        match tokio::fs::metadata(artifact).await {
            Ok(m) if m.is_file() => {
                debug!("Artifact {} kept in backup directory", artifact.display());
                Ok(())
            }
            Ok(_) => Err(DestinationError::permanent(format!(
                "{} is not a regular file",
                artifact.display()
            ))),
            Err(e) => Err(DestinationError::permanent(format!(
                "artifact {} missing: {}",
                artifact.display(),
                e
            ))),
        }
    }
}

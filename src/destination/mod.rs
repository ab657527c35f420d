//! Pluggable delivery targets for packaged artifacts.
//!
//! Every adapter implements [`DestinationAdapter::upload`]. Uploads must be
//! idempotent per filename and must never remove the source artifact.
//! Errors are split into [`DestinationError::Transient`] (worth retrying)
//! and [`DestinationError::Permanent`].

mod ftp;
mod local;
mod object_store;

pub use ftp::FtpAdapter;
pub use local::LocalAdapter;
pub use object_store::ObjectStoreAdapter;

use crate::types::DestinationKind;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_retry2::{Retry, RetryError};
use tracing::warn;

/// Failure of one upload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DestinationError {
    /// Network hiccup, timeout, server overload: retrying may succeed.
    #[error("transient destination error: {0}")]
    Transient(String),

    /// Bad configuration, rejected credentials, refused path.
    #[error("permanent destination error: {0}")]
    Permanent(String),
}

impl DestinationError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, DestinationError::Transient(_))
    }
}

/// Uploads one artifact to one kind of target.
#[async_trait]
pub trait DestinationAdapter: Send + Sync {
    fn kind(&self) -> DestinationKind;

    /// Ships the file at `artifact` using the destination's own `config`.
    async fn upload(
        &self,
        artifact: &Path,
        config: &serde_json::Value,
    ) -> Result<(), DestinationError>;
}

/// Adapters indexed by the destination kind they serve.
#[derive(Clone, Default)]
pub struct DestinationRegistry {
    adapters: HashMap<DestinationKind, Arc<dyn DestinationAdapter>>,
}

impl DestinationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the bundled local, object-store and FTP adapters.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(LocalAdapter));
        registry.register(Arc::new(ObjectStoreAdapter::new()));
        registry.register(Arc::new(FtpAdapter::default()));
        registry
    }

    /// Installs `adapter`, replacing any adapter of the same kind.
    pub fn register(&mut self, adapter: Arc<dyn DestinationAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn get(&self, kind: DestinationKind) -> Option<Arc<dyn DestinationAdapter>> {
        self.adapters.get(&kind).cloned()
    }
}

/// How transient upload failures are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub retries: usize,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            interval: Duration::from_secs(10),
        }
    }
}

/// Runs one upload with a per-attempt deadline, retrying transient errors.
pub async fn upload_with_retry(
    adapter: &dyn DestinationAdapter,
    artifact: &Path,
    config: &serde_json::Value,
    policy: RetryPolicy,
    attempt_timeout: Duration,
) -> Result<(), DestinationError> {
    let kind = adapter.kind();
    let retry_strategy =
        tokio_retry2::strategy::FixedInterval::from_millis(policy.interval.as_millis() as u64)
            .take(policy.retries);

    Retry::spawn(retry_strategy, move || async move {
        match tokio::time::timeout(attempt_timeout, adapter.upload(artifact, config)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if e.is_transient() => {
                warn!("Upload to {} failed, may retry: {}", kind, e);
                RetryError::to_transient(e)
            }
            Ok(Err(e)) => RetryError::to_permanent(e),
            Err(_) => {
                warn!("Upload to {} timed out after {:?}", kind, attempt_timeout);
                RetryError::to_transient(DestinationError::transient(format!(
                    "upload timed out after {:?}",
                    attempt_timeout
                )))
            }
        }
    })
    .await
}

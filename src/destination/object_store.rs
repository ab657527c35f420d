//! HTTP object-store uploads (S3/R2/GCS-style PUT endpoints).

use super::{DestinationAdapter, DestinationError};
use crate::types::DestinationKind;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// Per-destination settings, taken from the destination's `config` object.
///
/// ```json
/// { "endpoint": "https://bucket.example.com", "prefix": "backups/", "bearerToken": "..." }
/// ```
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct ObjectStoreTarget {
    /// Base URL the object key is appended to. Presigned-style endpoints work too.
    endpoint: String,
    #[serde(default)]
    prefix: String,
    #[serde(default)]
    bearer_token: Option<String>,
    /// Extra headers sent with every request.
    #[serde(default)]
    headers: HashMap<String, String>,
}

impl ObjectStoreTarget {
    fn object_url(&self, filename: &str) -> String {
        format!(
            "{}/{}{}",
            self.endpoint.trim_end_matches('/'),
            self.prefix,
            filename
        )
    }

    fn apply(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request
    }
}

/// Uploads artifacts with a single HTTP PUT per object.
#[derive(Debug, Clone, Default)]
pub struct ObjectStoreAdapter {
    client: reqwest::Client,
}

impl ObjectStoreAdapter {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Checks whether an object of the same size already exists.
    ///
    /// Any failure here just means "not known to exist"; the PUT decides.
    async fn already_uploaded(&self, target: &ObjectStoreTarget, url: &str, size: u64) -> bool {
        let response = match target.apply(self.client.head(url)).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(_) => return false,
            Err(e) => {
                warn!("HEAD request failed for {}: {}", url, e);
                return false;
            }
        };

        let remote_size = response
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());

        remote_size == Some(size)
    }
}

#[async_trait]
impl DestinationAdapter for ObjectStoreAdapter {
    fn kind(&self) -> DestinationKind {
        DestinationKind::ObjectStore
    }

    async fn upload(
        &self,
        artifact: &Path,
        config: &serde_json::Value,
    ) -> Result<(), DestinationError> {
        let target: ObjectStoreTarget = serde_json::from_value(config.clone()).map_err(|e| {
            DestinationError::permanent(format!("invalid object-store config: {}", e))
        })?;
        let filename = artifact
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| DestinationError::permanent("artifact path has no file name"))?;
        let url = target.object_url(filename);

        let body = tokio::fs::read(artifact).await.map_err(|e| {
            DestinationError::permanent(format!("read {}: {}", artifact.display(), e))
        })?;
        let size = body.len() as u64;

        if self.already_uploaded(&target, &url, size).await {
            info!("✅ {} already present at {} ({} bytes)", filename, url, size);
            return Ok(());
        }

        let response = target
            .apply(self.client.put(&url))
            .body(body)
            .send()
            .await
            .map_err(|e| DestinationError::transient(format!("PUT {}: {}", url, e)))?;

        let status = response.status();
        if status.is_success() {
            info!("✅ Uploaded {} to {} ({} bytes)", filename, url, size);
            return Ok(());
        }

        let message = format!("PUT {} returned HTTP {}", url, status);
        if status.is_server_error() || status.as_u16() == 429 || status.as_u16() == 408 {
            Err(DestinationError::transient(message))
        } else {
            Err(DestinationError::permanent(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    #[derive(Debug, Clone)]
    struct Received {
        method: String,
        path: String,
        authorization: Option<String>,
        body: Vec<u8>,
    }

    /// One-request-per-connection HTTP responder.
    ///
    /// `respond(method, stored_len)` returns `(status, content_length_header)`.
    async fn fake_store(
        respond: fn(&str, Option<usize>) -> (u16, Option<usize>),
    ) -> (String, Arc<Mutex<Vec<Received>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let log = Arc::new(Mutex::new(Vec::<Received>::new()));
        let stored = Arc::new(Mutex::new(None::<usize>));

        let log_task = Arc::clone(&log);
        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(s) => s,
                    Err(_) => return,
                };
                let mut reader = BufReader::new(stream);
                let mut request_line = String::new();
                if reader.read_line(&mut request_line).await.unwrap_or(0) == 0 {
                    continue;
                }
                let mut parts = request_line.split_whitespace();
                let method = parts.next().unwrap_or_default().to_string();
                let path = parts.next().unwrap_or_default().to_string();

                let mut content_length = 0usize;
                let mut authorization = None;
                loop {
                    let mut line = String::new();
                    reader.read_line(&mut line).await.unwrap();
                    let line = line.trim_end();
                    if line.is_empty() {
                        break;
                    }
                    if let Some((name, value)) = line.split_once(':') {
                        match name.to_ascii_lowercase().as_str() {
                            "content-length" => content_length = value.trim().parse().unwrap(),
                            "authorization" => authorization = Some(value.trim().to_string()),
                            _ => {}
                        }
                    }
                }
                let mut body = vec![0u8; content_length];
                reader.read_exact(&mut body).await.unwrap();

                let previous = *stored.lock().unwrap();
                let (status, length) = respond(&method, previous);
                if method == "PUT" && (200..300).contains(&status) {
                    *stored.lock().unwrap() = Some(body.len());
                }
                log_task.lock().unwrap().push(Received {
                    method: method.clone(),
                    path,
                    authorization,
                    body,
                });

                let mut response = format!("HTTP/1.1 {} Status\r\nconnection: close\r\n", status);
                response.push_str(&format!("content-length: {}\r\n\r\n", length.unwrap_or(0)));
                let mut stream = reader.into_inner();
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        (format!("http://{}", addr), log)
    }

    fn artifact(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("backup_daily_2026.json.gz");
        std::fs::write(&path, b"artifact-bytes").unwrap();
        path
    }

    fn normal(method: &str, stored: Option<usize>) -> (u16, Option<usize>) {
        match (method, stored) {
            ("HEAD", Some(len)) => (200, Some(len)),
            ("HEAD", None) => (404, None),
            _ => (200, None),
        }
    }

    #[tokio::test]
    async fn puts_artifact_under_prefix_with_token() {
        let (endpoint, log) = fake_store(normal).await;
        let dir = tempfile::tempdir().unwrap();
        let path = artifact(dir.path());
        let config = json!({"endpoint": endpoint, "prefix": "nightly/", "bearerToken": "s3cret"});

        ObjectStoreAdapter::new().upload(&path, &config).await.unwrap();

        let log = log.lock().unwrap();
        let put = log.iter().find(|r| r.method == "PUT").unwrap();
        assert_eq!(put.path, "/nightly/backup_daily_2026.json.gz");
        assert_eq!(put.body, b"artifact-bytes");
        assert_eq!(put.authorization.as_deref(), Some("Bearer s3cret"));
        assert!(path.exists(), "upload must not remove the source artifact");
    }

    #[tokio::test]
    async fn second_upload_of_same_file_is_skipped() {
        let (endpoint, log) = fake_store(normal).await;
        let dir = tempfile::tempdir().unwrap();
        let path = artifact(dir.path());
        let config = json!({"endpoint": endpoint});
        let adapter = ObjectStoreAdapter::new();

        adapter.upload(&path, &config).await.unwrap();
        adapter.upload(&path, &config).await.unwrap();

        let puts = log.lock().unwrap().iter().filter(|r| r.method == "PUT").count();
        assert_eq!(puts, 1);
    }

    #[tokio::test]
    async fn server_errors_are_transient() {
        fn unavailable(method: &str, _: Option<usize>) -> (u16, Option<usize>) {
            if method == "HEAD" {
                (404, None)
            } else {
                (503, None)
            }
        }
        let (endpoint, _) = fake_store(unavailable).await;
        let dir = tempfile::tempdir().unwrap();

        let err = ObjectStoreAdapter::new()
            .upload(&artifact(dir.path()), &json!({"endpoint": endpoint}))
            .await
            .unwrap_err();

        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn forbidden_is_permanent() {
        fn forbidden(_: &str, _: Option<usize>) -> (u16, Option<usize>) {
            (403, None)
        }
        let (endpoint, _) = fake_store(forbidden).await;
        let dir = tempfile::tempdir().unwrap();

        let err = ObjectStoreAdapter::new()
            .upload(&artifact(dir.path()), &json!({"endpoint": endpoint}))
            .await
            .unwrap_err();

        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn missing_endpoint_is_permanent() {
        let dir = tempfile::tempdir().unwrap();
        let err = ObjectStoreAdapter::new()
            .upload(&artifact(dir.path()), &json!({"bucket": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, DestinationError::Permanent(_)));
    }
}

//! Passive-mode FTP uploads.

use super::{DestinationAdapter, DestinationError};
use crate::types::DestinationKind;
use async_trait::async_trait;
use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info};

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct FtpTarget {
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_username")]
    username: String,
    #[serde(default)]
    password: String,
    /// Remote directory to `CWD` into before storing.
    #[serde(default)]
    directory: String,
}

fn default_port() -> u16 {
    21
}

fn default_username() -> String {
    "anonymous".to_string()
}

/// Stores artifacts with `STOR <filename>`, which overwrites on re-upload.
#[derive(Debug, Clone, Copy, Default)]
pub struct FtpAdapter;

#[async_trait]
impl DestinationAdapter for FtpAdapter {
    fn kind(&self) -> DestinationKind {
        DestinationKind::Ftp
    }

    async fn upload(
        &self,
        artifact: &Path,
        config: &serde_json::Value,
    ) -> Result<(), DestinationError> {
        let target: FtpTarget = serde_json::from_value(config.clone())
            .map_err(|e| DestinationError::permanent(format!("invalid ftp config: {}", e)))?;
        let filename = artifact
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| DestinationError::permanent("artifact path has no file name"))?;
        let mut file = tokio::fs::File::open(artifact).await.map_err(|e| {
            DestinationError::permanent(format!("open {}: {}", artifact.display(), e))
        })?;

        let mut session = FtpSession::connect(&target.host, target.port).await?;
        session.expect(&[220]).await?;
        session.login(&target.username, &target.password).await?;
        session.command("TYPE I", &[200]).await?;
        if !target.directory.is_empty() {
            session
                .command(&format!("CWD {}", target.directory), &[250])
                .await?;
        }

        let (_, pasv) = session.command("PASV", &[227]).await?;
        let data_addr = parse_pasv(&pasv)?;
        let mut data = TcpStream::connect(data_addr)
            .await
            .map_err(|e| DestinationError::transient(format!("data connection: {}", e)))?;

        session
            .command(&format!("STOR {}", filename), &[125, 150])
            .await?;
        let sent = tokio::io::copy(&mut file, &mut data)
            .await
            .map_err(|e| DestinationError::transient(format!("send {}: {}", filename, e)))?;
        data.shutdown()
            .await
            .map_err(|e| DestinationError::transient(format!("close data connection: {}", e)))?;
        drop(data);
        session.expect(&[226, 250]).await?;

        let _ = session.command("QUIT", &[221]).await;
        info!(
            "✅ Uploaded {} to ftp://{}:{}/{} ({} bytes)",
            filename, target.host, target.port, target.directory, sent
        );
        Ok(())
    }
}

/// Control connection of one FTP session.
struct FtpSession {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl FtpSession {
    async fn connect(host: &str, port: u16) -> Result<Self, DestinationError> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| DestinationError::transient(format!("connect {}:{}: {}", host, port, e)))?;
        let (read, write) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read),
            writer: write,
        })
    }

    async fn login(&mut self, username: &str, password: &str) -> Result<(), DestinationError> {
        let (code, _) = self
            .command(&format!("USER {}", username), &[230, 331])
            .await?;
        if code == 331 {
            self.send(&format!("PASS {}", password)).await?;
            self.expect(&[230, 202]).await?;
        }
        Ok(())
    }

    async fn command(
        &mut self,
        line: &str,
        accepted: &[u16],
    ) -> Result<(u16, String), DestinationError> {
        debug!("ftp > {}", line.split_whitespace().next().unwrap_or_default());
        self.send(line).await?;
        self.expect(accepted).await
    }

    async fn send(&mut self, line: &str) -> Result<(), DestinationError> {
        self.writer
            .write_all(format!("{}\r\n", line).as_bytes())
            .await
            .map_err(|e| DestinationError::transient(format!("ftp write: {}", e)))
    }

    /// Reads one (possibly multi-line) reply and checks its code.
    async fn expect(&mut self, accepted: &[u16]) -> Result<(u16, String), DestinationError> {
        let (code, text) = self.read_reply().await?;
        if accepted.contains(&code) {
            return Ok((code, text));
        }
        let message = format!("ftp server replied {} {}", code, text.trim());
        if (400..500).contains(&code) {
            Err(DestinationError::transient(message))
        } else {
            Err(DestinationError::permanent(message))
        }
    }

    async fn read_reply(&mut self) -> Result<(u16, String), DestinationError> {
        let first = self.read_line().await?;
        let code: u16 = first
            .get(..3)
            .and_then(|c| c.parse().ok())
            .ok_or_else(|| DestinationError::permanent(format!("malformed ftp reply: {}", first)))?;

        let mut text = first.get(4..).unwrap_or_default().to_string();
        if first.as_bytes().get(3) == Some(&b'-') {
            let terminator = format!("{} ", code);
            loop {
                let line = self.read_line().await?;
                text.push('\n');
                text.push_str(&line);
                if line.starts_with(&terminator) {
                    break;
                }
            }
        }
        Ok((code, text))
    }

    async fn read_line(&mut self) -> Result<String, DestinationError> {
        let mut line = String::new();
        let n = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|e| DestinationError::transient(format!("ftp read: {}", e)))?;
        if n == 0 {
            return Err(DestinationError::transient("ftp server closed the connection"));
        }
        Ok(line.trim_end().to_string())
    }
}

/// Extracts the data address from `Entering Passive Mode (h1,h2,h3,h4,p1,p2)`.
fn parse_pasv(text: &str) -> Result<SocketAddr, DestinationError> {
    let malformed = || DestinationError::permanent(format!("malformed PASV reply: {}", text));
    let start = text.find('(').ok_or_else(malformed)?;
    let end = text[start..].find(')').ok_or_else(malformed)? + start;
    let numbers: Vec<u8> = text[start + 1..end]
        .split(',')
        .map(|n| n.trim().parse::<u8>())
        .collect::<Result<_, _>>()
        .map_err(|_| malformed())?;
    if numbers.len() != 6 {
        return Err(malformed());
    }
    let ip = Ipv4Addr::new(numbers[0], numbers[1], numbers[2], numbers[3]);
    let port = u16::from(numbers[4]) * 256 + u16::from(numbers[5]);
    Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    type Stored = Arc<Mutex<Vec<(String, Vec<u8>)>>>;

    /// Minimal FTP server answering STOR with `stor_reply`.
    async fn fake_server(stor_reply: &'static str) -> (u16, Stored, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let stored: Stored = Arc::new(Mutex::new(Vec::new()));
        let commands = Arc::new(Mutex::new(Vec::new()));

        let stored_task = Arc::clone(&stored);
        let commands_task = Arc::clone(&commands);
        tokio::spawn(async move {
            loop {
                let (control, _) = match listener.accept().await {
                    Ok(c) => c,
                    Err(_) => return,
                };
                let (read, mut write) = control.into_split();
                let mut reader = BufReader::new(read);
                write.write_all(b"220-welcome\r\n220 ready\r\n").await.unwrap();
                let mut data_listener: Option<TcpListener> = None;

                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                        break;
                    }
                    let line = line.trim_end().to_string();
                    commands_task.lock().unwrap().push(line.clone());
                    let (verb, arg) = line.split_once(' ').unwrap_or((line.as_str(), ""));
                    match verb {
                        "USER" => write.write_all(b"331 password please\r\n").await.unwrap(),
                        "PASS" => write.write_all(b"230 logged in\r\n").await.unwrap(),
                        "TYPE" => write.write_all(b"200 binary\r\n").await.unwrap(),
                        "CWD" => write.write_all(b"250 ok\r\n").await.unwrap(),
                        "PASV" => {
                            let dl = TcpListener::bind("127.0.0.1:0").await.unwrap();
                            let p = dl.local_addr().unwrap().port();
                            data_listener = Some(dl);
                            let reply = format!(
                                "227 Entering Passive Mode (127,0,0,1,{},{})\r\n",
                                p / 256,
                                p % 256
                            );
                            write.write_all(reply.as_bytes()).await.unwrap();
                        }
                        "STOR" => {
                            write.write_all(stor_reply.as_bytes()).await.unwrap();
                            if !stor_reply.starts_with("150") {
                                continue;
                            }
                            let dl = data_listener.take().unwrap();
                            let (mut data, _) = dl.accept().await.unwrap();
                            let mut bytes = Vec::new();
                            data.read_to_end(&mut bytes).await.unwrap();
                            stored_task.lock().unwrap().push((arg.to_string(), bytes));
                            write.write_all(b"226 transfer complete\r\n").await.unwrap();
                        }
                        "QUIT" => {
                            write.write_all(b"221 bye\r\n").await.unwrap();
                            break;
                        }
                        _ => write.write_all(b"502 not implemented\r\n").await.unwrap(),
                    }
                }
            }
        });

        (port, stored, commands)
    }

    fn artifact(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("backup_weekly.json");
        std::fs::write(&path, b"{\"entities\":[]}").unwrap();
        path
    }

    #[test]
    fn parses_pasv_reply() {
        let addr = parse_pasv("Entering Passive Mode (10,0,0,7,195,80).").unwrap();
        assert_eq!(addr, "10.0.0.7:50000".parse().unwrap());
        assert!(parse_pasv("Entering Passive Mode").is_err());
        assert!(parse_pasv("(1,2,3,4,5)").is_err());
    }

    #[tokio::test]
    async fn stores_artifact_in_directory() {
        let (port, stored, commands) = fake_server("150 go ahead\r\n").await;
        let dir = tempfile::tempdir().unwrap();
        let path = artifact(dir.path());
        let config = json!({
            "host": "127.0.0.1",
            "port": port,
            "username": "backup",
            "password": "pw",
            "directory": "/snapshots"
        });

        FtpAdapter.upload(&path, &config).await.unwrap();

        let stored = stored.lock().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].0, "backup_weekly.json");
        assert_eq!(stored[0].1, b"{\"entities\":[]}");
        assert!(commands.lock().unwrap().contains(&"CWD /snapshots".to_string()));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn refused_store_is_permanent() {
        let (port, stored, _) = fake_server("553 file name not allowed\r\n").await;
        let dir = tempfile::tempdir().unwrap();

        let err = FtpAdapter
            .upload(&artifact(dir.path()), &json!({"host": "127.0.0.1", "port": port}))
            .await
            .unwrap_err();

        assert!(!err.is_transient());
        assert!(stored.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn busy_server_is_transient() {
        let (port, _, _) = fake_server("450 file busy\r\n").await;
        let dir = tempfile::tempdir().unwrap();

        let err = FtpAdapter
            .upload(&artifact(dir.path()), &json!({"host": "127.0.0.1", "port": port}))
            .await
            .unwrap_err();

        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn unreachable_server_is_transient() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let dir = tempfile::tempdir().unwrap();

        let err = FtpAdapter
            .upload(&artifact(dir.path()), &json!({"host": "127.0.0.1", "port": port}))
            .await
            .unwrap_err();

        assert!(err.is_transient());
    }
}

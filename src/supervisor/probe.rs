use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;
use tracing::trace;

/// Health endpoint every extension serves on its socket.
pub const PING_PATH: &str = "/ping";

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionHealth {
    pub socket_path: PathBuf,
    pub reachable: bool,
}

/// Liveness of every known extension, replaced wholesale on each probe cycle.
#[derive(Debug, Default)]
pub struct ExtensionStatus {
    entries: RwLock<HashMap<String, ExtensionHealth>>,
}

impl ExtensionStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace_all(&self, entries: HashMap<String, ExtensionHealth>) {
        let mut current = self.entries.write().unwrap_or_else(|e| e.into_inner());
        *current = entries;
    }

    pub fn get(&self, name: &str) -> Option<ExtensionHealth> {
        let current = self.entries.read().unwrap_or_else(|e| e.into_inner());
        current.get(name).cloned()
    }

    pub fn is_reachable(&self, name: &str) -> bool {
        self.get(name).is_some_and(|h| h.reachable)
    }

    pub fn snapshot(&self) -> HashMap<String, ExtensionHealth> {
        let current = self.entries.read().unwrap_or_else(|e| e.into_inner());
        current.clone()
    }
}

/// HTTP-over-Unix-socket health check with a hard deadline.
#[derive(Debug, Clone, Copy)]
pub struct LivenessProbe {
    timeout: Duration,
}

impl LivenessProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// True only for an HTTP 200 answer to `GET /ping` within the timeout.
    /// Dial errors, timeouts and other statuses are all just "not reachable".
    pub async fn probe(&self, name: &str, socket_path: &Path) -> bool {
        let result = tokio::time::timeout(self.timeout, ping(socket_path)).await;
        let reachable = match result {
            Ok(Ok(status)) => status == 200,
            Ok(Err(e)) => {
                trace!(extension = %name, "Probe failed: {}", e);
                false
            }
            Err(_) => {
                trace!(extension = %name, "Probe timed out after {:?}", self.timeout);
                false
            }
        };
        trace!(extension = %name, reachable = reachable, "Probed {}", socket_path.display());
        reachable
    }

    /// Probes every target concurrently and returns a complete status map.
    pub async fn probe_all(
        &self,
        targets: Vec<(String, PathBuf)>,
    ) -> HashMap<String, ExtensionHealth> {
        let mut set = tokio::task::JoinSet::new();
        for (name, socket_path) in targets {
            let probe = *self;
            set.spawn(async move {
                let reachable = probe.probe(&name, &socket_path).await;
                (
                    name,
                    ExtensionHealth {
                        socket_path,
                        reachable,
                    },
                )
            });
        }

        let mut results = HashMap::new();
        while let Some(joined) = set.join_next().await {
            if let Ok((name, health)) = joined {
                results.insert(name, health);
            }
        }
        results
    }
}

impl Default for LivenessProbe {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

#[cfg(unix)]
async fn ping(socket_path: &Path) -> std::io::Result<u16> {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    let mut stream = tokio::net::UnixStream::connect(socket_path).await?;
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        PING_PATH
    );
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    let mut status_line = String::new();
    BufReader::new(stream).read_line(&mut status_line).await?;
    parse_status_line(&status_line).ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("bad status line: {:?}", status_line.trim_end()),
        )
    })
}

#[cfg(not(unix))]
async fn ping(_socket_path: &Path) -> std::io::Result<u16> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "unix sockets are not available on this platform",
    ))
}

/// Extracts the status code from `HTTP/1.x NNN Reason`.
fn parse_status_line(line: &str) -> Option<u16> {
    let mut parts = line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_line_parsing() {
        assert_eq!(parse_status_line("HTTP/1.1 200 OK\r\n"), Some(200));
        assert_eq!(parse_status_line("HTTP/1.0 503 Service Unavailable"), Some(503));
        assert_eq!(parse_status_line("SSH-2.0-OpenSSH"), None);
        assert_eq!(parse_status_line(""), None);
    }

    #[test]
    fn status_map_is_replaced_not_merged() {
        let status = ExtensionStatus::new();
        let mut first = HashMap::new();
        first.insert(
            "nascore_tv".to_string(),
            ExtensionHealth {
                socket_path: PathBuf::from("/tmp/tv.socket"),
                reachable: true,
            },
        );
        first.insert(
            "gone".to_string(),
            ExtensionHealth {
                socket_path: PathBuf::from("/tmp/gone.socket"),
                reachable: true,
            },
        );
        status.replace_all(first);
        assert!(status.is_reachable("gone"));

        let mut second = HashMap::new();
        second.insert(
            "nascore_tv".to_string(),
            ExtensionHealth {
                socket_path: PathBuf::from("/tmp/tv.socket"),
                reachable: false,
            },
        );
        status.replace_all(second);

        assert!(status.get("gone").is_none());
        assert!(!status.is_reachable("nascore_tv"));
        assert_eq!(status.snapshot().len(), 1);
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use std::time::Instant;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::UnixListener;

        fn serve(listener: UnixListener, response: &'static str) {
            tokio::spawn(async move {
                while let Ok((mut stream, _)) = listener.accept().await {
                    let mut buf = [0u8; 512];
                    let _ = stream.read(&mut buf).await;
                    let _ = stream.write_all(response.as_bytes()).await;
                }
            });
        }

        #[tokio::test]
        async fn no_listener_is_unreachable_quickly() {
            let dir = tempfile::tempdir().unwrap();
            let probe = LivenessProbe::default();
            let started = Instant::now();
            assert!(!probe.probe("tv", &dir.path().join("absent.socket")).await);
            assert!(started.elapsed() < DEFAULT_PROBE_TIMEOUT + Duration::from_millis(500));
        }

        #[tokio::test]
        async fn ok_response_is_reachable() {
            let dir = tempfile::tempdir().unwrap();
            let socket = dir.path().join("tv.socket");
            serve(
                UnixListener::bind(&socket).unwrap(),
                "HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\npong",
            );
            assert!(LivenessProbe::default().probe("tv", &socket).await);
        }

        #[tokio::test]
        async fn error_status_is_unreachable() {
            let dir = tempfile::tempdir().unwrap();
            let socket = dir.path().join("tv.socket");
            serve(
                UnixListener::bind(&socket).unwrap(),
                "HTTP/1.1 503 Service Unavailable\r\n\r\n",
            );
            assert!(!LivenessProbe::default().probe("tv", &socket).await);
        }

        #[tokio::test]
        async fn silent_listener_times_out() {
            let dir = tempfile::tempdir().unwrap();
            let socket = dir.path().join("mute.socket");
            let listener = UnixListener::bind(&socket).unwrap();
            tokio::spawn(async move {
                let mut held = Vec::new();
                while let Ok((stream, _)) = listener.accept().await {
                    held.push(stream);
                }
            });

            let timeout = Duration::from_millis(200);
            let started = Instant::now();
            assert!(!LivenessProbe::new(timeout).probe("mute", &socket).await);
            let elapsed = started.elapsed();
            assert!(elapsed >= timeout);
            assert!(elapsed < timeout + Duration::from_millis(500));
        }

        #[tokio::test]
        async fn probe_all_covers_every_target() {
            let dir = tempfile::tempdir().unwrap();
            let up = dir.path().join("up.socket");
            serve(UnixListener::bind(&up).unwrap(), "HTTP/1.1 200 OK\r\n\r\n");

            let results = LivenessProbe::default()
                .probe_all(vec![
                    ("up".to_string(), up.clone()),
                    ("down".to_string(), dir.path().join("down.socket")),
                ])
                .await;

            assert_eq!(results.len(), 2);
            assert!(results["up"].reachable);
            assert!(!results["down"].reachable);
        }
    }
}

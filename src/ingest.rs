//! Log ingest loop: tails the proxy access log and activates backends
//!
//! The loop keeps a private byte cursor into the access log. Each cycle it
//! stats the file; growth beyond the cursor is read and processed line by
//! line, a shrink means the log was rotated or truncated and resets the
//! cursor to the new size without replaying anything. Only complete lines are
//! consumed: a trailing partial write stays in the file until its newline
//! arrives.

use crate::activity::ActivityStore;
use crate::config::Settings;
use crate::registry::{BackendDescriptor, Registry};
use crate::runtime::ContainerRuntime;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, error, info, warn};

/// Tails the access log and starts backends for the domains it sees
pub struct LogIngest<R, S> {
    log_path: PathBuf,
    registry: Arc<Registry>,
    runtime: Arc<R>,
    store: Arc<S>,
    announce_file: Option<PathBuf>,
    failure_marker: String,
    poll_interval: Duration,
    error_backoff: Duration,
}

impl<R: ContainerRuntime, S: ActivityStore> LogIngest<R, S> {
    pub fn new(
        settings: &Settings,
        registry: Arc<Registry>,
        runtime: Arc<R>,
        store: Arc<S>,
    ) -> Self {
        Self {
            log_path: settings.access_log.clone(),
            registry,
            runtime,
            store,
            announce_file: settings.announce_file.clone(),
            failure_marker: settings.failure_marker.clone(),
            poll_interval: settings.poll_interval(),
            error_backoff: settings.error_backoff(),
        }
    }

    /// Run forever: wait for the log to exist, then poll it for growth
    pub async fn run(self) {
        let mut cursor = self.wait_for_log().await;
        info!(
            path = %self.log_path.display(),
            cursor,
            "tailing access log"
        );

        loop {
            match self.poll_once(&mut cursor).await {
                Ok(()) => tokio::time::sleep(self.poll_interval).await,
                Err(e) => {
                    warn!(error = %e, "log ingest cycle failed, backing off");
                    tokio::time::sleep(self.error_backoff).await;
                }
            }
        }
    }

    /// Poll until the access log exists, returning its current size so
    /// history from before controller start is never replayed
    async fn wait_for_log(&self) -> u64 {
        let mut announced = false;
        loop {
            match tokio::fs::metadata(&self.log_path).await {
                Ok(meta) => return meta.len(),
                Err(_) => {
                    if !announced {
                        info!(
                            path = %self.log_path.display(),
                            "waiting for access log to appear"
                        );
                        announced = true;
                    }
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// One poll cycle: consume whatever complete lines were appended since
    /// the cursor, or reset the cursor if the log shrank beneath it
    pub async fn poll_once(&self, cursor: &mut u64) -> anyhow::Result<()> {
        let size = tokio::fs::metadata(&self.log_path).await?.len();

        if size < *cursor {
            // Rotated or truncated; resume from the new end, no backlog replay
            warn!(
                old_cursor = *cursor,
                new_size = size,
                "access log shrank, resetting cursor"
            );
            *cursor = size;
            return Ok(());
        }
        if size == *cursor {
            return Ok(());
        }

        let mut file = tokio::fs::File::open(&self.log_path).await?;
        file.seek(SeekFrom::Start(*cursor)).await?;

        let mut buf = Vec::with_capacity((size - *cursor) as usize);
        file.take(size - *cursor).read_to_end(&mut buf).await?;

        // Consume only up to the last newline; a partial tail waits for the
        // rest of its write
        let Some(newline_at) = buf.iter().rposition(|&b| b == b'\n') else {
            return Ok(());
        };

        let chunk = String::from_utf8_lossy(&buf[..=newline_at]);
        for line in chunk.lines() {
            self.handle_line(line).await;
        }

        *cursor += newline_at as u64 + 1;
        Ok(())
    }

    async fn handle_line(&self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        let Some(domain) = extract_domain(line) else {
            warn!(line, "could not extract domain from log line");
            return;
        };

        let Some(backend) = self.registry.resolve(domain) else {
            info!(domain, "request for unconfigured domain");
            return;
        };

        if self.activate(domain, &backend).await {
            if let Err(e) = self.store.touch(&backend.container) {
                warn!(container = %backend.container, error = %e, "could not record activity");
            }
        }

        // A proxy-reported upstream failure usually means the request raced
        // the container coming up; fire one more start to self-heal
        if line.contains(&self.failure_marker) {
            warn!(
                domain,
                container = %backend.container,
                "upstream failure reported, retrying activation"
            );
            self.activate(domain, &backend).await;
        }
    }

    /// Ensure the backend's container is running. Returns whether it is.
    async fn activate(&self, domain: &str, backend: &BackendDescriptor) -> bool {
        self.announce(domain).await;

        match self.runtime.exists(&backend.container).await {
            Ok(true) => {}
            Ok(false) => {
                error!(
                    domain,
                    container = %backend.container,
                    "configured container does not exist"
                );
                return false;
            }
            Err(e) => {
                warn!(
                    domain,
                    container = %backend.container,
                    error = %e,
                    "could not query container"
                );
                return false;
            }
        }

        match self.runtime.start(&backend.container).await {
            Ok(()) => {
                debug!(domain, container = %backend.container, "backend active");
                true
            }
            Err(e) => {
                error!(
                    domain,
                    container = %backend.container,
                    error = %e,
                    "failed to start container"
                );
                false
            }
        }
    }

    /// Publish the domain being activated for the proxy's loading page.
    /// Best effort; a failed write never blocks activation.
    async fn announce(&self, domain: &str) {
        let Some(ref path) = self.announce_file else {
            return;
        };
        if let Err(e) = tokio::fs::write(path, domain).await {
            warn!(
                path = %path.display(),
                error = %e,
                "could not write currently-activating domain"
            );
        }
    }
}

/// The domain is the last double-quoted field of the line
fn extract_domain(line: &str) -> Option<&str> {
    let rest = line.trim_end().strip_suffix('"')?;
    let start = rest.rfind('"')?;
    let domain = &rest[start + 1..];
    if domain.is_empty() {
        None
    } else {
        Some(domain)
    }
}

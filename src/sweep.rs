//! Inactivity sweep loop: stops containers that have gone quiet
//!
//! Each sweep enumerates every configured backend and checks the running ones
//! against the inactivity timeout. A running container with no activity record
//! gets seeded with one first, so a backend discovered mid-flight is never
//! stopped on the cycle that found it. A failed stop leaves the container for
//! the next sweep; the cadence itself is the retry mechanism.

use crate::activity::ActivityStore;
use crate::config::Settings;
use crate::registry::Registry;
use crate::runtime::ContainerRuntime;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};

/// Periodically stops backends whose last recorded traffic is too old
pub struct InactivitySweep<R, S> {
    registry: Arc<Registry>,
    runtime: Arc<R>,
    store: Arc<S>,
    timeout: Duration,
    interval: Duration,
}

impl<R: ContainerRuntime, S: ActivityStore> InactivitySweep<R, S> {
    pub fn new(
        settings: &Settings,
        registry: Arc<Registry>,
        runtime: Arc<R>,
        store: Arc<S>,
    ) -> Self {
        Self {
            registry,
            runtime,
            store,
            timeout: settings.timeout(),
            interval: settings.sweep_interval(),
        }
    }

    /// Run forever on the configured cadence
    pub async fn run(self) {
        info!(
            timeout_secs = self.timeout.as_secs(),
            interval_secs = self.interval.as_secs(),
            "inactivity sweep running"
        );

        loop {
            self.sweep_once(SystemTime::now()).await;
            tokio::time::sleep(self.interval).await;
        }
    }

    /// Evaluate every configured backend against `now`
    pub async fn sweep_once(&self, now: SystemTime) {
        for backend in self.registry.list_all() {
            let container = &backend.container;

            match self.runtime.is_running(container).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(container, error = %e, "could not query running state");
                    continue;
                }
            }

            let last_seen = match self.store.last_seen(container) {
                Ok(last_seen) => last_seen,
                Err(e) => {
                    warn!(container, error = %e, "could not read activity record");
                    continue;
                }
            };

            let Some(last_seen) = last_seen else {
                // Found running with no record: seed one instead of treating
                // it as infinitely idle
                info!(container, "no activity record, seeding one");
                if let Err(e) = self.store.touch(container) {
                    warn!(container, error = %e, "could not seed activity record");
                }
                continue;
            };

            let idle = now.duration_since(last_seen).unwrap_or(Duration::ZERO);
            if idle >= self.timeout {
                info!(
                    container,
                    idle_mins = idle.as_secs() / 60,
                    timeout_mins = self.timeout.as_secs() / 60,
                    "stopping container after inactivity"
                );
                if let Err(e) = self.runtime.stop(container).await {
                    // Left running; the next sweep retries
                    error!(container, error = %e, "failed to stop container");
                }
            } else if idle * 2 >= self.timeout {
                debug!(
                    container,
                    idle_secs = idle.as_secs(),
                    "approaching inactivity timeout"
                );
            }
        }
    }
}

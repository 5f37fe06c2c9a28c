//! Runtime control: the four container operations the controller needs
//!
//! The surface is deliberately thin: query existence, query running state,
//! start, stop. Every call is synchronous from the caller's perspective and
//! individually fallible; a failure is reported to the caller for logging and
//! implicitly retried on the next natural loop cycle, never escalated.

use bollard::container::{ListContainersOptions, StartContainerOptions, StopContainerOptions};
use bollard::errors::Error as DockerError;
use bollard::Docker;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

/// Seconds Docker is given to stop a container before killing it
const STOP_TIMEOUT_SECS: i64 = 10;

/// Failure from the runtime-control surface
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The named container is not known to the runtime at all
    #[error("container '{0}' does not exist")]
    NotFound(String),

    /// The runtime could not be queried
    #[error("container runtime query failed: {0}")]
    Api(#[from] DockerError),

    /// A start or stop was attempted and refused
    #[error("container '{name}': {reason}")]
    Failed { name: String, reason: String },
}

/// Container operations the two loops depend on.
///
/// `start` on an already-running container and `stop` on an already-stopped
/// one are successes without side effects; both loops rely on that.
#[allow(async_fn_in_trait)]
pub trait ContainerRuntime {
    /// Whether a container with exactly this name exists, running or not
    async fn exists(&self, name: &str) -> Result<bool, RuntimeError>;

    /// Whether the container is currently running
    async fn is_running(&self, name: &str) -> Result<bool, RuntimeError>;

    /// Start the container; a no-op success if it is already running
    async fn start(&self, name: &str) -> Result<(), RuntimeError>;

    /// Stop the container; a no-op success if already stopped or gone
    async fn stop(&self, name: &str) -> Result<(), RuntimeError>;
}

/// Docker-backed implementation, addressing containers by exact name
pub struct DockerRuntime {
    client: Docker,
}

impl DockerRuntime {
    /// Connect to the Docker daemon.
    ///
    /// Connection priority: explicit `docker_host` parameter, then the
    /// `DOCKER_HOST` environment variable, then the platform socket defaults.
    pub fn connect(docker_host: Option<&str>) -> anyhow::Result<Self> {
        let client = if let Some(host) = docker_host {
            Self::connect_to_host(host)?
        } else if let Ok(host) = std::env::var("DOCKER_HOST") {
            Self::connect_to_host(&host).map_err(|e| {
                anyhow::anyhow!("cannot connect via DOCKER_HOST='{}': {}", host, e)
            })?
        } else {
            Docker::connect_with_socket_defaults().map_err(|e| {
                anyhow::anyhow!(
                    "cannot connect to the Docker daemon: {}. \
                     Start dockerd or set DOCKER_HOST.",
                    e
                )
            })?
        };

        Ok(Self { client })
    }

    fn connect_to_host(host: &str) -> anyhow::Result<Docker> {
        if host.starts_with("unix://") {
            let socket_path = host.trim_start_matches("unix://");
            Docker::connect_with_socket(socket_path, 120, bollard::API_DEFAULT_VERSION)
                .map_err(|e| anyhow::anyhow!("cannot connect to socket '{}': {}", socket_path, e))
        } else if host.starts_with("tcp://") || host.starts_with("http://") {
            Docker::connect_with_http(host, 120, bollard::API_DEFAULT_VERSION)
                .map_err(|e| anyhow::anyhow!("cannot connect to endpoint '{}': {}", host, e))
        } else {
            anyhow::bail!(
                "invalid docker host '{}': expected 'unix:///path/to/socket' or 'tcp://host:port'",
                host
            )
        }
    }

    /// Check the daemon is responding; callers decide whether that is fatal
    pub async fn ping(&self) -> Result<(), RuntimeError> {
        self.client.ping().await?;
        Ok(())
    }

    async fn list_by_name(&self, name: &str, all: bool) -> Result<bool, RuntimeError> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![format!("^{}$", name)]);

        let options = ListContainersOptions {
            all,
            filters,
            ..Default::default()
        };

        let containers = self.client.list_containers(Some(options)).await?;
        // The name filter matches substrings, so verify exactly
        Ok(containers
            .iter()
            .filter_map(|c| c.names.as_ref())
            .any(|names| matches_exact(names, name)))
    }
}

/// Docker reports names with a leading slash
fn matches_exact(names: &[String], name: &str) -> bool {
    names.iter().any(|n| n.trim_start_matches('/') == name)
}

impl ContainerRuntime for DockerRuntime {
    async fn exists(&self, name: &str) -> Result<bool, RuntimeError> {
        self.list_by_name(name, true).await
    }

    async fn is_running(&self, name: &str) -> Result<bool, RuntimeError> {
        match self.client.inspect_container(name, None).await {
            Ok(info) => Ok(info.state.and_then(|s| s.running).unwrap_or(false)),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn start(&self, name: &str) -> Result<(), RuntimeError> {
        match self
            .client
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(_) => {
                debug!(container = name, "started container");
                Ok(())
            }
            Err(DockerError::DockerResponseServerError {
                status_code: 304, ..
            }) => {
                // Already running
                debug!(container = name, "container already running");
                Ok(())
            }
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Err(RuntimeError::NotFound(name.to_string())),
            Err(e) => Err(RuntimeError::Failed {
                name: name.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn stop(&self, name: &str) -> Result<(), RuntimeError> {
        let options = StopContainerOptions {
            t: STOP_TIMEOUT_SECS,
        };

        match self.client.stop_container(name, Some(options)).await {
            Ok(_) => {
                debug!(container = name, "stopped container");
                Ok(())
            }
            Err(DockerError::DockerResponseServerError {
                status_code: 304, ..
            }) => {
                // Already stopped
                debug!(container = name, "container was already stopped");
                Ok(())
            }
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!(container = name, "container not found");
                Ok(())
            }
            Err(e) => Err(RuntimeError::Failed {
                name: name.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! Scriptable in-memory runtime for loop tests

    use super::{ContainerRuntime, RuntimeError};
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct State {
        /// container name -> running
        containers: HashMap<String, bool>,
        start_calls: Vec<String>,
        stop_calls: Vec<String>,
        start_failures_remaining: usize,
        stop_failures_remaining: usize,
    }

    #[derive(Default)]
    pub struct FakeRuntime {
        state: Mutex<State>,
    }

    impl FakeRuntime {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_container(self, name: &str, running: bool) -> Self {
            self.state
                .lock()
                .containers
                .insert(name.to_string(), running);
            self
        }

        /// Make the next `n` start calls fail (attempts are still recorded)
        pub fn fail_next_starts(&self, n: usize) {
            self.state.lock().start_failures_remaining = n;
        }

        /// Make the next `n` stop calls fail
        pub fn fail_next_stops(&self, n: usize) {
            self.state.lock().stop_failures_remaining = n;
        }

        pub fn start_calls(&self) -> Vec<String> {
            self.state.lock().start_calls.clone()
        }

        pub fn stop_calls(&self) -> Vec<String> {
            self.state.lock().stop_calls.clone()
        }

        pub fn is_up(&self, name: &str) -> bool {
            self.state.lock().containers.get(name).copied().unwrap_or(false)
        }
    }

    impl ContainerRuntime for FakeRuntime {
        async fn exists(&self, name: &str) -> Result<bool, RuntimeError> {
            Ok(self.state.lock().containers.contains_key(name))
        }

        async fn is_running(&self, name: &str) -> Result<bool, RuntimeError> {
            Ok(self.is_up(name))
        }

        async fn start(&self, name: &str) -> Result<(), RuntimeError> {
            let mut state = self.state.lock();
            state.start_calls.push(name.to_string());
            if state.start_failures_remaining > 0 {
                state.start_failures_remaining -= 1;
                return Err(RuntimeError::Failed {
                    name: name.to_string(),
                    reason: "injected start failure".to_string(),
                });
            }
            if !state.containers.contains_key(name) {
                return Err(RuntimeError::NotFound(name.to_string()));
            }
            state.containers.insert(name.to_string(), true);
            Ok(())
        }

        async fn stop(&self, name: &str) -> Result<(), RuntimeError> {
            let mut state = self.state.lock();
            state.stop_calls.push(name.to_string());
            if state.stop_failures_remaining > 0 {
                state.stop_failures_remaining -= 1;
                return Err(RuntimeError::Failed {
                    name: name.to_string(),
                    reason: "injected stop failure".to_string(),
                });
            }
            state.containers.insert(name.to_string(), false);
            Ok(())
        }
    }
}

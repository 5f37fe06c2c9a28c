//! End-to-end lifecycle: traffic activates a backend, silence retires it

use idlewake::activity::{ActivityStore, MemoryActivityStore};
use idlewake::config::Settings;
use idlewake::ingest::LogIngest;
use idlewake::registry::{FileSource, Registry};
use idlewake::runtime::{ContainerRuntime, RuntimeError};
use idlewake::sweep::InactivitySweep;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Minimal scripted runtime: a map of container name to running state
#[derive(Default)]
struct ScriptedRuntime {
    containers: Mutex<HashMap<String, bool>>,
}

impl ScriptedRuntime {
    fn with_container(self, name: &str, running: bool) -> Self {
        self.containers.lock().insert(name.to_string(), running);
        self
    }

    fn is_up(&self, name: &str) -> bool {
        self.containers.lock().get(name).copied().unwrap_or(false)
    }
}

impl ContainerRuntime for ScriptedRuntime {
    async fn exists(&self, name: &str) -> Result<bool, RuntimeError> {
        Ok(self.containers.lock().contains_key(name))
    }

    async fn is_running(&self, name: &str) -> Result<bool, RuntimeError> {
        Ok(self.is_up(name))
    }

    async fn start(&self, name: &str) -> Result<(), RuntimeError> {
        let mut containers = self.containers.lock();
        if !containers.contains_key(name) {
            return Err(RuntimeError::NotFound(name.to_string()));
        }
        containers.insert(name.to_string(), true);
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<(), RuntimeError> {
        self.containers.lock().insert(name.to_string(), false);
        Ok(())
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    log_path: PathBuf,
    runtime: Arc<ScriptedRuntime>,
    store: Arc<MemoryActivityStore>,
    ingest: LogIngest<ScriptedRuntime, MemoryActivityStore>,
    sweep: InactivitySweep<ScriptedRuntime, MemoryActivityStore>,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");

    let registry_path = dir.path().join("services.toml");
    std::fs::write(
        &registry_path,
        "[\"a.example\"]\ncontainer = \"svc-a\"\nport = 3000\n",
    )
    .expect("write registry");

    let log_path = dir.path().join("access.log");
    std::fs::File::create(&log_path).expect("create access log");

    let settings = Settings {
        access_log: log_path.clone(),
        registry_file: registry_path,
        announce_file: Some(dir.path().join("current_domain.txt")),
        ..Settings::default()
    };

    let registry = Arc::new(Registry::new(vec![Box::new(FileSource::new(
        &settings.registry_file,
    ))]));
    let runtime = Arc::new(ScriptedRuntime::default().with_container("svc-a", false));
    let store = Arc::new(MemoryActivityStore::new());

    let ingest = LogIngest::new(
        &settings,
        Arc::clone(&registry),
        Arc::clone(&runtime),
        Arc::clone(&store),
    );
    let sweep = InactivitySweep::new(
        &settings,
        registry,
        Arc::clone(&runtime),
        Arc::clone(&store),
    );

    Harness {
        _dir: dir,
        log_path,
        runtime,
        store,
        ingest,
        sweep,
    }
}

fn append_request(path: &PathBuf, domain: &str) {
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(path)
        .expect("open access log");
    writeln!(
        file,
        "192.0.2.7 - - [26/Aug/2026:10:00:00 +0000] \"GET / HTTP/1.1\" 200 512 \"-\" \"curl/8.0\" \"{}\"",
        domain
    )
    .expect("append request line");
}

#[tokio::test]
async fn test_traffic_activates_then_inactivity_retires() {
    let h = harness();
    let mut cursor = 0;

    assert!(!h.runtime.is_up("svc-a"));

    // Traffic for the configured domain arrives
    append_request(&h.log_path, "a.example");
    h.ingest.poll_once(&mut cursor).await.unwrap();

    // The container came up and its activity was recorded
    assert!(h.runtime.is_up("svc-a"));
    let seen = h.store.last_seen("svc-a").unwrap().expect("activity record");

    // The configured timeout elapses with no further traffic
    let later = seen + Duration::from_secs(10 * 60);
    h.sweep.sweep_once(later).await;

    assert!(!h.runtime.is_up("svc-a"));
}

#[tokio::test]
async fn test_reactivation_after_retirement() {
    let h = harness();
    let mut cursor = 0;

    append_request(&h.log_path, "a.example");
    h.ingest.poll_once(&mut cursor).await.unwrap();
    assert!(h.runtime.is_up("svc-a"));

    h.store
        .set_last_seen("svc-a", SystemTime::now() - Duration::from_secs(60 * 60));
    h.sweep.sweep_once(SystemTime::now()).await;
    assert!(!h.runtime.is_up("svc-a"));

    // Fresh traffic brings the backend straight back
    append_request(&h.log_path, "a.example");
    h.ingest.poll_once(&mut cursor).await.unwrap();
    assert!(h.runtime.is_up("svc-a"));
    let seen = h.store.last_seen("svc-a").unwrap().expect("touched again");
    assert!(seen > SystemTime::now() - Duration::from_secs(60));
}

#[tokio::test]
async fn test_sweep_keeps_active_backend_running() {
    let h = harness();
    let mut cursor = 0;

    append_request(&h.log_path, "a.example");
    h.ingest.poll_once(&mut cursor).await.unwrap();

    // A sweep shortly after traffic leaves the backend alone
    h.sweep
        .sweep_once(SystemTime::now() + Duration::from_secs(60))
        .await;
    assert!(h.runtime.is_up("svc-a"));
}

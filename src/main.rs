use idlewake::activity::FileActivityStore;
use idlewake::config::{Settings, REGISTRY_ENV_PREFIX};
use idlewake::ingest::LogIngest;
use idlewake::registry::Registry;
use idlewake::runtime::DockerRuntime;
use idlewake::sweep::InactivitySweep;
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env();

    // Verbosity affects log level only, never behavior
    let default_directive = if settings.verbose {
        "idlewake=info"
    } else {
        "idlewake=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(default_directive.parse().expect("valid log directive")),
        )
        .init();

    print_startup_banner(&settings);

    // Without somewhere to keep activity markers no useful work is possible
    let store = Arc::new(FileActivityStore::new(&settings.marker_dir));
    store.ensure_dir().map_err(|e| {
        error!(dir = %settings.marker_dir.display(), error = %e, "cannot prepare marker directory");
        e
    })?;

    let registry = Arc::new(Registry::from_settings(&settings));
    let backends = registry.list_all();
    if backends.is_empty() {
        error!(
            registry_file = %settings.registry_file.display(),
            env_prefix = REGISTRY_ENV_PREFIX,
            "no backends configured in any registry source"
        );
        anyhow::bail!("no backends configured");
    }
    for backend in &backends {
        info!(
            domain = %backend.domain,
            container = %backend.container,
            port = backend.port,
            "configured backend"
        );
    }

    let runtime = Arc::new(DockerRuntime::connect(None)?);
    // A quiet daemon is not fatal: start/stop calls are retried on every
    // natural trigger once it comes back
    if let Err(e) = runtime.ping().await {
        warn!(error = %e, "container runtime is not responding yet");
    }

    let ingest = LogIngest::new(
        &settings,
        Arc::clone(&registry),
        Arc::clone(&runtime),
        Arc::clone(&store),
    );
    let sweep = InactivitySweep::new(&settings, registry, runtime, store);

    tokio::spawn(ingest.run());
    tokio::spawn(sweep.run());

    // Both loops run for process lifetime; all state is external, so shutdown
    // is just a log line
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        info!("Received Ctrl+C, shutting down...");
    }

    info!("Shutdown complete");
    Ok(())
}

fn print_startup_banner(settings: &Settings) {
    info!(
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        "Starting lifecycle controller"
    );
    info!(
        timeout_minutes = settings.timeout_minutes,
        sweep_interval_secs = settings.sweep_interval_secs,
        poll_interval_ms = settings.poll_interval_ms,
        verbose = settings.verbose,
        "Lifecycle settings"
    );
    info!(
        access_log = %settings.access_log.display(),
        marker_dir = %settings.marker_dir.display(),
        registry_file = %settings.registry_file.display(),
        announce_file = settings.announce_file.as_ref().map(|p| p.display().to_string()),
        "Paths"
    );
}

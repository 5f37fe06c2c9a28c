//! Backend registry: resolves a domain name to its container mapping
//!
//! Entries are merged from two sources: per-domain overrides captured from the
//! environment once at startup, and a TOML file that is re-read on every lookup
//! so edits take effect without a restart. For a given domain, fields from the
//! file win over fields from the environment; domains present in only one
//! source pass through unchanged.

use crate::config::Settings;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use toml::value::{Table, Value};
use tracing::warn;

/// One configured backend, as seen by both loops
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BackendDescriptor {
    /// Domain the proxy routes to this backend (filled in after merge)
    #[serde(skip)]
    pub domain: String,

    /// Container name the runtime knows this backend by
    pub container: String,

    /// Port the backend listens on (accepts a bare integer or a string)
    #[serde(default = "default_port", deserialize_with = "port_from_string_or_int")]
    pub port: u16,

    /// Upstream protocol, if the proxy needs one ("http", "https", ...)
    #[serde(default)]
    pub protocol: Option<String>,

    /// Any further fields pass through untouched
    #[serde(flatten)]
    pub extra: Table,
}

fn default_port() -> u16 {
    80
}

fn port_from_string_or_int<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Int(u16),
        Str(String),
    }

    match Port::deserialize(deserializer)? {
        Port::Int(port) => Ok(port),
        Port::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

impl BackendDescriptor {
    fn from_fields(domain: &str, fields: Table) -> Result<Self, toml::de::Error> {
        let mut descriptor: BackendDescriptor = Value::Table(fields).try_into()?;
        descriptor.domain = domain.to_string();
        Ok(descriptor)
    }
}

/// One provider of raw registry entries, keyed by domain
pub trait EntrySource: Send + Sync {
    /// Short name for log output
    fn label(&self) -> &str;

    /// Produce the current entries; failures degrade the lookup, never abort it
    fn load(&self) -> anyhow::Result<BTreeMap<String, Table>>;
}

/// Overrides captured from `IDLEWAKE__<domain>__<field>` environment variables.
///
/// Loaded once at construction and cached for the life of the process. Segments
/// are separated by `__`; the last segment is the field name (lowercased) and
/// the preceding segments, joined with `.`, form the domain:
/// `IDLEWAKE__app__example__container=web` maps `app.example` to container `web`.
pub struct EnvSource {
    entries: BTreeMap<String, Table>,
}

impl EnvSource {
    pub fn from_env(prefix: &str) -> Self {
        Self::from_vars(prefix, std::env::vars())
    }

    pub fn from_vars(prefix: &str, vars: impl Iterator<Item = (String, String)>) -> Self {
        let mut entries: BTreeMap<String, Table> = BTreeMap::new();

        for (key, value) in vars {
            let Some(rest) = key.strip_prefix(prefix) else {
                continue;
            };
            let parts: Vec<&str> = rest.split("__").collect();
            let Some((field, domain_parts)) = parts.split_last() else {
                continue;
            };
            if domain_parts.is_empty() || field.is_empty() || domain_parts.iter().any(|p| p.is_empty()) {
                warn!(key, "ignoring malformed registry override");
                continue;
            }

            let domain = domain_parts.join(".");
            entries
                .entry(domain)
                .or_default()
                .insert(field.to_lowercase(), Value::String(value));
        }

        Self { entries }
    }
}

impl EntrySource for EnvSource {
    fn label(&self) -> &str {
        "environment"
    }

    fn load(&self) -> anyhow::Result<BTreeMap<String, Table>> {
        Ok(self.entries.clone())
    }
}

/// TOML file source, re-read on every load so edits apply without a restart
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl EntrySource for FileSource {
    fn label(&self) -> &str {
        "file"
    }

    fn load(&self) -> anyhow::Result<BTreeMap<String, Table>> {
        let text = std::fs::read_to_string(&self.path)
            .map_err(|e| anyhow::anyhow!("cannot read {}: {}", self.path.display(), e))?;
        toml::from_str(&text)
            .map_err(|e| anyhow::anyhow!("cannot parse {}: {}", self.path.display(), e))
    }
}

/// Domain lookup over an ordered list of sources; later sources win field conflicts
pub struct Registry {
    sources: Vec<Box<dyn EntrySource>>,
}

impl Registry {
    pub fn new(sources: Vec<Box<dyn EntrySource>>) -> Self {
        Self { sources }
    }

    /// The standard pair: cached environment overrides, then the registry file
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(vec![
            Box::new(EnvSource::from_env(crate::config::REGISTRY_ENV_PREFIX)),
            Box::new(FileSource::new(&settings.registry_file)),
        ])
    }

    /// Look up one domain in the merged view
    pub fn resolve(&self, domain: &str) -> Option<BackendDescriptor> {
        let fields = self.merged().remove(domain)?;
        to_descriptor(domain, fields)
    }

    /// Every configured backend, for the sweep to enumerate
    pub fn list_all(&self) -> Vec<BackendDescriptor> {
        self.merged()
            .into_iter()
            .filter_map(|(domain, fields)| to_descriptor(&domain, fields))
            .collect()
    }

    fn merged(&self) -> BTreeMap<String, Table> {
        let mut merged: BTreeMap<String, Table> = BTreeMap::new();

        for source in &self.sources {
            match source.load() {
                Ok(entries) => {
                    for (domain, fields) in entries {
                        let entry = merged.entry(domain).or_default();
                        for (key, value) in fields {
                            entry.insert(key, value);
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        source = source.label(),
                        error = %e,
                        "registry source unavailable, continuing without it"
                    );
                }
            }
        }

        merged
    }
}

fn to_descriptor(domain: &str, fields: Table) -> Option<BackendDescriptor> {
    match BackendDescriptor::from_fields(domain, fields) {
        Ok(descriptor) => Some(descriptor),
        Err(e) => {
            warn!(domain, error = %e, "skipping backend with invalid entry");
            None
        }
    }
}

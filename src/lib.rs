//! Idlewake - on-demand container lifecycle control behind a reverse proxy
//!
//! This library drives a pair of cooperating loops:
//! - Tails the proxy's access log and starts the container mapped to each
//!   requested domain, recording the traffic as activity
//! - Periodically sweeps all configured backends and stops containers that
//!   have been inactive past a configurable timeout
//!
//! Backends are resolved through a registry merged from environment overrides
//! and a re-read-per-lookup TOML file; activity survives restarts as marker
//! files whose mtime is the record; the container runtime is reached through
//! the Docker API.

pub mod activity;
pub mod config;
pub mod ingest;
pub mod registry;
pub mod runtime;
pub mod sweep;

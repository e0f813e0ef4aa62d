//! # OCMT Runtime
//!
//! Where the control plane is assembled. Nothing here lives in a module
//! cache: one [`Services`] value owns every subsystem, handlers borrow it,
//! and the background sweepers are explicit workers that stop when the
//! shared shutdown signal flips.

#![forbid(unsafe_code)]

pub mod config;
pub mod services;
pub mod sync;
pub mod workers;

pub use config::{MailerConfig, RuntimeConfig};
pub use services::{BackingStores, InMemoryDirectory, Services};
pub use sync::{CredentialSync, SyncCoordinator};
pub use workers::{HealthProbe, HealthRegistry, WorkerSet};

/// Install the process-wide tracing subscriber, honoring `RUST_LOG`.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

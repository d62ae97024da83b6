//! Node-side implementations of the runtime collaborators: filesystem
//! registry and installer, hook discovery and execution, the helm release
//! service, schedules, file-backed status, the desired-state driver and the
//! debug HTTP server.

pub mod cluster;
pub mod config;
pub mod daemon;
pub mod driver;
pub mod error;
pub mod hook_exec;
pub mod hook_loader;
pub mod http;
pub mod installer;
pub mod registry;
pub mod release;
pub mod schedule;
pub mod status_store;
pub mod watcher;

pub use config::{ClusterConfig, HostConfig};
pub use daemon::Daemon;
pub use error::HostError;

//! Package runtime core.
//!
//! Drives applications and modules from desired state to a running release:
//! per-package FIFO task queues, a lifecycle store of cancellable contexts,
//! a dependency-aware scheduler, hook execution and a status pipeline that
//! maps fine-grained internal conditions to the public ones. Everything that
//! touches the node or the cluster sits behind a trait.

pub mod cluster;
pub mod condmap;
pub mod config;
pub mod error;
pub mod events;
pub mod installer;
pub mod lifecycle;
pub mod package;
pub mod queue;
pub mod release;
pub mod runtime;
pub mod scheduler;
pub mod status;
pub mod tasks;

pub mod testing;

pub use cluster::ClusterInfo;
pub use condmap::Mapper;
pub use config::RuntimeConfig;
pub use error::ConditionError;
pub use installer::{Bundle, Installer};
pub use package::hooks::{HookExecutor, HookLoader};
pub use package::kube::{ScheduleManager, WatcherManager};
pub use package::{Package, PackageKind};
pub use queue::{BackoffPolicy, QueueService};
pub use release::{ReleaseError, ReleaseService};
pub use runtime::{Collaborators, RenderError, Runtime};
pub use scheduler::Scheduler;
pub use status::{PublishedStatus, StatusService, StatusStore};

//! Helm-equivalent release management seam.

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::package::Package;

#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("package is not a helm package")]
    NotHelm,
    #[error("helm {op} failed: {message}")]
    Helm { op: &'static str, message: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Renders, installs and deletes the release of a package, and owns the
/// drift monitor of every release.
///
/// Monitors are keyed by package id.
#[async_trait]
pub trait ReleaseService: Send + Sync {
    async fn upgrade(
        &self,
        ctx: &CancellationToken,
        namespace: &str,
        package: &Package,
    ) -> Result<(), ReleaseError>;

    async fn delete(
        &self,
        ctx: &CancellationToken,
        namespace: &str,
        release: &str,
    ) -> Result<(), ReleaseError>;

    async fn render(&self, namespace: &str, package: &Package) -> Result<String, ReleaseError>;

    fn remove_monitor(&self, id: &str);

    fn has_monitor(&self, id: &str) -> bool;

    fn pause_monitor(&self, id: &str);

    fn resume_monitor(&self, id: &str);
}

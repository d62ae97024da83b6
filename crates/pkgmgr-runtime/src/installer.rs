use std::path::Path;

use async_trait::async_trait;
use pkgmgr_types::Repository;
use tokio_util::sync::CancellationToken;

/// One bundle version of one package instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    /// Package identifier; names the on-disk directories.
    pub id: String,
    /// Image name inside the repository.
    pub name: String,
    pub version: String,
}

/// Fetches bundles and materializes them on the node.
///
/// Layout: `<downloaded>/<id>/<version>/` holds an extracted bundle and
/// `<deployed>/<id>` refers to the active one.
#[async_trait]
pub trait Installer: Send + Sync {
    async fn download(
        &self,
        ctx: &CancellationToken,
        repo: &Repository,
        downloaded: &Path,
        bundle: &Bundle,
    ) -> anyhow::Result<()>;

    /// Switch `<deployed>/<id>` to the downloaded version atomically.
    async fn install(
        &self,
        ctx: &CancellationToken,
        downloaded: &Path,
        deployed: &Path,
        bundle: &Bundle,
    ) -> anyhow::Result<()>;

    /// Remove the deployment; with `keep` the downloaded images stay.
    async fn uninstall(
        &self,
        ctx: &CancellationToken,
        downloaded: &Path,
        deployed: &Path,
        id: &str,
        keep: bool,
    ) -> anyhow::Result<()>;
}

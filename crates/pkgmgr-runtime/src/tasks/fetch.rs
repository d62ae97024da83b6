use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use pkgmgr_types::Repository;
use pkgmgr_types::condition::{internal, reason};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::fail;
use crate::installer::{Bundle, Installer};
use crate::queue::Task;
use crate::status::StatusService;

/// Fetch a bundle version into `<downloaded>/<id>/<version>/`.
pub struct Download {
    pub bundle: Bundle,
    pub repository: Repository,
    pub downloaded: PathBuf,
    pub installer: Arc<dyn Installer>,
    pub status: Arc<StatusService>,
}

#[async_trait]
impl Task for Download {
    fn name(&self) -> String {
        format!("Download({}@{})", self.bundle.id, self.bundle.version)
    }

    async fn execute(&self, ctx: &CancellationToken) -> anyhow::Result<()> {
        debug!(package = %self.bundle.id, version = %self.bundle.version, "downloading bundle");
        self.installer
            .download(ctx, &self.repository, &self.downloaded, &self.bundle)
            .await
            .map_err(|e| fail(ctx, internal::DOWNLOADED, reason::DOWNLOAD_FAILED, e))?;
        self.status
            .set_condition_true(&self.bundle.id, internal::DOWNLOADED);
        Ok(())
    }
}

/// Point `<deployed>/<id>` at the downloaded version.
pub struct Install {
    pub bundle: Bundle,
    pub downloaded: PathBuf,
    pub deployed: PathBuf,
    pub installer: Arc<dyn Installer>,
    pub status: Arc<StatusService>,
}

#[async_trait]
impl Task for Install {
    fn name(&self) -> String {
        format!("Install({}@{})", self.bundle.id, self.bundle.version)
    }

    async fn execute(&self, ctx: &CancellationToken) -> anyhow::Result<()> {
        debug!(package = %self.bundle.id, version = %self.bundle.version, "installing bundle");
        self.installer
            .install(ctx, &self.downloaded, &self.deployed, &self.bundle)
            .await
            .map_err(|e| fail(ctx, internal::READY_ON_FILESYSTEM, reason::INSTALL_FAILED, e))?;
        self.status
            .set_condition_true(&self.bundle.id, internal::READY_ON_FILESYSTEM);
        Ok(())
    }
}

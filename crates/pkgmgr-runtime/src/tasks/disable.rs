use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use pkgmgr_types::BindingKind;
use pkgmgr_types::condition::{internal, reason};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{fail, hook_queue, sync_queue};
use crate::installer::Installer;
use crate::package::Package;
use crate::queue::{QueueService, Task};
use crate::release::{ReleaseError, ReleaseService};
use crate::status::StatusService;

/// Stop a package. With `keep` the release stays installed; otherwise it is
/// deleted and the AfterDeleteHelm hooks run.
///
/// Hook and sync queues are removed here. The main package queue runs this
/// task, so it is removed by the cleanup after Uninstall on removal.
pub struct Disable {
    pub id: String,
    pub package: Option<Arc<Package>>,
    pub keep: bool,
    pub queues: Arc<QueueService>,
    pub releases: Arc<dyn ReleaseService>,
    pub status: Arc<StatusService>,
}

#[async_trait]
impl Task for Disable {
    fn name(&self) -> String {
        format!("Disable({}, keep={})", self.id, self.keep)
    }

    async fn execute(&self, ctx: &CancellationToken) -> anyhow::Result<()> {
        self.releases.remove_monitor(&self.id);

        if let Some(package) = &self.package {
            if !self.keep {
                match self
                    .releases
                    .delete(ctx, package.namespace(), package.name())
                    .await
                {
                    Ok(()) | Err(ReleaseError::NotHelm) => {}
                    Err(err) => {
                        return Err(fail(ctx, internal::HELM_APPLIED, reason::HELM_FAILED, err));
                    }
                }
                package
                    .run_hooks_by_binding(ctx, BindingKind::AfterDeleteHelm)
                    .await
                    .map_err(|e| fail(ctx, internal::HOOKS_PROCESSED, reason::HOOK_FAILED, e))?;
            }
            package.deinitialize_hooks();
            for queue in package.queues() {
                self.queues.remove(&hook_queue(&self.id, &queue));
                self.queues.remove(&sync_queue(&self.id, &queue));
            }
        } else {
            debug!(package = %self.id, "nothing loaded to disable");
        }

        self.status.clear_runtime_conditions(&self.id);
        info!(package = %self.id, keep = self.keep, "package disabled");
        Ok(())
    }
}

/// Remove the deployed bundle from the node.
pub struct Uninstall {
    pub id: String,
    pub keep: bool,
    pub downloaded: PathBuf,
    pub deployed: PathBuf,
    pub installer: Arc<dyn Installer>,
}

#[async_trait]
impl Task for Uninstall {
    fn name(&self) -> String {
        format!("Uninstall({})", self.id)
    }

    async fn execute(&self, ctx: &CancellationToken) -> anyhow::Result<()> {
        self.installer
            .uninstall(ctx, &self.downloaded, &self.deployed, &self.id, self.keep)
            .await
            .map_err(|e| fail(ctx, internal::READY_ON_FILESYSTEM, reason::INSTALL_FAILED, e))?;
        info!(package = %self.id, keep = self.keep, "package uninstalled");
        Ok(())
    }
}

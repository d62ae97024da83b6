use std::sync::Arc;

use async_trait::async_trait;
use pkgmgr_types::condition::{internal, reason};
use pkgmgr_types::{BindingKind, Condition};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::fail;
use crate::package::Package;
use crate::queue::Task;
use crate::release::{ReleaseError, ReleaseService};
use crate::status::StatusService;

/// The reconcile cycle: BeforeHelm hooks, release upgrade, AfterHelm hooks
/// and a second upgrade if those hooks changed the values.
pub struct Run {
    pub package: Arc<Package>,
    pub releases: Arc<dyn ReleaseService>,
    pub status: Arc<StatusService>,
}

impl Run {
    async fn upgrade(&self, ctx: &CancellationToken) -> anyhow::Result<()> {
        let package = &self.package;
        match self
            .releases
            .upgrade(ctx, package.namespace(), package)
            .await
        {
            Ok(()) => Ok(()),
            Err(ReleaseError::NotHelm) => {
                debug!(package = %package.id(), "not a helm package; skipping upgrade");
                Ok(())
            }
            Err(err) => Err(fail(ctx, internal::HELM_APPLIED, reason::HELM_FAILED, err)),
        }
    }

    async fn reconcile(&self, ctx: &CancellationToken) -> anyhow::Result<()> {
        let package = &self.package;
        package
            .run_hooks_by_binding(ctx, BindingKind::BeforeHelm)
            .await
            .map_err(|e| fail(ctx, internal::HOOKS_PROCESSED, reason::HOOK_FAILED, e))?;
        self.upgrade(ctx).await?;

        let checksum = package.values_checksum();
        package
            .run_hooks_by_binding(ctx, BindingKind::AfterHelm)
            .await
            .map_err(|e| fail(ctx, internal::HOOKS_PROCESSED, reason::HOOK_FAILED, e))?;
        if package.values_checksum() != checksum {
            debug!(package = %package.id(), "values changed by AfterHelm hooks; upgrading again");
            self.upgrade(ctx).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Task for Run {
    fn name(&self) -> String {
        format!("Run({})", self.package.id())
    }

    async fn execute(&self, ctx: &CancellationToken) -> anyhow::Result<()> {
        let id = self.package.id();
        let monitored = self.releases.has_monitor(id);
        if monitored {
            self.releases.pause_monitor(id);
        }
        let result = self.reconcile(ctx).await;
        if monitored {
            self.releases.resume_monitor(id);
        }
        result?;

        self.status.set_conditions(
            id,
            vec![
                Condition::ok(internal::HELM_APPLIED),
                Condition::ok(internal::HOOKS_PROCESSED),
                Condition::ok(internal::READY_IN_RUNTIME),
                Condition::ok(internal::READY_IN_CLUSTER),
            ],
        );
        info!(package = %id, version = %self.package.version(), "package reconciled");
        Ok(())
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use pkgmgr_types::condition::{internal, reason};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Reschedule, fail};
use crate::package::Package;
use crate::package::kube::BindingExecutionInfo;
use crate::queue::{Cancelled, Task, is_cancelled};
use crate::release::ReleaseService;

/// Run a hook with the release monitor paused so the hook's own changes do
/// not count as drift.
async fn run_paused(
    ctx: &CancellationToken,
    package: &Package,
    info: &BindingExecutionInfo,
    releases: &dyn ReleaseService,
) -> anyhow::Result<()> {
    let id = package.id();
    let monitored = releases.has_monitor(id);
    if monitored {
        releases.pause_monitor(id);
    }
    let result = package
        .run_hook_by_name(ctx, &info.hook, info.binding, info.contexts.clone())
        .await;
    if monitored {
        releases.resume_monitor(id);
    }
    match result {
        Err(err) if info.allow_failure && !is_cancelled(&err) && !ctx.is_cancelled() => {
            warn!(
                package = %id,
                hook = %info.hook,
                binding = %info.binding_name,
                error = %format!("{err:#}"),
                "hook failed; failure allowed"
            );
            Ok(())
        }
        other => other,
    }
}

/// Initial synchronization of one Kubernetes binding, followed by unlocking
/// its monitor.
pub struct HookSync {
    pub package: Arc<Package>,
    pub info: BindingExecutionInfo,
    /// Synchronization round this run belongs to.
    pub round: u64,
    pub releases: Arc<dyn ReleaseService>,
}

#[async_trait]
impl Task for HookSync {
    fn name(&self) -> String {
        format!(
            "HookSync({}:{}:{})",
            self.package.id(),
            self.info.hook,
            self.info.binding_name
        )
    }

    async fn execute(&self, ctx: &CancellationToken) -> anyhow::Result<()> {
        if self.info.execute_on_synchronization {
            run_paused(ctx, &self.package, &self.info, self.releases.as_ref())
                .await
                .map_err(|e| fail(ctx, internal::HOOKS_PROCESSED, reason::HOOK_FAILED, e))?;
        } else {
            debug!(
                package = %self.package.id(),
                hook = %self.info.hook,
                "synchronization run disabled; unlocking monitor only"
            );
        }
        if ctx.is_cancelled() {
            return Err(Cancelled.into());
        }
        self.package
            .unlock_kubernetes_monitors(&self.info.hook, self.info.monitor_id.as_deref());
        self.package.finish_synchronization(self.round);
        Ok(())
    }
}

/// A hook run triggered by a watch event or a cron tick.
pub struct HookRun {
    pub package: Arc<Package>,
    pub info: BindingExecutionInfo,
    pub releases: Arc<dyn ReleaseService>,
    pub reschedule: Reschedule,
}

#[async_trait]
impl Task for HookRun {
    fn name(&self) -> String {
        format!(
            "HookRun({}:{}:{})",
            self.package.id(),
            self.info.hook,
            self.info.binding_name
        )
    }

    async fn execute(&self, ctx: &CancellationToken) -> anyhow::Result<()> {
        let before = self.package.values_checksum();
        run_paused(ctx, &self.package, &self.info, self.releases.as_ref())
            .await
            .map_err(|e| fail(ctx, internal::HOOKS_PROCESSED, reason::HOOK_FAILED, e))?;
        if self.package.values_checksum() != before {
            debug!(package = %self.package.id(), hook = %self.info.hook, "values changed; rescheduling");
            (self.reschedule)(self.package.id());
        }
        Ok(())
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use pkgmgr_types::BindingKind;
use pkgmgr_types::condition::{internal, reason};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{HookSync, Reported, fail, hook_queue, sync_queue};
use crate::package::Package;
use crate::queue::{Cancelled, EnqueueOptions, QueueService, Task, WaitGroup};
use crate::release::ReleaseService;
use crate::status::StatusService;

/// Bring hooks up: register bindings, run the initial synchronization and
/// the `OnStartup` hooks. Does nothing for a package that is already running,
/// unless a reschedule cut its initial synchronization short; then the hooks
/// are registered and synchronized again.
pub struct Startup {
    pub package: Arc<Package>,
    /// Schedule scope the synchronization tasks live in. They must outlive
    /// this task, whose own context ends when it returns.
    pub scope: CancellationToken,
    pub queues: Arc<QueueService>,
    pub releases: Arc<dyn ReleaseService>,
    pub status: Arc<StatusService>,
}

#[async_trait]
impl Task for Startup {
    fn name(&self) -> String {
        format!("Startup({})", self.package.id())
    }

    async fn execute(&self, ctx: &CancellationToken) -> anyhow::Result<()> {
        let id = self.package.id();
        if self.package.synchronization_interrupted() {
            info!(package = %id, "initial synchronization was interrupted; re-registering hooks");
            self.package.deinitialize_hooks();
        }
        if self.package.started() {
            debug!(package = %id, "package already started");
            return Ok(());
        }

        if !self.package.hooks_initialized() {
            let infos = self
                .package
                .initialize_hooks()
                .await
                .map_err(|e| fail(ctx, internal::HOOKS_PROCESSED, reason::HOOKS_INIT_FAILED, e))?;
            let round = self.package.begin_synchronization(&self.scope, infos.len());

            let wg = WaitGroup::new();
            for info in infos {
                let waited = info.wait_for_synchronization;
                let queue = if waited {
                    sync_queue(id, &info.queue)
                } else {
                    hook_queue(id, &info.queue)
                };
                let task = HookSync {
                    package: Arc::clone(&self.package),
                    info,
                    round,
                    releases: Arc::clone(&self.releases),
                };
                let opts = if waited {
                    EnqueueOptions::new().with_wait(&wg)
                } else {
                    EnqueueOptions::new()
                };
                self.queues.enqueue(
                    &self.scope,
                    &queue,
                    Reported::wrap(id, &self.status, task),
                    opts,
                );
            }
            if wg.count() > 0 {
                debug!(package = %id, pending = wg.count(), "waiting for synchronization");
                tokio::select! {
                    _ = ctx.cancelled() => return Err(Cancelled.into()),
                    _ = wg.wait() => {}
                }
            }
        }

        self.package
            .run_hooks_by_binding(ctx, BindingKind::OnStartup)
            .await
            .map_err(|e| fail(ctx, internal::HOOKS_PROCESSED, reason::HOOK_FAILED, e))?;
        self.package.set_started(true);
        info!(package = %id, "package started");
        Ok(())
    }
}

//! Routes cluster watch events and cron ticks to hook-run tasks.

use std::sync::{Arc, Mutex, RwLock};

use pkgmgr_types::BindingKind;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::lifecycle::Store;
use crate::package::Package;
use crate::package::controller::HookController;
use crate::package::kube::{BindingExecutionInfo, KubeEvent, ScheduleEvent};
use crate::queue::{EnqueueOptions, QueueService, Task};
use crate::release::ReleaseService;
use crate::status::StatusService;
use crate::tasks::{HookRun, Reported, Reschedule, hook_queue};

struct Pending {
    ctx: CancellationToken,
    queue: String,
    task: Arc<dyn Task>,
}

/// Builds hook-run tasks from events. Shared by both stream loops.
pub(crate) struct TaskBuilder {
    pub store: Arc<RwLock<Store<Package>>>,
    pub queues: Arc<QueueService>,
    pub releases: Arc<dyn ReleaseService>,
    pub status: Arc<StatusService>,
    pub reschedule: Reschedule,
}

impl TaskBuilder {
    /// Collect tasks under the store read lock; enqueueing happens after the
    /// lock is released.
    fn build(
        &self,
        kind: BindingKind,
        fan_out: impl Fn(&HookController) -> Vec<BindingExecutionInfo>,
    ) -> Vec<Pending> {
        let store = self.store.read().unwrap();
        let mut pending = Vec::new();
        for (id, package) in store.loaded_packages() {
            let Some(ctx) = store.context(id) else {
                continue;
            };
            for hook in package.hooks_by_binding(kind) {
                let Some(controller) = hook.controller() else {
                    continue;
                };
                for info in fan_out(controller) {
                    let queue = hook_queue(id, &info.queue);
                    let task = HookRun {
                        package: Arc::clone(package),
                        info,
                        releases: Arc::clone(&self.releases),
                        reschedule: Arc::clone(&self.reschedule),
                    };
                    pending.push(Pending {
                        ctx: ctx.clone(),
                        queue,
                        task: Reported::wrap(id, &self.status, task),
                    });
                }
            }
        }
        pending
    }

    fn build_kube_tasks(&self, event: &KubeEvent) -> Vec<Pending> {
        self.build(BindingKind::OnKubernetesEvent, |c| {
            if c.can_handle_kube_event(event) {
                c.handle_kube_event(event)
            } else {
                Vec::new()
            }
        })
    }

    fn build_schedule_tasks(&self, event: &ScheduleEvent) -> Vec<Pending> {
        self.build(BindingKind::Schedule, |c| {
            if c.can_handle_schedule_event(&event.crontab) {
                c.handle_schedule_event(&event.crontab)
            } else {
                Vec::new()
            }
        })
    }

    fn enqueue(&self, pending: Vec<Pending>) {
        for p in pending {
            self.queues
                .enqueue(&p.ctx, &p.queue, p.task, EnqueueOptions::new());
        }
    }
}

/// Owns the two event stream loops.
pub struct HookEventHandler {
    builder: Arc<TaskBuilder>,
    ctx: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl HookEventHandler {
    pub(crate) fn new(builder: TaskBuilder) -> Self {
        Self {
            builder: Arc::new(builder),
            ctx: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Dispatch a single watch event. Exposed for the stream loop and tests.
    pub fn handle_kube_event(&self, event: &KubeEvent) -> usize {
        let pending = self.builder.build_kube_tasks(event);
        let n = pending.len();
        self.builder.enqueue(pending);
        n
    }

    pub fn handle_schedule_event(&self, event: &ScheduleEvent) -> usize {
        let pending = self.builder.build_schedule_tasks(event);
        let n = pending.len();
        self.builder.enqueue(pending);
        n
    }

    /// Spawn one loop per stream. Either stream may be absent.
    pub fn start(
        &self,
        kube: Option<mpsc::Receiver<KubeEvent>>,
        schedule: Option<mpsc::Receiver<ScheduleEvent>>,
    ) {
        let mut handles = self.handles.lock().unwrap();
        if let Some(mut rx) = kube {
            let builder = Arc::clone(&self.builder);
            let ctx = self.ctx.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let event = tokio::select! {
                        _ = ctx.cancelled() => break,
                        ev = rx.recv() => match ev {
                            Some(ev) => ev,
                            None => break,
                        },
                    };
                    let pending = builder.build_kube_tasks(&event);
                    debug!(monitor = %event.monitor_id, tasks = pending.len(), "kubernetes event dispatched");
                    builder.enqueue(pending);
                }
                debug!("kubernetes event loop stopped");
            }));
        }
        if let Some(mut rx) = schedule {
            let builder = Arc::clone(&self.builder);
            let ctx = self.ctx.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let event = tokio::select! {
                        _ = ctx.cancelled() => break,
                        ev = rx.recv() => match ev {
                            Some(ev) => ev,
                            None => break,
                        },
                    };
                    let pending = builder.build_schedule_tasks(&event);
                    debug!(crontab = %event.crontab, tasks = pending.len(), "schedule event dispatched");
                    builder.enqueue(pending);
                }
                debug!("schedule event loop stopped");
            }));
        }
    }

    /// Stop both loops and wait for them.
    pub async fn stop(&self) {
        self.ctx.cancel();
        let handles: Vec<JoinHandle<()>> = self.handles.lock().unwrap().drain(..).collect();
        futures::future::join_all(handles).await;
    }
}

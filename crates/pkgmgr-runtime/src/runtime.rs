//! The package runtime: accepts desired-state updates for applications and
//! modules, drives each package through download, install, load, schedule
//! and run, and keeps the published status current.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock, Weak};

use pkgmgr_types::condition::{internal, reason};
use pkgmgr_types::{
    ApplicationSpec, Condition, Constraints, ModuleSpec, Repository, Settings, application_id,
};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cluster::ClusterInfo;
use crate::condmap::Mapper;
use crate::config::RuntimeConfig;
use crate::events::{HookEventHandler, TaskBuilder};
use crate::installer::{Bundle, Installer};
use crate::lifecycle::{EntrySnapshot, EventKind, Store};
use crate::package::hooks::{HookExecutor, HookLoader, HookServices};
use crate::package::kube::{ScheduleManager, WatcherManager};
use crate::package::{Package, PackageKind, PackageSummary};
use crate::queue::{EnqueueOptions, QueueService, Task};
use crate::release::{ReleaseError, ReleaseService};
use crate::scheduler::{Scheduler, SchedulerEventKind};
use crate::status::{Status, StatusService, StatusStore};
use crate::tasks::{
    ApplySettings, Disable, Download, Install, Load, Reported, Reschedule, Run, Startup, Uninstall,
    package_queue,
};

/// External systems the runtime talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub installer: Arc<dyn Installer>,
    pub releases: Arc<dyn ReleaseService>,
    pub hook_loader: Arc<dyn HookLoader>,
    pub hook_executor: Arc<dyn HookExecutor>,
    pub watcher: Arc<dyn WatcherManager>,
    pub schedules: Arc<dyn ScheduleManager>,
    pub cluster: Arc<dyn ClusterInfo>,
    pub status_store: Arc<dyn StatusStore>,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("package {0} is not loaded")]
    NotFound(String),
    #[error("package {0} has no chart")]
    NotHelm(String),
    #[error("render failed")]
    Failed(#[source] ReleaseError),
}

/// One desired package, normalized from either descriptor kind.
struct Desired {
    id: String,
    kind: PackageKind,
    name: String,
    version: String,
    repository: Repository,
    settings: Settings,
    constraints: Constraints,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PackageDump {
    #[serde(flatten)]
    entry: EntrySnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    package: Option<PackageSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<Status>,
}

pub struct Runtime {
    config: RuntimeConfig,
    collab: Collaborators,
    store: Arc<RwLock<Store<Package>>>,
    queues: Arc<QueueService>,
    scheduler: Arc<Scheduler>,
    status: Arc<StatusService>,
    events: HookEventHandler,
    mapper: Mapper,
    shutdown: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Runtime {
    pub fn new(config: RuntimeConfig, collab: Collaborators) -> Arc<Self> {
        Self::with_mapper(config, collab, Mapper::default())
    }

    pub fn with_mapper(config: RuntimeConfig, collab: Collaborators, mapper: Mapper) -> Arc<Self> {
        let store = Arc::new(RwLock::new(Store::new()));
        let queues = Arc::new(QueueService::new(
            config.backoff,
            config.queue_stop_timeout,
        ));
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&collab.cluster),
            config.scheduler_interval,
        ));
        let status = Arc::new(StatusService::new(config.status_channel_capacity));

        let reschedule: Reschedule = {
            let scheduler = Arc::clone(&scheduler);
            Arc::new(move |id: &str| scheduler.reschedule(id))
        };
        let events = HookEventHandler::new(TaskBuilder {
            store: Arc::clone(&store),
            queues: Arc::clone(&queues),
            releases: Arc::clone(&collab.releases),
            status: Arc::clone(&status),
            reschedule,
        });

        Arc::new(Self {
            config,
            collab,
            store,
            queues,
            scheduler,
            status,
            events,
            mapper,
            shutdown: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the background loops: scheduler evaluation, scheduler decision
    /// consumer, status publisher and the hook event streams.
    pub fn start(self: &Arc<Self>) {
        let mut handles = self.handles.lock().unwrap();

        handles.push(tokio::spawn(
            Arc::clone(&self.scheduler).run(self.shutdown.child_token()),
        ));

        if let Some(mut rx) = self.scheduler.take_events() {
            let runtime: Weak<Self> = Arc::downgrade(self);
            handles.push(tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    let Some(runtime) = runtime.upgrade() else {
                        break;
                    };
                    match event.kind {
                        SchedulerEventKind::Schedule => runtime.schedule_package(&event.name),
                        SchedulerEventKind::Disable => {
                            runtime.disable_package(&event.name, event.error.as_deref())
                        }
                    }
                }
                debug!("scheduler consumer stopped");
            }));
        }

        if let Some(rx) = self.status.take_receiver() {
            handles.push(self.status.start(
                self.shutdown.child_token(),
                rx,
                Arc::clone(&self.collab.status_store),
                self.mapper.clone(),
            ));
        }

        self.events.start(
            self.collab.watcher.take_events(),
            self.collab.schedules.take_events(),
        );
        info!("package runtime started");
    }

    pub fn update_app(&self, mut spec: ApplicationSpec) {
        spec.normalize();
        self.update(Desired {
            id: spec.id(),
            kind: PackageKind::Application {
                namespace: spec.namespace,
            },
            name: spec.name,
            version: spec.version,
            repository: spec.repository,
            settings: spec.settings,
            constraints: spec.constraints,
        });
    }

    pub fn update_module(&self, spec: ModuleSpec) {
        self.update(Desired {
            id: spec.id(),
            kind: PackageKind::Module,
            name: spec.name,
            version: spec.version,
            repository: spec.repository,
            settings: spec.settings,
            constraints: spec.constraints,
        });
    }

    fn update(&self, desired: Desired) {
        let id = desired.id.clone();
        let (ctx, previous) = {
            let mut store = self.store.write().unwrap();
            if !store.need_update(&id, &desired.version, &desired.settings) {
                return;
            }

            if store.version(&id) != Some(desired.version.as_str()) {
                if let Err(err) = self.scheduler.check_constraints(&desired.constraints) {
                    drop(store);
                    warn!(package = %id, version = %desired.version, error = %err, "requirements not met");
                    self.status.set_conditions(
                        &id,
                        vec![Condition::failed(
                            internal::REQUIREMENTS_MET,
                            reason::REQUIREMENTS_NOT_MET,
                            err.to_string(),
                        )],
                    );
                    return;
                }
            }

            let Some(renewal) =
                store.update(&id, &desired.version, desired.settings.clone())
            else {
                return;
            };
            if renewal.event == EventKind::SettingsChanged && store.loaded(&id).is_some() {
                drop(store);
                debug!(package = %id, "settings changed; rescheduling");
                self.scheduler.reschedule(&id);
                return;
            }
            (renewal.ctx, store.loaded(&id))
        };

        self.status
            .clear_conditions(&id, &internal::RUNTIME_SCOPED);
        self.status
            .clear_conditions(&id, &internal::VERSION_SCOPED);
        self.status.set_condition_true(&id, internal::REQUIREMENTS_MET);
        self.scheduler.add_node(&id, desired.constraints.clone());

        info!(package = %id, version = %desired.version, "package update accepted");
        let queue = package_queue(&id);
        if previous.is_some() {
            self.enqueue(&ctx, &queue, Reported::wrap(&id, &self.status, self.disable_task(&id, previous, true)));
        }

        let bundle = Bundle {
            id: id.clone(),
            name: desired.name,
            version: desired.version,
        };
        self.enqueue(
            &ctx,
            &queue,
            Reported::wrap(
                &id,
                &self.status,
                Download {
                    bundle: bundle.clone(),
                    repository: desired.repository,
                    downloaded: self.config.downloaded_dir.clone(),
                    installer: Arc::clone(&self.collab.installer),
                    status: Arc::clone(&self.status),
                },
            ),
        );
        self.enqueue(
            &ctx,
            &queue,
            Reported::wrap(
                &id,
                &self.status,
                Install {
                    bundle: bundle.clone(),
                    downloaded: self.config.downloaded_dir.clone(),
                    deployed: self.config.deployed_dir.clone(),
                    installer: Arc::clone(&self.collab.installer),
                    status: Arc::clone(&self.status),
                },
            ),
        );
        self.enqueue(
            &ctx,
            &queue,
            Reported::wrap(
                &id,
                &self.status,
                Load {
                    bundle,
                    kind: desired.kind,
                    deployed: self.config.deployed_dir.clone(),
                    constraints: desired.constraints,
                    loader: Arc::clone(&self.collab.hook_loader),
                    services: self.hook_services(),
                    store: Arc::clone(&self.store),
                    status: Arc::clone(&self.status),
                    scheduler: Arc::clone(&self.scheduler),
                },
            ),
        );
    }

    /// Remove an application. Its downloaded images are kept.
    pub fn remove_app(&self, namespace: &str, name: &str) {
        self.remove(&application_id(namespace, name), true);
    }

    /// Remove a module together with its downloaded images.
    pub fn remove_module(&self, name: &str) {
        self.remove(name, false);
    }

    fn remove(&self, id: &str, keep_downloaded: bool) {
        self.scheduler.remove_node(id);
        let (ctx, loaded) = {
            let mut store = self.store.write().unwrap();
            match store.handle_event(EventKind::Remove, id) {
                Some(found) => found,
                None => {
                    // An update refused by its requirements leaves status
                    // without a lifecycle entry.
                    self.status.delete(id);
                    debug!(package = %id, "remove of unknown package ignored");
                    return;
                }
            }
        };
        info!(package = %id, "package removal accepted");

        let queue = package_queue(id);
        self.enqueue(
            &ctx,
            &queue,
            Reported::wrap(id, &self.status, self.disable_task(id, loaded, false)),
        );

        let cleanup = {
            let id = id.to_string();
            let store = Arc::clone(&self.store);
            let queues = Arc::clone(&self.queues);
            let status = Arc::clone(&self.status);
            move || {
                tokio::spawn(async move {
                    let deleted = store.write().unwrap().delete(&id);
                    if deleted {
                        queues.remove(&package_queue(&id));
                        status.delete(&id);
                        debug!(package = %id, "package state released");
                    }
                });
            }
        };
        let uninstall = Uninstall {
            id: id.to_string(),
            keep: keep_downloaded,
            downloaded: self.config.downloaded_dir.clone(),
            deployed: self.config.deployed_dir.clone(),
            installer: Arc::clone(&self.collab.installer),
        };
        self.queues.enqueue(
            &ctx,
            &queue,
            Reported::wrap(id, &self.status, uninstall),
            EnqueueOptions::new().with_on_done(cleanup),
        );
    }

    /// React to a `Schedule` decision: apply the pending settings, start the
    /// package if needed and run its reconcile cycle.
    fn schedule_package(&self, id: &str) {
        let (ctx, package, settings) = {
            let mut store = self.store.write().unwrap();
            let Some((ctx, loaded)) = store.handle_event(EventKind::Schedule, id) else {
                debug!(package = %id, "schedule of unknown package ignored");
                return;
            };
            let Some(package) = loaded else {
                debug!(package = %id, "schedule before load ignored");
                return;
            };
            let settings = store.pending_settings(id).unwrap_or_default();
            (ctx, package, settings)
        };

        let queue = package_queue(id);
        self.enqueue(
            &ctx,
            &queue,
            Reported::wrap(
                id,
                &self.status,
                ApplySettings {
                    package: Arc::clone(&package),
                    settings,
                    status: Arc::clone(&self.status),
                },
            ),
        );
        self.enqueue(
            &ctx,
            &queue,
            Reported::wrap(
                id,
                &self.status,
                Startup {
                    package: Arc::clone(&package),
                    scope: ctx.clone(),
                    queues: Arc::clone(&self.queues),
                    releases: Arc::clone(&self.collab.releases),
                    status: Arc::clone(&self.status),
                },
            ),
        );

        let completed = {
            let scheduler = Arc::clone(&self.scheduler);
            let id = id.to_string();
            move || scheduler.complete(&id)
        };
        self.queues.enqueue(
            &ctx,
            &queue,
            Reported::wrap(
                id,
                &self.status,
                Run {
                    package,
                    releases: Arc::clone(&self.collab.releases),
                    status: Arc::clone(&self.status),
                },
            ),
            EnqueueOptions::new().with_on_done(completed),
        );
    }

    /// React to a `Disable` decision: stop the package but keep its release.
    fn disable_package(&self, id: &str, why: Option<&str>) {
        let (ctx, loaded) = {
            let mut store = self.store.write().unwrap();
            let Some(found) = store.handle_event(EventKind::Schedule, id) else {
                return;
            };
            found
        };
        if let Some(why) = why {
            self.status.set_conditions(
                id,
                vec![Condition::failed(
                    internal::REQUIREMENTS_MET,
                    reason::REQUIREMENTS_NOT_MET,
                    why,
                )],
            );
        }
        self.enqueue(
            &ctx,
            &package_queue(id),
            Reported::wrap(id, &self.status, self.disable_task(id, loaded, true)),
        );
    }

    fn disable_task(&self, id: &str, package: Option<Arc<Package>>, keep: bool) -> Disable {
        Disable {
            id: id.to_string(),
            package,
            keep,
            queues: Arc::clone(&self.queues),
            releases: Arc::clone(&self.collab.releases),
            status: Arc::clone(&self.status),
        }
    }

    fn hook_services(&self) -> HookServices {
        HookServices {
            executor: Arc::clone(&self.collab.hook_executor),
            watcher: Arc::clone(&self.collab.watcher),
            schedules: Arc::clone(&self.collab.schedules),
        }
    }

    fn enqueue(&self, ctx: &CancellationToken, queue: &str, task: Arc<dyn Task>) {
        self.queues.enqueue(ctx, queue, task, EnqueueOptions::new());
    }

    pub fn status(&self) -> &Arc<StatusService> {
        &self.status
    }

    pub fn queues(&self) -> &Arc<QueueService> {
        &self.queues
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn events(&self) -> &HookEventHandler {
        &self.events
    }

    pub fn package(&self, id: &str) -> Option<Arc<Package>> {
        self.store.read().unwrap().loaded(id)
    }

    /// YAML snapshot of every known package: lifecycle entry, loaded
    /// package summary and internal status.
    pub fn dump(&self) -> Result<String, serde_yaml::Error> {
        let packages: BTreeMap<String, PackageDump> = {
            let store = self.store.read().unwrap();
            store
                .snapshot()
                .into_iter()
                .map(|(id, entry)| {
                    let package = store.loaded(&id).map(|p| p.summary());
                    let status = self.status.get_status(&id);
                    (id, PackageDump { entry, package, status })
                })
                .collect()
        };
        serde_yaml::to_string(&packages)
    }

    pub fn queues_dump(&self) -> Result<String, serde_yaml::Error> {
        self.queues.dump()
    }

    pub fn scheduler_dump(&self) -> Result<String, serde_yaml::Error> {
        self.scheduler.dump()
    }

    /// Render the chart of a loaded package with its current values.
    pub async fn render(&self, id: &str) -> Result<String, RenderError> {
        let package = self
            .package(id)
            .ok_or_else(|| RenderError::NotFound(id.to_string()))?;
        match self.collab.releases.render(package.namespace(), &package).await {
            Ok(manifests) => Ok(manifests),
            Err(ReleaseError::NotHelm) => Err(RenderError::NotHelm(id.to_string())),
            Err(err) => Err(RenderError::Failed(err)),
        }
    }

    /// Stop event intake first, then drain queues, then the background loops.
    pub async fn stop(&self) {
        info!("stopping package runtime");
        self.events.stop().await;
        self.scheduler.stop();
        self.queues.stop().await;
        self.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = self.handles.lock().unwrap().drain(..).collect();
        futures::future::join_all(handles).await;
        info!("package runtime stopped");
    }
}

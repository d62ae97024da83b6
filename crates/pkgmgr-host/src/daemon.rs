//! Node daemon: wires the host collaborators into a runtime and runs it
//! until shutdown.
//!
//! Shutdown order:
//! 1. Stop the desired-state driver so no new events arrive
//! 2. Stop the runtime (event streams, scheduler, queues, status loop)
//! 3. Stop the debug server and schedule tickers

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use pkgmgr_runtime::{Collaborators, Runtime};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cluster::StaticClusterInfo;
use crate::config::HostConfig;
use crate::driver::Driver;
use crate::hook_exec::ShellHookExecutor;
use crate::hook_loader::FsHookLoader;
use crate::http::spawn_http_server;
use crate::installer::SymlinkInstaller;
use crate::registry::LocalRegistry;
use crate::release::HelmReleaseService;
use crate::schedule::IntervalScheduleManager;
use crate::status_store::FileStatusStore;
use crate::watcher::OfflineWatcherManager;

pub struct Daemon {
    config: HostConfig,
    runtime: Arc<Runtime>,
    schedules: Arc<IntervalScheduleManager>,
}

impl Daemon {
    pub fn new(config: HostConfig) -> anyhow::Result<Self> {
        for dir in [&config.downloaded_dir, &config.deployed_dir, &config.status_dir] {
            std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        }
        let schedules = Arc::new(IntervalScheduleManager::default());
        let collab = Collaborators {
            installer: Arc::new(SymlinkInstaller::new(LocalRegistry::new(&config.registry_dir))),
            releases: Arc::new(HelmReleaseService::new(&config.helm_bin)),
            hook_loader: Arc::new(FsHookLoader),
            hook_executor: Arc::new(ShellHookExecutor),
            watcher: Arc::new(OfflineWatcherManager::default()),
            schedules: schedules.clone(),
            cluster: Arc::new(StaticClusterInfo::new(config.cluster.clone())),
            status_store: Arc::new(FileStatusStore::new(&config.status_dir)),
        };
        let runtime = Runtime::new(config.runtime_config(), collab);
        Ok(Self {
            config,
            runtime,
            schedules,
        })
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Run until `shutdown` resolves.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        self.runtime.start();
        info!(root = %self.config.root.display(), "package runtime started");

        let driver_ctx = CancellationToken::new();
        let driver = self.config.desired_state.as_ref().map(|path| {
            let driver = Arc::new(Driver::new(
                path,
                self.config.desired_state_interval,
                self.runtime.clone(),
            ));
            driver.spawn(driver_ctx.clone())
        });

        let http_ctx = CancellationToken::new();
        let http = spawn_http_server(self.config.debug_addr, self.runtime.clone(), http_ctx.clone());

        shutdown.await;
        info!("shutdown requested");

        driver_ctx.cancel();
        if let Some(handle) = driver {
            let _ = handle.await;
        }
        self.runtime.stop().await;
        http_ctx.cancel();
        if let Some(handle) = http {
            let _ = handle.await;
        }
        self.schedules.stop();
        info!("daemon stopped");
        Ok(())
    }
}

//! Shared harness for runtime integration tests.
//!
//! Each integration test compiles this module separately, so some helpers
//! are unused in some test binaries.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use pkgmgr_runtime::testing::{
    FakeHookExecutor, FakeInstaller, FakeReleaseService, FakeScheduleManager, FakeWatcherManager,
    MemoryStatusStore, SidecarHookLoader, StaticCluster,
};
use pkgmgr_runtime::{BackoffPolicy, Collaborators, Runtime, RuntimeConfig};
use pkgmgr_types::{ApplicationSpec, ConditionStatus, ModuleSpec, Settings};
use serde_json::Value;
use tempfile::TempDir;

pub struct Harness {
    pub runtime: Arc<Runtime>,
    pub installer: Arc<FakeInstaller>,
    pub releases: Arc<FakeReleaseService>,
    pub executor: Arc<FakeHookExecutor>,
    pub watcher: Arc<FakeWatcherManager>,
    pub schedules: Arc<FakeScheduleManager>,
    pub cluster: Arc<StaticCluster>,
    pub statuses: Arc<MemoryStatusStore>,
    _root: TempDir,
}

impl Harness {
    /// A started runtime on a Deckhouse 1.70 / Kubernetes 1.30 cluster with
    /// short retry and scheduling intervals.
    pub fn start() -> Self {
        let root = tempfile::tempdir().unwrap();
        let mut config = RuntimeConfig::new(root.path().join("downloaded"), root.path().join("deployed"));
        config.backoff = BackoffPolicy {
            initial: Duration::from_millis(50),
            max: Duration::from_millis(200),
            ..BackoffPolicy::default()
        };
        config.scheduler_interval = Duration::from_millis(200);
        config.queue_stop_timeout = Duration::from_secs(1);

        let installer = Arc::new(FakeInstaller::default());
        let releases = Arc::new(FakeReleaseService::default());
        let executor = Arc::new(FakeHookExecutor::default());
        let watcher = Arc::new(FakeWatcherManager::default());
        let schedules = Arc::new(FakeScheduleManager::default());
        let cluster = Arc::new(StaticCluster::new("1.70.0", "1.30.0", true));
        let statuses = Arc::new(MemoryStatusStore::default());

        let runtime = Runtime::new(
            config,
            Collaborators {
                installer: installer.clone(),
                releases: releases.clone(),
                hook_loader: Arc::new(SidecarHookLoader),
                hook_executor: executor.clone(),
                watcher: watcher.clone(),
                schedules: schedules.clone(),
                cluster: cluster.clone(),
                status_store: statuses.clone(),
            },
        );
        runtime.start();

        Self {
            runtime,
            installer,
            releases,
            executor,
            watcher,
            schedules,
            cluster,
            statuses,
            _root: root,
        }
    }

    /// Status of an internal condition as the runtime holds it.
    pub fn internal(&self, id: &str, condition: &str) -> Option<ConditionStatus> {
        let status = self.runtime.status().get_status(id)?;
        status.condition(condition).map(|c| c.status)
    }

    /// Status of an external condition as last published.
    pub fn external(&self, id: &str, condition: &str) -> Option<ConditionStatus> {
        let published = self.statuses.get(id)?;
        published
            .conditions
            .iter()
            .find(|c| c.name == condition)
            .map(|c| c.status)
    }

    /// Values an external condition took across publishes, with repeats
    /// collapsed.
    pub fn external_history(&self, id: &str, condition: &str) -> Vec<ConditionStatus> {
        let mut seen: Vec<ConditionStatus> = Vec::new();
        for published in self.statuses.history(id) {
            let Some(c) = published.conditions.iter().find(|c| c.name == condition) else {
                continue;
            };
            if seen.last() != Some(&c.status) {
                seen.push(c.status);
            }
        }
        seen
    }

    pub fn published_version(&self, id: &str) -> Option<String> {
        self.statuses.get(id)?.version
    }

    pub fn upgrades_of(&self, id: &str) -> Vec<Value> {
        self.releases
            .upgrades()
            .into_iter()
            .filter(|u| u.package == id)
            .map(|u| u.values)
            .collect()
    }

    pub fn count_calls(&self, hook: &str) -> usize {
        self.executor.calls().iter().filter(|c| *c == hook).count()
    }
}

pub fn settings(value: Value) -> Settings {
    value.as_object().cloned().unwrap_or_default()
}

pub fn app(namespace: &str, name: &str, version: &str, settings: Settings) -> ApplicationSpec {
    ApplicationSpec {
        namespace: namespace.into(),
        name: name.into(),
        version: version.into(),
        settings,
        ..ApplicationSpec::default()
    }
}

pub fn module(name: &str, version: &str) -> ModuleSpec {
    ModuleSpec {
        name: name.into(),
        version: version.into(),
        ..ModuleSpec::default()
    }
}

/// Poll `check` until it holds; panics after five seconds.
pub async fn wait_for(what: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

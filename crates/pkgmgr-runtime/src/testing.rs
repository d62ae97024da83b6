//! In-memory collaborators and package builders for tests.
//!
//! Everything here is deterministic and keeps a record of what the runtime
//! asked it to do:
//!
//! - [`PackageTemplate`]: writes a package directory (definition, values,
//!   schema, chart marker, hooks with sidecar configs)
//! - [`SidecarHookLoader`]: discovers hooks from `hooks/<name>.yaml` sidecars
//! - [`FakeInstaller`], [`FakeReleaseService`], [`FakeHookExecutor`]
//! - [`FakeWatcherManager`], [`FakeScheduleManager`], [`StaticCluster`],
//!   [`MemoryStatusStore`]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, bail};
use async_trait::async_trait;
use pkgmgr_types::{BindingKind, Repository, Settings};
use semver::Version;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cluster::ClusterInfo;
use crate::installer::{Bundle, Installer};
use crate::package::Package;
use crate::package::hooks::{
    DiscoveredHooks, Hook, HookConfig, HookDefinition, HookExecutor, HookInput, HookLoader,
    HookOutput, HookServices, SettingsVerdict,
};
use crate::package::kube::{
    KubeEvent, MonitorConfig, ScheduleEvent, ScheduleManager, WatcherManager,
};
use crate::package::loader::{CHART_FILE, DEFINITION_FILE, HOOKS_DIR, SETTINGS_SCHEMA_FILE, VALUES_FILE};
use crate::queue::Cancelled;
use crate::release::{ReleaseError, ReleaseService};
use crate::status::{PublishedStatus, StatusStore};

/// File name of the settings-check hook inside `hooks/`.
pub const SETTINGS_CHECK_HOOK: &str = "settings-check";

const EVENT_CHANNEL_CAPACITY: usize = 1024;

// ---------------------------------------------------------------------------
// Package directories
// ---------------------------------------------------------------------------

/// Describes a package bundle; [`PackageTemplate::write_to`] lays it out on
/// disk in the deployed format.
#[derive(Debug, Clone, Default)]
pub struct PackageTemplate {
    name: String,
    version: Option<String>,
    values: Option<Value>,
    settings_schema: Option<Value>,
    requirements: Option<Value>,
    helm: bool,
    hooks: Vec<(String, String)>,
    settings_check: bool,
}

impl PackageTemplate {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn version(mut self, version: &str) -> Self {
        self.version = Some(version.to_string());
        self
    }

    pub fn values(mut self, values: Value) -> Self {
        self.values = Some(values);
        self
    }

    pub fn settings_schema(mut self, schema: Value) -> Self {
        self.settings_schema = Some(schema);
        self
    }

    /// `requirements` block of `package.yaml`, e.g. `{"deckhouse": ">=2.0"}`.
    pub fn requirements(mut self, requirements: Value) -> Self {
        self.requirements = Some(requirements);
        self
    }

    /// Ship a `Chart.yaml` so the package counts as a helm package.
    pub fn helm(mut self) -> Self {
        self.helm = true;
        self
    }

    /// Add `hooks/<name>` with its binding config as a YAML sidecar.
    pub fn hook(mut self, name: &str, config_yaml: &str) -> Self {
        self.hooks.push((name.to_string(), config_yaml.to_string()));
        self
    }

    pub fn settings_check(mut self) -> Self {
        self.settings_check = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn write_to(&self, dir: &Path) -> anyhow::Result<()> {
        std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;

        let mut definition = json!({ "name": self.name });
        if let Some(version) = &self.version {
            definition["version"] = json!(version);
        }
        if let Some(requirements) = &self.requirements {
            definition["requirements"] = requirements.clone();
        }
        write_yaml(&dir.join(DEFINITION_FILE), &definition)?;

        if let Some(values) = &self.values {
            write_yaml(&dir.join(VALUES_FILE), values)?;
        }
        if let Some(schema) = &self.settings_schema {
            write_yaml(&dir.join(SETTINGS_SCHEMA_FILE), schema)?;
        }
        if self.helm {
            write_file(
                &dir.join(CHART_FILE),
                &format!("apiVersion: v2\nname: {}\nversion: 0.1.0\n", self.name),
            )?;
        }

        let hooks = dir.join(HOOKS_DIR);
        for (name, config) in &self.hooks {
            write_file(&hooks.join(name), "#!/bin/sh\n")?;
            write_file(&hooks.join(format!("{name}.yaml")), config)?;
        }
        if self.settings_check {
            write_file(&hooks.join(SETTINGS_CHECK_HOOK), "#!/bin/sh\n")?;
        }
        Ok(())
    }
}

fn write_file(path: &Path, body: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    std::fs::write(path, body).with_context(|| format!("write {}", path.display()))
}

fn write_yaml(path: &Path, value: &Value) -> anyhow::Result<()> {
    let body = serde_yaml::to_string(value).context("encode yaml")?;
    write_file(path, &body)
}

/// Read the hooks of a package directory written by [`PackageTemplate`].
///
/// Every file in `hooks/` with a `<name>.yaml` sidecar is a hook; the
/// [`SETTINGS_CHECK_HOOK`] file is the settings check.
pub fn discover(package_dir: &Path) -> anyhow::Result<DiscoveredHooks> {
    let dir = package_dir.join(HOOKS_DIR);
    let mut discovered = DiscoveredHooks::default();
    if !dir.is_dir() {
        return Ok(discovered);
    }
    let mut names: Vec<String> = std::fs::read_dir(&dir)
        .with_context(|| format!("read {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| !name.ends_with(".yaml"))
        .collect();
    names.sort();

    for name in names {
        let path = dir.join(&name);
        if name == SETTINGS_CHECK_HOOK {
            discovered.settings_check = Some(HookDefinition {
                name,
                path,
                config: HookConfig::default(),
            });
            continue;
        }
        let sidecar = dir.join(format!("{name}.yaml"));
        let Ok(text) = std::fs::read_to_string(&sidecar) else {
            continue;
        };
        let config: HookConfig = serde_yaml::from_str(&text)
            .with_context(|| format!("parse {}", sidecar.display()))?;
        discovered.hooks.push(HookDefinition { name, path, config });
    }
    Ok(discovered)
}

/// [`HookLoader`] over [`discover`].
#[derive(Debug, Default)]
pub struct SidecarHookLoader;

#[async_trait]
impl HookLoader for SidecarHookLoader {
    async fn load(&self, package_dir: &Path) -> anyhow::Result<DiscoveredHooks> {
        discover(package_dir)
    }
}

/// Hook services backed by fresh fake watch and schedule managers.
pub fn hook_services(executor: Arc<FakeHookExecutor>) -> HookServices {
    HookServices {
        executor,
        watcher: Arc::new(FakeWatcherManager::default()),
        schedules: Arc::new(FakeScheduleManager::default()),
    }
}

// ---------------------------------------------------------------------------
// FakeHookExecutor
// ---------------------------------------------------------------------------

/// One recorded hook execution.
#[derive(Debug, Clone, PartialEq)]
pub struct HookCall {
    pub package: String,
    pub hook: String,
    pub binding: BindingKind,
    pub settings: Settings,
}

#[derive(Default)]
struct ExecutorState {
    calls: Vec<HookCall>,
    patches: HashMap<String, Value>,
    failures: HashMap<String, String>,
    gates: HashMap<String, CancellationToken>,
    cancelled: Vec<String>,
    rejection: Option<String>,
}

/// Records executions; hooks can be made to patch values, fail, or block
/// until released or cancelled.
#[derive(Default)]
pub struct FakeHookExecutor {
    state: Mutex<ExecutorState>,
}

impl FakeHookExecutor {
    /// Every run of `hook` returns `patch` as its values patch.
    pub fn set_patch(&self, hook: &str, patch: Value) {
        self.state.lock().unwrap().patches.insert(hook.to_string(), patch);
    }

    pub fn fail(&self, hook: &str, message: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(hook.to_string(), message.to_string());
    }

    pub fn heal(&self, hook: &str) {
        self.state.lock().unwrap().failures.remove(hook);
    }

    /// Runs of `hook` park until [`Self::release`] or cancellation.
    pub fn block(&self, hook: &str) {
        self.state
            .lock()
            .unwrap()
            .gates
            .insert(hook.to_string(), CancellationToken::new());
    }

    pub fn release(&self, hook: &str) {
        if let Some(gate) = self.state.lock().unwrap().gates.remove(hook) {
            gate.cancel();
        }
    }

    pub fn reject_settings(&self, message: &str) {
        self.state.lock().unwrap().rejection = Some(message.to_string());
    }

    pub fn accept_settings(&self) {
        self.state.lock().unwrap().rejection = None;
    }

    /// Names of executed hooks, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .map(|c| c.hook.clone())
            .collect()
    }

    /// Hooks whose blocked run ended by cancellation.
    pub fn cancelled(&self) -> Vec<String> {
        self.state.lock().unwrap().cancelled.clone()
    }

    pub fn history(&self) -> Vec<HookCall> {
        self.state.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl HookExecutor for FakeHookExecutor {
    async fn execute(
        &self,
        ctx: &CancellationToken,
        hook: &Hook,
        input: HookInput,
    ) -> anyhow::Result<HookOutput> {
        let gate = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(HookCall {
                package: input.package.clone(),
                hook: hook.name.clone(),
                binding: input.binding,
                settings: input.settings.clone(),
            });
            state.gates.get(&hook.name).cloned()
        };
        if let Some(gate) = gate {
            tokio::select! {
                _ = ctx.cancelled() => {
                    self.state.lock().unwrap().cancelled.push(hook.name.clone());
                    return Err(Cancelled.into());
                }
                _ = gate.cancelled() => {}
            }
        }

        let state = self.state.lock().unwrap();
        if let Some(message) = state.failures.get(&hook.name) {
            bail!("{message}");
        }
        Ok(HookOutput {
            values_patch: state.patches.get(&hook.name).cloned(),
        })
    }

    async fn check_settings(
        &self,
        _ctx: &CancellationToken,
        _hook: &Hook,
        _settings: &Settings,
    ) -> anyhow::Result<SettingsVerdict> {
        Ok(match &self.state.lock().unwrap().rejection {
            Some(message) => SettingsVerdict::Invalid(message.clone()),
            None => SettingsVerdict::Valid,
        })
    }
}

// ---------------------------------------------------------------------------
// FakeInstaller
// ---------------------------------------------------------------------------

#[derive(Default)]
struct InstallerState {
    published: HashMap<(String, String), PackageTemplate>,
    download_failures: u32,
    calls: Vec<String>,
}

/// Serves bundles from published [`PackageTemplate`]s and materializes them
/// under the real downloaded/deployed directories.
#[derive(Default)]
pub struct FakeInstaller {
    state: Mutex<InstallerState>,
}

impl FakeInstaller {
    /// Make `template` available as `<template name>:<version>`.
    pub fn publish(&self, version: &str, template: PackageTemplate) {
        let key = (template.name().to_string(), version.to_string());
        self.state
            .lock()
            .unwrap()
            .published
            .insert(key, template.version(version));
    }

    /// Fail the next `n` downloads.
    pub fn fail_downloads(&self, n: u32) {
        self.state.lock().unwrap().download_failures = n;
    }

    /// `download id@version`, `install id@version`, `uninstall id keep=..`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn template(&self, bundle: &Bundle) -> anyhow::Result<PackageTemplate> {
        let state = self.state.lock().unwrap();
        state
            .published
            .get(&(bundle.name.clone(), bundle.version.clone()))
            .cloned()
            .with_context(|| format!("image {}:{} not found", bundle.name, bundle.version))
    }
}

#[async_trait]
impl Installer for FakeInstaller {
    async fn download(
        &self,
        _ctx: &CancellationToken,
        _repo: &Repository,
        downloaded: &Path,
        bundle: &Bundle,
    ) -> anyhow::Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            state
                .calls
                .push(format!("download {}@{}", bundle.id, bundle.version));
            if state.download_failures > 0 {
                state.download_failures -= 1;
                bail!("registry unavailable");
            }
        }
        let template = self.template(bundle)?;
        template.write_to(&downloaded.join(&bundle.id).join(&bundle.version))
    }

    async fn install(
        &self,
        _ctx: &CancellationToken,
        downloaded: &Path,
        deployed: &Path,
        bundle: &Bundle,
    ) -> anyhow::Result<()> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(format!("install {}@{}", bundle.id, bundle.version));
        let source = downloaded.join(&bundle.id).join(&bundle.version);
        if !source.is_dir() {
            bail!("{} was not downloaded", source.display());
        }
        let target = deployed.join(&bundle.id);
        if target.exists() {
            std::fs::remove_dir_all(&target)
                .with_context(|| format!("remove {}", target.display()))?;
        }
        self.template(bundle)?.write_to(&target)
    }

    async fn uninstall(
        &self,
        _ctx: &CancellationToken,
        downloaded: &Path,
        deployed: &Path,
        id: &str,
        keep: bool,
    ) -> anyhow::Result<()> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(format!("uninstall {id} keep={keep}"));
        remove_if_exists(&deployed.join(id))?;
        if !keep {
            remove_if_exists(&downloaded.join(id))?;
        }
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> anyhow::Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove {}", path.display())),
    }
}

// ---------------------------------------------------------------------------
// FakeReleaseService
// ---------------------------------------------------------------------------

/// One recorded release upgrade.
#[derive(Debug, Clone, PartialEq)]
pub struct Upgrade {
    pub package: String,
    pub namespace: String,
    pub version: String,
    pub values: Value,
}

#[derive(Default)]
struct ReleaseState {
    upgrades: Vec<Upgrade>,
    deleted: Vec<String>,
    /// Monitor id to paused flag.
    monitors: BTreeMap<String, bool>,
    failure: Option<String>,
}

/// Records upgrades and keeps a monitor per upgraded package.
#[derive(Default)]
pub struct FakeReleaseService {
    state: Mutex<ReleaseState>,
}

impl FakeReleaseService {
    pub fn upgrades(&self) -> Vec<Upgrade> {
        self.state.lock().unwrap().upgrades.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn fail_upgrades(&self, message: Option<&str>) {
        self.state.lock().unwrap().failure = message.map(str::to_string);
    }

    pub fn is_paused(&self, id: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .monitors
            .get(id)
            .copied()
            .unwrap_or(false)
    }
}

#[async_trait]
impl ReleaseService for FakeReleaseService {
    async fn upgrade(
        &self,
        _ctx: &CancellationToken,
        namespace: &str,
        package: &Package,
    ) -> Result<(), ReleaseError> {
        if !package.is_helm() {
            return Err(ReleaseError::NotHelm);
        }
        let mut state = self.state.lock().unwrap();
        if let Some(message) = &state.failure {
            return Err(ReleaseError::Helm {
                op: "upgrade",
                message: message.clone(),
            });
        }
        state.upgrades.push(Upgrade {
            package: package.id().to_string(),
            namespace: namespace.to_string(),
            version: package.version().to_string(),
            values: package.values(),
        });
        state.monitors.entry(package.id().to_string()).or_insert(false);
        Ok(())
    }

    async fn delete(
        &self,
        _ctx: &CancellationToken,
        namespace: &str,
        release: &str,
    ) -> Result<(), ReleaseError> {
        self.state
            .lock()
            .unwrap()
            .deleted
            .push(format!("{namespace}/{release}"));
        Ok(())
    }

    async fn render(&self, namespace: &str, package: &Package) -> Result<String, ReleaseError> {
        if !package.is_helm() {
            return Err(ReleaseError::NotHelm);
        }
        let manifest = json!({
            "namespace": namespace,
            "release": package.name(),
            "values": package.values(),
        });
        serde_yaml::to_string(&manifest).map_err(|e| ReleaseError::Other(e.into()))
    }

    fn remove_monitor(&self, id: &str) {
        self.state.lock().unwrap().monitors.remove(id);
    }

    fn has_monitor(&self, id: &str) -> bool {
        self.state.lock().unwrap().monitors.contains_key(id)
    }

    fn pause_monitor(&self, id: &str) {
        if let Some(paused) = self.state.lock().unwrap().monitors.get_mut(id) {
            *paused = true;
        }
    }

    fn resume_monitor(&self, id: &str) {
        if let Some(paused) = self.state.lock().unwrap().monitors.get_mut(id) {
            *paused = false;
        }
    }
}

// ---------------------------------------------------------------------------
// Watch and schedule managers
// ---------------------------------------------------------------------------

struct WatcherState {
    objects: HashMap<String, Vec<Value>>,
    monitors: BTreeMap<String, MonitorConfig>,
    started: BTreeSet<String>,
}

/// Serves canned object lists per kind; events are injected with
/// [`FakeWatcherManager::emit`].
pub struct FakeWatcherManager {
    state: Mutex<WatcherState>,
    tx: mpsc::Sender<KubeEvent>,
    rx: Mutex<Option<mpsc::Receiver<KubeEvent>>>,
}

impl Default for FakeWatcherManager {
    fn default() -> Self {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(WatcherState {
                objects: HashMap::new(),
                monitors: BTreeMap::new(),
                started: BTreeSet::new(),
            }),
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }
}

impl FakeWatcherManager {
    pub fn set_objects(&self, kind: &str, objects: Vec<Value>) {
        self.state
            .lock()
            .unwrap()
            .objects
            .insert(kind.to_string(), objects);
    }

    pub fn is_started(&self, id: &str) -> bool {
        self.state.lock().unwrap().started.contains(id)
    }

    pub fn monitor_ids(&self) -> Vec<String> {
        self.state.lock().unwrap().monitors.keys().cloned().collect()
    }

    pub fn emit(&self, event: KubeEvent) -> anyhow::Result<()> {
        self.tx
            .try_send(event)
            .map_err(|e| anyhow::anyhow!("emit kube event: {e}"))
    }
}

#[async_trait]
impl WatcherManager for FakeWatcherManager {
    async fn add_monitor(&self, config: MonitorConfig) -> anyhow::Result<Vec<Value>> {
        let mut state = self.state.lock().unwrap();
        let objects = state.objects.get(&config.kind).cloned().unwrap_or_default();
        state.monitors.insert(config.id.clone(), config);
        Ok(objects)
    }

    fn start_monitor(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        if state.monitors.contains_key(id) {
            state.started.insert(id.to_string());
        }
    }

    fn stop_monitor(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        state.monitors.remove(id);
        state.started.remove(id);
    }

    fn take_events(&self) -> Option<mpsc::Receiver<KubeEvent>> {
        self.rx.lock().unwrap().take()
    }
}

/// Keeps registered crontabs; ticks are injected with
/// [`FakeScheduleManager::tick`].
pub struct FakeScheduleManager {
    crontabs: Mutex<Vec<String>>,
    tx: mpsc::Sender<ScheduleEvent>,
    rx: Mutex<Option<mpsc::Receiver<ScheduleEvent>>>,
}

impl Default for FakeScheduleManager {
    fn default() -> Self {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            crontabs: Mutex::new(Vec::new()),
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }
}

impl FakeScheduleManager {
    pub fn crontabs(&self) -> Vec<String> {
        self.crontabs.lock().unwrap().clone()
    }

    pub fn tick(&self, crontab: &str) -> anyhow::Result<()> {
        self.tx
            .try_send(ScheduleEvent {
                crontab: crontab.to_string(),
            })
            .map_err(|e| anyhow::anyhow!("emit schedule event: {e}"))
    }
}

impl ScheduleManager for FakeScheduleManager {
    fn add(&self, crontab: &str) -> anyhow::Result<()> {
        self.crontabs.lock().unwrap().push(crontab.to_string());
        Ok(())
    }

    fn remove(&self, crontab: &str) {
        let mut crontabs = self.crontabs.lock().unwrap();
        if let Some(pos) = crontabs.iter().position(|c| c == crontab) {
            crontabs.remove(pos);
        }
    }

    fn take_events(&self) -> Option<mpsc::Receiver<ScheduleEvent>> {
        self.rx.lock().unwrap().take()
    }
}

// ---------------------------------------------------------------------------
// Cluster facts and status store
// ---------------------------------------------------------------------------

struct ClusterState {
    deckhouse: Version,
    kubernetes: Version,
    bootstrapped: bool,
}

/// Cluster facts that tests can change at will.
pub struct StaticCluster {
    state: Mutex<ClusterState>,
}

impl StaticCluster {
    /// Panics on malformed versions; meant for literals.
    pub fn new(deckhouse: &str, kubernetes: &str, bootstrapped: bool) -> Self {
        Self {
            state: Mutex::new(ClusterState {
                deckhouse: Version::parse(deckhouse).unwrap(),
                kubernetes: Version::parse(kubernetes).unwrap(),
                bootstrapped,
            }),
        }
    }

    pub fn set_deckhouse(&self, version: &str) {
        self.state.lock().unwrap().deckhouse = Version::parse(version).unwrap();
    }

    pub fn set_bootstrapped(&self, bootstrapped: bool) {
        self.state.lock().unwrap().bootstrapped = bootstrapped;
    }
}

impl ClusterInfo for StaticCluster {
    fn deckhouse_version(&self) -> anyhow::Result<Version> {
        Ok(self.state.lock().unwrap().deckhouse.clone())
    }

    fn kubernetes_version(&self) -> anyhow::Result<Version> {
        Ok(self.state.lock().unwrap().kubernetes.clone())
    }

    fn bootstrapped(&self) -> anyhow::Result<bool> {
        Ok(self.state.lock().unwrap().bootstrapped)
    }
}

/// Published statuses kept in memory, along with every publish in order.
#[derive(Default)]
pub struct MemoryStatusStore {
    statuses: Mutex<HashMap<String, PublishedStatus>>,
    history: Mutex<Vec<(String, PublishedStatus)>>,
}

impl MemoryStatusStore {
    pub fn get(&self, name: &str) -> Option<PublishedStatus> {
        self.statuses.lock().unwrap().get(name).cloned()
    }

    /// Every status published for `name`, oldest first.
    pub fn history(&self, name: &str) -> Vec<PublishedStatus> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, status)| status.clone())
            .collect()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn load(&self, name: &str) -> anyhow::Result<PublishedStatus> {
        Ok(self.get(name).unwrap_or_default())
    }

    async fn publish(&self, name: &str, status: PublishedStatus) -> anyhow::Result<()> {
        self.history
            .lock()
            .unwrap()
            .push((name.to_string(), status.clone()));
        self.statuses
            .lock()
            .unwrap()
            .insert(name.to_string(), status);
        Ok(())
    }
}

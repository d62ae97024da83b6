//! The loaded package: hooks partitioned by binding, layered values and the
//! settings schema. Applications and modules share one type and differ only
//! in [`PackageKind`].

pub mod controller;
pub mod hooks;
pub mod kube;
pub mod loader;
pub mod values;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use jsonschema::JSONSchema;
use pkgmgr_types::{BindingKind, Constraints, MODULES_NAMESPACE, Settings};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::queue::Cancelled;
use hooks::{DiscoveredHooks, Hook, HookInput, HookServices, SettingsVerdict, DEFAULT_QUEUE};
use kube::{BindingContext, BindingExecutionInfo};
use loader::PackageFiles;
use values::Values;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum PackageKind {
    Application { namespace: String },
    Module,
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings schema is invalid: {0}")]
    Schema(String),
    #[error("{0}")]
    Invalid(String),
    #[error("settings check hook failed")]
    Check(#[source] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum HookError {
    #[error("hook {0} not found")]
    NotFound(String),
    #[error("hook {hook} failed")]
    Failed {
        hook: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Initial synchronization runs of the current hook registration.
#[derive(Default)]
struct SyncRound {
    generation: u64,
    pending: usize,
    scope: Option<CancellationToken>,
}

pub struct Package {
    id: String,
    name: String,
    version: String,
    kind: PackageKind,
    path: PathBuf,
    files: PackageFiles,
    hooks: Vec<Arc<Hook>>,
    settings_check: Option<Arc<Hook>>,
    values: Mutex<Values>,
    services: HookServices,
    hooks_initialized: AtomicBool,
    started: AtomicBool,
    sync: Mutex<SyncRound>,
}

impl std::fmt::Debug for Package {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Package")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("kind", &self.kind)
            .finish()
    }
}

impl Package {
    pub fn new(
        id: &str,
        kind: PackageKind,
        version: &str,
        path: &Path,
        files: PackageFiles,
        discovered: DiscoveredHooks,
        services: HookServices,
    ) -> Self {
        let mut hooks: Vec<Arc<Hook>> = discovered
            .hooks
            .into_iter()
            .map(|d| Arc::new(Hook::new(d)))
            .collect();
        hooks.sort_by(|a, b| a.name.cmp(&b.name));
        let values = Values::new(files.values.clone());
        Self {
            id: id.to_string(),
            name: files.definition.name.clone(),
            version: version.to_string(),
            kind,
            path: path.to_path_buf(),
            files,
            hooks,
            settings_check: discovered.settings_check.map(|d| Arc::new(Hook::new(d))),
            values: Mutex::new(values),
            services,
            hooks_initialized: AtomicBool::new(false),
            started: AtomicBool::new(false),
            sync: Mutex::new(SyncRound::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn kind(&self) -> &PackageKind {
        &self.kind
    }

    /// Namespace the release is installed into.
    pub fn namespace(&self) -> &str {
        match &self.kind {
            PackageKind::Application { namespace } => namespace,
            PackageKind::Module => MODULES_NAMESPACE,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_helm(&self) -> bool {
        self.files.helm
    }

    pub fn requirements(&self) -> &Constraints {
        &self.files.definition.requirements
    }

    pub fn hooks(&self) -> &[Arc<Hook>] {
        &self.hooks
    }

    pub fn hook(&self, name: &str) -> Option<Arc<Hook>> {
        self.hooks.iter().find(|h| h.name == name).cloned()
    }

    /// Hooks bound to `kind`, sorted by order then name.
    pub fn hooks_by_binding(&self, kind: BindingKind) -> Vec<Arc<Hook>> {
        let mut bound: Vec<Arc<Hook>> = self
            .hooks
            .iter()
            .filter(|h| h.has_binding(kind))
            .cloned()
            .collect();
        bound.sort_by_key(|h| (h.order(kind).unwrap_or(0), h.name.clone()));
        bound
    }

    /// Names of the hook queues used by this package, without the package
    /// prefix. Always contains the default queue.
    pub fn queues(&self) -> Vec<String> {
        let mut queues: Vec<String> = self
            .hooks
            .iter()
            .flat_map(|h| h.config.queues())
            .chain(std::iter::once(DEFAULT_QUEUE.to_string()))
            .collect();
        queues.sort();
        queues.dedup();
        queues
    }

    pub fn values(&self) -> Value {
        self.values.lock().unwrap().merged()
    }

    pub fn values_checksum(&self) -> String {
        self.values.lock().unwrap().checksum()
    }

    pub fn settings(&self) -> Settings {
        self.values.lock().unwrap().settings()
    }

    pub fn hooks_initialized(&self) -> bool {
        self.hooks_initialized.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn set_started(&self, started: bool) {
        self.started.store(started, Ordering::SeqCst);
    }

    /// Track `count` synchronization runs enqueued under `scope`. Returns the
    /// round they report back to.
    pub fn begin_synchronization(&self, scope: &CancellationToken, count: usize) -> u64 {
        let mut sync = self.sync.lock().unwrap();
        sync.generation += 1;
        sync.pending = count;
        sync.scope = Some(scope.clone());
        sync.generation
    }

    /// A synchronization run of `round` succeeded. Runs of older rounds are
    /// ignored.
    pub fn finish_synchronization(&self, round: u64) {
        let mut sync = self.sync.lock().unwrap();
        if sync.generation == round {
            sync.pending = sync.pending.saturating_sub(1);
        }
    }

    /// The scope of the current round ended with synchronization runs still
    /// outstanding, so some monitors may never be unlocked.
    pub fn synchronization_interrupted(&self) -> bool {
        let sync = self.sync.lock().unwrap();
        sync.pending > 0 && sync.scope.as_ref().is_some_and(|s| s.is_cancelled())
    }

    /// Run every hook bound to `kind`, in order, stopping at the first error.
    pub async fn run_hooks_by_binding(
        &self,
        ctx: &CancellationToken,
        kind: BindingKind,
    ) -> anyhow::Result<()> {
        for hook in self.hooks_by_binding(kind) {
            self.run_hook(ctx, &hook, kind, vec![BindingContext::lifecycle(kind)])
                .await?;
        }
        Ok(())
    }

    pub async fn run_hook_by_name(
        &self,
        ctx: &CancellationToken,
        name: &str,
        kind: BindingKind,
        contexts: Vec<BindingContext>,
    ) -> anyhow::Result<()> {
        let hook = self
            .hook(name)
            .ok_or_else(|| HookError::NotFound(name.to_string()))?;
        self.run_hook(ctx, &hook, kind, contexts).await
    }

    async fn run_hook(
        &self,
        ctx: &CancellationToken,
        hook: &Hook,
        kind: BindingKind,
        contexts: Vec<BindingContext>,
    ) -> anyhow::Result<()> {
        if ctx.is_cancelled() {
            return Err(Cancelled.into());
        }
        debug!(package = %self.id, hook = %hook.name, binding = %kind, "running hook");
        let input = HookInput {
            package: self.id.clone(),
            binding: kind,
            contexts,
            values: self.values(),
            settings: self.settings(),
        };
        let output = self
            .services
            .executor
            .execute(ctx, hook, input)
            .await
            .map_err(|source| HookError::Failed {
                hook: hook.name.clone(),
                source,
            })?;
        // Work finished after cancellation must not leak into the values.
        if ctx.is_cancelled() {
            return Err(Cancelled.into());
        }
        if let Some(patch) = output.values_patch {
            self.values.lock().unwrap().apply_patch(&patch);
        }
        Ok(())
    }

    /// Create hook controllers, register schedules and locked Kubernetes
    /// monitors, and collect the synchronization runs.
    pub async fn initialize_hooks(&self) -> anyhow::Result<Vec<BindingExecutionInfo>> {
        let mut infos = Vec::new();
        for hook in &self.hooks {
            let controller = hook.controller_or_init(&self.id, &self.services);
            infos.extend(controller.enable_kubernetes_bindings().await?);
            controller.enable_schedule_bindings()?;
        }
        self.hooks_initialized.store(true, Ordering::SeqCst);
        info!(package = %self.id, syncs = infos.len(), "hooks initialized");
        Ok(infos)
    }

    /// Drop schedule and monitor registrations; the next startup rebuilds
    /// them.
    pub fn deinitialize_hooks(&self) {
        for hook in &self.hooks {
            if let Some(controller) = hook.controller() {
                controller.disable_schedule_bindings();
                controller.stop_monitors();
            }
        }
        {
            let mut sync = self.sync.lock().unwrap();
            sync.pending = 0;
            sync.scope = None;
        }
        self.hooks_initialized.store(false, Ordering::SeqCst);
        self.started.store(false, Ordering::SeqCst);
    }

    /// Unlock one monitor of `hook`, or all of them when `monitor_id` is
    /// `None`.
    pub fn unlock_kubernetes_monitors(&self, hook: &str, monitor_id: Option<&str>) {
        let Some(hook) = self.hook(hook) else {
            return;
        };
        let Some(controller) = hook.controller() else {
            return;
        };
        match monitor_id {
            Some(id) => controller.unlock_kubernetes_monitor(id),
            None => controller.unlock_kubernetes_monitors(),
        }
    }

    /// Check `settings` against the settings schema, then ask the settings
    /// check hook if the package ships one.
    pub async fn validate_settings(
        &self,
        ctx: &CancellationToken,
        settings: &Settings,
    ) -> Result<(), SettingsError> {
        if let Some(schema) = &self.files.settings_schema {
            let compiled =
                JSONSchema::compile(schema).map_err(|e| SettingsError::Schema(e.to_string()))?;
            let instance = Value::Object(settings.clone());
            if let Err(errors) = compiled.validate(&instance) {
                let messages: Vec<String> = errors
                    .map(|e| {
                        let path = e.instance_path.to_string();
                        if path.is_empty() {
                            e.to_string()
                        } else {
                            format!("{path}: {e}")
                        }
                    })
                    .collect();
                return Err(SettingsError::Invalid(messages.join("; ")));
            }
        }
        if let Some(check) = &self.settings_check {
            let verdict = self
                .services
                .executor
                .check_settings(ctx, check, settings)
                .await
                .map_err(SettingsError::Check)?;
            if let SettingsVerdict::Invalid(message) = verdict {
                return Err(SettingsError::Invalid(message));
            }
        }
        Ok(())
    }

    pub fn apply_settings(&self, settings: &Settings) {
        self.values.lock().unwrap().set_settings(settings);
    }

    pub fn summary(&self) -> PackageSummary {
        let hooks = BindingKind::ALL
            .into_iter()
            .filter_map(|kind| {
                let names: Vec<String> = self
                    .hooks_by_binding(kind)
                    .iter()
                    .map(|h| h.name.clone())
                    .collect();
                (!names.is_empty()).then(|| (kind.as_str().to_string(), names))
            })
            .collect();
        PackageSummary {
            name: self.name.clone(),
            namespace: self.namespace().to_string(),
            version: self.version.clone(),
            helm: self.is_helm(),
            hooks_initialized: self.hooks_initialized(),
            started: self.started(),
            values_checksum: self.values_checksum(),
            hooks,
        }
    }
}

/// Dump view of a loaded package.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageSummary {
    pub name: String,
    pub namespace: String,
    pub version: String,
    pub helm: bool,
    pub hooks_initialized: bool,
    pub started: bool,
    pub values_checksum: String,
    pub hooks: BTreeMap<String, Vec<String>>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing::{FakeHookExecutor, PackageTemplate, discover, hook_services};

    fn build(template: PackageTemplate, executor: Arc<FakeHookExecutor>) -> (tempfile::TempDir, Package) {
        let tmp = tempfile::tempdir().unwrap();
        template.write_to(tmp.path()).unwrap();
        let files = loader::load_package_files(tmp.path(), "web").unwrap();
        let package = Package::new(
            "ns.web",
            PackageKind::Application {
                namespace: "ns".into(),
            },
            "1.0.0",
            tmp.path(),
            files,
            discover(tmp.path()).unwrap(),
            hook_services(executor),
        );
        (tmp, package)
    }

    #[test]
    fn interrupted_synchronization_is_detected_per_round() {
        let executor = Arc::new(FakeHookExecutor::default());
        let (_tmp, package) = build(PackageTemplate::new("web"), executor);

        let scope = CancellationToken::new();
        let first = package.begin_synchronization(&scope, 2);
        package.finish_synchronization(first);
        assert!(!package.synchronization_interrupted());
        scope.cancel();
        assert!(package.synchronization_interrupted());

        let scope = CancellationToken::new();
        let second = package.begin_synchronization(&scope, 1);
        // A late run of the first round does not count for the second.
        package.finish_synchronization(first);
        scope.cancel();
        assert!(package.synchronization_interrupted());

        package.deinitialize_hooks();
        assert!(!package.synchronization_interrupted());

        let scope = CancellationToken::new();
        let third = package.begin_synchronization(&scope, 1);
        assert_ne!(second, third);
        package.finish_synchronization(third);
        scope.cancel();
        assert!(!package.synchronization_interrupted());
    }

    #[tokio::test]
    async fn runs_hooks_in_binding_order_and_applies_patches() {
        let template = PackageTemplate::new("web")
            .values(json!({"replicas": 1}))
            .hook("b.sh", "beforeHelm: 20\n")
            .hook("a.sh", "beforeHelm: 10\n")
            .hook("c.sh", "afterHelm: 1\n");
        let executor = Arc::new(FakeHookExecutor::default());
        executor.set_patch("a.sh", json!({"replicas": 2}));
        let (_tmp, package) = build(template, executor.clone());

        let before = package.values_checksum();
        package
            .run_hooks_by_binding(&CancellationToken::new(), BindingKind::BeforeHelm)
            .await
            .unwrap();
        assert_eq!(executor.calls(), vec!["a.sh", "b.sh"]);
        assert_eq!(package.values()["replicas"], 2);
        assert_ne!(before, package.values_checksum());
    }

    #[tokio::test]
    async fn cancelled_context_skips_hooks() {
        let template = PackageTemplate::new("web").hook("a.sh", "onStartup: 1\n");
        let executor = Arc::new(FakeHookExecutor::default());
        let (_tmp, package) = build(template, executor.clone());
        let ctx = CancellationToken::new();
        ctx.cancel();
        let err = package
            .run_hooks_by_binding(&ctx, BindingKind::OnStartup)
            .await
            .unwrap_err();
        assert!(crate::queue::is_cancelled(&err));
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn validates_settings_against_schema() {
        let template = PackageTemplate::new("web").settings_schema(json!({
            "type": "object",
            "properties": {"replicas": {"type": "integer", "minimum": 1}}
        }));
        let (_tmp, package) = build(template, Arc::new(FakeHookExecutor::default()));
        let ctx = CancellationToken::new();

        let good = json!({"replicas": 3}).as_object().cloned().unwrap();
        package.validate_settings(&ctx, &good).await.unwrap();

        let bad = json!({"replicas": "many"}).as_object().cloned().unwrap();
        let err = package.validate_settings(&ctx, &bad).await.unwrap_err();
        assert!(matches!(err, SettingsError::Invalid(ref msg) if msg.contains("/replicas")));
    }

    #[tokio::test]
    async fn settings_check_hook_can_reject() {
        let template = PackageTemplate::new("web").settings_check();
        let executor = Arc::new(FakeHookExecutor::default());
        executor.reject_settings("replicas must be odd");
        let (_tmp, package) = build(template, executor);
        let err = package
            .validate_settings(&CancellationToken::new(), &Settings::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "replicas must be odd");
    }

    #[test]
    fn lists_queues_with_default() {
        let template = PackageTemplate::new("web").hook(
            "pods.sh",
            "kubernetes:\n  - name: pods\n    apiVersion: v1\n    kind: Pod\n    queue: pods\n",
        );
        let (_tmp, package) = build(template, Arc::new(FakeHookExecutor::default()));
        assert_eq!(package.queues(), vec!["main".to_string(), "pods".to_string()]);
        assert_eq!(package.namespace(), "ns");
    }
}

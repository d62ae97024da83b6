//! Hook descriptors, their binding configuration and the execution seams.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use pkgmgr_types::{BindingKind, Settings};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::controller::HookController;
use super::kube::{BindingContext, ScheduleManager, WatchEventType, WatcherManager};

pub const DEFAULT_QUEUE: &str = "main";

fn default_queue() -> String {
    DEFAULT_QUEUE.to_string()
}

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NameSelector {
    #[serde(default)]
    pub match_names: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceSelector {
    #[serde(default)]
    pub name_selector: NameSelector,
}

/// `kubernetes:` entry of a hook configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesBinding {
    pub name: String,
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub namespace: NamespaceSelector,
    #[serde(default)]
    pub label_selector: LabelSelector,
    #[serde(default)]
    pub name_selector: NameSelector,
    #[serde(default = "all_event_types")]
    pub execute_hook_on_event: Vec<WatchEventType>,
    #[serde(default = "yes")]
    pub execute_hook_on_synchronization: bool,
    #[serde(default = "yes")]
    pub wait_for_synchronization: bool,
    #[serde(default)]
    pub allow_failure: bool,
    #[serde(default = "default_queue")]
    pub queue: String,
}

fn all_event_types() -> Vec<WatchEventType> {
    vec![
        WatchEventType::Added,
        WatchEventType::Modified,
        WatchEventType::Deleted,
    ]
}

/// `schedule:` entry of a hook configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleBinding {
    pub name: String,
    pub crontab: String,
    #[serde(default)]
    pub allow_failure: bool,
    #[serde(default = "default_queue")]
    pub queue: String,
}

/// Binding configuration of one hook, read from its `<hook>.yaml` sidecar
/// or from the hook's own `hook config` output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_startup: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_helm: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_helm: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_delete_helm: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schedule: Vec<ScheduleBinding>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kubernetes: Vec<KubernetesBinding>,
}

impl HookConfig {
    /// Sort key within `kind`; `None` when the hook is not bound to it.
    pub fn order(&self, kind: BindingKind) -> Option<u32> {
        match kind {
            BindingKind::OnStartup => self.on_startup,
            BindingKind::BeforeHelm => self.before_helm,
            BindingKind::AfterHelm => self.after_helm,
            BindingKind::AfterDeleteHelm => self.after_delete_helm,
            BindingKind::Schedule => (!self.schedule.is_empty()).then_some(0),
            BindingKind::OnKubernetesEvent => (!self.kubernetes.is_empty()).then_some(0),
        }
    }

    pub fn bindings(&self) -> Vec<BindingKind> {
        BindingKind::ALL
            .into_iter()
            .filter(|k| self.order(*k).is_some())
            .collect()
    }

    pub fn queues(&self) -> Vec<String> {
        let mut queues: Vec<String> = self
            .schedule
            .iter()
            .map(|s| s.queue.clone())
            .chain(self.kubernetes.iter().map(|k| k.queue.clone()))
            .collect();
        queues.sort();
        queues.dedup();
        queues
    }
}

/// A discovered, not yet bound hook.
#[derive(Debug, Clone, PartialEq)]
pub struct HookDefinition {
    pub name: String,
    pub path: PathBuf,
    pub config: HookConfig,
}

/// Hooks found in a deployed package directory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveredHooks {
    pub hooks: Vec<HookDefinition>,
    /// Executable asked to validate settings before they are applied.
    pub settings_check: Option<HookDefinition>,
}

#[async_trait]
pub trait HookLoader: Send + Sync {
    async fn load(&self, package_dir: &std::path::Path) -> anyhow::Result<DiscoveredHooks>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct HookInput {
    pub package: String,
    pub binding: BindingKind,
    pub contexts: Vec<BindingContext>,
    pub values: Value,
    pub settings: Settings,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HookOutput {
    /// RFC 7386 merge patch for the package values.
    pub values_patch: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsVerdict {
    Valid,
    Invalid(String),
}

/// Runs hook executables.
#[async_trait]
pub trait HookExecutor: Send + Sync {
    async fn execute(
        &self,
        ctx: &CancellationToken,
        hook: &Hook,
        input: HookInput,
    ) -> anyhow::Result<HookOutput>;

    async fn check_settings(
        &self,
        ctx: &CancellationToken,
        hook: &Hook,
        settings: &Settings,
    ) -> anyhow::Result<SettingsVerdict>;
}

/// Collaborators shared by every hook of every package.
#[derive(Clone)]
pub struct HookServices {
    pub executor: Arc<dyn HookExecutor>,
    pub watcher: Arc<dyn WatcherManager>,
    pub schedules: Arc<dyn ScheduleManager>,
}

/// A hook bound into a loaded package.
pub struct Hook {
    pub name: String,
    pub path: PathBuf,
    pub config: HookConfig,
    controller: OnceLock<HookController>,
}

impl std::fmt::Debug for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hook")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish()
    }
}

impl Hook {
    pub fn new(def: HookDefinition) -> Self {
        Self {
            name: def.name,
            path: def.path,
            config: def.config,
            controller: OnceLock::new(),
        }
    }

    pub fn order(&self, kind: BindingKind) -> Option<u32> {
        self.config.order(kind)
    }

    pub fn has_binding(&self, kind: BindingKind) -> bool {
        self.order(kind).is_some()
    }

    /// The controller, if hooks were initialized at least once.
    pub fn controller(&self) -> Option<&HookController> {
        self.controller.get()
    }

    pub(crate) fn controller_or_init(&self, package: &str, services: &HookServices) -> &HookController {
        self.controller.get_or_init(|| {
            HookController::new(
                package,
                &self.name,
                &self.config,
                services.watcher.clone(),
                services.schedules.clone(),
            )
        })
    }
}

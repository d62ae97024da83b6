//! Cluster-watch and cron plumbing consumed by hook controllers.

use std::collections::BTreeMap;

use async_trait::async_trait;
use pkgmgr_types::BindingKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
}

/// A live object change delivered by a started monitor.
#[derive(Debug, Clone)]
pub struct KubeEvent {
    pub monitor_id: String,
    pub event_type: WatchEventType,
    pub object: Value,
}

/// A cron tick for one crontab expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEvent {
    pub crontab: String,
}

/// What a watcher must observe for one binding.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub id: String,
    pub api_version: String,
    pub kind: String,
    pub namespaces: Vec<String>,
    pub match_labels: BTreeMap<String, String>,
    pub match_names: Vec<String>,
    pub event_types: Vec<WatchEventType>,
}

/// Watches cluster objects on behalf of hook bindings.
///
/// A monitor is created locked: `add_monitor` lists the current objects and
/// starts tracking, but events are only delivered once `start_monitor` is
/// called for its id.
#[async_trait]
pub trait WatcherManager: Send + Sync {
    async fn add_monitor(&self, config: MonitorConfig) -> anyhow::Result<Vec<Value>>;

    fn start_monitor(&self, id: &str);

    fn stop_monitor(&self, id: &str);

    /// The event stream; handed out once.
    fn take_events(&self) -> Option<mpsc::Receiver<KubeEvent>>;
}

/// Emits [`ScheduleEvent`]s for registered crontabs.
pub trait ScheduleManager: Send + Sync {
    fn add(&self, crontab: &str) -> anyhow::Result<()>;

    fn remove(&self, crontab: &str);

    fn take_events(&self) -> Option<mpsc::Receiver<ScheduleEvent>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContextType {
    Synchronization,
    Event,
    Schedule,
}

/// Payload handed to a hook describing why it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingContext {
    pub binding: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub context_type: Option<ContextType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watch_event: Option<WatchEventType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub objects: Vec<Value>,
}

impl BindingContext {
    /// Context for a lifecycle binding (OnStartup, BeforeHelm, ...).
    pub fn lifecycle(kind: BindingKind) -> Self {
        Self {
            binding: kind.as_str().to_string(),
            context_type: None,
            watch_event: None,
            object: None,
            objects: Vec::new(),
        }
    }

    pub fn synchronization(binding: &str, objects: Vec<Value>) -> Self {
        Self {
            binding: binding.to_string(),
            context_type: Some(ContextType::Synchronization),
            watch_event: None,
            object: None,
            objects,
        }
    }

    pub fn event(binding: &str, event_type: WatchEventType, object: Value) -> Self {
        Self {
            binding: binding.to_string(),
            context_type: Some(ContextType::Event),
            watch_event: Some(event_type),
            object: Some(object),
            objects: Vec::new(),
        }
    }

    pub fn schedule(binding: &str) -> Self {
        Self {
            binding: binding.to_string(),
            context_type: Some(ContextType::Schedule),
            watch_event: None,
            object: None,
            objects: Vec::new(),
        }
    }
}

/// One hook invocation fanned out by a controller.
#[derive(Debug, Clone, PartialEq)]
pub struct BindingExecutionInfo {
    pub hook: String,
    pub binding: BindingKind,
    pub binding_name: String,
    pub contexts: Vec<BindingContext>,
    pub queue: String,
    pub allow_failure: bool,
    /// Only meaningful for synchronization runs.
    pub execute_on_synchronization: bool,
    pub wait_for_synchronization: bool,
    pub monitor_id: Option<String>,
}

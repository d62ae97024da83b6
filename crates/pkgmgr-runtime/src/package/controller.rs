//! Per-hook binding state: registered monitors and crontabs.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use pkgmgr_types::BindingKind;
use tracing::debug;

use super::hooks::{HookConfig, KubernetesBinding, ScheduleBinding};
use super::kube::{
    BindingContext, BindingExecutionInfo, KubeEvent, MonitorConfig, ScheduleManager,
    WatcherManager,
};

#[derive(Default)]
struct State {
    /// monitor id -> index into `kubernetes`
    monitors: HashMap<String, usize>,
    unlocked: HashSet<String>,
    schedules_enabled: bool,
}

/// Owns the cluster-watch and cron registrations of one hook.
pub struct HookController {
    package: String,
    hook: String,
    kubernetes: Vec<KubernetesBinding>,
    schedules: Vec<ScheduleBinding>,
    watcher: Arc<dyn WatcherManager>,
    schedule_manager: Arc<dyn ScheduleManager>,
    state: Mutex<State>,
}

impl HookController {
    pub fn new(
        package: &str,
        hook: &str,
        config: &HookConfig,
        watcher: Arc<dyn WatcherManager>,
        schedule_manager: Arc<dyn ScheduleManager>,
    ) -> Self {
        Self {
            package: package.to_string(),
            hook: hook.to_string(),
            kubernetes: config.kubernetes.clone(),
            schedules: config.schedule.clone(),
            watcher,
            schedule_manager,
            state: Mutex::new(State::default()),
        }
    }

    pub fn monitor_id(&self, binding: &str) -> String {
        format!("{}/{}/{}", self.package, self.hook, binding)
    }

    /// Register a locked monitor per Kubernetes binding and return one
    /// synchronization run per binding with the objects that exist now.
    pub async fn enable_kubernetes_bindings(&self) -> anyhow::Result<Vec<BindingExecutionInfo>> {
        let mut infos = Vec::with_capacity(self.kubernetes.len());
        for (index, binding) in self.kubernetes.iter().enumerate() {
            let id = self.monitor_id(&binding.name);
            let objects = self
                .watcher
                .add_monitor(MonitorConfig {
                    id: id.clone(),
                    api_version: binding.api_version.clone(),
                    kind: binding.kind.clone(),
                    namespaces: binding.namespace.name_selector.match_names.clone(),
                    match_labels: binding.label_selector.match_labels.clone(),
                    match_names: binding.name_selector.match_names.clone(),
                    event_types: binding.execute_hook_on_event.clone(),
                })
                .await?;
            {
                let mut state = self.state.lock().unwrap();
                state.monitors.insert(id.clone(), index);
                state.unlocked.remove(&id);
            }
            debug!(
                package = %self.package,
                hook = %self.hook,
                monitor = %id,
                objects = objects.len(),
                "kubernetes monitor registered"
            );
            infos.push(BindingExecutionInfo {
                hook: self.hook.clone(),
                binding: BindingKind::OnKubernetesEvent,
                binding_name: binding.name.clone(),
                contexts: vec![BindingContext::synchronization(&binding.name, objects)],
                queue: binding.queue.clone(),
                allow_failure: binding.allow_failure,
                execute_on_synchronization: binding.execute_hook_on_synchronization,
                wait_for_synchronization: binding.wait_for_synchronization,
                monitor_id: Some(id),
            });
        }
        Ok(infos)
    }

    /// Let a monitor deliver live events.
    pub fn unlock_kubernetes_monitor(&self, id: &str) {
        let known = {
            let mut state = self.state.lock().unwrap();
            if state.monitors.contains_key(id) {
                state.unlocked.insert(id.to_string())
            } else {
                false
            }
        };
        if known {
            self.watcher.start_monitor(id);
        }
    }

    pub fn unlock_kubernetes_monitors(&self) {
        let ids: Vec<String> = self.state.lock().unwrap().monitors.keys().cloned().collect();
        for id in ids {
            self.unlock_kubernetes_monitor(&id);
        }
    }

    pub fn stop_monitors(&self) {
        let ids: Vec<String> = {
            let mut state = self.state.lock().unwrap();
            state.unlocked.clear();
            state.monitors.drain().map(|(id, _)| id).collect()
        };
        for id in ids {
            self.watcher.stop_monitor(&id);
        }
    }

    pub fn enable_schedule_bindings(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.schedules_enabled {
            return Ok(());
        }
        for binding in &self.schedules {
            self.schedule_manager.add(&binding.crontab)?;
        }
        state.schedules_enabled = true;
        Ok(())
    }

    pub fn disable_schedule_bindings(&self) {
        let mut state = self.state.lock().unwrap();
        if !state.schedules_enabled {
            return;
        }
        for binding in &self.schedules {
            self.schedule_manager.remove(&binding.crontab);
        }
        state.schedules_enabled = false;
    }

    pub fn can_handle_kube_event(&self, event: &KubeEvent) -> bool {
        let state = self.state.lock().unwrap();
        if !state.unlocked.contains(&event.monitor_id) {
            return false;
        }
        state
            .monitors
            .get(&event.monitor_id)
            .and_then(|i| self.kubernetes.get(*i))
            .is_some_and(|b| b.execute_hook_on_event.contains(&event.event_type))
    }

    pub fn handle_kube_event(&self, event: &KubeEvent) -> Vec<BindingExecutionInfo> {
        if !self.can_handle_kube_event(event) {
            return Vec::new();
        }
        let index = self.state.lock().unwrap().monitors.get(&event.monitor_id).copied();
        let Some(binding) = index.and_then(|i| self.kubernetes.get(i)) else {
            return Vec::new();
        };
        vec![BindingExecutionInfo {
            hook: self.hook.clone(),
            binding: BindingKind::OnKubernetesEvent,
            binding_name: binding.name.clone(),
            contexts: vec![BindingContext::event(
                &binding.name,
                event.event_type,
                event.object.clone(),
            )],
            queue: binding.queue.clone(),
            allow_failure: binding.allow_failure,
            execute_on_synchronization: binding.execute_hook_on_synchronization,
            wait_for_synchronization: false,
            monitor_id: Some(event.monitor_id.clone()),
        }]
    }

    pub fn can_handle_schedule_event(&self, crontab: &str) -> bool {
        self.state.lock().unwrap().schedules_enabled
            && self.schedules.iter().any(|s| s.crontab == crontab)
    }

    pub fn handle_schedule_event(&self, crontab: &str) -> Vec<BindingExecutionInfo> {
        if !self.can_handle_schedule_event(crontab) {
            return Vec::new();
        }
        self.schedules
            .iter()
            .filter(|s| s.crontab == crontab)
            .map(|s| BindingExecutionInfo {
                hook: self.hook.clone(),
                binding: BindingKind::Schedule,
                binding_name: s.name.clone(),
                contexts: vec![BindingContext::schedule(&s.name)],
                queue: s.queue.clone(),
                allow_failure: s.allow_failure,
                execute_on_synchronization: false,
                wait_for_synchronization: false,
                monitor_id: None,
            })
            .collect()
    }
}

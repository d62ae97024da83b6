//! Watcher used when the node has no cluster connection.
//!
//! Monitors are tracked so hook controllers behave normally, but every list
//! is empty and no live events are ever produced.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use pkgmgr_runtime::WatcherManager;
use pkgmgr_runtime::package::kube::{KubeEvent, MonitorConfig};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

pub struct OfflineWatcherManager {
    monitors: Mutex<BTreeMap<String, (MonitorConfig, bool)>>,
    // Kept so the receiver never observes a closed channel.
    _tx: mpsc::Sender<KubeEvent>,
    rx: Mutex<Option<mpsc::Receiver<KubeEvent>>>,
}

impl Default for OfflineWatcherManager {
    fn default() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            monitors: Mutex::new(BTreeMap::new()),
            _tx: tx,
            rx: Mutex::new(Some(rx)),
        }
    }
}

impl OfflineWatcherManager {
    /// Ids of registered monitors and whether each one is started.
    pub fn monitors(&self) -> Vec<(String, bool)> {
        self.monitors
            .lock()
            .unwrap()
            .iter()
            .map(|(id, (_, started))| (id.clone(), *started))
            .collect()
    }
}

#[async_trait]
impl WatcherManager for OfflineWatcherManager {
    async fn add_monitor(&self, config: MonitorConfig) -> anyhow::Result<Vec<Value>> {
        debug!(monitor = %config.id, kind = %config.kind, "registering offline monitor");
        self.monitors
            .lock()
            .unwrap()
            .insert(config.id.clone(), (config, false));
        Ok(Vec::new())
    }

    fn start_monitor(&self, id: &str) {
        if let Some((_, started)) = self.monitors.lock().unwrap().get_mut(id) {
            *started = true;
        }
    }

    fn stop_monitor(&self, id: &str) {
        self.monitors.lock().unwrap().remove(id);
    }

    fn take_events(&self) -> Option<mpsc::Receiver<KubeEvent>> {
        self.rx.lock().unwrap().take()
    }
}

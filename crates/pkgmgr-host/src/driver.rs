//! Desired-state driver: a YAML file listing applications and modules,
//! re-read periodically and diffed into update/remove calls.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use pkgmgr_runtime::Runtime;
use pkgmgr_types::{ApplicationSpec, ModuleSpec};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesiredState {
    #[serde(default)]
    pub applications: Vec<ApplicationSpec>,
    #[serde(default)]
    pub modules: Vec<ModuleSpec>,
}

impl DesiredState {
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let mut state: DesiredState = serde_yaml::from_str(text).context("parse desired state")?;
        for app in &mut state.applications {
            app.normalize();
        }
        Ok(state)
    }
}

/// What the driver feeds. Implemented by [`Runtime`].
pub trait DesiredStateTarget: Send + Sync {
    fn update_app(&self, spec: ApplicationSpec);
    fn update_module(&self, spec: ModuleSpec);
    fn remove_app(&self, namespace: &str, name: &str);
    fn remove_module(&self, name: &str);
}

impl DesiredStateTarget for Runtime {
    fn update_app(&self, spec: ApplicationSpec) {
        Runtime::update_app(self, spec)
    }

    fn update_module(&self, spec: ModuleSpec) {
        Runtime::update_module(self, spec)
    }

    fn remove_app(&self, namespace: &str, name: &str) {
        Runtime::remove_app(self, namespace, name)
    }

    fn remove_module(&self, name: &str) {
        Runtime::remove_module(self, name)
    }
}

#[derive(Default)]
struct Applied {
    apps: BTreeMap<String, ApplicationSpec>,
    modules: BTreeMap<String, ModuleSpec>,
}

pub struct Driver {
    path: PathBuf,
    interval: Duration,
    target: Arc<dyn DesiredStateTarget>,
    applied: Mutex<Applied>,
}

impl Driver {
    pub fn new(path: impl Into<PathBuf>, interval: Duration, target: Arc<dyn DesiredStateTarget>) -> Self {
        Self {
            path: path.into(),
            interval,
            target,
            applied: Mutex::new(Applied::default()),
        }
    }

    /// Read the file and push every difference from the last applied state.
    /// A missing file leaves everything as it is.
    pub async fn sync_once(&self) -> anyhow::Result<()> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "desired state file missing");
                return Ok(());
            }
            Err(err) => return Err(err).with_context(|| format!("read {}", self.path.display())),
        };
        let desired = DesiredState::parse(&text)?;
        self.apply(desired);
        Ok(())
    }

    pub fn apply(&self, desired: DesiredState) {
        let apps: BTreeMap<String, ApplicationSpec> = desired
            .applications
            .into_iter()
            .map(|a| (a.id(), a))
            .collect();
        let modules: BTreeMap<String, ModuleSpec> =
            desired.modules.into_iter().map(|m| (m.id(), m)).collect();

        let mut applied = self.applied.lock().unwrap();

        for (id, old) in &applied.apps {
            if !apps.contains_key(id) {
                info!(package = %id, "application removed from desired state");
                self.target.remove_app(&old.namespace, &old.name);
            }
        }
        for id in applied.modules.keys() {
            if !modules.contains_key(id) {
                info!(package = %id, "module removed from desired state");
                self.target.remove_module(id);
            }
        }
        for (id, spec) in &apps {
            if applied.apps.get(id) != Some(spec) {
                debug!(package = %id, version = %spec.version, "application changed");
                self.target.update_app(spec.clone());
            }
        }
        for (id, spec) in &modules {
            if applied.modules.get(id) != Some(spec) {
                debug!(package = %id, version = %spec.version, "module changed");
                self.target.update_module(spec.clone());
            }
        }

        applied.apps = apps;
        applied.modules = modules;
    }

    /// Poll the file until `ctx` is cancelled.
    pub fn spawn(self: Arc<Self>, ctx: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(path = %self.path.display(), interval = ?self.interval, "desired state driver started");
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = ctx.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = self.sync_once().await {
                            warn!(error = %format!("{err:#}"), "desired state sync failed");
                        }
                    }
                }
            }
            info!("desired state driver stopped");
        })
    }
}

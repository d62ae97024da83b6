//! Per-package internal condition state and its publication loop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pkgmgr_types::condition::{internal, reason};
use pkgmgr_types::Condition;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::condmap::{Input, Mapper};
use crate::error::ConditionError;
use crate::queue::is_cancelled;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Status {
    pub version: String,
    pub conditions: Vec<Condition>,
}

impl Default for Status {
    fn default() -> Self {
        Self {
            version: String::new(),
            conditions: internal::ALL.iter().map(|n| Condition::unknown(*n)).collect(),
        }
    }
}

impl Status {
    pub fn condition(&self, name: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.name == name)
    }

    /// Store `cond`, returning whether anything observable changed.
    fn apply(&mut self, cond: Condition) -> bool {
        match self.conditions.iter_mut().find(|c| c.name == cond.name) {
            Some(existing) => {
                if existing.differs(&cond) {
                    *existing = cond;
                    true
                } else {
                    false
                }
            }
            None => {
                self.conditions.push(cond);
                true
            }
        }
    }

    fn reset(&mut self, names: &[&str]) -> bool {
        let mut changed = false;
        for cond in self.conditions.iter_mut() {
            if names.contains(&cond.name.as_str()) {
                let unknown = Condition::unknown(cond.name.clone());
                if cond.differs(&unknown) {
                    *cond = unknown;
                    changed = true;
                }
            }
        }
        changed
    }
}

/// What the declarative object's status looks like.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub internal_conditions: Vec<Condition>,
}

/// Read/write access to the declarative objects the status is published on.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Current published status; default when nothing was published yet.
    async fn load(&self, name: &str) -> anyhow::Result<PublishedStatus>;

    async fn publish(&self, name: &str, status: PublishedStatus) -> anyhow::Result<()>;
}

/// Owns internal conditions and signals every change on a channel.
pub struct StatusService {
    statuses: Mutex<HashMap<String, Status>>,
    tx: mpsc::Sender<String>,
    rx: Mutex<Option<mpsc::Receiver<String>>>,
}

impl StatusService {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            statuses: Mutex::new(HashMap::new()),
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Receiver of change notifications. Can be taken once.
    pub fn take_receiver(&self) -> Option<mpsc::Receiver<String>> {
        self.rx.lock().unwrap().take()
    }

    fn notify(&self, name: &str) {
        if let Err(err) = self.tx.try_send(name.to_string()) {
            warn!(package = name, error = %err, "status change notification dropped");
        }
    }

    /// Run `f` against the entry for `name`, creating a seeded entry on first
    /// use, and notify once if it reports a change.
    fn mutate(&self, name: &str, f: impl FnOnce(&mut Status) -> bool) {
        let changed = {
            let mut statuses = self.statuses.lock().unwrap();
            f(statuses.entry(name.to_string()).or_default())
        };
        if changed {
            self.notify(name);
        }
    }

    pub fn set_condition_true(&self, name: &str, condition: &str) {
        self.mutate(name, |s| s.apply(Condition::ok(condition)));
    }

    pub fn set_conditions(&self, name: &str, conditions: Vec<Condition>) {
        self.mutate(name, |s| {
            conditions
                .into_iter()
                .fold(false, |changed, cond| s.apply(cond) | changed)
        });
    }

    /// Fold every condition found along the error chain into the status.
    /// Cancellation leaves the status untouched; an error without any
    /// condition payload marks the package as not ready in runtime.
    pub fn handle_error(&self, name: &str, err: &anyhow::Error) {
        if is_cancelled(err) {
            return;
        }
        let mut conditions: Vec<Condition> = err
            .chain()
            .filter_map(|e| e.downcast_ref::<ConditionError>())
            .flat_map(|e| e.conditions.iter().cloned())
            .collect();
        if conditions.is_empty() {
            conditions.push(Condition::failed(
                internal::READY_IN_RUNTIME,
                reason::TASK_FAILED,
                format!("{err:#}"),
            ));
        }
        debug!(package = name, error = %format!("{err:#}"), "applying error conditions");
        self.set_conditions(name, conditions);
    }

    pub fn set_version(&self, name: &str, version: &str) {
        self.mutate(name, |s| {
            if s.version == version {
                return false;
            }
            s.version = version.to_string();
            true
        });
    }

    /// Reset the conditions owned by a running package to Unknown.
    pub fn clear_runtime_conditions(&self, name: &str) {
        self.clear_conditions(name, &internal::RUNTIME_SCOPED);
    }

    pub fn clear_conditions(&self, name: &str, names: &[&str]) {
        self.mutate(name, |s| s.reset(names));
    }

    pub fn get_status(&self, name: &str) -> Option<Status> {
        self.statuses.lock().unwrap().get(name).cloned()
    }

    pub fn delete(&self, name: &str) {
        self.statuses.lock().unwrap().remove(name);
    }

    /// Spawn the loop that maps and publishes the status of every package
    /// named on `rx`.
    pub fn start(
        self: &Arc<Self>,
        ctx: CancellationToken,
        mut rx: mpsc::Receiver<String>,
        store: Arc<dyn StatusStore>,
        mapper: Mapper,
    ) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let name = tokio::select! {
                    _ = ctx.cancelled() => break,
                    next = rx.recv() => match next {
                        Some(name) => name,
                        None => break,
                    },
                };
                if let Err(err) = service.publish(&name, store.as_ref(), &mapper).await {
                    warn!(package = %name, error = %format!("{err:#}"), "failed to publish status");
                }
            }
            debug!("status loop stopped");
        })
    }

    async fn publish(
        &self,
        name: &str,
        store: &dyn StatusStore,
        mapper: &Mapper,
    ) -> anyhow::Result<()> {
        let Some(status) = self.get_status(name) else {
            return Ok(());
        };
        let previous = store.load(name).await?;
        let version_changed = previous
            .version
            .as_deref()
            .is_some_and(|v| v != status.version && !status.version.is_empty());
        let conditions = mapper.map(&Input {
            internal: &status.conditions,
            external: &previous.conditions,
            version_changed,
        });
        let version = if !status.version.is_empty() && mapper.should_commit_version(&status.conditions) {
            Some(status.version.clone())
        } else {
            previous.version
        };
        store
            .publish(
                name,
                PublishedStatus {
                    version,
                    conditions,
                    internal_conditions: status.conditions,
                },
            )
            .await
    }
}

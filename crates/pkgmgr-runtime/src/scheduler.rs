//! Enable/disable gate for every registered package.
//!
//! A package becomes eligible once its bundle is loaded (`converge`), its
//! constraints hold against the live cluster facts and all of its
//! dependencies are enabled and have completed a schedule. Transitions are
//! published as [`SchedulerEvent`]s; an enabled package that was marked dirty
//! gets another `Schedule` so new settings reach the pipeline.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pkgmgr_types::Constraints;
use semver::{Version, VersionReq};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Notify, mpsc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cluster::ClusterInfo;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstraintError {
    #[error("deckhouse version {actual} does not satisfy {required}")]
    DeckhouseVersion {
        required: VersionReq,
        actual: Version,
    },
    #[error("kubernetes version {actual} does not satisfy {required}")]
    KubernetesVersion {
        required: VersionReq,
        actual: Version,
    },
    #[error("cluster is not bootstrapped")]
    NotBootstrapped,
    #[error("{what} unavailable: {message}")]
    Unavailable { what: &'static str, message: String },
    #[error("dependency {0} is not ready")]
    Dependency(String),
}

/// Snapshot of the cluster facts, read once per evaluation.
#[derive(Debug, Clone)]
pub struct ClusterFacts {
    pub deckhouse: Result<Version, String>,
    pub kubernetes: Result<Version, String>,
    pub bootstrapped: Result<bool, String>,
}

impl ClusterFacts {
    pub fn read(cluster: &dyn ClusterInfo) -> Self {
        Self {
            deckhouse: cluster.deckhouse_version().map_err(|e| format!("{e:#}")),
            kubernetes: cluster.kubernetes_version().map_err(|e| format!("{e:#}")),
            bootstrapped: cluster.bootstrapped().map_err(|e| format!("{e:#}")),
        }
    }
}

fn check_version(
    what: &'static str,
    required: Option<&VersionReq>,
    actual: &Result<Version, String>,
    err: impl FnOnce(VersionReq, Version) -> ConstraintError,
) -> Result<(), ConstraintError> {
    let Some(required) = required else {
        return Ok(());
    };
    let actual = actual.as_ref().map_err(|message| ConstraintError::Unavailable {
        what,
        message: message.clone(),
    })?;
    if required.matches(actual) {
        Ok(())
    } else {
        Err(err(required.clone(), actual.clone()))
    }
}

/// Evaluate the cluster predicates of `c`. Dependencies are not checked.
pub fn check_constraints(c: &Constraints, facts: &ClusterFacts) -> Result<(), ConstraintError> {
    check_version(
        "deckhouse version",
        c.deckhouse.as_ref(),
        &facts.deckhouse,
        |required, actual| ConstraintError::DeckhouseVersion { required, actual },
    )?;
    check_version(
        "kubernetes version",
        c.kubernetes.as_ref(),
        &facts.kubernetes,
        |required, actual| ConstraintError::KubernetesVersion { required, actual },
    )?;
    if c.bootstrapped {
        match &facts.bootstrapped {
            Ok(true) => {}
            Ok(false) => return Err(ConstraintError::NotBootstrapped),
            Err(message) => {
                return Err(ConstraintError::Unavailable {
                    what: "bootstrap status",
                    message: message.clone(),
                });
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SchedulerEventKind {
    Schedule,
    Disable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerEvent {
    pub kind: SchedulerEventKind,
    pub name: String,
    /// Why a package was disabled.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct Node {
    constraints: Constraints,
    converged: bool,
    enabled: bool,
    dirty: bool,
    completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
}

pub struct Scheduler {
    cluster: Arc<dyn ClusterInfo>,
    interval: Duration,
    nodes: Mutex<BTreeMap<String, Node>>,
    notify: Notify,
    tx: Mutex<Option<mpsc::UnboundedSender<SchedulerEvent>>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<SchedulerEvent>>>,
}

impl Scheduler {
    pub fn new(cluster: Arc<dyn ClusterInfo>, interval: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            cluster,
            interval,
            nodes: Mutex::new(BTreeMap::new()),
            notify: Notify::new(),
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
        }
    }

    /// The decision stream. Handed out once; it ends after [`Self::stop`].
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<SchedulerEvent>> {
        self.rx.lock().unwrap().take()
    }

    /// Check `c` against the live cluster facts.
    pub fn check_constraints(&self, c: &Constraints) -> Result<(), ConstraintError> {
        check_constraints(c, &ClusterFacts::read(self.cluster.as_ref()))
    }

    /// Register `name`, or reset it for a new version. The node stays
    /// ineligible until [`Self::converge`].
    pub fn add_node(&self, name: &str, constraints: Constraints) {
        self.nodes.lock().unwrap().insert(
            name.to_string(),
            Node {
                constraints,
                dirty: true,
                ..Node::default()
            },
        );
    }

    /// Replace the constraints of a known node without resetting it.
    pub fn update_constraints(&self, name: &str, constraints: Constraints) {
        if let Some(node) = self.nodes.lock().unwrap().get_mut(name) {
            node.constraints = constraints;
        }
    }

    /// The bundle is loaded; the node may be enabled from now on.
    pub fn converge(&self, name: &str) {
        self.touch(name, |node| {
            node.converged = true;
            node.dirty = true;
        });
    }

    pub fn remove_node(&self, name: &str) {
        let removed = {
            let mut nodes = self.nodes.lock().unwrap();
            let removed = nodes.remove(name).is_some();
            if removed {
                mark_dependents(&mut nodes, name);
            }
            removed
        };
        if removed {
            self.notify.notify_one();
        }
    }

    pub fn reschedule(&self, name: &str) {
        self.touch(name, |node| node.dirty = true);
    }

    /// Acknowledge that the last `Schedule` for `name` ran to completion.
    pub fn complete(&self, name: &str) {
        let known = {
            let mut nodes = self.nodes.lock().unwrap();
            match nodes.get_mut(name) {
                Some(node) => {
                    node.completed = true;
                    mark_dependents(&mut nodes, name);
                    true
                }
                None => false,
            }
        };
        if known {
            self.notify.notify_one();
        }
    }

    fn touch(&self, name: &str, f: impl FnOnce(&mut Node)) {
        let known = match self.nodes.lock().unwrap().get_mut(name) {
            Some(node) => {
                f(node);
                true
            }
            None => false,
        };
        if known {
            self.notify.notify_one();
        }
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.nodes
            .lock()
            .unwrap()
            .get(name)
            .is_some_and(|n| n.enabled)
    }

    /// Recompute decisions. With `all`, every node is re-checked against the
    /// global predicates; otherwise only dirty nodes can produce a
    /// `Schedule` without a transition.
    pub fn evaluate(&self, all: bool) {
        let facts = ClusterFacts::read(self.cluster.as_ref());
        let events = {
            let mut nodes = self.nodes.lock().unwrap();
            decide(&mut nodes, &facts, all)
        };
        if events.is_empty() {
            return;
        }
        let tx = self.tx.lock().unwrap().clone();
        let Some(tx) = tx else {
            return;
        };
        for event in events {
            match event.kind {
                SchedulerEventKind::Schedule => info!(package = %event.name, "package scheduled"),
                SchedulerEventKind::Disable => info!(
                    package = %event.name,
                    reason = event.error.as_deref().unwrap_or(""),
                    "package disabled"
                ),
            }
            if tx.send(event).is_err() {
                debug!("scheduler events receiver dropped");
                return;
            }
        }
    }

    /// Evaluate on every change notification and on the periodic interval
    /// until `ctx` is cancelled.
    pub async fn run(self: Arc<Self>, ctx: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                _ = self.notify.notified() => self.evaluate(false),
                _ = ticker.tick() => self.evaluate(true),
            }
        }
        debug!("scheduler loop stopped");
    }

    /// Close the event stream.
    pub fn stop(&self) {
        self.tx.lock().unwrap().take();
    }

    pub fn dump(&self) -> Result<String, serde_yaml::Error> {
        let nodes = self.nodes.lock().unwrap().clone();
        serde_yaml::to_string(&nodes)
    }
}

fn mark_dependents(nodes: &mut BTreeMap<String, Node>, name: &str) {
    for node in nodes.values_mut() {
        if node.constraints.dependencies.iter().any(|d| d == name) {
            node.dirty = true;
        }
    }
}

/// Run decisions to a fixed point so a dependency enabled in this pass can
/// enable its dependents in the same pass.
fn decide(
    nodes: &mut BTreeMap<String, Node>,
    facts: &ClusterFacts,
    all: bool,
) -> Vec<SchedulerEvent> {
    let mut events = Vec::new();
    let names: Vec<String> = nodes.keys().cloned().collect();
    for _ in 0..=names.len() {
        let mut changed = false;
        for name in &names {
            let Some(node) = nodes.get(name) else {
                continue;
            };
            if !all && !node.dirty && !node.enabled {
                continue;
            }
            let verdict = if !node.converged {
                Err(None)
            } else {
                check_constraints(&node.constraints, facts)
                    .and_then(|_| {
                        node.constraints
                            .dependencies
                            .iter()
                            .find(|dep| !nodes.get(*dep).is_some_and(|d| d.enabled && d.completed))
                            .map_or(Ok(()), |dep| Err(ConstraintError::Dependency(dep.clone())))
                    })
                    .map_err(|e| Some(e.to_string()))
            };

            let Some(node) = nodes.get_mut(name) else {
                continue;
            };
            match verdict {
                Ok(()) => {
                    node.last_error = None;
                    if !node.enabled || node.dirty {
                        node.enabled = true;
                        node.dirty = false;
                        changed = true;
                        events.push(SchedulerEvent {
                            kind: SchedulerEventKind::Schedule,
                            name: name.clone(),
                            error: None,
                        });
                    }
                }
                Err(error) => {
                    node.dirty = false;
                    node.last_error = error.clone();
                    if node.enabled {
                        node.enabled = false;
                        node.completed = false;
                        changed = true;
                        events.push(SchedulerEvent {
                            kind: SchedulerEventKind::Disable,
                            name: name.clone(),
                            error,
                        });
                    }
                }
            }
        }
        if !changed {
            break;
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticCluster;

    fn constraints(deckhouse: Option<&str>, deps: &[&str]) -> Constraints {
        Constraints {
            deckhouse: deckhouse.map(|r| VersionReq::parse(r).unwrap()),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            ..Constraints::default()
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SchedulerEvent>) -> Vec<(SchedulerEventKind, String)> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push((ev.kind, ev.name));
        }
        out
    }

    #[test]
    fn pure_check_reports_getter_failures() {
        let facts = ClusterFacts {
            deckhouse: Err("api down".into()),
            kubernetes: Ok(Version::new(1, 30, 0)),
            bootstrapped: Ok(false),
        };
        let err = check_constraints(&constraints(Some(">=1.60"), &[]), &facts).unwrap_err();
        assert!(matches!(err, ConstraintError::Unavailable { .. }));
        assert!(err.to_string().contains("api down"));

        let bootstrap = Constraints {
            bootstrapped: true,
            ..Constraints::default()
        };
        assert_eq!(
            check_constraints(&bootstrap, &facts),
            Err(ConstraintError::NotBootstrapped)
        );
        assert!(check_constraints(&Constraints::default(), &facts).is_ok());
    }

    #[test]
    fn version_range_mismatch() {
        let cluster = Arc::new(StaticCluster::new("1.70.0", "1.30.0", true));
        let scheduler = Scheduler::new(cluster, Duration::from_secs(10));
        let err = scheduler
            .check_constraints(&constraints(Some(">=2.0"), &[]))
            .unwrap_err();
        assert!(matches!(err, ConstraintError::DeckhouseVersion { .. }));
        assert!(scheduler.check_constraints(&constraints(Some(">=1.60"), &[])).is_ok());
    }

    #[test]
    fn schedules_after_converge_only() {
        let cluster = Arc::new(StaticCluster::new("1.70.0", "1.30.0", true));
        let scheduler = Scheduler::new(cluster, Duration::from_secs(10));
        let mut rx = scheduler.take_events().unwrap();

        scheduler.add_node("ns.web", Constraints::default());
        scheduler.evaluate(true);
        assert!(drain(&mut rx).is_empty());

        scheduler.converge("ns.web");
        scheduler.evaluate(false);
        assert_eq!(drain(&mut rx), vec![(SchedulerEventKind::Schedule, "ns.web".into())]);

        // Enabled and clean: nothing new.
        scheduler.evaluate(true);
        assert!(drain(&mut rx).is_empty());

        scheduler.reschedule("ns.web");
        scheduler.evaluate(false);
        assert_eq!(drain(&mut rx), vec![(SchedulerEventKind::Schedule, "ns.web".into())]);
    }

    #[test]
    fn disables_when_cluster_facts_change() {
        let cluster = Arc::new(StaticCluster::new("1.70.0", "1.30.0", true));
        let scheduler = Scheduler::new(cluster.clone(), Duration::from_secs(10));
        let mut rx = scheduler.take_events().unwrap();
        scheduler.add_node("web", constraints(Some(">=1.60"), &[]));
        scheduler.converge("web");
        scheduler.evaluate(false);
        drain(&mut rx);

        cluster.set_deckhouse("1.50.0");
        scheduler.evaluate(true);
        assert_eq!(drain(&mut rx), vec![(SchedulerEventKind::Disable, "web".into())]);
        assert!(!scheduler.is_enabled("web"));

        cluster.set_deckhouse("1.71.0");
        scheduler.evaluate(true);
        assert_eq!(drain(&mut rx), vec![(SchedulerEventKind::Schedule, "web".into())]);
    }

    #[test]
    fn dependents_wait_for_completion() {
        let cluster = Arc::new(StaticCluster::new("1.70.0", "1.30.0", true));
        let scheduler = Scheduler::new(cluster, Duration::from_secs(10));
        let mut rx = scheduler.take_events().unwrap();
        scheduler.add_node("app", constraints(None, &["db"]));
        scheduler.add_node("db", Constraints::default());
        scheduler.converge("app");
        scheduler.converge("db");
        scheduler.evaluate(false);
        assert_eq!(drain(&mut rx), vec![(SchedulerEventKind::Schedule, "db".into())]);

        scheduler.complete("db");
        scheduler.evaluate(false);
        assert_eq!(drain(&mut rx), vec![(SchedulerEventKind::Schedule, "app".into())]);

        scheduler.remove_node("db");
        scheduler.evaluate(false);
        assert_eq!(drain(&mut rx), vec![(SchedulerEventKind::Disable, "app".into())]);
    }

    #[test]
    fn stop_closes_stream() {
        let cluster = Arc::new(StaticCluster::new("1.70.0", "1.30.0", true));
        let scheduler = Scheduler::new(cluster, Duration::from_secs(10));
        let mut rx = scheduler.take_events().unwrap();
        scheduler.stop();
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_reacts_to_reschedule() {
        let cluster = Arc::new(StaticCluster::new("1.70.0", "1.30.0", true));
        let scheduler = Arc::new(Scheduler::new(cluster, Duration::from_secs(10)));
        let mut rx = scheduler.take_events().unwrap();
        let ctx = CancellationToken::new();
        let handle = tokio::spawn(scheduler.clone().run(ctx.clone()));

        scheduler.add_node("web", Constraints::default());
        scheduler.converge("web");
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, SchedulerEventKind::Schedule);

        ctx.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn dump_lists_nodes() {
        let cluster = Arc::new(StaticCluster::new("1.70.0", "1.30.0", true));
        let scheduler = Scheduler::new(cluster, Duration::from_secs(10));
        scheduler.add_node("web", Constraints::default());
        let yaml = scheduler.dump().unwrap();
        assert!(yaml.contains("web:"));
        assert!(yaml.contains("converged: false"));
    }
}

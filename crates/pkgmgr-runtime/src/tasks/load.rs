use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use anyhow::Context;
use async_trait::async_trait;
use pkgmgr_types::condition::{internal, reason};
use pkgmgr_types::{Condition, Constraints};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::fail;
use crate::installer::Bundle;
use crate::lifecycle::Store;
use crate::package::hooks::{HookLoader, HookServices};
use crate::package::loader::load_package_files;
use crate::package::{Package, PackageKind};
use crate::queue::{Cancelled, Task};
use crate::scheduler::Scheduler;
use crate::status::StatusService;

/// Parse the deployed bundle, discover its hooks and publish the loaded
/// package.
pub struct Load {
    pub bundle: Bundle,
    pub kind: PackageKind,
    pub deployed: PathBuf,
    /// Constraints from the desired state; they win over the bundle's own.
    pub constraints: Constraints,
    pub loader: Arc<dyn HookLoader>,
    pub services: HookServices,
    pub store: Arc<RwLock<Store<Package>>>,
    pub status: Arc<StatusService>,
    pub scheduler: Arc<Scheduler>,
}

fn merge_constraints(desired: &Constraints, bundled: &Constraints) -> Constraints {
    let mut dependencies = desired.dependencies.clone();
    for dep in &bundled.dependencies {
        if !dependencies.contains(dep) {
            dependencies.push(dep.clone());
        }
    }
    Constraints {
        deckhouse: desired.deckhouse.clone().or_else(|| bundled.deckhouse.clone()),
        kubernetes: desired
            .kubernetes
            .clone()
            .or_else(|| bundled.kubernetes.clone()),
        bootstrapped: desired.bootstrapped || bundled.bootstrapped,
        dependencies,
    }
}

#[async_trait]
impl Task for Load {
    fn name(&self) -> String {
        format!("Load({}@{})", self.bundle.id, self.bundle.version)
    }

    async fn execute(&self, ctx: &CancellationToken) -> anyhow::Result<()> {
        let id = &self.bundle.id;
        let dir = self.deployed.join(id);

        let files = {
            let dir = dir.clone();
            let name = self.bundle.name.clone();
            tokio::task::spawn_blocking(move || load_package_files(&dir, &name))
                .await
                .context("load task panicked")
                .and_then(|r| r.map_err(anyhow::Error::from))
                .map_err(|e| fail(ctx, internal::READY_IN_RUNTIME, reason::LOAD_FAILED, e))?
        };
        let discovered = self
            .loader
            .load(&dir)
            .await
            .context("discover hooks")
            .map_err(|e| fail(ctx, internal::READY_IN_RUNTIME, reason::LOAD_FAILED, e))?;

        let package = Package::new(
            id,
            self.kind.clone(),
            &self.bundle.version,
            &dir,
            files,
            discovered,
            self.services.clone(),
        );
        let constraints = merge_constraints(&self.constraints, package.requirements());
        let hooks = package.hooks().len();

        {
            let mut store = self.store.write().unwrap();
            // A newer event may have replaced this version while we parsed.
            if ctx.is_cancelled() {
                return Err(Cancelled.into());
            }
            store.set_loaded(id, Arc::new(package));
        }
        info!(package = %id, version = %self.bundle.version, hooks, "package loaded");

        self.scheduler.update_constraints(id, constraints);
        self.status.set_version(id, &self.bundle.version);
        self.status
            .set_conditions(id, vec![Condition::ok(internal::WAIT_CONVERGE)]);
        self.scheduler.converge(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use semver::VersionReq;

    use super::*;

    #[test]
    fn desired_constraints_take_precedence() {
        let desired = Constraints {
            deckhouse: Some(VersionReq::parse(">=1.60").unwrap()),
            dependencies: vec!["db".into()],
            ..Constraints::default()
        };
        let bundled = Constraints {
            deckhouse: Some(VersionReq::parse(">=1.50").unwrap()),
            kubernetes: Some(VersionReq::parse(">=1.28").unwrap()),
            bootstrapped: true,
            dependencies: vec!["db".into(), "cache".into()],
        };
        let merged = merge_constraints(&desired, &bundled);
        assert_eq!(merged.deckhouse, desired.deckhouse);
        assert_eq!(merged.kubernetes, bundled.kubernetes);
        assert!(merged.bootstrapped);
        assert_eq!(merged.dependencies, vec!["db".to_string(), "cache".to_string()]);
    }
}

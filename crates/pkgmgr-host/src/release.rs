//! Release service driving the helm CLI.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use pkgmgr_runtime::queue::Cancelled;
use pkgmgr_runtime::{Package, ReleaseError, ReleaseService};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct Monitor {
    paused: bool,
}

pub struct HelmReleaseService {
    helm_bin: PathBuf,
    monitors: Mutex<HashMap<String, Monitor>>,
}

impl HelmReleaseService {
    pub fn new(helm_bin: impl Into<PathBuf>) -> Self {
        Self {
            helm_bin: helm_bin.into(),
            monitors: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_paused(&self, id: &str) -> bool {
        self.monitors
            .lock()
            .unwrap()
            .get(id)
            .is_some_and(|m| m.paused)
    }

    /// Write the package values to a temp file helm can read with `--values`.
    fn values_file(package: &Package) -> Result<tempfile::NamedTempFile, ReleaseError> {
        let file = tempfile::Builder::new()
            .prefix("pkgmgr-values-")
            .suffix(".json")
            .tempfile()
            .map_err(|e| ReleaseError::Other(e.into()))?;
        serde_json::to_writer(file.as_file(), &package.values())
            .map_err(|e| ReleaseError::Other(e.into()))?;
        Ok(file)
    }

    async fn helm(
        &self,
        ctx: Option<&CancellationToken>,
        op: &'static str,
        args: Vec<String>,
    ) -> Result<String, ReleaseError> {
        debug!(op, ?args, "running helm");
        let child = Command::new(&self.helm_bin)
            .args(&args)
            .kill_on_drop(true)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ReleaseError::Helm {
                op,
                message: format!("spawn {}: {e}", self.helm_bin.display()),
            })?;

        let wait = child.wait_with_output();
        let output = match ctx {
            Some(ctx) => tokio::select! {
                _ = ctx.cancelled() => return Err(ReleaseError::Other(Cancelled.into())),
                out = wait => out,
            },
            None => wait.await,
        }
        .map_err(|e| ReleaseError::Helm {
            op,
            message: e.to_string(),
        })?;

        if !output.status.success() {
            return Err(ReleaseError::Helm {
                op,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn chart_args(cmd: &str, namespace: &str, package: &Package, values: &tempfile::NamedTempFile) -> Vec<String> {
        vec![
            cmd.to_string(),
            package.name().to_string(),
            package.path().display().to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
            "--values".to_string(),
            values.path().display().to_string(),
        ]
    }
}

#[async_trait]
impl ReleaseService for HelmReleaseService {
    async fn upgrade(
        &self,
        ctx: &CancellationToken,
        namespace: &str,
        package: &Package,
    ) -> Result<(), ReleaseError> {
        if !package.is_helm() {
            return Err(ReleaseError::NotHelm);
        }
        let values = Self::values_file(package)?;
        let mut args = Self::chart_args("upgrade", namespace, package, &values);
        args.extend(["--install".to_string(), "--create-namespace".to_string()]);
        self.helm(Some(ctx), "upgrade", args).await?;

        self.monitors
            .lock()
            .unwrap()
            .entry(package.id().to_string())
            .or_default();
        info!(package = %package.id(), %namespace, version = %package.version(), "release upgraded");
        Ok(())
    }

    async fn delete(
        &self,
        ctx: &CancellationToken,
        namespace: &str,
        release: &str,
    ) -> Result<(), ReleaseError> {
        let args = vec![
            "uninstall".to_string(),
            release.to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
        ];
        match self.helm(Some(ctx), "uninstall", args).await {
            Err(ReleaseError::Helm { message, .. }) if message.contains("not found") => {
                debug!(%release, "release already gone");
                Ok(())
            }
            Err(err) => Err(err),
            Ok(_) => {
                info!(%release, %namespace, "release deleted");
                Ok(())
            }
        }
    }

    async fn render(&self, namespace: &str, package: &Package) -> Result<String, ReleaseError> {
        if !package.is_helm() {
            return Err(ReleaseError::NotHelm);
        }
        let values = Self::values_file(package)?;
        let args = Self::chart_args("template", namespace, package, &values);
        self.helm(None, "template", args).await
    }

    fn remove_monitor(&self, id: &str) {
        self.monitors.lock().unwrap().remove(id);
    }

    fn has_monitor(&self, id: &str) -> bool {
        self.monitors.lock().unwrap().contains_key(id)
    }

    fn pause_monitor(&self, id: &str) {
        if let Some(monitor) = self.monitors.lock().unwrap().get_mut(id) {
            monitor.paused = true;
        }
    }

    fn resume_monitor(&self, id: &str) {
        if let Some(monitor) = self.monitors.lock().unwrap().get_mut(id) {
            monitor.paused = false;
        }
    }
}

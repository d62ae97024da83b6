//! Runs hook executables as child processes.
//!
//! Inputs are written as JSON files into a per-run temp dir and handed over
//! through environment variables; a hook answers by writing a JSON merge
//! patch to `VALUES_JSON_PATCH_PATH`.

use std::path::Path;
use std::process::{Output, Stdio};

use anyhow::{Context, bail};
use async_trait::async_trait;
use pkgmgr_runtime::HookExecutor;
use pkgmgr_runtime::package::hooks::{Hook, HookInput, HookOutput, SettingsVerdict};
use pkgmgr_runtime::queue::Cancelled;
use pkgmgr_types::Settings;
use serde_json::Value;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const BINDING_CONTEXT_PATH: &str = "BINDING_CONTEXT_PATH";
pub const VALUES_PATH: &str = "VALUES_PATH";
pub const CONFIG_VALUES_PATH: &str = "CONFIG_VALUES_PATH";
pub const VALUES_JSON_PATCH_PATH: &str = "VALUES_JSON_PATCH_PATH";

#[derive(Debug, Default)]
pub struct ShellHookExecutor;

fn write_json(dir: &Path, name: &str, value: &impl serde::Serialize) -> anyhow::Result<std::path::PathBuf> {
    let path = dir.join(name);
    let body = serde_json::to_vec(value).context("encode hook input")?;
    std::fs::write(&path, body).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

/// Wait for `cmd`, killing the child when `ctx` is cancelled first.
async fn run(ctx: &CancellationToken, hook: &Hook, mut cmd: Command) -> anyhow::Result<Output> {
    cmd.kill_on_drop(true)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = hook.path.parent() {
        cmd.current_dir(dir);
    }
    let child = cmd
        .spawn()
        .with_context(|| format!("spawn hook {}", hook.path.display()))?;
    tokio::select! {
        _ = ctx.cancelled() => {
            debug!(hook = %hook.name, "hook cancelled, killing process");
            Err(Cancelled.into())
        }
        out = child.wait_with_output() => out.with_context(|| format!("wait for hook {}", hook.name)),
    }
}

fn stderr_tail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    } else {
        stderr.to_string()
    }
}

#[async_trait]
impl HookExecutor for ShellHookExecutor {
    async fn execute(
        &self,
        ctx: &CancellationToken,
        hook: &Hook,
        input: HookInput,
    ) -> anyhow::Result<HookOutput> {
        let tmp = tempfile::Builder::new()
            .prefix("pkgmgr-hook-")
            .tempdir()
            .context("create hook temp dir")?;
        let contexts = write_json(tmp.path(), "binding_context.json", &input.contexts)?;
        let values = write_json(tmp.path(), "values.json", &input.values)?;
        let config = write_json(tmp.path(), "config_values.json", &input.settings)?;
        let patch = tmp.path().join("values_patch.json");

        let mut cmd = Command::new(&hook.path);
        cmd.env(BINDING_CONTEXT_PATH, &contexts)
            .env(VALUES_PATH, &values)
            .env(CONFIG_VALUES_PATH, &config)
            .env(VALUES_JSON_PATCH_PATH, &patch)
            .env("PACKAGE_NAME", &input.package)
            .env("BINDING", input.binding.as_str());

        debug!(package = %input.package, hook = %hook.name, binding = input.binding.as_str(), "running hook");
        let output = run(ctx, hook, cmd).await?;
        if !output.status.success() {
            bail!("hook {} exited with {}: {}", hook.name, output.status, stderr_tail(&output));
        }

        let values_patch = match tokio::fs::read(&patch).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => None,
            Ok(bytes) => Some(
                serde_json::from_slice::<Value>(&bytes)
                    .with_context(|| format!("parse values patch of hook {}", hook.name))?,
            ),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => return Err(err).context("read values patch"),
        };
        Ok(HookOutput { values_patch })
    }

    async fn check_settings(
        &self,
        ctx: &CancellationToken,
        hook: &Hook,
        settings: &Settings,
    ) -> anyhow::Result<SettingsVerdict> {
        let tmp = tempfile::Builder::new()
            .prefix("pkgmgr-check-")
            .tempdir()
            .context("create settings check temp dir")?;
        let config = write_json(tmp.path(), "config_values.json", settings)?;

        let mut cmd = Command::new(&hook.path);
        cmd.env(CONFIG_VALUES_PATH, &config);
        let output = run(ctx, hook, cmd).await?;
        if output.status.success() {
            return Ok(SettingsVerdict::Valid);
        }
        let message = stderr_tail(&output);
        warn!(hook = %hook.name, %message, "settings rejected");
        Ok(SettingsVerdict::Invalid(if message.is_empty() {
            format!("settings check exited with {}", output.status)
        } else {
            message
        }))
    }
}

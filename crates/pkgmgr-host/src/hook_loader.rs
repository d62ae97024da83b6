//! Hook discovery in deployed package directories.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use async_trait::async_trait;
use pkgmgr_runtime::HookLoader;
use pkgmgr_runtime::package::hooks::{DiscoveredHooks, HookConfig, HookDefinition};
use pkgmgr_runtime::package::loader::HOOKS_DIR;
use tokio::process::Command;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Executable in `hooks/` that validates settings.
pub const SETTINGS_CHECK_HOOK: &str = "settings-check";

/// Directory names never searched for hooks.
const EXCLUDED_DIRS: &[&str] = &["venv", "lib"];

/// Finds executables under `hooks/` and reads their binding configuration
/// from a `<hook>.yaml` sidecar, falling back to `<hook> hook config`.
#[derive(Debug, Default)]
pub struct FsHookLoader;

fn is_skipped_dir(entry: &DirEntry) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || EXCLUDED_DIRS.contains(&&*name)
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

fn is_config_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml" | "json")
    )
}

/// Executables inside `dir`, sorted by path.
fn candidates(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_skipped_dir(e))
    {
        let entry = entry.with_context(|| format!("walk {}", dir.display()))?;
        let name = entry.file_name().to_string_lossy();
        if !entry.file_type().is_file() || name.starts_with('.') {
            continue;
        }
        let path = entry.path();
        if is_config_file(path) {
            continue;
        }
        if !is_executable(path) {
            debug!(path = %path.display(), "skipping non-executable file");
            continue;
        }
        found.push(path.to_path_buf());
    }
    found.sort();
    Ok(found)
}

/// Run `<hook> <args..>` and return its stdout.
async fn run_hook_command(path: &Path, args: &[&str]) -> anyhow::Result<String> {
    let output = Command::new(path)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("run {} {}", path.display(), args.join(" ")))?;
    if !output.status.success() {
        bail!(
            "{} {} exited with {}: {}",
            path.display(),
            args.join(" "),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Whether `hook list` output announces a hook batch (`Found <N> items`).
fn lists_items(stdout: &str) -> bool {
    stdout.lines().any(|line| {
        let mut words = line.split_whitespace();
        matches!(
            (words.next(), words.next().map(|n| n.parse::<u64>()), words.next()),
            (Some("Found"), Some(Ok(_)), Some("items"))
        )
    })
}

async fn read_config(path: &Path) -> anyhow::Result<HookConfig> {
    let sidecar = PathBuf::from(format!("{}.yaml", path.display()));
    let text = match tokio::fs::read_to_string(&sidecar).await {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            run_hook_command(path, &["hook", "config"]).await?
        }
        Err(err) => return Err(err).with_context(|| format!("read {}", sidecar.display())),
    };
    serde_yaml::from_str(&text).with_context(|| format!("parse config of {}", path.display()))
}

#[async_trait]
impl HookLoader for FsHookLoader {
    async fn load(&self, package_dir: &Path) -> anyhow::Result<DiscoveredHooks> {
        let dir = package_dir.join(HOOKS_DIR);
        let mut discovered = DiscoveredHooks::default();
        if !dir.is_dir() {
            return Ok(discovered);
        }

        for path in candidates(&dir)? {
            let name = path
                .strip_prefix(&dir)
                .with_context(|| format!("hook outside {}", dir.display()))?
                .to_string_lossy()
                .into_owned();

            if name == SETTINGS_CHECK_HOOK {
                discovered.settings_check = Some(HookDefinition {
                    name,
                    path,
                    config: HookConfig::default(),
                });
                continue;
            }

            if path.extension().is_none() {
                match run_hook_command(&path, &["hook", "list"]).await {
                    Ok(out) if lists_items(&out) => {}
                    Ok(_) => {
                        debug!(hook = %name, "executable does not list hooks, skipping");
                        continue;
                    }
                    Err(err) => {
                        warn!(hook = %name, error = %err, "hook list failed, skipping");
                        continue;
                    }
                }
            }

            let config = read_config(&path).await?;
            debug!(hook = %name, bindings = ?config.bindings(), "discovered hook");
            discovered.hooks.push(HookDefinition { name, path, config });
        }
        Ok(discovered)
    }
}

//! `pkgmgr validate` command: load a package directory the way the runtime
//! would and check settings against it, without touching the cluster.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Args;
use pkgmgr_host::hook_exec::ShellHookExecutor;
use pkgmgr_host::hook_loader::FsHookLoader;
use pkgmgr_host::schedule::IntervalScheduleManager;
use pkgmgr_host::watcher::OfflineWatcherManager;
use pkgmgr_runtime::package::PackageSummary;
use pkgmgr_runtime::package::hooks::HookServices;
use pkgmgr_runtime::package::loader::load_package_files;
use pkgmgr_runtime::{HookLoader, Package, PackageKind};
use pkgmgr_types::Settings;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Package directory (holds package.yaml)
    pub dir: PathBuf,

    /// YAML or JSON file with the settings to check
    #[arg(long)]
    pub settings: Option<PathBuf>,
}

fn read_settings(path: &Path) -> Result<Settings> {
    let text = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let value: Value = if text.trim().is_empty() {
        Value::Object(Settings::new())
    } else {
        serde_yaml::from_str(&text).with_context(|| format!("parse {}", path.display()))?
    };
    match value {
        Value::Object(settings) => Ok(settings),
        Value::Null => Ok(Settings::new()),
        _ => bail!("{} must contain a mapping", path.display()),
    }
}

/// Load the package at `dir` and validate `settings` against it.
pub async fn validate(dir: &Path, settings: &Settings) -> Result<PackageSummary> {
    let files = load_package_files(dir, "").context("load package")?;
    let hooks = FsHookLoader.load(dir).await.context("discover hooks")?;
    let name = files.definition.name.clone();
    let version = files
        .definition
        .version
        .clone()
        .unwrap_or_else(|| "0.0.0".to_string());

    let services = HookServices {
        executor: Arc::new(ShellHookExecutor),
        watcher: Arc::new(OfflineWatcherManager::default()),
        schedules: Arc::new(IntervalScheduleManager::default()),
    };
    let package = Package::new(&name, PackageKind::Module, &version, dir, files, hooks, services);
    package
        .validate_settings(&CancellationToken::new(), settings)
        .await
        .context("settings rejected")?;
    package.apply_settings(settings);
    Ok(package.summary())
}

pub async fn cmd_validate(args: &ValidateArgs) -> Result<()> {
    let settings = match &args.settings {
        Some(path) => read_settings(path)?,
        None => Settings::new(),
    };
    let summary = validate(&args.dir, &settings).await?;
    print!("{}", serde_yaml::to_string(&summary).context("encode summary")?);
    println!("settings: valid");
    Ok(())
}

//! `pkgmgr run` command.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use pkgmgr_host::{Daemon, HostConfig};

use crate::util::{load_env, setup_logging};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Environment file loaded before configuration (default: ./.env if present)
    #[arg(long)]
    pub env_file: Option<PathBuf>,

    /// State root (env: PKGMGR_ROOT)
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Desired-state file to follow (env: PKGMGR_DESIRED_STATE)
    #[arg(long)]
    pub desired_state: Option<PathBuf>,

    /// Debug server address, or "off" (env: PKGMGR_DEBUG_ADDR)
    #[arg(long)]
    pub debug_addr: Option<String>,

    /// Helm binary (env: PKGMGR_HELM_BIN)
    #[arg(long)]
    pub helm_bin: Option<PathBuf>,
}

fn resolve_config(args: &RunArgs) -> Result<HostConfig> {
    let mut config = HostConfig::from_env().context("read configuration")?;
    if let Some(root) = &args.root {
        let mut rooted = HostConfig::with_root(root);
        rooted.desired_state = config.desired_state.take();
        rooted.desired_state_interval = config.desired_state_interval;
        rooted.debug_addr = config.debug_addr;
        rooted.cluster = config.cluster.clone();
        rooted.helm_bin = config.helm_bin.clone();
        rooted.scheduler_interval = config.scheduler_interval;
        config = rooted;
    }
    if let Some(path) = &args.desired_state {
        config.desired_state = Some(path.clone());
    }
    if let Some(addr) = &args.debug_addr {
        config.debug_addr = if addr == "off" {
            None
        } else {
            Some(
                addr.parse::<SocketAddr>()
                    .with_context(|| format!("invalid --debug-addr {addr}"))?,
            )
        };
    }
    if let Some(bin) = &args.helm_bin {
        config.helm_bin = bin.clone();
    }
    Ok(config)
}

pub async fn cmd_run(args: &RunArgs) -> Result<()> {
    load_env(args.env_file.as_deref())?;
    setup_logging();

    let config = resolve_config(args)?;
    tracing::info!(
        root = %config.root.display(),
        desired_state = ?config.desired_state,
        debug_addr = ?config.debug_addr,
        "starting pkgmgr"
    );
    let daemon = Daemon::new(config)?;
    daemon
        .run(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("listen for ctrl-c: {err}");
            }
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> RunArgs {
        RunArgs {
            env_file: None,
            root: None,
            desired_state: None,
            debug_addr: None,
            helm_bin: None,
        }
    }

    #[test]
    fn flags_override_environment() {
        let mut a = args();
        a.root = Some(PathBuf::from("/srv/pkgmgr"));
        a.debug_addr = Some("off".into());
        a.desired_state = Some(PathBuf::from("/etc/pkgmgr/desired.yaml"));
        let config = resolve_config(&a).unwrap();
        assert_eq!(config.deployed_dir, PathBuf::from("/srv/pkgmgr/deployed"));
        assert_eq!(config.debug_addr, None);
        assert_eq!(config.desired_state, Some(PathBuf::from("/etc/pkgmgr/desired.yaml")));

        let mut a = args();
        a.debug_addr = Some("nowhere".into());
        assert!(resolve_config(&a).is_err());
    }
}

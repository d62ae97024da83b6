use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use pkgmgr_runtime::RuntimeConfig;
use semver::Version;

use crate::error::HostError;

pub const DEFAULT_ROOT: &str = "/var/lib/pkgmgr";
pub const DEFAULT_DEBUG_ADDR: &str = "127.0.0.1:9651";

#[derive(Debug, Clone)]
pub struct HostConfig {
    pub root: PathBuf,
    pub downloaded_dir: PathBuf,
    pub deployed_dir: PathBuf,
    /// Local mirror served by the filesystem registry.
    pub registry_dir: PathBuf,
    pub status_dir: PathBuf,
    /// Desired-state file; `None` leaves the runtime idle.
    pub desired_state: Option<PathBuf>,
    pub desired_state_interval: Duration,
    /// `None` disables the debug server.
    pub debug_addr: Option<SocketAddr>,
    pub cluster: ClusterConfig,
    pub helm_bin: PathBuf,
    pub scheduler_interval: Duration,
}

/// Cluster facts reported to the scheduler.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub deckhouse_version: Version,
    pub kubernetes_version: Version,
    pub bootstrapped: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            deckhouse_version: Version::new(0, 0, 0),
            kubernetes_version: Version::new(0, 0, 0),
            bootstrapped: true,
        }
    }
}

impl HostConfig {
    /// Defaults rooted at `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            downloaded_dir: root.join("downloaded"),
            deployed_dir: root.join("deployed"),
            registry_dir: root.join("registry"),
            status_dir: root.join("status"),
            root,
            desired_state: None,
            desired_state_interval: Duration::from_secs(5),
            debug_addr: DEFAULT_DEBUG_ADDR.parse().ok(),
            cluster: ClusterConfig::default(),
            helm_bin: PathBuf::from("helm"),
            scheduler_interval: Duration::from_secs(10),
        }
    }

    /// Build the configuration from `PKGMGR_*` environment variables.
    pub fn from_env() -> Result<Self, HostError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`Self::from_env`] with an explicit variable source.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, HostError> {
        let root = get("PKGMGR_ROOT").unwrap_or_else(|| DEFAULT_ROOT.to_string());
        let mut config = Self::with_root(root);

        if let Some(dir) = get("PKGMGR_DOWNLOADED_DIR") {
            config.downloaded_dir = dir.into();
        }
        if let Some(dir) = get("PKGMGR_DEPLOYED_DIR") {
            config.deployed_dir = dir.into();
        }
        if let Some(dir) = get("PKGMGR_REGISTRY_DIR") {
            config.registry_dir = dir.into();
        }
        if let Some(dir) = get("PKGMGR_STATUS_DIR") {
            config.status_dir = dir.into();
        }
        if let Some(path) = get("PKGMGR_DESIRED_STATE") {
            config.desired_state = Some(path.into());
        }
        if let Some(raw) = get("PKGMGR_DESIRED_STATE_INTERVAL") {
            config.desired_state_interval = parse_var("PKGMGR_DESIRED_STATE_INTERVAL", &raw, parse_duration)?;
        }
        if let Some(raw) = get("PKGMGR_DEBUG_ADDR") {
            config.debug_addr = if raw == "off" {
                None
            } else {
                Some(parse_var("PKGMGR_DEBUG_ADDR", &raw, |s| {
                    s.parse::<SocketAddr>().map_err(|e| e.to_string())
                })?)
            };
        }
        if let Some(raw) = get("PKGMGR_DECKHOUSE_VERSION") {
            config.cluster.deckhouse_version = parse_var("PKGMGR_DECKHOUSE_VERSION", &raw, parse_version)?;
        }
        if let Some(raw) = get("PKGMGR_KUBERNETES_VERSION") {
            config.cluster.kubernetes_version = parse_var("PKGMGR_KUBERNETES_VERSION", &raw, parse_version)?;
        }
        if let Some(raw) = get("PKGMGR_BOOTSTRAPPED") {
            config.cluster.bootstrapped = parse_var("PKGMGR_BOOTSTRAPPED", &raw, parse_bool)?;
        }
        if let Some(bin) = get("PKGMGR_HELM_BIN") {
            config.helm_bin = bin.into();
        }
        if let Some(raw) = get("PKGMGR_SCHEDULER_INTERVAL") {
            config.scheduler_interval = parse_var("PKGMGR_SCHEDULER_INTERVAL", &raw, parse_duration)?;
        }
        Ok(config)
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        let mut config = RuntimeConfig::new(&self.downloaded_dir, &self.deployed_dir);
        config.scheduler_interval = self.scheduler_interval;
        config
    }
}

fn parse_var<T>(
    var: &'static str,
    raw: &str,
    parse: impl Fn(&str) -> Result<T, String>,
) -> Result<T, HostError> {
    parse(raw.trim()).map_err(|message| HostError::Config { var, message })
}

fn parse_version(raw: &str) -> Result<Version, String> {
    let raw = raw.strip_prefix('v').unwrap_or(raw);
    Version::parse(raw).map_err(|e| e.to_string())
}

fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(format!("expected a boolean, got {other:?}")),
    }
}

/// Parse `500ms`, `10s`, `5m` or `1h`. A bare number is seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let n: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration {raw:?}"))?;
    match unit.trim() {
        "ms" => Ok(Duration::from_millis(n)),
        "" | "s" => Ok(Duration::from_secs(n)),
        "m" => Ok(Duration::from_secs(n * 60)),
        "h" => Ok(Duration::from_secs(n * 3600)),
        other => Err(format!("unknown duration unit {other:?} in {raw:?}")),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_follow_root() {
        let config = HostConfig::from_lookup(lookup(&[("PKGMGR_ROOT", "/tmp/pm")])).unwrap();
        assert_eq!(config.deployed_dir, PathBuf::from("/tmp/pm/deployed"));
        assert_eq!(config.status_dir, PathBuf::from("/tmp/pm/status"));
        assert_eq!(config.debug_addr, Some("127.0.0.1:9651".parse().unwrap()));
        assert!(config.cluster.bootstrapped);
    }

    #[test]
    fn overrides_and_errors() {
        let config = HostConfig::from_lookup(lookup(&[
            ("PKGMGR_DEBUG_ADDR", "off"),
            ("PKGMGR_DECKHOUSE_VERSION", "v1.70.2"),
            ("PKGMGR_BOOTSTRAPPED", "no"),
            ("PKGMGR_SCHEDULER_INTERVAL", "250ms"),
        ]))
        .unwrap();
        assert_eq!(config.debug_addr, None);
        assert_eq!(config.cluster.deckhouse_version, Version::new(1, 70, 2));
        assert!(!config.cluster.bootstrapped);
        assert_eq!(config.scheduler_interval, Duration::from_millis(250));

        let err = HostConfig::from_lookup(lookup(&[("PKGMGR_SCHEDULER_INTERVAL", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("PKGMGR_SCHEDULER_INTERVAL"));
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("90").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert!(parse_duration("1d").is_err());
    }
}

use pkgmgr_runtime::ClusterInfo;
use semver::Version;

use crate::config::ClusterConfig;

/// Cluster facts taken from configuration.
#[derive(Debug, Clone)]
pub struct StaticClusterInfo {
    config: ClusterConfig,
}

impl StaticClusterInfo {
    pub fn new(config: ClusterConfig) -> Self {
        Self { config }
    }
}

impl ClusterInfo for StaticClusterInfo {
    fn deckhouse_version(&self) -> anyhow::Result<Version> {
        Ok(self.config.deckhouse_version.clone())
    }

    fn kubernetes_version(&self) -> anyhow::Result<Version> {
        Ok(self.config.kubernetes_version.clone())
    }

    fn bootstrapped(&self) -> anyhow::Result<bool> {
        Ok(self.config.bootstrapped)
    }
}

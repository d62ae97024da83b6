use semver::Version;

/// Live cluster facts the scheduler gates packages on.
pub trait ClusterInfo: Send + Sync {
    fn deckhouse_version(&self) -> anyhow::Result<Version>;

    fn kubernetes_version(&self) -> anyhow::Result<Version>;

    fn bootstrapped(&self) -> anyhow::Result<bool>;
}

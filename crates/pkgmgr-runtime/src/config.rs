use std::path::PathBuf;
use std::time::Duration;

use crate::queue::BackoffPolicy;

/// Tunables of the runtime core.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// `<downloaded>/<id>/<version>/`
    pub downloaded_dir: PathBuf,
    /// `<deployed>/<id>`
    pub deployed_dir: PathBuf,
    pub backoff: BackoffPolicy,
    /// Periodic re-evaluation of the global scheduler predicates.
    pub scheduler_interval: Duration,
    pub status_channel_capacity: usize,
    /// How long `stop` waits for queue workers before abandoning them.
    pub queue_stop_timeout: Duration,
}

impl RuntimeConfig {
    pub fn new(downloaded_dir: impl Into<PathBuf>, deployed_dir: impl Into<PathBuf>) -> Self {
        Self {
            downloaded_dir: downloaded_dir.into(),
            deployed_dir: deployed_dir.into(),
            ..Self::default()
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            downloaded_dir: PathBuf::from("/var/lib/pkgmgr/downloaded"),
            deployed_dir: PathBuf::from("/var/lib/pkgmgr/deployed"),
            backoff: BackoffPolicy::default(),
            scheduler_interval: Duration::from_secs(10),
            status_channel_capacity: 10_000,
            queue_stop_timeout: Duration::from_secs(10),
        }
    }
}

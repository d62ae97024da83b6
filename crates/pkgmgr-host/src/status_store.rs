//! Published status kept as one YAML file per package.

use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use pkgmgr_runtime::{PublishedStatus, StatusStore};

pub struct FileStatusStore {
    dir: PathBuf,
}

impl FileStatusStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.yaml"))
    }
}

#[async_trait]
impl StatusStore for FileStatusStore {
    async fn load(&self, name: &str) -> anyhow::Result<PublishedStatus> {
        let path = self.path(name);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => serde_yaml::from_str(&text).with_context(|| format!("parse {}", path.display())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(PublishedStatus::default()),
            Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
        }
    }

    async fn publish(&self, name: &str, status: PublishedStatus) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("create {}", self.dir.display()))?;
        let body = serde_yaml::to_string(&status).context("encode status")?;
        let path = self.path(name);
        let tmp = self.dir.join(format!(".{name}.{}.tmp", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("replace {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pkgmgr_types::{Condition, ConditionStatus};

    use super::*;

    #[tokio::test]
    async fn missing_status_loads_default_and_publish_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStatusStore::new(dir.path().join("status"));
        assert_eq!(store.load("ns.web").await.unwrap(), PublishedStatus::default());

        let status = PublishedStatus {
            version: Some("1.0.0".into()),
            conditions: vec![Condition::new("Ready", ConditionStatus::True)],
            internal_conditions: Vec::new(),
        };
        store.publish("ns.web", status.clone()).await.unwrap();
        assert_eq!(store.load("ns.web").await.unwrap(), status);
        assert!(dir.path().join("status/ns.web.yaml").is_file());
    }
}

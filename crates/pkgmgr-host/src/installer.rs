//! Installer over the filesystem registry.
//!
//! `<deployed>/<id>` is a symlink into `<downloaded>/<id>/<version>`; an
//! install swaps it with a rename so readers never see a half-switched
//! package.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use async_trait::async_trait;
use pkgmgr_runtime::{Bundle, Installer};
use pkgmgr_types::Repository;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::registry::LocalRegistry;

pub struct SymlinkInstaller {
    registry: LocalRegistry,
}

impl SymlinkInstaller {
    pub fn new(registry: LocalRegistry) -> Self {
        Self { registry }
    }
}

fn version_dir(downloaded: &Path, bundle: &Bundle) -> PathBuf {
    downloaded.join(&bundle.id).join(&bundle.version)
}

#[async_trait]
impl Installer for SymlinkInstaller {
    async fn download(
        &self,
        ctx: &CancellationToken,
        repo: &Repository,
        downloaded: &Path,
        bundle: &Bundle,
    ) -> anyhow::Result<()> {
        let target = version_dir(downloaded, bundle);
        if target.is_dir() {
            debug!(id = %bundle.id, version = %bundle.version, "bundle already downloaded");
            return Ok(());
        }
        let parent = downloaded.join(&bundle.id);
        tokio::fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("create {}", parent.display()))?;

        let registry = self.registry.clone();
        let repo = repo.clone();
        let bundle_c = bundle.clone();
        let target_c = target.clone();
        let extract = tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let staging = tempfile::Builder::new()
                .prefix(".download-")
                .tempdir_in(&parent)
                .context("create staging dir")?;
            let out = staging.path().join("bundle");
            registry.download(&repo, &out, &bundle_c.name, &bundle_c.version)?;
            std::fs::rename(&out, &target_c)
                .with_context(|| format!("move bundle into {}", target_c.display()))?;
            Ok(())
        });

        tokio::select! {
            _ = ctx.cancelled() => bail!("download of {} cancelled", bundle.id),
            res = extract => res.context("download task panicked")??,
        }
        info!(id = %bundle.id, version = %bundle.version, "bundle downloaded");
        Ok(())
    }

    async fn install(
        &self,
        _ctx: &CancellationToken,
        downloaded: &Path,
        deployed: &Path,
        bundle: &Bundle,
    ) -> anyhow::Result<()> {
        let source = version_dir(downloaded, bundle);
        if !source.is_dir() {
            bail!("{} was not downloaded", source.display());
        }
        tokio::fs::create_dir_all(deployed)
            .await
            .with_context(|| format!("create {}", deployed.display()))?;

        let link = deployed.join(&bundle.id);
        let tmp = deployed.join(format!(".{}.{}", bundle.id, uuid::Uuid::new_v4()));
        tokio::fs::symlink(&source, &tmp)
            .await
            .with_context(|| format!("link {}", tmp.display()))?;
        if let Err(err) = tokio::fs::rename(&tmp, &link).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(err).with_context(|| format!("switch {}", link.display()));
        }
        info!(id = %bundle.id, version = %bundle.version, "bundle installed");
        Ok(())
    }

    async fn uninstall(
        &self,
        _ctx: &CancellationToken,
        downloaded: &Path,
        deployed: &Path,
        id: &str,
        keep: bool,
    ) -> anyhow::Result<()> {
        let link = deployed.join(id);
        match tokio::fs::symlink_metadata(&link).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&link).await,
            Ok(_) => tokio::fs::remove_file(&link).await,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
        .with_context(|| format!("remove {}", link.display()))?;

        if !keep {
            let dir = downloaded.join(id);
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err).with_context(|| format!("remove {}", dir.display())),
            }
        }
        info!(%id, keep, "bundle uninstalled");
        Ok(())
    }
}

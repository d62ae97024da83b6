//! Filesystem registry: images are directory trees mirrored under
//! `<root>/<repository>/<name>/<tag>/`.

use std::os::unix::fs::symlink;
use std::path::{Component, Path, PathBuf};

use pkgmgr_types::Repository;
use sha2::{Digest, Sha256};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::HostError;

#[derive(Debug, Clone)]
pub struct LocalRegistry {
    root: PathBuf,
}

impl LocalRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn image_dir(&self, repo: &Repository, name: &str, tag: &str) -> Result<PathBuf, HostError> {
        let mut dir = self.root.clone();
        for part in repo.repository.split('/').filter(|p| !p.is_empty()) {
            dir.push(safe_segment(part)?);
        }
        dir.push(safe_segment(name)?);
        dir.push(safe_segment(tag)?);
        if !dir.is_dir() {
            return Err(HostError::ImageNotFound(format!(
                "{}/{name}:{tag}",
                repo.repository
            )));
        }
        Ok(dir)
    }

    /// Extract `name:tag` into `out_dir`, which must not exist yet.
    ///
    /// Symlinks are recreated only when they are relative and stay inside
    /// the image; anything else aborts the extraction.
    pub fn download(
        &self,
        repo: &Repository,
        out_dir: &Path,
        name: &str,
        tag: &str,
    ) -> Result<(), HostError> {
        let src = self.image_dir(repo, name, tag)?;
        debug!(image = %src.display(), out = %out_dir.display(), "extracting image");
        for entry in WalkDir::new(&src).follow_links(false) {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| src.clone());
                HostError::io(path, std::io::Error::other(e.to_string()))
            })?;
            let rel = entry
                .path()
                .strip_prefix(&src)
                .map_err(|_| HostError::UnsafePath(entry.path().to_path_buf()))?;
            if rel.components().any(|c| !matches!(c, Component::Normal(_))) {
                return Err(HostError::UnsafePath(rel.to_path_buf()));
            }
            let target = out_dir.join(rel);
            let file_type = entry.file_type();

            if file_type.is_dir() {
                std::fs::create_dir_all(&target).map_err(|e| HostError::io(&target, e))?;
            } else if file_type.is_symlink() {
                let link = std::fs::read_link(entry.path())
                    .map_err(|e| HostError::io(entry.path(), e))?;
                if !link_stays_inside(rel, &link) {
                    return Err(HostError::UnsafePath(rel.to_path_buf()));
                }
                symlink(&link, &target).map_err(|e| HostError::io(&target, e))?;
            } else if file_type.is_file() {
                std::fs::copy(entry.path(), &target).map_err(|e| HostError::io(&target, e))?;
            }
        }
        Ok(())
    }

    /// sha256 over the relative paths and contents of every file in the
    /// image, in path order.
    pub fn image_digest(&self, repo: &Repository, name: &str, tag: &str) -> Result<String, HostError> {
        let src = self.image_dir(repo, name, tag)?;
        let mut hasher = Sha256::new();
        for entry in WalkDir::new(&src).follow_links(false).sort_by_file_name() {
            let entry = entry.map_err(|e| HostError::io(&src, std::io::Error::other(e.to_string())))?;
            let rel = entry.path().strip_prefix(&src).unwrap_or(entry.path());
            if entry.file_type().is_file() {
                let bytes = std::fs::read(entry.path()).map_err(|e| HostError::io(entry.path(), e))?;
                hasher.update(rel.to_string_lossy().as_bytes());
                hasher.update([0]);
                hasher.update(&bytes);
            } else if entry.file_type().is_symlink() {
                let link = std::fs::read_link(entry.path())
                    .map_err(|e| HostError::io(entry.path(), e))?;
                hasher.update(rel.to_string_lossy().as_bytes());
                hasher.update([1]);
                hasher.update(link.to_string_lossy().as_bytes());
            }
        }
        Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
    }
}

fn safe_segment(part: &str) -> Result<&str, HostError> {
    if part.is_empty() || part == "." || part == ".." || part.contains(['/', '\\']) {
        return Err(HostError::UnsafePath(PathBuf::from(part)));
    }
    Ok(part)
}

/// Whether the symlink at `rel` pointing to `link` resolves inside the
/// image root.
fn link_stays_inside(rel: &Path, link: &Path) -> bool {
    if link.is_absolute() {
        return false;
    }
    let mut depth: usize = rel.components().count().saturating_sub(1);
    for component in link.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return false;
                }
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symlink_containment() {
        assert!(link_stays_inside(Path::new("a/link"), Path::new("../b/file")));
        assert!(link_stays_inside(Path::new("link"), Path::new("./file")));
        assert!(!link_stays_inside(Path::new("link"), Path::new("../etc/passwd")));
        assert!(!link_stays_inside(Path::new("a/link"), Path::new("../../x")));
        assert!(!link_stays_inside(Path::new("link"), Path::new("/etc/passwd")));
    }

    #[test]
    fn rejects_traversal_segments() {
        assert!(safe_segment("web").is_ok());
        assert!(safe_segment("..").is_err());
        assert!(safe_segment("a/b").is_err());
    }
}

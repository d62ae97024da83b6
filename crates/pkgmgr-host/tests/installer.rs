use std::os::unix::fs::{PermissionsExt, symlink};
use std::path::Path;

use pkgmgr_host::HostError;
use pkgmgr_host::installer::SymlinkInstaller;
use pkgmgr_host::registry::LocalRegistry;
use pkgmgr_runtime::{Bundle, Installer};
use pkgmgr_types::Repository;
use tokio_util::sync::CancellationToken;

fn repo() -> Repository {
    Repository {
        name: "local".into(),
        repository: "registry.example.com/apps".into(),
        ..Repository::default()
    }
}

fn bundle(version: &str) -> Bundle {
    Bundle {
        id: "ns.web".into(),
        name: "web".into(),
        version: version.into(),
    }
}

/// Lay out `web:<version>` in the registry mirror.
fn publish(registry: &Path, version: &str) -> std::path::PathBuf {
    let dir = registry.join("registry.example.com/apps/web").join(version);
    std::fs::create_dir_all(dir.join("hooks")).unwrap();
    std::fs::write(dir.join("package.yaml"), format!("name: web\nversion: {version}\n")).unwrap();
    std::fs::write(dir.join("hooks/init.sh"), "#!/bin/sh\n").unwrap();
    std::fs::set_permissions(dir.join("hooks/init.sh"), std::fs::Permissions::from_mode(0o755)).unwrap();
    symlink("../package.yaml", dir.join("hooks/definition")).unwrap();
    dir
}

#[tokio::test]
async fn download_install_switch_and_uninstall() {
    let root = tempfile::tempdir().unwrap();
    let registry = root.path().join("registry");
    let downloaded = root.path().join("downloaded");
    let deployed = root.path().join("deployed");
    publish(&registry, "1.0.0");
    publish(&registry, "2.0.0");

    let installer = SymlinkInstaller::new(LocalRegistry::new(&registry));
    let ctx = CancellationToken::new();

    installer.download(&ctx, &repo(), &downloaded, &bundle("1.0.0")).await.unwrap();
    let extracted = downloaded.join("ns.web/1.0.0");
    assert!(extracted.join("package.yaml").is_file());
    let mode = std::fs::metadata(extracted.join("hooks/init.sh")).unwrap().permissions().mode();
    assert_ne!(mode & 0o111, 0, "executable bit preserved");
    assert_eq!(
        std::fs::read_link(extracted.join("hooks/definition")).unwrap(),
        Path::new("../package.yaml")
    );

    // A second download of the same version is a no-op.
    installer.download(&ctx, &repo(), &downloaded, &bundle("1.0.0")).await.unwrap();

    installer.install(&ctx, &downloaded, &deployed, &bundle("1.0.0")).await.unwrap();
    let link = deployed.join("ns.web");
    assert_eq!(std::fs::read_link(&link).unwrap(), extracted);

    installer.download(&ctx, &repo(), &downloaded, &bundle("2.0.0")).await.unwrap();
    installer.install(&ctx, &downloaded, &deployed, &bundle("2.0.0")).await.unwrap();
    assert_eq!(std::fs::read_link(&link).unwrap(), downloaded.join("ns.web/2.0.0"));
    let leftovers: Vec<_> = std::fs::read_dir(&deployed).unwrap().collect();
    assert_eq!(leftovers.len(), 1, "no temporary links left behind");

    installer.uninstall(&ctx, &downloaded, &deployed, "ns.web", true).await.unwrap();
    assert!(std::fs::symlink_metadata(&link).is_err());
    assert!(downloaded.join("ns.web/2.0.0").is_dir());

    installer.uninstall(&ctx, &downloaded, &deployed, "ns.web", false).await.unwrap();
    assert!(!downloaded.join("ns.web").exists());
}

#[tokio::test]
async fn install_requires_a_download() {
    let root = tempfile::tempdir().unwrap();
    let installer = SymlinkInstaller::new(LocalRegistry::new(root.path().join("registry")));
    let err = installer
        .install(
            &CancellationToken::new(),
            &root.path().join("downloaded"),
            &root.path().join("deployed"),
            &bundle("1.0.0"),
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("was not downloaded"), "{err}");
}

#[test]
fn missing_image_is_reported() {
    let root = tempfile::tempdir().unwrap();
    let registry = LocalRegistry::new(root.path());
    let err = registry
        .download(&repo(), &root.path().join("out"), "web", "9.9.9")
        .unwrap_err();
    assert!(matches!(err, HostError::ImageNotFound(_)), "{err}");
}

#[test]
fn escaping_symlinks_are_refused() {
    let root = tempfile::tempdir().unwrap();
    let registry_dir = root.path().join("registry");
    let image = publish(&registry_dir, "1.0.0");
    symlink("../../../../../etc/passwd", image.join("hooks/escape")).unwrap();

    let registry = LocalRegistry::new(&registry_dir);
    let err = registry
        .download(&repo(), &root.path().join("out"), "web", "1.0.0")
        .unwrap_err();
    assert!(matches!(err, HostError::UnsafePath(_)), "{err}");
}

#[test]
fn absolute_symlinks_are_refused() {
    let root = tempfile::tempdir().unwrap();
    let registry_dir = root.path().join("registry");
    let image = publish(&registry_dir, "1.0.0");
    symlink("/etc/passwd", image.join("passwd")).unwrap();

    let registry = LocalRegistry::new(&registry_dir);
    let err = registry
        .download(&repo(), &root.path().join("out"), "web", "1.0.0")
        .unwrap_err();
    assert!(matches!(err, HostError::UnsafePath(_)), "{err}");
}

#[test]
fn traversal_in_tag_is_refused() {
    let root = tempfile::tempdir().unwrap();
    let registry = LocalRegistry::new(root.path());
    let err = registry
        .download(&repo(), &root.path().join("out"), "web", "..")
        .unwrap_err();
    assert!(matches!(err, HostError::UnsafePath(_)), "{err}");
}

#[test]
fn digest_tracks_content() {
    let root = tempfile::tempdir().unwrap();
    let image = publish(root.path(), "1.0.0");
    let registry = LocalRegistry::new(root.path());

    let first = registry.image_digest(&repo(), "web", "1.0.0").unwrap();
    assert!(first.starts_with("sha256:"));
    assert_eq!(first, registry.image_digest(&repo(), "web", "1.0.0").unwrap());

    std::fs::write(image.join("package.yaml"), "name: web\nversion: 1.0.1\n").unwrap();
    assert_ne!(first, registry.image_digest(&repo(), "web", "1.0.0").unwrap());
}

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};

use crate::config::BuildConfig;
use crate::mounts;
use crate::process::Cmd;

/// Archive components passed to debootstrap.
const COMPONENTS: &str = "main";

/// Packages added to the minimal debootstrap set.
const INCLUDE_PACKAGES: &[&str] = &[
    "apt-transport-https",
    "ca-certificates",
    "curl",
    "dbus",
    "gnupg",
    "iproute2",
    "less",
    "locales",
    "openssh-server",
    "sudo",
    "vim-tiny",
    "wget",
];

/// Bring `dir` to an empty state.
///
/// Any mounts left below it by an earlier run are detached first, so the
/// removal never descends into a live `proc` or `dev/pts`.
pub fn prepare_install_dir(dir: &Utf8Path) -> Result<()> {
    reset_dir(dir, mounts::active_mounts_under, mounts::unmount)
}

fn reset_dir(
    dir: &Utf8Path,
    list_mounts: impl FnOnce(&Utf8Path) -> Result<Vec<Utf8PathBuf>>,
    mut unmount: impl FnMut(&Utf8Path) -> Result<()>,
) -> Result<()> {
    if dir.as_str() == "/" {
        anyhow::bail!("refusing to wipe /");
    }

    if dir.exists() {
        for mountpoint in list_mounts(dir)? {
            unmount(&mountpoint)?;
        }
        tracing::info!("removing previous tree at {dir}");
        std::fs::remove_dir_all(dir).with_context(|| format!("removing {dir}"))?;
    }

    std::fs::create_dir_all(dir).with_context(|| format!("creating {dir}"))?;
    Ok(())
}

fn debootstrap_command(config: &BuildConfig) -> Cmd {
    Cmd::new("debootstrap")
        .arg(format!("--components={COMPONENTS}"))
        .arg(format!("--include={}", INCLUDE_PACKAGES.join(",")))
        .arg(config.release.as_str())
        .arg(config.install_dir.as_str())
        .arg(config.mirror.as_str())
}

/// Populate the install directory with a minimal Debian tree.
pub fn debootstrap(config: &BuildConfig) -> Result<()> {
    tracing::info!(
        "bootstrapping {} from {} into {}",
        config.release,
        config.mirror,
        config.install_dir
    );
    debootstrap_command(config)
        .run()
        .context("bootstrapping chroot")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;

    #[test]
    fn test_debootstrap_command() {
        let config = test_config("/srv/rootfs");
        let cmd = debootstrap_command(&config).display();
        assert!(cmd.starts_with("debootstrap --components=main --include=apt-transport-https,"));
        assert!(cmd.ends_with(" stretch /srv/rootfs http://deb.debian.org/debian"));
        assert!(cmd.contains("openssh-server"));
        assert!(cmd.contains("locales"));
    }

    #[test]
    fn test_prepare_install_dir_wipes_existing_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap().join("rootfs");
        std::fs::create_dir_all(dir.join("etc/apt")).unwrap();
        std::fs::write(dir.join("etc/apt/sources.list"), "stale").unwrap();

        prepare_install_dir(&dir).unwrap();

        assert!(dir.is_dir());
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
    }

    #[test]
    fn test_prepare_install_dir_creates_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap().join("new");
        prepare_install_dir(&dir).unwrap();
        assert!(dir.is_dir());
    }

    #[test]
    fn test_prepare_install_dir_refuses_root() {
        assert!(prepare_install_dir(Utf8Path::new("/")).is_err());
    }

    #[test]
    fn test_reset_dir_unmounts_before_removing() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap().join("rootfs");
        std::fs::create_dir_all(dir.join("proc/1")).unwrap();
        std::fs::create_dir_all(dir.join("dev/pts")).unwrap();

        let stale = vec![dir.join("dev/pts"), dir.join("proc")];
        let mut unmounted = Vec::new();
        reset_dir(
            &dir,
            |root| {
                assert_eq!(root, dir.as_path());
                Ok(stale.clone())
            },
            |path| {
                // the tree is still intact when each mount is detached
                assert!(path.is_dir(), "{path}");
                unmounted.push(path.to_owned());
                Ok(())
            },
        )
        .unwrap();

        assert_eq!(unmounted, stale);
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
    }

    #[test]
    fn test_reset_dir_keeps_tree_when_unmount_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap().join("rootfs");
        std::fs::create_dir_all(dir.join("proc/1")).unwrap();

        let err = reset_dir(
            &dir,
            |root| Ok(vec![root.join("proc")]),
            |path| {
                anyhow::bail!("umount {path}: target is busy")
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("target is busy"));
        assert!(dir.join("proc/1").is_dir());
    }

    #[test]
    fn test_reset_dir_skips_mounts_for_missing_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap().join("new");
        reset_dir(
            &dir,
            |_| panic!("mount table read for a missing directory"),
            |_| panic!("unmount for a missing directory"),
        )
        .unwrap();
        assert!(dir.is_dir());
    }
}

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};

use crate::config::BuildConfig;
use crate::process::Cmd;

const INSTALLER: &str = "install.sh";

/// Fetch the pinned guest tools checkout, or move it to the pinned revision.
fn update_submodule(dir: &Utf8Path) -> Result<()> {
    tracing::info!("updating guest tools submodule {dir}");
    Cmd::new("git")
        .args(["submodule", "update", "--init", "--", dir.as_str()])
        .run()
        .with_context(|| format!("updating submodule {dir}"))?;
    Ok(())
}

/// Absolute path of the installer inside `dir`.
fn installer_path(dir: &Utf8Path) -> Result<Utf8PathBuf> {
    let installer = dir.join(INSTALLER);
    if !installer.is_file() {
        anyhow::bail!("guest tools installer {installer} not found");
    }
    installer
        .canonicalize_utf8()
        .with_context(|| format!("resolving {installer}"))
}

fn installer_command(installer: &Utf8Path, target: &Utf8Path) -> Cmd {
    let mut cmd = Cmd::new(installer.as_str()).args(["-i", target.as_str()]);
    if let Some(dir) = installer.parent() {
        cmd = cmd.dir(dir);
    }
    cmd
}

/// Install the guest tools into the chroot.
pub fn install(config: &BuildConfig) -> Result<()> {
    update_submodule(&config.guesttools_dir)?;
    let installer = installer_path(&config.guesttools_dir)?;
    tracing::info!("installing guest tools into {}", config.install_dir);
    installer_command(&installer, &config.install_dir)
        .run()
        .context("installing guest tools")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    #[test]
    fn test_installer_path_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap();
        let err = installer_path(dir).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_installer_runs_against_target() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap();
        let script = dir.join(INSTALLER);
        std::fs::write(&script, "#!/bin/sh\necho \"$1 $2\" > \"$2/installed\"\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let target = dir.join("rootfs");
        std::fs::create_dir(&target).unwrap();

        let installer = installer_path(dir).unwrap();
        installer_command(&installer, &target).run().unwrap();

        let out = std::fs::read_to_string(target.join("installed")).unwrap();
        assert_eq!(out.trim(), format!("-i {target}"));
    }

    #[test]
    fn test_installer_failure_propagates() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap();
        let script = dir.join(INSTALLER);
        std::fs::write(&script, "#!/bin/sh\nexit 4\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let installer = installer_path(dir).unwrap();
        let err = installer_command(&installer, dir).run().unwrap_err();
        assert!(err.to_string().contains("exit code 4"));
    }
}

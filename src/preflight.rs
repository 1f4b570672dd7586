use std::ffi::OsStr;

use anyhow::Result;

/// Host programs the pipeline runs directly. Everything else runs inside
/// the chroot.
const REQUIRED_TOOLS: &[&str] = &["chroot", "debootstrap", "dpkg", "git", "mount", "umount"];

/// Tools with no executable of that name in `search_path`.
fn missing_tools<'a>(tools: &[&'a str], search_path: Option<&OsStr>) -> Vec<&'a str> {
    tools
        .iter()
        .copied()
        .filter(|tool| which::which_in(tool, search_path, "/").is_err())
        .collect()
}

/// Make sure we can run at all before touching the install directory.
pub fn check() -> Result<()> {
    let euid = rustix::process::geteuid();
    if !euid.is_root() {
        anyhow::bail!("must be run as root (euid is {})", euid.as_raw());
    }

    let path = std::env::var_os("PATH");
    let missing = missing_tools(REQUIRED_TOOLS, path.as_deref());
    if !missing.is_empty() {
        anyhow::bail!("required tools not found in PATH: {}", missing.join(", "));
    }
    Ok(())
}

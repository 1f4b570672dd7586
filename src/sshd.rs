use std::sync::LazyLock;

use anyhow::{Context, Result};
use camino::Utf8Path;
use regex::Regex;

const SSHD_CONFIG: &str = "etc/ssh/sshd_config";

static PASSWORD_AUTH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*#?[ \t]*PasswordAuthentication[ \t]+(?:yes|no)[ \t]*$")
        .expect("valid regex")
});

// The sandbox seccomp filter cannot be loaded under the container runtime.
static PRIVSEP_SANDBOX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"UsePrivilegeSeparation[ \t]+sandbox").expect("valid regex"));

/// Disable password logins and privilege separation sandboxing.
///
/// Commented and active `PasswordAuthentication` lines all end up as
/// `PasswordAuthentication no`, so running this twice changes nothing.
pub fn normalize_sshd_config(contents: &str) -> String {
    let contents = PASSWORD_AUTH.replace_all(contents, "PasswordAuthentication no");
    PRIVSEP_SANDBOX
        .replace_all(&contents, "UsePrivilegeSeparation yes")
        .into_owned()
}

pub fn configure_sshd(root: &Utf8Path) -> Result<()> {
    let path = root.join(SSHD_CONFIG);
    let contents = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
    let updated = normalize_sshd_config(&contents);
    if updated != contents {
        std::fs::write(&path, updated).with_context(|| format!("writing {path}"))?;
    }
    Ok(())
}

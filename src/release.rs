use std::fmt;

use camino::Utf8Path;

/// Release files looked at, in order, relative to the tree root.
const OS_RELEASE_PATHS: &[&str] = &["etc/os-release", "usr/lib/os-release"];

/// Major version of the bootstrapped Debian release.
///
/// Anything that cannot be read as a number (Debian testing/sid have no
/// `VERSION_ID`) is `Unknown`. `Unknown` skips the legacy package split but
/// does not get the container workarounds, which need a known `>= 8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsVersion {
    Known(u32),
    Unknown,
}

impl OsVersion {
    /// Parse a `VERSION_ID` value. `10.1` is taken as `10`.
    pub fn parse(s: &str) -> Self {
        let s = s.trim().trim_matches(|c| c == '"' || c == '\'');
        let major = s.split('.').next().unwrap_or_default();
        if major.is_empty() || !major.bytes().all(|b| b.is_ascii_digit()) {
            return Self::Unknown;
        }
        major.parse().map_or(Self::Unknown, Self::Known)
    }

    /// Read `VERSION_ID` from the release file of the tree at `root`.
    pub fn detect(root: &Utf8Path) -> Self {
        for rel in OS_RELEASE_PATHS {
            let path = root.join(rel);
            match std::fs::read_to_string(&path) {
                Ok(contents) => return Self::from_os_release(&contents),
                Err(e) => tracing::debug!("reading {path}: {e}"),
            }
        }
        Self::Unknown
    }

    fn from_os_release(contents: &str) -> Self {
        contents
            .lines()
            .find_map(|line| line.trim().strip_prefix("VERSION_ID="))
            .map_or(Self::Unknown, Self::parse)
    }

    pub fn as_option(self) -> Option<u32> {
        match self {
            Self::Known(v) => Some(v),
            Self::Unknown => None,
        }
    }

    /// Releases before stretch ship software-properties split across a
    /// Python 2 package.
    pub fn needs_legacy_python(self) -> bool {
        matches!(self, Self::Known(v) if v < 9)
    }

    /// Jessie and later run systemd units whose sandboxing the container
    /// runtime cannot provide, and a udev that must not be installed.
    pub fn needs_container_workarounds(self) -> bool {
        matches!(self, Self::Known(v) if v >= 8)
    }
}

impl fmt::Display for OsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(v) => write!(f, "{v}"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

use anyhow::{Context, Result};
use camino::Utf8PathBuf;

use crate::cmd_build::BuildArgs;
use crate::utils;

/// Everything the pipeline needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub release: String,
    /// Absolute path of the tree being built.
    pub install_dir: Utf8PathBuf,
    pub mirror: String,
    pub image_name: String,
    pub display_name: String,
    pub description: String,
    pub docs_url: String,
    /// `YYYYMMDD`
    pub build_date: String,
    pub package_url: String,
    pub checksums_url: String,
    pub exclude_file: Utf8PathBuf,
    pub guesttools_dir: Utf8PathBuf,
    pub output_dir: Utf8PathBuf,
}

impl BuildConfig {
    pub fn from_args(args: &BuildArgs) -> Result<Self> {
        let install_dir = args
            .install_dir
            .canonicalize_utf8()
            .with_context(|| format!("resolving {}", args.install_dir))?;
        if install_dir.as_str() == "/" {
            anyhow::bail!("refusing to use / as the install directory");
        }

        Ok(Self {
            release: args.release.clone(),
            install_dir,
            mirror: args.mirror.clone(),
            image_name: args.image_name.clone(),
            display_name: args.display_name.clone(),
            description: args.description.clone(),
            docs_url: args.docs_url.clone(),
            build_date: utils::build_date(args.source_date_epoch)?,
            package_url: args.package_url.clone(),
            checksums_url: args.checksums_url.clone(),
            exclude_file: args.exclude_file.clone(),
            guesttools_dir: args.guesttools_dir.clone(),
            output_dir: args.output_dir.clone(),
        })
    }

    /// `<image>-<date>`, the stem shared by all output files.
    pub fn artifact_stem(&self) -> String {
        format!("{}-{}", self.image_name, self.build_date)
    }

    pub fn archive_path(&self) -> Utf8PathBuf {
        self.output_dir.join(format!("{}.tar.gz", self.artifact_stem()))
    }

    pub fn manifest_path(&self) -> Utf8PathBuf {
        self.output_dir.join(format!("{}.json", self.artifact_stem()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A config rooted at `install_dir`, for tests that only touch files.
    pub(crate) fn test_config(install_dir: &str) -> BuildConfig {
        BuildConfig {
            release: "stretch".into(),
            install_dir: install_dir.into(),
            mirror: "http://deb.debian.org/debian".into(),
            image_name: "debian-9".into(),
            display_name: "Debian 9".into(),
            description: "Debian 9 container image".into(),
            docs_url: "https://example.com/docs".into(),
            build_date: "20231114".into(),
            package_url: "https://example.com/pkgs/tools_1.0_all.deb".into(),
            checksums_url: "https://example.com/pkgs/SHA256SUMS".into(),
            exclude_file: "exclude.txt".into(),
            guesttools_dir: "guesttools".into(),
            output_dir: ".".into(),
        }
    }

    #[test]
    fn test_artifact_paths() {
        let mut config = test_config("/srv/rootfs");
        assert_eq!(config.archive_path().as_str(), "./debian-9-20231114.tar.gz");
        assert_eq!(config.manifest_path().as_str(), "./debian-9-20231114.json");

        config.output_dir = "/var/tmp/out".into();
        assert_eq!(
            config.archive_path().as_str(),
            "/var/tmp/out/debian-9-20231114.tar.gz"
        );
    }
}

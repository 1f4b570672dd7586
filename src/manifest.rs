use anyhow::{Context, Result};
use serde::Serialize;

use crate::archive::ArchiveInfo;
use crate::config::BuildConfig;
use crate::release::OsVersion;

/// Description of a finished build, written next to the archive.
#[derive(Debug, Serialize)]
pub struct BuildManifest<'a> {
    pub name: &'a str,
    pub display_name: &'a str,
    pub description: &'a str,
    pub release: &'a str,
    pub build_date: &'a str,
    pub docs_url: &'a str,
    pub os_version: Option<u32>,
    pub archive: ArchiveEntry<'a>,
}

#[derive(Debug, Serialize)]
pub struct ArchiveEntry<'a> {
    pub file: &'a str,
    pub size: u64,
    pub sha256: &'a str,
}

impl<'a> BuildManifest<'a> {
    pub fn new(config: &'a BuildConfig, os_version: OsVersion, archive: &'a ArchiveInfo) -> Self {
        Self {
            name: &config.image_name,
            display_name: &config.display_name,
            description: &config.description,
            release: &config.release,
            build_date: &config.build_date,
            docs_url: &config.docs_url,
            os_version: os_version.as_option(),
            archive: ArchiveEntry {
                file: archive.path.file_name().unwrap_or(archive.path.as_str()),
                size: archive.size,
                sha256: &archive.sha256,
            },
        }
    }
}

pub fn write(config: &BuildConfig, os_version: OsVersion, archive: &ArchiveInfo) -> Result<()> {
    let manifest = BuildManifest::new(config, os_version, archive);
    let path = config.manifest_path();
    let mut json = serde_json::to_string_pretty(&manifest).context("serializing manifest")?;
    json.push('\n');
    std::fs::write(&path, json).with_context(|| format!("writing {path}"))?;
    tracing::info!("wrote {path}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use camino::Utf8Path;

    use super::*;
    use crate::config::tests::test_config;

    fn archive_info() -> ArchiveInfo {
        ArchiveInfo {
            path: "/out/debian-9-20231114.tar.gz".into(),
            size: 1234,
            sha256: "ab".repeat(32),
            entries: 10,
        }
    }

    #[test]
    fn test_manifest_json() {
        let config = test_config("/srv/rootfs");
        let info = archive_info();
        let manifest = BuildManifest::new(&config, OsVersion::Known(9), &info);
        let value = serde_json::to_value(&manifest).unwrap();

        assert_eq!(value["name"], "debian-9");
        assert_eq!(value["release"], "stretch");
        assert_eq!(value["build_date"], "20231114");
        assert_eq!(value["os_version"], 9);
        assert_eq!(value["archive"]["file"], "debian-9-20231114.tar.gz");
        assert_eq!(value["archive"]["size"], 1234);
    }

    #[test]
    fn test_manifest_unknown_version() {
        let config = test_config("/srv/rootfs");
        let info = archive_info();
        let value =
            serde_json::to_value(BuildManifest::new(&config, OsVersion::Unknown, &info)).unwrap();
        assert!(value["os_version"].is_null());
    }

    #[test]
    fn test_write() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = test_config("/srv/rootfs");
        config.output_dir = Utf8Path::from_path(tmp.path()).unwrap().to_owned();

        write(&config, OsVersion::Known(8), &archive_info()).unwrap();

        let contents = std::fs::read_to_string(config.manifest_path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(value["display_name"], "Debian 9");
        assert_eq!(value["os_version"], 8);
    }
}

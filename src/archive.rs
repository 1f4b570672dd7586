use std::collections::HashMap;
use std::fs::Permissions;
use std::io::{BufWriter, Write};
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use cap_std_ext::cap_std::{ambient_authority, fs::Dir};
use flate2::Compression;
use flate2::write::GzEncoder;

use crate::config::BuildConfig;
use crate::exclude::ExcludeSet;
use crate::scan::{self, EntryKind};
use crate::utils;

/// The finished archive.
#[derive(Debug, Clone)]
pub struct ArchiveInfo {
    pub path: Utf8PathBuf,
    pub size: u64,
    pub sha256: String,
    pub entries: usize,
}

/// Write a gzip-compressed tarball of `root` to `dest`.
///
/// The first member is `./`, carrying the mode and owner of `root` itself.
/// Other members are named relative to `root`. Ownership, modes and mtimes
/// are kept, symlinks are stored as links, files sharing an inode are
/// stored once with hard links for the rest, and sockets are skipped. The
/// archive only appears at `dest` once it is complete.
pub fn write_archive(
    root: &Utf8Path,
    excludes: &ExcludeSet,
    dest: &Utf8Path,
) -> Result<ArchiveInfo> {
    write_archive_checked(root, excludes, dest, utils::check_interrupted)
}

/// [`write_archive`], running `check` before every member.
fn write_archive_checked(
    root: &Utf8Path,
    excludes: &ExcludeSet,
    dest: &Utf8Path,
    check: impl Fn() -> Result<()>,
) -> Result<ArchiveInfo> {
    let rootfs = Dir::open_ambient_dir(root, ambient_authority())
        .with_context(|| format!("opening {root}"))?;
    let entries = scan::scan_tree(&rootfs).context("scanning tree")?;

    let parent = dest
        .parent()
        .filter(|p| !p.as_str().is_empty())
        .unwrap_or(Utf8Path::new("."));
    let tmp = tempfile::Builder::new()
        .prefix(".debrootfs-")
        .suffix(".tmp")
        .tempfile_in(parent)
        .with_context(|| format!("creating temporary archive in {parent}"))?;

    let mut written = 0;
    {
        let encoder = GzEncoder::new(BufWriter::new(tmp.as_file()), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.mode(tar::HeaderMode::Complete);
        builder.follow_symlinks(false);

        builder
            .append_dir("./", root)
            .with_context(|| format!("archiving {root}"))?;
        written += 1;

        // first member seen for each multiply-linked inode
        let mut links: HashMap<(u64, u64), &Utf8Path> = HashMap::new();
        for (rel, kind) in &entries {
            check()?;
            if let Some(pattern) = excludes.matching(rel.as_str()) {
                tracing::trace!("excluding {rel} (matches {pattern})");
                continue;
            }

            let full = root.join(rel);
            match kind {
                EntryKind::Special => {
                    let meta = std::fs::symlink_metadata(&full)
                        .with_context(|| format!("getting metadata for {full}"))?;
                    if meta.file_type().is_socket() {
                        tracing::debug!("skipping socket {rel}");
                        continue;
                    }
                }
                EntryKind::File => {
                    let meta = std::fs::symlink_metadata(&full)
                        .with_context(|| format!("getting metadata for {full}"))?;
                    if meta.nlink() > 1 {
                        if let Some(target) = links.get(&(meta.dev(), meta.ino())) {
                            append_hard_link(&mut builder, &meta, rel, target)
                                .with_context(|| format!("archiving {rel}"))?;
                            written += 1;
                            continue;
                        }
                        links.insert((meta.dev(), meta.ino()), rel);
                    }
                }
                EntryKind::Directory | EntryKind::Symlink => {}
            }

            builder
                .append_path_with_name(&full, rel)
                .with_context(|| format!("archiving {rel}"))?;
            written += 1;
        }

        let encoder = builder.into_inner().context("finishing tar stream")?;
        let mut writer = encoder.finish().context("finishing gzip stream")?;
        writer.flush().context("flushing archive")?;
    }

    let file = tmp.as_file();
    file.set_permissions(Permissions::from_mode(0o644))
        .context("setting archive permissions")?;
    file.sync_all().context("syncing archive")?;
    tmp.persist(dest)
        .with_context(|| format!("moving archive into place at {dest}"))?;

    let size = std::fs::metadata(dest)
        .with_context(|| format!("getting metadata for {dest}"))?
        .len();
    let sha256 = utils::sha256_file(dest)?;

    Ok(ArchiveInfo {
        path: dest.to_owned(),
        size,
        sha256,
        entries: written,
    })
}

/// Store `rel` as a hard link to the already archived `target`.
fn append_hard_link<W: Write>(
    builder: &mut tar::Builder<W>,
    meta: &std::fs::Metadata,
    rel: &Utf8Path,
    target: &Utf8Path,
) -> std::io::Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_metadata_in_mode(meta, tar::HeaderMode::Complete);
    header.set_entry_type(tar::EntryType::Link);
    header.set_size(0);
    builder.append_link(&mut header, rel, target)
}

/// Archive the finished tree as `<image>-<date>.tar.gz`.
pub fn create(config: &BuildConfig) -> Result<ArchiveInfo> {
    let output_dir = config
        .output_dir
        .canonicalize_utf8()
        .with_context(|| format!("resolving {}", config.output_dir))?;
    if output_dir.starts_with(&config.install_dir) {
        anyhow::bail!(
            "output directory {output_dir} is inside the install directory {}",
            config.install_dir
        );
    }

    let excludes = ExcludeSet::load(&config.exclude_file)?;
    let dest = config.archive_path();
    if dest.exists() {
        tracing::warn!("replacing existing {dest}");
    }

    tracing::info!(
        "archiving {} to {dest} ({} exclude patterns)",
        config.install_dir,
        excludes.len()
    );
    let info = write_archive(&config.install_dir, &excludes, &dest)?;
    tracing::info!(
        "wrote {} ({} entries, {})",
        info.path,
        info.entries,
        utils::format_size(info.size)
    );
    Ok(info)
}

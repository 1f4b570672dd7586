use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::path::Path;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use cap_std_ext::cap_std::fs::Dir;
use cap_std_ext::dirext::{CapStdExtDirExt, WalkConfiguration};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
    Symlink,
    /// Devices, fifos and sockets.
    Special,
}

/// Relative path (no leading `/`) to kind, sorted so parents come before
/// their children.
pub type TreeMap = BTreeMap<Utf8PathBuf, EntryKind>;

/// Scan the tree and return every entry below its root.
/// We use cap-std-ext's walk here, which doesn't follow symlinks.
pub fn scan_tree(rootfs: &Dir) -> Result<TreeMap> {
    let mut entries = BTreeMap::new();

    let config = WalkConfiguration::default().path_base(Path::new("/"));

    rootfs
        .walk(&config, |component| {
            let path: &Utf8Path = component
                .path
                .try_into()
                .map_err(|_| anyhow::anyhow!("path is not valid UTF-8"))?;

            let rel_path = path.strip_prefix("/").unwrap_or(path);
            if rel_path.as_str().is_empty() {
                return Ok::<_, anyhow::Error>(ControlFlow::Continue(()));
            }

            let file_type = rootfs
                .symlink_metadata(rel_path.as_str())
                .with_context(|| format!("getting metadata for {path}"))?
                .file_type();
            let kind = if file_type.is_dir() {
                EntryKind::Directory
            } else if file_type.is_symlink() {
                EntryKind::Symlink
            } else if file_type.is_file() {
                EntryKind::File
            } else {
                EntryKind::Special
            };

            entries.insert(rel_path.to_owned(), kind);
            Ok(ControlFlow::Continue(()))
        })
        .context("failed to walk tree")?;

    Ok(entries)
}

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};

use crate::chroot::Chroot;
use crate::process::Cmd;

const MOUNT_TABLE: &str = "/proc/self/mounts";

/// Decode the octal escapes (`\040` for space etc.) the kernel uses in the
/// mount table.
fn unescape_mount_path(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let oct = &bytes[i + 1..i + 4];
            if oct.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let v = oct.iter().fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
                if let Ok(v) = u8::try_from(v) {
                    out.push(v);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Mount points below `root` listed in `table` (in `/proc/self/mounts`
/// format), in the order they must be unmounted: most recent first.
pub fn mounts_under(table: &str, root: &Utf8Path) -> Vec<Utf8PathBuf> {
    let mut found: Vec<Utf8PathBuf> = table
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(|target| Utf8PathBuf::from(unescape_mount_path(target)))
        .filter(|target| target.starts_with(root) && target.as_path() != root)
        .collect();
    found.reverse();
    found.dedup();
    found
}

/// Mount points below `root` on the running system.
pub fn active_mounts_under(root: &Utf8Path) -> Result<Vec<Utf8PathBuf>> {
    let table = std::fs::read_to_string(MOUNT_TABLE)
        .with_context(|| format!("reading {MOUNT_TABLE}"))?;
    Ok(mounts_under(&table, root))
}

pub fn unmount(path: &Utf8Path) -> Result<()> {
    tracing::info!("unmounting {path}");
    Cmd::new("umount")
        .arg(path.as_str())
        .run()
        .with_context(|| format!("unmounting {path}"))?;
    Ok(())
}

/// The `proc` and `dev/pts` mounts a chroot needs while packages are being
/// configured.
///
/// Whatever was mounted is unmounted again when the guard is dropped, so an
/// error anywhere in the pipeline does not leave mounts behind. Use
/// [`ChrootMounts::release`] on the success path to get unmount errors
/// reported.
#[derive(Debug)]
pub struct ChrootMounts {
    mounted: Vec<Utf8PathBuf>,
}

impl ChrootMounts {
    pub fn mount(chroot: &Chroot) -> Result<Self> {
        let mut guard = Self {
            mounted: Vec::new(),
        };

        let proc = chroot.path("proc");
        std::fs::create_dir_all(&proc).with_context(|| format!("creating {proc}"))?;
        tracing::info!("mounting proc on {proc}");
        chroot
            .command("mount")
            .args(["-t", "proc", "proc", "/proc"])
            .run()
            .context("mounting proc in chroot")?;
        guard.mounted.push(proc);

        let pts = chroot.path("dev/pts");
        std::fs::create_dir_all(&pts).with_context(|| format!("creating {pts}"))?;
        tracing::info!("bind-mounting /dev/pts on {pts}");
        Cmd::new("mount")
            .args(["--bind", "/dev/pts", pts.as_str()])
            .run()
            .context("bind-mounting /dev/pts")?;
        guard.mounted.push(pts);

        Ok(guard)
    }

    /// Unmount everything, most recent first.
    pub fn release(mut self) -> Result<()> {
        while let Some(path) = self.mounted.pop() {
            if let Err(e) = unmount(&path) {
                // leave it for Drop to retry
                self.mounted.push(path);
                return Err(e);
            }
        }
        Ok(())
    }
}

impl Drop for ChrootMounts {
    fn drop(&mut self) {
        while let Some(path) = self.mounted.pop() {
            if let Err(e) = unmount(&path) {
                tracing::warn!("failed to unmount {path}: {e:#}");
            }
        }
    }
}

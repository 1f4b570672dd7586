use camino::{Utf8Path, Utf8PathBuf};

use crate::process::Cmd;

/// Handle on the tree being built.
#[derive(Debug, Clone)]
pub struct Chroot {
    root: Utf8PathBuf,
}

impl Chroot {
    pub fn new(root: &Utf8Path) -> Self {
        Self {
            root: root.to_owned(),
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Host path of `path` inside the chroot. Leading slashes are ignored,
    /// so `/etc/motd` and `etc/motd` name the same file.
    pub fn path(&self, path: &str) -> Utf8PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    /// A command run inside the chroot.
    pub fn command(&self, program: &str) -> Cmd {
        Cmd::new("chroot").arg(self.root.as_str()).arg(program)
    }

    /// `apt-get` inside the chroot, never prompting.
    pub fn apt_get<I, S>(&self, args: I) -> Cmd
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.command("apt-get")
            .env("DEBIAN_FRONTEND", "noninteractive")
            .args(args.into_iter().map(|s| s.as_ref().to_owned()))
    }
}

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::Args;

use crate::archive;
use crate::bootstrap;
use crate::chroot::Chroot;
use crate::config::BuildConfig;
use crate::customize;
use crate::guesttools;
use crate::manifest;
use crate::mounts::ChrootMounts;
use crate::package;
use crate::preflight;
use crate::utils::check_interrupted;

pub const DEFAULT_DOCS_URL: &str = "https://docs.joyent.com/images/container-native-linux";
pub const DEFAULT_PACKAGE_URL: &str =
    "https://download.joyent.com/pub/guest-tools/debian/joyent-guest-tools_latest_all.deb";
pub const DEFAULT_CHECKSUMS_URL: &str =
    "https://download.joyent.com/pub/guest-tools/debian/SHA256SUMS";

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Debian release codename to bootstrap (e.g. bookworm)
    #[arg(short = 'r', long)]
    pub release: String,

    /// Existing directory to build the tree in; its contents are replaced
    #[arg(short = 'd', long, value_parser = existing_dir)]
    pub install_dir: Utf8PathBuf,

    /// Debian mirror URL
    #[arg(short = 'm', long)]
    pub mirror: String,

    /// Image name, used for the archive file name
    #[arg(short = 'i', long)]
    pub image_name: String,

    /// Human-readable image name shown in the MOTD
    #[arg(short = 'p', long)]
    pub display_name: String,

    /// Image description
    #[arg(short = 'D', long)]
    pub description: String,

    /// Documentation URL shown in the MOTD
    #[arg(short = 'u', long, default_value = DEFAULT_DOCS_URL)]
    pub docs_url: String,

    /// URL of the signed package installed into the image
    #[arg(long, env = "DEBROOTFS_PACKAGE_URL", default_value = DEFAULT_PACKAGE_URL)]
    pub package_url: String,

    /// URL of the SHA256SUMS listing covering the package
    #[arg(long, env = "DEBROOTFS_CHECKSUMS_URL", default_value = DEFAULT_CHECKSUMS_URL)]
    pub checksums_url: String,

    /// File of path patterns left out of the archive
    #[arg(long, env = "DEBROOTFS_EXCLUDE_FILE", default_value = "exclude.txt")]
    pub exclude_file: Utf8PathBuf,

    /// Guest tools submodule directory
    #[arg(long, env = "DEBROOTFS_GUESTTOOLS_DIR", default_value = "guesttools")]
    pub guesttools_dir: Utf8PathBuf,

    /// Directory the archive and manifest are written to
    #[arg(long, default_value = ".")]
    pub output_dir: Utf8PathBuf,

    /// Derive the build date from this epoch instead of the local clock
    #[arg(long, env = "SOURCE_DATE_EPOCH", hide = true)]
    pub source_date_epoch: Option<u64>,

    /// Don't check for root privileges and host tools
    #[arg(long)]
    pub skip_preflight: bool,
}

fn existing_dir(s: &str) -> Result<Utf8PathBuf, String> {
    let path = Utf8PathBuf::from(s);
    if path.is_dir() {
        Ok(path)
    } else {
        Err(format!("{s} is not an existing directory"))
    }
}

pub fn run(args: &BuildArgs) -> Result<()> {
    let config = BuildConfig::from_args(args)?;

    if !args.skip_preflight {
        preflight::check().context("running preflight checks")?;
    }

    tracing::info!(
        "building {} ({}) from {} as {}",
        config.image_name,
        config.build_date,
        config.release,
        config.archive_path()
    );

    bootstrap::prepare_install_dir(&config.install_dir).context("preparing install directory")?;
    check_interrupted()?;
    bootstrap::debootstrap(&config)?;
    check_interrupted()?;

    let chroot = Chroot::new(&config.install_dir);
    let mounts = ChrootMounts::mount(&chroot).context("mounting pseudo-filesystems")?;
    check_interrupted()?;

    let os_version = customize::customize(&config, &chroot).context("customizing chroot")?;
    check_interrupted()?;

    guesttools::install(&config)?;
    check_interrupted()?;

    package::install_signed_package(&config).context("installing signed package")?;
    check_interrupted()?;

    mounts.release().context("unmounting pseudo-filesystems")?;

    let info = archive::create(&config).context("creating archive")?;
    manifest::write(&config, os_version, &info).context("writing build manifest")?;

    tracing::info!("done: {}", info.path);
    Ok(())
}

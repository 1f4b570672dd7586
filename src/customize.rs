use anyhow::{Context, Result};
use camino::Utf8Path;

use crate::chroot::Chroot;
use crate::config::BuildConfig;
use crate::motd;
use crate::release::OsVersion;
use crate::sshd;
use crate::utils::check_interrupted;

const LOCALE: &str = "en_US.UTF-8";
const SECURITY_MIRROR: &str = "http://security.debian.org/";

/// Units whose sandboxing directives the container runtime cannot honour.
const SANDBOXED_UNITS: &[&str] = &["systemd-hostnamed", "systemd-localed", "systemd-timedated"];

const SERVICE_OVERRIDE: &str = "\
[Service]
PrivateTmp=no
PrivateDevices=no
PrivateNetwork=no
ProtectSystem=no
ProtectHome=no
";

// udev fails to start against the host kernel's cgroup layout.
const UDEV_PIN: &str = "\
Package: udev
Pin: release *
Pin-Priority: -1
";

fn write_file(path: &Utf8Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {parent}"))?;
    }
    std::fs::write(path, contents).with_context(|| format!("writing {path}"))
}

/// Point `/etc/localtime` at a copy of the UTC zone file.
pub fn set_timezone_utc(root: &Utf8Path) -> Result<()> {
    let zone = root.join("usr/share/zoneinfo/UTC");
    let localtime = root.join("etc/localtime");

    if localtime.symlink_metadata().is_ok() {
        std::fs::remove_file(&localtime).with_context(|| format!("removing {localtime}"))?;
    }
    std::fs::copy(&zone, &localtime).with_context(|| format!("copying {zone} to {localtime}"))?;
    Ok(())
}

/// Enable the default locale in `locale.gen` and `/etc/default/locale`.
pub fn configure_locale_files(root: &Utf8Path) -> Result<()> {
    let entry = format!("{LOCALE} UTF-8");
    let locale_gen = root.join("etc/locale.gen");

    let mut contents = match std::fs::read_to_string(&locale_gen) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e).with_context(|| format!("reading {locale_gen}")),
    };
    if !contents.lines().any(|line| line.trim() == entry) {
        if !contents.is_empty() && !contents.ends_with('\n') {
            contents.push('\n');
        }
        contents.push_str(&entry);
        contents.push('\n');
        write_file(&locale_gen, &contents)?;
    }

    write_file(
        &root.join("etc/default/locale"),
        &format!("LANG=\"{LOCALE}\"\n"),
    )
}

pub fn sources_list(release: &str, mirror: &str) -> String {
    format!(
        "deb {mirror} {release} main\n\
         deb-src {mirror} {release} main\n\
         deb {mirror} {release}-updates main\n\
         deb-src {mirror} {release}-updates main\n\
         deb {SECURITY_MIRROR} {release}/updates main\n\
         deb-src {SECURITY_MIRROR} {release}/updates main\n"
    )
}

/// Packages needed to get `add-apt-repository` on `version`.
pub fn software_properties_packages(version: OsVersion) -> Vec<&'static str> {
    let mut pkgs = vec!["software-properties-common"];
    if version.needs_legacy_python() {
        pkgs.push("python-software-properties");
    }
    pkgs
}

/// Pin udev away and relax unit sandboxing.
pub fn write_container_workarounds(root: &Utf8Path) -> Result<()> {
    write_file(&root.join("etc/apt/preferences.d/udev"), UDEV_PIN)?;
    for unit in SANDBOXED_UNITS {
        let path = root.join(format!("etc/systemd/system/{unit}.service.d/override.conf"));
        write_file(&path, SERVICE_OVERRIDE)?;
    }
    Ok(())
}

/// Apply every configuration change to a freshly bootstrapped tree.
///
/// Requires `proc` and `dev/pts` to be mounted. Returns the detected OS
/// version.
pub fn customize(config: &BuildConfig, chroot: &Chroot) -> Result<OsVersion> {
    let root = chroot.root();

    tracing::info!("setting timezone to UTC");
    set_timezone_utc(root).context("setting timezone")?;

    tracing::info!("configuring locale {LOCALE}");
    configure_locale_files(root).context("configuring locale")?;
    chroot
        .command("locale-gen")
        .run()
        .context("generating locales")?;
    check_interrupted()?;

    tracing::info!("writing apt sources for {}", config.release);
    write_file(
        &chroot.path("etc/apt/sources.list"),
        &sources_list(&config.release, &config.mirror),
    )?;

    tracing::info!("upgrading packages");
    chroot
        .apt_get(["update"])
        .run()
        .context("refreshing package index")?;
    chroot
        .apt_get(["-y", "upgrade"])
        .run()
        .context("upgrading packages")?;
    check_interrupted()?;

    let version = OsVersion::detect(root);
    tracing::info!("detected Debian version {version}");

    let pkgs = software_properties_packages(version);
    tracing::info!("installing {}", pkgs.join(" "));
    chroot
        .apt_get(["-y", "install"].into_iter().chain(pkgs))
        .run()
        .context("installing software-properties")?;
    check_interrupted()?;

    if version.needs_container_workarounds() {
        tracing::info!("pinning udev and relaxing unit sandboxing");
        write_container_workarounds(root).context("writing container workarounds")?;
    }

    tracing::info!("cleaning package cache");
    chroot
        .apt_get(["-y", "autoremove"])
        .run()
        .context("removing unused packages")?;
    chroot
        .apt_get(["clean"])
        .run()
        .context("cleaning package cache")?;

    sshd::configure_sshd(root).context("configuring sshd")?;
    motd::write_motd_and_product(root, config).context("writing motd and product")?;

    Ok(version)
}

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use camino::Utf8Path;

use crate::config::BuildConfig;
use crate::process::Cmd;
use crate::utils;

/// File name a package is saved under: the last path segment of its URL.
pub fn file_name_from_url(url: &str) -> Result<&str> {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let name = path.rsplit('/').next().unwrap_or_default();
    if name.is_empty() || !path.contains("://") || path.ends_with("://") {
        anyhow::bail!("cannot derive a file name from {url}");
    }
    Ok(name)
}

/// Give up on a connection that cannot be made in this time.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Upper bound on a whole transfer, body included.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(15 * 60);

fn http_agent() -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_connect(Some(CONNECT_TIMEOUT))
        .timeout_global(Some(DOWNLOAD_TIMEOUT))
        .build()
        .into()
}

/// Download `url` to `dest`, streaming to constant memory.
fn download(agent: &ureq::Agent, url: &str, dest: &Utf8Path) -> Result<()> {
    if !url.starts_with("https://") {
        anyhow::bail!("refusing to download {url} over an insecure transport");
    }
    tracing::info!("downloading {url}");

    let response = agent
        .get(url)
        .call()
        .with_context(|| format!("downloading {url}"))?;
    let mut reader = response.into_body().into_reader();

    let file = std::fs::File::create(dest).with_context(|| format!("creating {dest}"))?;
    let mut writer = std::io::BufWriter::new(file);
    let n = utils::copy_checked(&mut reader, &mut writer, utils::check_interrupted)
        .with_context(|| format!("downloading {url} to {dest}"))?;
    writer.flush().with_context(|| format!("flushing {dest}"))?;

    tracing::debug!("downloaded {} to {dest}", utils::format_size(n));
    Ok(())
}

/// Find the digest listed for `name` in `sha256sum`-style output.
///
/// The name must match exactly; `*name` (binary mode) is accepted.
pub fn expected_digest<'a>(listing: &'a str, name: &str) -> Result<&'a str> {
    listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .find_map(|line| {
            let (digest, file) = line.split_once(char::is_whitespace)?;
            let file = file.trim_start();
            let file = file.strip_prefix('*').unwrap_or(file);
            (file == name).then_some(digest)
        })
        .with_context(|| format!("no checksum listed for {name}"))
}

/// Check `package` against its entry in `listing`.
pub fn verify(package: &Utf8Path, listing: &str) -> Result<()> {
    let name = package
        .file_name()
        .with_context(|| format!("{package} has no file name"))?;
    let expected = expected_digest(listing, name)?;
    let actual = utils::sha256_file(package)?;
    if !expected.eq_ignore_ascii_case(&actual) {
        anyhow::bail!("checksum mismatch for {name}: expected {expected}, got {actual}");
    }
    tracing::info!("verified {name} (sha256 {actual})");
    Ok(())
}

fn dpkg_install_command(root: &Utf8Path, package: &Utf8Path) -> Cmd {
    Cmd::new("dpkg")
        .arg(format!("--root={root}"))
        .args(["-i", package.as_str()])
}

/// Fetch the signed package, verify it and install it into the chroot.
///
/// Nothing is installed unless the checksum matches.
pub fn install_signed_package(config: &BuildConfig) -> Result<()> {
    let tmp = tempfile::tempdir().context("creating download directory")?;
    let workdir = Utf8Path::from_path(tmp.path()).context("download directory is not UTF-8")?;

    let agent = http_agent();
    fetch_verify_install(
        &config.package_url,
        &config.checksums_url,
        workdir,
        |url, dest| download(&agent, url, dest),
        |package| {
            tracing::info!("installing {package} into {}", config.install_dir);
            dpkg_install_command(&config.install_dir, package)
                .run()
                .context("installing package")?;
            Ok(())
        },
    )
}

/// Fetch the package and its checksum listing into `workdir` with `fetch`,
/// then hand the package to `install` once it verifies.
fn fetch_verify_install(
    package_url: &str,
    checksums_url: &str,
    workdir: &Utf8Path,
    mut fetch: impl FnMut(&str, &Utf8Path) -> Result<()>,
    install: impl FnOnce(&Utf8Path) -> Result<()>,
) -> Result<()> {
    let package = workdir.join(file_name_from_url(package_url)?);
    let sums = workdir.join(file_name_from_url(checksums_url)?);
    if package == sums {
        anyhow::bail!("package and checksum URLs name the same file");
    }

    fetch(package_url, &package)?;
    utils::check_interrupted()?;
    fetch(checksums_url, &sums)?;

    let listing = std::fs::read_to_string(&sums).with_context(|| format!("reading {sums}"))?;
    verify(&package, &listing).context("verifying package")?;
    utils::check_interrupted()?;

    install(&package)
}

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use camino::Utf8Path;
use openssl::sha::Sha256;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Record that the operator asked us to stop. A second request exits on
/// the spot.
pub fn set_interrupted() {
    if INTERRUPTED.swap(true, Ordering::SeqCst) {
        std::process::exit(130);
    }
}

/// Bail out if SIGINT was received since startup.
pub fn check_interrupted() -> Result<()> {
    if INTERRUPTED.load(Ordering::SeqCst) {
        anyhow::bail!("interrupted");
    }
    Ok(())
}

/// Copy `reader` into `writer` in 64 KiB chunks, running `check` before
/// every read so a long transfer can be abandoned.
pub fn copy_checked(
    reader: &mut impl Read,
    writer: &mut impl Write,
    check: impl Fn() -> Result<()>,
) -> Result<u64> {
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0;
    loop {
        check()?;
        let n = reader.read(&mut buf).context("reading")?;
        if n == 0 {
            return Ok(total);
        }
        writer.write_all(&buf[..n]).context("writing")?;
        total += n as u64;
    }
}

/// Format the build date as `YYYYMMDD`.
///
/// If `epoch` is given (e.g. from `SOURCE_DATE_EPOCH`) it is interpreted as
/// UTC; otherwise the local clock is used.
pub fn build_date(epoch: Option<u64>) -> Result<String> {
    match epoch {
        Some(secs) => {
            let secs = i64::try_from(secs).with_context(|| format!("epoch too large: {secs}"))?;
            let dt = chrono::DateTime::from_timestamp(secs, 0)
                .with_context(|| format!("epoch out of range: {secs}"))?;
            Ok(dt.format("%Y%m%d").to_string())
        }
        None => Ok(chrono::Local::now().format("%Y%m%d").to_string()),
    }
}

/// Hex-encoded SHA-256 of the file at `path`.
pub fn sha256_file(path: &Utf8Path) -> Result<String> {
    let mut file = std::fs::File::open(path).with_context(|| format!("opening {path}"))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("reading {path}"))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finish()))
}

/// Format a byte count as a human-readable string using binary units.
pub fn format_size(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = 1024.0 * KIB;
    const GIB: f64 = 1024.0 * MIB;

    let bytes_f = bytes as f64;
    if bytes_f >= GIB {
        format!("{:.1} GiB", bytes_f / GIB)
    } else if bytes_f >= MIB {
        format!("{:.1} MiB", bytes_f / MIB)
    } else if bytes_f >= KIB {
        format!("{:.1} KiB", bytes_f / KIB)
    } else {
        format!("{} B", bytes)
    }
}

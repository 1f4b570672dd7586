mod archive;
mod bootstrap;
mod chroot;
mod cmd_build;
mod config;
mod customize;
mod exclude;
mod guesttools;
mod manifest;
mod motd;
mod mounts;
mod package;
mod preflight;
mod process;
mod release;
mod scan;
mod sshd;
mod utils;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "debrootfs")]
#[command(about = "Build a base Debian rootfs archive for container brand images")]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(flatten)]
    build: cmd_build::BuildArgs,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Child processes see SIGINT themselves and fail; we only record it so
    // the pipeline stops at the next check and the chroot mounts get
    // released. A second SIGINT exits right away.
    ctrlc::set_handler(utils::set_interrupted).context("setting up signal handler")?;

    let cli = Cli::parse();
    cmd_build::run(&cli.build)
}

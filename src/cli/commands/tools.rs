//! Tool checks and configuration display.

use std::path::Path;

use tokio::runtime::Runtime;

use crate::config::{self, Config};
use crate::providers::{fingerprint, ProviderKind};
use crate::segment::is_tool_available;

use super::{print_ffmpeg_install_instructions, print_fpcalc_install_instructions};

/// Check that external tools and credentials are in place
pub fn cmd_check_tools(rt: &Runtime, config: &Config) -> anyhow::Result<()> {
    println!("Checking tools...\n");

    let mut ffmpeg_missing = false;
    for tool in ["ffmpeg", "ffprobe"] {
        if rt.block_on(is_tool_available(tool)) {
            println!("✓ {}: found", tool);
        } else {
            println!("✗ {}: NOT FOUND", tool);
            ffmpeg_missing = true;
        }
    }
    if ffmpeg_missing {
        print_ffmpeg_install_instructions();
    }

    if let Some(version) = fingerprint::fpcalc_version() {
        println!("✓ fpcalc: {}", version);
    } else {
        println!("✗ fpcalc: NOT FOUND");
        print_fpcalc_install_instructions();
    }

    println!();
    println!("Providers:");
    for kind in ProviderKind::ALL {
        match config.credentials.require(kind) {
            Ok(()) => println!("✓ {}: credentials set", kind),
            Err(e) => println!("✗ {}: {}", kind, e),
        }
    }
    if config.credentials.require(ProviderKind::AcoustId).is_err() {
        println!("  Get an AcoustID key at: https://acoustid.org/new-application");
    }

    Ok(())
}

/// Print the effective configuration as TOML, secrets masked
pub fn cmd_show_config(config: &Config, explicit_path: Option<&Path>) -> anyhow::Result<()> {
    let path = explicit_path
        .map(Path::to_path_buf)
        .or_else(config::config_path);
    match path {
        Some(path) => println!("# Config file: {}", path.display()),
        None => println!("# Config file: (no config directory)"),
    }

    if let Err(e) = config.validate() {
        println!("# Warning: {}", e);
    }
    println!();
    print!("{}", toml::to_string_pretty(&config.redacted())?);
    Ok(())
}

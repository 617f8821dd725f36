//! memlua command line tool
//!
//! Loads a file as the image of a simulated target process, installs it on
//! the configured engine and drives pattern or value scans through the
//! same stack bridge a live session would use.

mod app;
mod commands;

use clap::Parser;

use crate::app::{Cli, Command};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // memlua info+ on stderr; --verbose enables debug; RUST_LOG overrides
    let level = if cli.global.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_module("memlua", level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(false)
        .init();

    match &cli.command {
        Command::Pattern { pattern } => commands::pattern::run(pattern),
        Command::Aob {
            file,
            pattern,
            base,
            module,
            unique,
            protection,
            aligned,
            last_digits,
        } => commands::aob::run(
            file,
            pattern,
            &commands::aob::AobOptions {
                base: *base,
                module: module.as_deref(),
                unique: *unique,
                protection: protection.as_deref(),
                aligned: *aligned,
                last_digits: last_digits.as_deref(),
            },
            &cli.global,
        ),
        Command::Scan {
            file,
            value,
            value2,
            value_type,
            scan_type,
            next,
            base,
            hex,
        } => commands::scan::run(
            file,
            &commands::scan::ScanOptions {
                value,
                value2: value2.as_deref(),
                value_type: *value_type,
                scan_type: *scan_type,
                next,
                base: *base,
                hex: *hex,
            },
            &cli.global,
        ),
    }
}

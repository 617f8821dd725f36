//! Command line definitions

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use memlua_core::scan::{ScanType, ValueType};
use memlua_core::EngineKind;

#[derive(Parser)]
#[command(name = "memlua")]
#[command(about = "Pattern and value scans over a scriptable memory engine", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args)]
pub struct GlobalOpts {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Engine implementation, overriding the configuration
    #[arg(long, global = true)]
    pub engine: Option<EngineKind>,

    /// Lua shared library for the native engine (path or name, e.g. lua5.4)
    #[arg(long, global = true)]
    pub library: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Validate a pattern and print its canonical form
    Pattern {
        /// Pattern such as "48 8B 05 ?? ?? ?? ??"
        pattern: String,
    },

    /// Scan a file image for a byte pattern
    Aob {
        /// File loaded as the target image
        file: PathBuf,
        /// Byte pattern
        pattern: String,
        /// Load address of the image (hex)
        #[arg(long, default_value = "0", value_parser = parse_hex)]
        base: u64,
        /// Module name given to the image, and scan only inside it
        #[arg(long)]
        module: Option<String>,
        /// Report at most one address
        #[arg(long)]
        unique: bool,
        /// Region protection filter, e.g. "+X-C"
        #[arg(long)]
        protection: Option<String>,
        /// Only addresses divisible by this hex value
        #[arg(long, value_parser = parse_hex, conflicts_with = "last_digits")]
        aligned: Option<u64>,
        /// Only addresses whose hex form ends with these digits
        #[arg(long)]
        last_digits: Option<String>,
    },

    /// Run a first value scan and optional next scans over a file image
    Scan {
        /// File loaded as the target image
        file: PathBuf,
        /// Value searched by the first scan
        #[arg(long)]
        value: String,
        /// Second value for "between" scans
        #[arg(long)]
        value2: Option<String>,
        /// Value type
        #[arg(long = "type", default_value = "dword")]
        value_type: ValueType,
        /// Comparison of the first scan
        #[arg(long, default_value = "exact")]
        scan_type: ScanType,
        /// Exact value of a next scan; repeat for several passes
        #[arg(long)]
        next: Vec<String>,
        /// Load address of the image (hex)
        #[arg(long, default_value = "0", value_parser = parse_hex)]
        base: u64,
        /// Parse values as hex
        #[arg(long)]
        hex: bool,
    },
}

fn parse_hex(text: &str) -> Result<u64, String> {
    memlua_core::aob::parse_address(text).ok_or_else(|| format!("{:?} is not a hex address", text))
}

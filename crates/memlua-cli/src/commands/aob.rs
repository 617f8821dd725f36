//! `memlua aob` - pattern scan over a file image

use std::path::Path;

use memlua_core::aob::Alignment;
use memlua_core::{AobPattern, AobScanOptions, AobScanner};

use crate::app::GlobalOpts;

pub struct AobOptions<'a> {
    pub base: u64,
    pub module: Option<&'a str>,
    pub unique: bool,
    pub protection: Option<&'a str>,
    pub aligned: Option<u64>,
    pub last_digits: Option<&'a str>,
}

pub fn run(file: &Path, text: &str, opts: &AobOptions<'_>, global: &GlobalOpts) -> anyhow::Result<()> {
    let pattern = AobPattern::parse(text)?;
    let config = super::load_config(global)?;
    let (bridge, _target) = super::attach(file, opts.base, opts.module, &config)?;

    let mut options = AobScanOptions::new().unique(opts.unique);
    if let Some(module) = opts.module {
        options = options.module(module);
    }
    if let Some(flags) = opts.protection {
        options = options.protection(flags);
    }
    if let Some(divisor) = opts.aligned {
        options = options.alignment(Alignment::Aligned(divisor));
    }
    if let Some(digits) = opts.last_digits {
        options = options.alignment(Alignment::LastDigits(digits.to_string()));
    }

    let matches = AobScanner::new(bridge).scan(&pattern, &options)?;
    for m in &matches {
        println!("0x{:X}", m);
    }
    log::info!("{} match(es) for {}", matches.len(), pattern);
    Ok(())
}

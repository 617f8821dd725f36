//! `memlua pattern` - validate a pattern

use memlua_core::AobPattern;

pub fn run(text: &str) -> anyhow::Result<()> {
    let pattern = AobPattern::parse(text)?;
    println!("{}", pattern);
    log::info!(
        "{} bytes, {} wildcards",
        pattern.len(),
        pattern.wildcards()
    );
    Ok(())
}

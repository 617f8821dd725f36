pub mod aob;
pub mod pattern;
pub mod scan;

use std::path::Path;

use anyhow::Context;
use memlua_core::{Bridge, BridgeConfig, BridgeHandle, Region, Target};

use crate::app::GlobalOpts;

/// Configuration file merged with command line overrides
pub fn load_config(global: &GlobalOpts) -> anyhow::Result<BridgeConfig> {
    let mut config = match &global.config {
        Some(path) => BridgeConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => BridgeConfig::default(),
    };
    if let Some(kind) = global.engine {
        config.engine.kind = kind;
    }
    if let Some(library) = &global.library {
        config.engine.library = Some(library.clone());
    }
    config.validate()?;
    Ok(config)
}

/// Bridge with `file` mapped at `base` as the target image
pub fn attach(
    file: &Path,
    base: u64,
    module: Option<&str>,
    config: &BridgeConfig,
) -> anyhow::Result<(BridgeHandle, Target)> {
    let bytes = std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    if bytes.is_empty() {
        anyhow::bail!("{} is empty", file.display());
    }

    let module = module.map(str::to_string).unwrap_or_else(|| {
        file.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    });
    let target = Target::new();
    target.map(Region::new(base, bytes).with_module(module))?;

    let bridge = Bridge::from_config(config)?;
    target.install(&bridge)?;
    log::debug!("{} attached to the {} engine", file.display(), bridge.kind());
    Ok((bridge, target))
}

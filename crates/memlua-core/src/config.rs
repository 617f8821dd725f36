//! Bridge configuration (memlua.toml)
//!
//! ```toml
//! [engine]
//! kind = "native"
//! library = "/usr/lib/x86_64-linux-gnu/liblua5.3.so"
//! open_libs = true
//!
//! [scan]
//! protection_flags = "+W*X-C"
//! alignment = "aligned"
//! alignment_param = "4"
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scan::{validate_protection, AlignmentType, ScanConfiguration, DEFAULT_PROTECTION};

/// Errors that can occur while loading a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the file
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to serialize TOML
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// Validation error
    #[error("Invalid config: {0}")]
    ValidationError(String),
}

/// Which engine the bridge drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// In-process engine
    #[default]
    Sim,
    /// Lua shared library
    Native,
}

impl FromStr for EngineKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sim" => Ok(EngineKind::Sim),
            "native" => Ok(EngineKind::Native),
            other => Err(ConfigError::ValidationError(format!(
                "unknown engine kind: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Sim => write!(f, "sim"),
            EngineKind::Native => write!(f, "native"),
        }
    }
}

/// `[engine]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine implementation
    pub kind: EngineKind,

    /// Lua shared library (native engine only): a path, or a bare name
    /// such as `lua5.4` that is expanded to the usual file names
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library: Option<PathBuf>,

    /// Open the standard libraries in a fresh native state
    pub open_libs: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: EngineKind::Sim,
            library: None,
            open_libs: true,
        }
    }
}

/// `[scan]` section: defaults applied to new scan configurations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanDefaults {
    /// Region protection filter
    pub protection_flags: String,

    /// Alignment filter
    pub alignment: AlignmentType,

    /// Alignment parameter
    pub alignment_param: String,
}

impl Default for ScanDefaults {
    fn default() -> Self {
        Self {
            protection_flags: DEFAULT_PROTECTION.to_string(),
            alignment: AlignmentType::NotAligned,
            alignment_param: String::new(),
        }
    }
}

impl ScanDefaults {
    /// A scan configuration carrying these defaults
    pub fn configuration(&self) -> ScanConfiguration {
        ScanConfiguration {
            protection_flags: self.protection_flags.clone(),
            alignment_type: self.alignment,
            alignment_param: self.alignment_param.clone(),
            ..ScanConfiguration::default()
        }
    }
}

/// Complete bridge configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Engine selection
    pub engine: EngineConfig,

    /// Scan defaults
    pub scan: ScanDefaults,
}

impl BridgeConfig {
    /// Load and validate a configuration file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse and validate a configuration from TOML text
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.kind == EngineKind::Native {
            match &self.engine.library {
                None => {
                    return Err(ConfigError::ValidationError(
                        "native engine requires engine.library".to_string(),
                    ))
                }
                Some(path) if path.as_os_str().is_empty() => {
                    return Err(ConfigError::ValidationError(
                        "engine.library cannot be empty".to_string(),
                    ))
                }
                Some(_) => {}
            }
        }

        validate_protection(&self.scan.protection_flags)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        if self.scan.alignment != AlignmentType::NotAligned {
            let mut defaults = self.scan.configuration();
            defaults.scan_type = crate::scan::ScanType::Unknown;
            defaults
                .validate()
                .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        }
        Ok(())
    }

    /// Serialize to TOML text
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write to `path`
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }
}

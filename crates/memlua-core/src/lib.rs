//! memlua core - typed access to a scriptable memory-inspection engine
//!
//! Every operation goes through the engine's stack calling convention.
//! This crate layers typed, stack-balanced calls on top of it:
//!
//! - [`Bridge`]: exclusive handle to one engine plus its callback registry
//! - [`marshal`]: argument lists, protected calls, object references
//! - [`MemoryAccess`]: typed reads and writes of remote or local memory
//! - [`AobScanner`]: array-of-bytes pattern scans
//! - [`ScanSession`]: two-phase value scans with progress events
//! - [`Target`]: an in-memory process exposing the same entry points
//! - [`BridgeConfig`]: TOML configuration of the engine and scan defaults
//!
//! # Example
//!
//! ```ignore
//! use memlua_core::{Bridge, MemoryAccess, Region, Target};
//!
//! let bridge = Bridge::sim();
//! let target = Target::new();
//! target.map(Region::new(0x1000, vec![0; 0x100]))?;
//! target.install(&bridge)?;
//!
//! let memory = MemoryAccess::new(bridge.clone());
//! memory.write_integer(0x1010, 100)?;
//! assert_eq!(memory.read_integer(0x1010)?, 100);
//! ```

#![warn(missing_docs)]

pub mod aob;
pub mod bridge;
pub mod callbacks;
pub mod config;
pub mod marshal;
pub mod memory;
pub mod scan;
pub mod target;

pub use aob::{AobMatch, AobPattern, AobScanOptions, AobScanner, MatchSet};
pub use bridge::{Bridge, BridgeHandle};
pub use callbacks::CallbackRegistry;
pub use config::{BridgeConfig, ConfigError, EngineKind};
pub use marshal::{ArgList, ObjectRef, StackGuard};
pub use memory::MemoryAccess;
pub use scan::{ScanConfiguration, ScanEvent, ScanProgress, ScanSession, SessionState};
pub use target::{Protection, Region, Target};

pub use memlua_sdk::{BridgeError, BridgeResult, LuaStack, StackValue, ValueKind};

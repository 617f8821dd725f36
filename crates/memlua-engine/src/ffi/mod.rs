//! Native engine binding
//!
//! This module provides:
//! - Dynamic library loading (`Library`)
//! - The resolved C entry point table (`LuaApi`)
//! - `LuaState`, the `LuaStack` implementation over a raw engine state

pub mod api;
pub mod loader;
mod state;

pub use api::{LuaApi, RawState, LUA_REGISTRYINDEX};
pub use loader::{Library, LoadError};
pub use state::LuaState;

//! memlua engine implementations
//!
//! Two implementations of [`memlua_sdk::LuaStack`]:
//!
//! - [`LuaState`] (in [`ffi`]): the Lua 5.3 / 5.4 C API, resolved at
//!   runtime from a shared library with [`LuaApi::load`]. It can own a
//!   fresh state or attach to a state owned by the host process.
//! - [`SimState`] (in [`vm`]): an in-process engine with the same
//!   semantics for stack discipline, tables, references and protected
//!   calls. Callable values are host functions only.

#![warn(missing_docs)]

pub mod ffi;
pub mod vm;

pub use ffi::{LuaApi, LuaState};
pub use vm::SimState;

//! memlua SDK - stack calling convention shared by engines and callers
//!
//! This crate holds the minimal types needed to talk to an embedded
//! engine whose only calling convention is a shared, dynamically-typed
//! stack, without depending on a concrete engine:
//!
//! - [`LuaStack`]: push / pop / type-query / call primitives
//! - [`StackValue`] and [`ValueKind`]: the dynamic value model
//! - [`HostFunction`]: host code the engine can call back into
//! - [`FromStack`] / [`ToStack`]: typed marshaling of single slots
//! - [`BridgeError`]: the error taxonomy shared by every layer
//!
//! # Example
//!
//! ```ignore
//! use memlua_sdk::{HostFunction, LuaStack};
//! use std::rc::Rc;
//!
//! let add = Rc::new(HostFunction::new("add", |stack| {
//!     let sum = stack.to_integer(1) + stack.to_integer(2);
//!     stack.push_integer(sum);
//!     Ok(1)
//! }));
//! engine.register_function("add", add.clone());
//! ```

#![warn(missing_docs)]

pub mod convert;
pub mod error;
pub mod handler;
pub mod stack;
pub mod value;

pub use convert::{abs_index, collect_bytes, push_byte_table, FromStack, ToStack};
pub use error::{BridgeError, BridgeResult};
pub use handler::{HostFn, HostFunction};
pub use stack::{CallStatus, LuaStack, MULTRET, REF_NIL};
pub use value::{StackValue, ValueKind};

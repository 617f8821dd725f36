//! LuaStack trait: the engine's stack calling convention
//!
//! Defines the primitive surface every engine implementation provides.
//! Higher layers (marshaling, callbacks, scan sessions) program against
//! this trait without depending on a concrete engine, so the native C
//! binding and the in-process engine are interchangeable.
//!
//! # Indices
//!
//! Positive indices address the current frame from the bottom (`1` is the
//! first argument of a callback), negative indices count from the top
//! (`-1` is the top slot).
//!
//! # Balance
//!
//! Primitives never unwind the stack on failure. Callers restore depth
//! themselves (see `StackGuard` in memlua-core).

use std::rc::Rc;

use crate::handler::HostFunction;
use crate::value::{StackValue, ValueKind};

/// `nresults` value requesting every result the callee returns
pub const MULTRET: i32 = -1;

/// Reference value used for nil in the engine registry
pub const REF_NIL: i32 = -1;

/// Status code returned by a protected call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum CallStatus {
    /// Call completed
    Ok = 0,
    /// Coroutine yielded
    Yield = 1,
    /// Runtime error raised by the callee
    Runtime = 2,
    /// Syntax error while loading a chunk
    Syntax = 3,
    /// Allocation failure
    Memory = 4,
    /// Error inside a garbage-collection finalizer
    Gc = 5,
    /// Error while running the message handler
    Handler = 6,
}

impl CallStatus {
    /// Map an engine status code; unknown codes read as `Runtime`
    pub const fn from_code(code: i32) -> Self {
        match code {
            0 => CallStatus::Ok,
            1 => CallStatus::Yield,
            3 => CallStatus::Syntax,
            4 => CallStatus::Memory,
            5 => CallStatus::Gc,
            6 => CallStatus::Handler,
            _ => CallStatus::Runtime,
        }
    }

    /// True when the call completed without error
    pub const fn is_ok(self) -> bool {
        matches!(self, CallStatus::Ok)
    }
}

/// Primitive stack operations of one engine instance.
///
/// Implementations are single-threaded and not reentrant from other
/// threads; the engine may call back into host code (through a
/// [`HostFunction`]) while a call is in progress, handing the callback the
/// same stack.
pub trait LuaStack {
    // ========================================================================
    // Depth
    // ========================================================================

    /// Index of the top slot in the current frame (= number of slots)
    fn top(&self) -> i32;

    /// Grow (with nils) or shrink the current frame to `index` slots
    fn set_top(&mut self, index: i32);

    /// Remove `n` slots from the top
    fn pop(&mut self, n: i32) {
        self.set_top(-n - 1);
    }

    // ========================================================================
    // Push
    // ========================================================================

    /// Push nil
    fn push_nil(&mut self);

    /// Push a boolean
    fn push_bool(&mut self, b: bool);

    /// Push an integer
    fn push_integer(&mut self, i: i64);

    /// Push a float
    fn push_number(&mut self, n: f64);

    /// Push a byte string
    fn push_bytes(&mut self, bytes: &[u8]);

    /// Push a UTF-8 string
    fn push_str(&mut self, s: &str) {
        self.push_bytes(s.as_bytes());
    }

    /// Push a copy of the slot at `index`
    fn push_value(&mut self, index: i32);

    /// Push a host function.
    ///
    /// The engine may keep only a raw pointer to `func`; the caller is
    /// responsible for keeping the `Rc` alive for as long as the engine can
    /// invoke it.
    fn push_host_function(&mut self, func: Rc<HostFunction>);

    // ========================================================================
    // Type queries
    // ========================================================================

    /// Dynamic type of the slot at `index`
    fn value_kind(&self, index: i32) -> ValueKind;

    /// True for nil slots (and indices outside the frame)
    fn is_nil(&self, index: i32) -> bool {
        self.value_kind(index).is_none_or_nil()
    }

    /// True for boolean slots
    fn is_bool(&self, index: i32) -> bool {
        self.value_kind(index) == ValueKind::Boolean
    }

    /// True for numbers and strings convertible to a number
    fn is_number(&self, index: i32) -> bool;

    /// True for numbers with the integer subtype
    fn is_integer(&self, index: i32) -> bool;

    /// True for strings and numbers (numbers are convertible)
    fn is_string(&self, index: i32) -> bool {
        matches!(
            self.value_kind(index),
            ValueKind::String | ValueKind::Number
        )
    }

    /// True for table slots
    fn is_table(&self, index: i32) -> bool {
        self.value_kind(index) == ValueKind::Table
    }

    /// True for engine and host functions
    fn is_function(&self, index: i32) -> bool {
        self.value_kind(index) == ValueKind::Function
    }

    /// True for light and full userdata
    fn is_userdata(&self, index: i32) -> bool {
        matches!(
            self.value_kind(index),
            ValueKind::Userdata | ValueKind::LightUserdata
        )
    }

    // ========================================================================
    // Conversions (total: non-convertible slots yield a zero value)
    // ========================================================================

    /// Truthiness: false only for nil and `false`
    fn to_bool(&self, index: i32) -> bool;

    /// Integer value, `0` if not convertible
    fn to_integer(&self, index: i32) -> i64;

    /// Float value, `0.0` if not convertible
    fn to_number(&self, index: i32) -> f64;

    /// String bytes, empty if not convertible.
    ///
    /// Numbers are converted to strings in place, changing the slot's type.
    fn to_bytes(&mut self, index: i32) -> Vec<u8>;

    /// String as UTF-8 (lossy), empty if not convertible
    fn to_string_lossy(&mut self, index: i32) -> String {
        String::from_utf8_lossy(&self.to_bytes(index)).into_owned()
    }

    /// Identity pointer of reference values, `0` for everything else
    fn to_pointer(&self, index: i32) -> usize;

    /// Snapshot of the slot at `index` without coercing it
    fn value_at(&mut self, index: i32) -> StackValue {
        match self.value_kind(index) {
            ValueKind::None | ValueKind::Nil => StackValue::Nil,
            ValueKind::Boolean => StackValue::Bool(self.to_bool(index)),
            ValueKind::Number => {
                if self.is_integer(index) {
                    StackValue::Integer(self.to_integer(index))
                } else {
                    StackValue::Number(self.to_number(index))
                }
            }
            ValueKind::String => StackValue::Str(self.to_bytes(index)),
            ValueKind::Table => StackValue::Table(self.to_pointer(index)),
            ValueKind::Function => StackValue::Function(self.to_pointer(index)),
            ValueKind::LightUserdata | ValueKind::Userdata | ValueKind::Thread => {
                StackValue::Opaque(self.to_pointer(index))
            }
        }
    }

    // ========================================================================
    // Globals, fields, tables
    // ========================================================================

    /// Push the global `name`, returning its type
    fn get_global(&mut self, name: &str) -> ValueKind;

    /// Pop the top value into global `name`
    fn set_global(&mut self, name: &str);

    /// Push `t[key]` where `t` is at `index`
    fn get_field(&mut self, index: i32, key: &str) -> ValueKind;

    /// Pop the top value into `t[key]` where `t` is at `index`
    fn set_field(&mut self, index: i32, key: &str);

    /// Pop a key, push `t[key]` where `t` is at `index`
    fn get_table(&mut self, index: i32) -> ValueKind;

    /// Pop a value and a key (value on top), store `t[key] = value`
    fn set_table(&mut self, index: i32);

    /// Push a new empty table with preallocation hints
    fn create_table(&mut self, array_hint: i32, record_hint: i32);

    /// Table iteration step.
    ///
    /// Pops a key and pushes the next `(key, value)` pair of the table at
    /// `index`, returning `true`; pushes nothing and returns `false` when
    /// the traversal is done. Seed with a nil key.
    fn next(&mut self, index: i32) -> bool;

    // ========================================================================
    // Calls
    // ========================================================================

    /// Protected call: the function sits below `nargs` arguments.
    ///
    /// Never aborts. On failure the function and arguments are replaced by
    /// a single error value.
    fn pcall(&mut self, nargs: i32, nresults: i32) -> CallStatus;

    /// Unprotected call. Only safe when the callee cannot fail; an error
    /// escapes to the engine's panic handler.
    fn call(&mut self, nargs: i32, nresults: i32);

    /// Register a host function as global `name`
    fn register_function(&mut self, name: &str, func: Rc<HostFunction>) {
        self.push_host_function(func);
        self.set_global(name);
    }

    // ========================================================================
    // Registry references
    // ========================================================================

    /// Pop the top value and anchor it in the engine registry.
    ///
    /// Returns [`REF_NIL`] for nil values.
    fn create_ref(&mut self) -> i32;

    /// Push the value anchored under `reference`
    fn push_ref(&mut self, reference: i32);

    /// Release a registry reference
    fn release_ref(&mut self, reference: i32);
}

//! Traits for converting between stack slots and Rust values.
//!
//! Conversions follow the engine's weak typing: reading a slot that cannot
//! convert yields the type's zero value instead of an error, so `i64` read
//! from a table is `0` and `String` read from nil is empty. Use
//! `Option<T>` to distinguish nil.
//!
//! Byte arrays travel as engine tables indexed from 1, the layout the
//! remote `readBytes` / `writeBytes` entry points use.

use crate::error::BridgeResult;
use crate::stack::LuaStack;
use crate::value::{StackValue, ValueKind};

/// Read a Rust value from a stack slot.
pub trait FromStack: Sized {
    /// Convert the slot at `index`. Must not change the stack depth.
    fn from_stack(stack: &mut dyn LuaStack, index: i32) -> BridgeResult<Self>;
}

/// Push a Rust value onto the stack.
pub trait ToStack {
    /// Push exactly one slot.
    fn to_stack(&self, stack: &mut dyn LuaStack);
}

/// Turn a relative index into an absolute one so it survives pushes
pub fn abs_index(stack: &dyn LuaStack, index: i32) -> i32 {
    if index > 0 {
        index
    } else {
        stack.top() + index + 1
    }
}

/// Collect the numeric values of the table at `index` as bytes.
///
/// Seeds the traversal with nil, pops each value while keeping its key,
/// and stops when the table is exhausted. Values are ordered by key;
/// non-numeric values are skipped. Non-table slots yield an empty vector.
pub fn collect_bytes(stack: &mut dyn LuaStack, index: i32) -> Vec<u8> {
    if !stack.is_table(index) {
        return Vec::new();
    }
    let table = abs_index(stack, index);
    let mut entries: Vec<(i64, u8)> = Vec::new();

    stack.push_nil();
    while stack.next(table) {
        if stack.value_kind(-1) == ValueKind::Number {
            let key = stack.to_integer(-2);
            entries.push((key, stack.to_integer(-1) as u8));
        }
        stack.pop(1);
    }

    entries.sort_by_key(|(key, _)| *key);
    entries.into_iter().map(|(_, b)| b).collect()
}

/// Push `bytes` as a table indexed from 1
pub fn push_byte_table(stack: &mut dyn LuaStack, bytes: &[u8]) {
    stack.create_table(bytes.len() as i32, 0);
    for (i, b) in bytes.iter().enumerate() {
        stack.push_integer(i as i64 + 1);
        stack.push_integer(*b as i64);
        stack.set_table(-3);
    }
}

// ============================================================================
// FromStack
// ============================================================================

impl FromStack for bool {
    fn from_stack(stack: &mut dyn LuaStack, index: i32) -> BridgeResult<Self> {
        Ok(stack.to_bool(index))
    }
}

impl FromStack for i64 {
    fn from_stack(stack: &mut dyn LuaStack, index: i32) -> BridgeResult<Self> {
        Ok(stack.to_integer(index))
    }
}

impl FromStack for u64 {
    fn from_stack(stack: &mut dyn LuaStack, index: i32) -> BridgeResult<Self> {
        Ok(stack.to_integer(index) as u64)
    }
}

impl FromStack for i32 {
    fn from_stack(stack: &mut dyn LuaStack, index: i32) -> BridgeResult<Self> {
        Ok(stack.to_integer(index) as i32)
    }
}

impl FromStack for i16 {
    fn from_stack(stack: &mut dyn LuaStack, index: i32) -> BridgeResult<Self> {
        Ok(stack.to_integer(index) as i16)
    }
}

impl FromStack for u8 {
    fn from_stack(stack: &mut dyn LuaStack, index: i32) -> BridgeResult<Self> {
        Ok(stack.to_integer(index) as u8)
    }
}

impl FromStack for f64 {
    fn from_stack(stack: &mut dyn LuaStack, index: i32) -> BridgeResult<Self> {
        Ok(stack.to_number(index))
    }
}

impl FromStack for f32 {
    fn from_stack(stack: &mut dyn LuaStack, index: i32) -> BridgeResult<Self> {
        Ok(stack.to_number(index) as f32)
    }
}

impl FromStack for String {
    fn from_stack(stack: &mut dyn LuaStack, index: i32) -> BridgeResult<Self> {
        Ok(stack.to_string_lossy(index))
    }
}

impl FromStack for Vec<u8> {
    fn from_stack(stack: &mut dyn LuaStack, index: i32) -> BridgeResult<Self> {
        Ok(collect_bytes(stack, index))
    }
}

impl FromStack for StackValue {
    fn from_stack(stack: &mut dyn LuaStack, index: i32) -> BridgeResult<Self> {
        Ok(stack.value_at(index))
    }
}

impl FromStack for () {
    fn from_stack(_stack: &mut dyn LuaStack, _index: i32) -> BridgeResult<Self> {
        Ok(())
    }
}

impl<T: FromStack> FromStack for Option<T> {
    fn from_stack(stack: &mut dyn LuaStack, index: i32) -> BridgeResult<Self> {
        if stack.is_nil(index) {
            Ok(None)
        } else {
            T::from_stack(stack, index).map(Some)
        }
    }
}

// ============================================================================
// ToStack
// ============================================================================

impl ToStack for bool {
    fn to_stack(&self, stack: &mut dyn LuaStack) {
        stack.push_bool(*self);
    }
}

impl ToStack for i64 {
    fn to_stack(&self, stack: &mut dyn LuaStack) {
        stack.push_integer(*self);
    }
}

impl ToStack for u64 {
    fn to_stack(&self, stack: &mut dyn LuaStack) {
        stack.push_integer(*self as i64);
    }
}

impl ToStack for i32 {
    fn to_stack(&self, stack: &mut dyn LuaStack) {
        stack.push_integer(*self as i64);
    }
}

impl ToStack for i16 {
    fn to_stack(&self, stack: &mut dyn LuaStack) {
        stack.push_integer(*self as i64);
    }
}

impl ToStack for u8 {
    fn to_stack(&self, stack: &mut dyn LuaStack) {
        stack.push_integer(*self as i64);
    }
}

impl ToStack for f64 {
    fn to_stack(&self, stack: &mut dyn LuaStack) {
        stack.push_number(*self);
    }
}

impl ToStack for f32 {
    fn to_stack(&self, stack: &mut dyn LuaStack) {
        stack.push_number(*self as f64);
    }
}

impl ToStack for str {
    fn to_stack(&self, stack: &mut dyn LuaStack) {
        stack.push_str(self);
    }
}

impl ToStack for String {
    fn to_stack(&self, stack: &mut dyn LuaStack) {
        stack.push_str(self);
    }
}

impl ToStack for [u8] {
    fn to_stack(&self, stack: &mut dyn LuaStack) {
        push_byte_table(stack, self);
    }
}

impl ToStack for Vec<u8> {
    fn to_stack(&self, stack: &mut dyn LuaStack) {
        push_byte_table(stack, self);
    }
}

/// Scalars push as themselves; reference values cannot be recreated from a
/// snapshot and push nil.
impl ToStack for StackValue {
    fn to_stack(&self, stack: &mut dyn LuaStack) {
        match self {
            StackValue::Bool(b) => stack.push_bool(*b),
            StackValue::Integer(i) => stack.push_integer(*i),
            StackValue::Number(n) => stack.push_number(*n),
            StackValue::Str(s) => stack.push_bytes(s),
            StackValue::Nil
            | StackValue::Table(_)
            | StackValue::Function(_)
            | StackValue::Opaque(_) => stack.push_nil(),
        }
    }
}

impl<T: ToStack> ToStack for Option<T> {
    fn to_stack(&self, stack: &mut dyn LuaStack) {
        match self {
            Some(value) => value.to_stack(stack),
            None => stack.push_nil(),
        }
    }
}

impl<T: ToStack + ?Sized> ToStack for &T {
    fn to_stack(&self, stack: &mut dyn LuaStack) {
        (**self).to_stack(stack);
    }
}

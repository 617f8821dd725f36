//! Call-by-name marshaling over the shared stack
//!
//! Every remote call follows the same sequence:
//!
//! 1. look the function up (`get_global`, or a field of a remote object)
//!    and fail with `SymbolNotFound` unless it is a function
//! 2. push the arguments of an [`ArgList`] in order
//! 3. `pcall`; on failure read and pop the error value and fail with
//!    `CallFailed` carrying the symbol
//! 4. decode the single result at the top
//!
//! All of it runs under a [`StackGuard`], so the stack is back at its entry
//! depth whichever way the call leaves.

use std::ops::{Deref, DerefMut};

use memlua_sdk::{
    push_byte_table, BridgeError, BridgeResult, FromStack, LuaStack, StackValue, ValueKind,
    REF_NIL,
};

// ============================================================================
// StackGuard
// ============================================================================

/// Restores the stack depth recorded at construction when dropped.
///
/// Derefs to the wrapped stack, so calls made through the guard are
/// unwound on success, error, early return and panic alike.
pub struct StackGuard<'a> {
    stack: &'a mut dyn LuaStack,
    depth: i32,
}

impl<'a> StackGuard<'a> {
    /// Record the current depth of `stack`
    pub fn new(stack: &'a mut dyn LuaStack) -> Self {
        let depth = stack.top();
        Self { stack, depth }
    }

    /// Depth that will be restored
    pub fn depth(&self) -> i32 {
        self.depth
    }
}

impl<'a> Deref for StackGuard<'a> {
    type Target = dyn LuaStack + 'a;

    fn deref(&self) -> &Self::Target {
        self.stack
    }
}

impl<'a> DerefMut for StackGuard<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.stack
    }
}

impl Drop for StackGuard<'_> {
    fn drop(&mut self) {
        if self.stack.top() != self.depth {
            self.stack.set_top(self.depth);
        }
    }
}

// ============================================================================
// Remote objects
// ============================================================================

/// Engine registry reference to a remote object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef(i32);

impl ObjectRef {
    /// Pop the top value into the registry; `None` for nil
    pub fn capture(stack: &mut dyn LuaStack) -> Option<ObjectRef> {
        match stack.create_ref() {
            REF_NIL => None,
            r => Some(ObjectRef(r)),
        }
    }

    /// Push the referenced object
    pub fn push(self, stack: &mut dyn LuaStack) {
        stack.push_ref(self.0);
    }

    /// Drop the registry entry
    pub fn release(self, stack: &mut dyn LuaStack) {
        stack.release_ref(self.0);
    }

    /// Raw registry reference
    pub fn raw(self) -> i32 {
        self.0
    }
}

// ============================================================================
// Arguments
// ============================================================================

/// One positional argument of a remote call
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// `nil`, also used as a positional placeholder
    Nil,
    /// Boolean
    Bool(bool),
    /// Integer (addresses travel as their two's complement bit pattern)
    Integer(i64),
    /// Float
    Number(f64),
    /// String
    Str(String),
    /// Byte array, pushed as a table indexed from 1
    Bytes(Vec<u8>),
    /// Remote object held in the registry
    Ref(ObjectRef),
}

impl Arg {
    /// Push exactly one slot
    pub fn push(&self, stack: &mut dyn LuaStack) {
        match self {
            Arg::Nil => stack.push_nil(),
            Arg::Bool(b) => stack.push_bool(*b),
            Arg::Integer(i) => stack.push_integer(*i),
            Arg::Number(n) => stack.push_number(*n),
            Arg::Str(s) => stack.push_str(s),
            Arg::Bytes(bytes) => push_byte_table(stack, bytes),
            Arg::Ref(r) => r.push(stack),
        }
    }
}

macro_rules! arg_from_integer {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Arg {
            fn from(v: $ty) -> Self {
                Arg::Integer(v as i64)
            }
        })*
    };
}

arg_from_integer!(u8, i16, i32, i64, u32, u64, usize);

impl From<bool> for Arg {
    fn from(v: bool) -> Self {
        Arg::Bool(v)
    }
}

impl From<f32> for Arg {
    fn from(v: f32) -> Self {
        Arg::Number(v as f64)
    }
}

impl From<f64> for Arg {
    fn from(v: f64) -> Self {
        Arg::Number(v)
    }
}

impl From<&str> for Arg {
    fn from(v: &str) -> Self {
        Arg::Str(v.to_string())
    }
}

impl From<String> for Arg {
    fn from(v: String) -> Self {
        Arg::Str(v)
    }
}

impl From<&String> for Arg {
    fn from(v: &String) -> Self {
        Arg::Str(v.clone())
    }
}

impl From<&[u8]> for Arg {
    fn from(v: &[u8]) -> Self {
        Arg::Bytes(v.to_vec())
    }
}

impl From<ObjectRef> for Arg {
    fn from(v: ObjectRef) -> Self {
        Arg::Ref(v)
    }
}

/// Ordered argument vector of a remote call.
///
/// Order is part of the wire contract of each remote entry point, so
/// arguments are built explicitly and pushed in one pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArgList {
    args: Vec<Arg>,
}

impl ArgList {
    /// Empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one argument
    pub fn push(mut self, arg: impl Into<Arg>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append `arg` when present; nothing otherwise
    pub fn push_opt<T: Into<Arg>>(mut self, arg: Option<T>) -> Self {
        if let Some(arg) = arg {
            self.args.push(arg.into());
        }
        self
    }

    /// Append a `nil` placeholder that keeps later arguments in position
    pub fn placeholder(mut self) -> Self {
        self.args.push(Arg::Nil);
        self
    }

    /// Number of arguments
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// True when there are no arguments
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Arguments in push order
    pub fn as_slice(&self) -> &[Arg] {
        &self.args
    }

    /// Push every argument; returns how many were pushed
    pub fn push_all(&self, stack: &mut dyn LuaStack) -> i32 {
        for arg in &self.args {
            arg.push(stack);
        }
        self.args.len() as i32
    }
}

// ============================================================================
// Calls
// ============================================================================

/// Protected call of the function just below `nargs` arguments.
///
/// Leaves one result at the top on success; pops the error value and
/// returns `CallFailed` otherwise.
fn protected_call(stack: &mut dyn LuaStack, symbol: &str, nargs: i32) -> BridgeResult<i32> {
    let status = stack.pcall(nargs, 1);
    if !status.is_ok() {
        let message = stack.to_string_lossy(-1);
        stack.pop(1);
        log::debug!("{} failed ({:?}): {}", symbol, status, message);
        return Err(BridgeError::call_failed(symbol, message));
    }
    Ok(stack.top())
}

/// Call global `symbol` with `args`; `decode` reads the result at the
/// given absolute index
pub fn call_global<R>(
    stack: &mut dyn LuaStack,
    symbol: &str,
    args: &ArgList,
    decode: impl FnOnce(&mut dyn LuaStack, i32) -> BridgeResult<R>,
) -> BridgeResult<R> {
    let mut guard = StackGuard::new(stack);
    log::debug!("call {} ({} args)", symbol, args.len());

    guard.get_global(symbol);
    if !guard.is_function(-1) {
        return Err(BridgeError::symbol_not_found(symbol));
    }
    let nargs = args.push_all(&mut *guard);
    let result = protected_call(&mut *guard, symbol, nargs)?;
    decode(&mut *guard, result)
}

/// Typed call of global `symbol`
pub fn invoke<R: FromStack>(stack: &mut dyn LuaStack, symbol: &str, args: &ArgList) -> BridgeResult<R> {
    call_global(stack, symbol, args, |s, index| R::from_stack(s, index))
}

/// Call `method` of the remote object `receiver` as `receiver:method(args)`
pub fn call_method<R>(
    stack: &mut dyn LuaStack,
    receiver: ObjectRef,
    method: &str,
    args: &ArgList,
    decode: impl FnOnce(&mut dyn LuaStack, i32) -> BridgeResult<R>,
) -> BridgeResult<R> {
    let mut guard = StackGuard::new(stack);
    log::debug!("call method {} ({} args)", method, args.len());

    receiver.push(&mut *guard);
    let object = guard.top();
    guard.get_field(object, method);
    if !guard.is_function(-1) {
        return Err(BridgeError::symbol_not_found(method));
    }
    guard.push_value(object);
    let nargs = args.push_all(&mut *guard) + 1;
    let result = protected_call(&mut *guard, method, nargs)?;
    decode(&mut *guard, result)
}

/// Typed method call
pub fn invoke_method<R: FromStack>(
    stack: &mut dyn LuaStack,
    receiver: ObjectRef,
    method: &str,
    args: &ArgList,
) -> BridgeResult<R> {
    call_method(stack, receiver, method, args, |s, index| R::from_stack(s, index))
}

/// Read field `key` of the remote object `receiver`
pub fn get_property<R: FromStack>(
    stack: &mut dyn LuaStack,
    receiver: ObjectRef,
    key: &str,
) -> BridgeResult<R> {
    let mut guard = StackGuard::new(stack);
    receiver.push(&mut *guard);
    guard.get_field(-1, key);
    R::from_stack(&mut *guard, -1)
}

/// Fail with `TypeMismatch` unless the slot at `index` has kind `expected`
pub fn expect_kind(stack: &dyn LuaStack, index: i32, expected: ValueKind) -> BridgeResult<()> {
    let got = stack.value_kind(index);
    if got == expected {
        Ok(())
    } else {
        Err(BridgeError::TypeMismatch {
            expected: expected.name().to_string(),
            got: got.name().to_string(),
        })
    }
}

/// Snapshot of the result; convenience decoder for untyped calls
pub fn snapshot(stack: &mut dyn LuaStack, index: i32) -> BridgeResult<StackValue> {
    Ok(stack.value_at(index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use memlua_engine::SimState;
    use memlua_sdk::HostFunction;
    use std::rc::Rc;

    fn engine() -> SimState {
        let mut s = SimState::new();
        s.register_function(
            "add",
            Rc::new(HostFunction::new("add", |stack| {
                let sum = stack.to_integer(1) + stack.to_integer(2);
                stack.push_integer(sum);
                Ok(1)
            })),
        );
        s.register_function(
            "fail",
            Rc::new(HostFunction::new("fail", |_| Err("remote failure".into()))),
        );
        s
    }

    #[test]
    fn test_arg_list_order_and_placeholder() {
        let args = ArgList::new()
            .push("pattern")
            .push_opt(None::<&str>)
            .placeholder()
            .push(1);
        assert_eq!(
            args.as_slice(),
            &[Arg::Str("pattern".into()), Arg::Nil, Arg::Integer(1)]
        );
    }

    #[test]
    fn test_invoke_success_restores_depth() {
        let mut s = engine();
        s.push_str("caller slot");
        let sum: i64 = invoke(&mut s, "add", &ArgList::new().push(40).push(2)).unwrap();
        assert_eq!(sum, 42);
        assert_eq!(s.top(), 1);
    }

    #[test]
    fn test_missing_function_restores_depth() {
        let mut s = engine();
        let err = invoke::<i64>(&mut s, "nope", &ArgList::new().push(1)).unwrap_err();
        assert_eq!(err, BridgeError::symbol_not_found("nope"));
        assert_eq!(s.top(), 0);
    }

    #[test]
    fn test_non_function_global_is_not_callable() {
        let mut s = engine();
        s.push_integer(3);
        s.set_global("three");
        let err = invoke::<i64>(&mut s, "three", &ArgList::new()).unwrap_err();
        assert!(matches!(err, BridgeError::SymbolNotFound { .. }));
        assert_eq!(s.top(), 0);
    }

    #[test]
    fn test_remote_error_carries_symbol_and_message() {
        let mut s = engine();
        let err = invoke::<()>(&mut s, "fail", &ArgList::new()).unwrap_err();
        assert_eq!(err, BridgeError::call_failed("fail", "remote failure"));
        assert_eq!(s.top(), 0);
    }

    #[test]
    fn test_decoder_error_restores_depth() {
        let mut s = engine();
        let err = call_global(&mut s, "add", &ArgList::new().push(1).push(1), |s, i| {
            expect_kind(s, i, ValueKind::String)
        })
        .unwrap_err();
        assert!(matches!(err, BridgeError::TypeMismatch { .. }));
        assert_eq!(s.top(), 0);
    }

    #[test]
    fn test_guard_restores_after_panic() {
        let mut s = engine();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut guard = StackGuard::new(&mut s);
            guard.push_integer(1);
            guard.push_integer(2);
            panic!("abort");
        }));
        assert!(result.is_err());
        assert_eq!(s.top(), 0);
    }

    #[test]
    fn test_method_call_passes_receiver_first() {
        let mut s = engine();
        s.create_table(0, 0);
        s.push_integer(10);
        s.set_field(-2, "base");
        s.push_host_function(Rc::new(HostFunction::new("offset", |stack| {
            stack.get_field(1, "base");
            let base = stack.to_integer(-1);
            stack.push_integer(base + stack.to_integer(2));
            Ok(1)
        })));
        s.set_field(-2, "offset");
        let object = ObjectRef::capture(&mut s).unwrap();

        let v: i64 = invoke_method(&mut s, object, "offset", &ArgList::new().push(5)).unwrap();
        assert_eq!(v, 15);
        let base: i64 = get_property(&mut s, object, "base").unwrap();
        assert_eq!(base, 10);
        assert_eq!(s.top(), 0);

        let err = invoke_method::<()>(&mut s, object, "missing", &ArgList::new()).unwrap_err();
        assert_eq!(err, BridgeError::symbol_not_found("missing"));
        assert_eq!(s.top(), 0);
    }
}

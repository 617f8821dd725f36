//! HostFunction: host code callable from the engine
//!
//! A host function receives the stack it was invoked on: `top()` is the
//! argument count, arguments sit at indices `1..=top()`, and the function
//! pushes its results before returning how many it pushed.

use std::fmt;

use crate::error::BridgeResult;
use crate::stack::LuaStack;

/// Boxed host callback signature
pub type HostFn = dyn Fn(&mut dyn LuaStack) -> BridgeResult<i32>;

/// Named host callback.
///
/// Engines that only keep a raw pointer (the native C binding) rely on the
/// owner of the `Rc<HostFunction>` to keep it alive while registered.
pub struct HostFunction {
    name: String,
    func: Box<HostFn>,
}

impl HostFunction {
    /// Wrap a raw-form callback
    pub fn new(
        name: impl Into<String>,
        func: impl Fn(&mut dyn LuaStack) -> BridgeResult<i32> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            func: Box::new(func),
        }
    }

    /// Symbolic name the function was created under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke with the current frame; returns the number of results pushed
    pub fn invoke(&self, stack: &mut dyn LuaStack) -> BridgeResult<i32> {
        (self.func)(stack)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction")
            .field("name", &self.name)
            .finish()
    }
}

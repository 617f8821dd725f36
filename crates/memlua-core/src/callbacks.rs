//! Callback registry: host closures exposed to the engine as globals
//!
//! The native engine only stores a raw pointer to each `HostFunction`, so
//! the registry is what keeps them alive. Entries are never removed while
//! the owning bridge lives; re-registering a name rebinds the global and
//! keeps the previous closure around.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use memlua_sdk::{BridgeError, BridgeResult, HostFunction, LuaStack};

/// Keep-alive map of registered host functions
#[derive(Default)]
pub struct CallbackRegistry {
    entries: HashMap<String, Rc<HostFunction>>,
    retired: Vec<Rc<HostFunction>>,
}

impl CallbackRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a raw callback with full stack access.
    ///
    /// The callback sees its arguments at `1..=top()` and returns how many
    /// results it pushed.
    pub fn register_raw(
        &mut self,
        stack: &mut dyn LuaStack,
        name: &str,
        func: impl Fn(&mut dyn LuaStack) -> BridgeResult<i32> + 'static,
    ) -> BridgeResult<()> {
        if name.is_empty() {
            return Err(BridgeError::InvalidArgument(
                "callback name cannot be empty".to_string(),
            ));
        }
        let func = Rc::new(HostFunction::new(name, func));
        stack.register_function(name, func.clone());

        if let Some(previous) = self.entries.insert(name.to_string(), func) {
            log::debug!("callback {} rebound", name);
            self.retired.push(previous);
        } else {
            log::debug!("callback {} registered", name);
        }
        Ok(())
    }

    /// Register a callback taking no arguments and returning nothing
    pub fn register_action(
        &mut self,
        stack: &mut dyn LuaStack,
        name: &str,
        action: impl Fn() + 'static,
    ) -> BridgeResult<()> {
        self.register_raw(stack, name, move |_| {
            action();
            Ok(0)
        })
    }

    /// True if `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Current binding of `name`
    pub fn get(&self, name: &str) -> Option<Rc<HostFunction>> {
        self.entries.get(name).cloned()
    }

    /// Number of bound names
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bound names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("count", &self.entries.len())
            .field("retired", &self.retired.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memlua_engine::SimState;
    use memlua_sdk::ValueKind;
    use std::cell::Cell;

    #[test]
    fn test_register_and_lookup() {
        let mut stack = SimState::new();
        let mut registry = CallbackRegistry::new();
        registry
            .register_raw(&mut stack, "b", |_| Ok(0))
            .unwrap();
        registry
            .register_action(&mut stack, "a", || {})
            .unwrap();

        assert!(registry.contains("a"));
        assert!(!registry.contains("c"));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(registry.get("a").unwrap().name(), "a");
        assert_eq!(stack.get_global("a"), ValueKind::Function);
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut stack = SimState::new();
        let mut registry = CallbackRegistry::new();
        let err = registry.register_action(&mut stack, "", || {}).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidArgument(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_rebinding_keeps_previous_closure_alive() {
        let mut stack = SimState::new();
        let mut registry = CallbackRegistry::new();
        registry.register_action(&mut stack, "tick", || {}).unwrap();
        let first = registry.get("tick").unwrap();

        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        registry
            .register_action(&mut stack, "tick", move || counter.set(counter.get() + 1))
            .unwrap();

        // retired list + local handle
        assert_eq!(Rc::strong_count(&first), 2);
        assert_eq!(registry.len(), 1);

        stack.get_global("tick");
        assert!(stack.pcall(0, 0).is_ok());
        assert_eq!(hits.get(), 1);
    }
}

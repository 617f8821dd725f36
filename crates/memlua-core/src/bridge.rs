//! Bridge: exclusive handle to one engine instance
//!
//! The bridge owns the engine stack and the callback registry. Components
//! share it as a [`BridgeHandle`] handed to them at construction. Access to
//! the stack is scoped through [`Bridge::with_stack`]; engine callbacks get
//! the stack they were invoked on as an argument and must not go through
//! the bridge again (doing so reports [`BridgeError::Busy`]).

use std::cell::{Ref, RefCell};
use std::fmt;
use std::rc::Rc;

use memlua_engine::{LuaApi, LuaState, SimState};
use memlua_sdk::{BridgeError, BridgeResult, LuaStack};

use crate::callbacks::CallbackRegistry;
use crate::config::{BridgeConfig, EngineKind};

/// Shared bridge handle
pub type BridgeHandle = Rc<Bridge>;

/// One engine instance plus the host functions registered on it
pub struct Bridge {
    stack: RefCell<Box<dyn LuaStack>>,
    callbacks: RefCell<CallbackRegistry>,
    kind: EngineKind,
}

impl Bridge {
    /// Wrap an engine
    pub fn new(stack: impl LuaStack + 'static, kind: EngineKind) -> BridgeHandle {
        Rc::new(Self {
            stack: RefCell::new(Box::new(stack)),
            callbacks: RefCell::new(CallbackRegistry::new()),
            kind,
        })
    }

    /// Bridge over a fresh in-process engine
    pub fn sim() -> BridgeHandle {
        Self::new(SimState::new(), EngineKind::Sim)
    }

    /// Bridge over a fresh state of the Lua library at `library`
    pub fn native(library: &std::path::Path, open_libs: bool) -> BridgeResult<BridgeHandle> {
        let api = LuaApi::load(library)?;
        log::debug!("engine library {}", api.library_path());
        let state = LuaState::new_owned(api, open_libs)?;
        Ok(Self::new(state, EngineKind::Native))
    }

    /// Build the engine selected by `config`
    pub fn from_config(config: &BridgeConfig) -> BridgeResult<BridgeHandle> {
        match config.engine.kind {
            EngineKind::Sim => Ok(Self::sim()),
            EngineKind::Native => {
                let library = config.engine.library.as_deref().ok_or_else(|| {
                    BridgeError::Unavailable("no engine library configured".to_string())
                })?;
                Self::native(library, config.engine.open_libs)
            }
        }
    }

    /// Engine implementation behind this bridge
    pub fn kind(&self) -> EngineKind {
        self.kind
    }

    /// Run `f` with exclusive access to the stack
    pub fn with_stack<R>(
        &self,
        f: impl FnOnce(&mut dyn LuaStack) -> BridgeResult<R>,
    ) -> BridgeResult<R> {
        let mut stack = self.stack.try_borrow_mut().map_err(|_| BridgeError::Busy)?;
        f(&mut **stack)
    }

    /// Current stack depth
    pub fn depth(&self) -> BridgeResult<i32> {
        self.with_stack(|s| Ok(s.top()))
    }

    /// Register a raw callback under the global `name`
    pub fn register_raw(
        &self,
        name: &str,
        func: impl Fn(&mut dyn LuaStack) -> BridgeResult<i32> + 'static,
    ) -> BridgeResult<()> {
        let mut callbacks = self.callbacks.try_borrow_mut().map_err(|_| BridgeError::Busy)?;
        self.with_stack(|s| callbacks.register_raw(s, name, func))
    }

    /// Register a no-argument, no-result callback under the global `name`
    pub fn register_action(&self, name: &str, action: impl Fn() + 'static) -> BridgeResult<()> {
        let mut callbacks = self.callbacks.try_borrow_mut().map_err(|_| BridgeError::Busy)?;
        self.with_stack(|s| callbacks.register_action(s, name, action))
    }

    /// Registered callbacks
    pub fn callbacks(&self) -> Ref<'_, CallbackRegistry> {
        self.callbacks.borrow()
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("kind", &self.kind)
            .field("callbacks", &self.callbacks.borrow().len())
            .finish()
    }
}

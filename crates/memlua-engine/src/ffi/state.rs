//! `LuaStack` over a raw engine state
//!
//! `LuaState` either owns its state (created with `luaL_newstate`, closed on
//! drop) or is a view attached to a state owned by the host process. Host
//! functions run through [`trampoline`], which recovers the
//! `HostFunction` from upvalue 1 and hands it a borrowed view of the state.

use std::ffi::CString;
use std::os::raw::{c_char, c_int, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::rc::Rc;
use std::sync::Arc;

use memlua_sdk::{BridgeError, BridgeResult, CallStatus, HostFunction, LuaStack, ValueKind};

use super::api::{upvalue_index, LuaApi, RawState, LUA_REGISTRYINDEX};

/// Native engine state implementing the stack bridge
pub struct LuaState {
    api: Arc<LuaApi>,
    raw: *mut RawState,
    owned: bool,
}

impl LuaState {
    /// Create a fresh engine state, optionally opening the standard libraries
    pub fn new_owned(api: Arc<LuaApi>, open_libs: bool) -> BridgeResult<Self> {
        let raw = unsafe { (api.luaL_newstate)() };
        if raw.is_null() {
            return Err(BridgeError::Unavailable(
                "luaL_newstate returned null".to_string(),
            ));
        }
        if open_libs {
            unsafe { (api.luaL_openlibs)(raw) };
        }
        Ok(Self {
            api,
            raw,
            owned: true,
        })
    }

    /// Attach to a state owned by the host process.
    ///
    /// # Safety
    /// `raw` must be a valid engine state created by the library `api` was
    /// resolved from, and must outlive the returned view.
    pub unsafe fn attach(api: Arc<LuaApi>, raw: *mut RawState) -> BridgeResult<Self> {
        if raw.is_null() {
            return Err(BridgeError::InvalidArgument(
                "engine state pointer is null".to_string(),
            ));
        }
        Ok(Self {
            api,
            raw,
            owned: false,
        })
    }

    /// Raw state pointer
    pub fn raw(&self) -> *mut RawState {
        self.raw
    }

    /// Compile and run a chunk of source text in protected mode
    pub fn do_string(&mut self, chunk: &str) -> BridgeResult<()> {
        let source = CString::new(chunk)
            .map_err(|_| BridgeError::InvalidArgument("chunk contains NUL".to_string()))?;
        let base = self.top();
        let status = CallStatus::from_code(unsafe { (self.api.luaL_loadstring)(self.raw, source.as_ptr()) });
        let status = if status.is_ok() {
            self.pcall(0, 0)
        } else {
            status
        };
        if status.is_ok() {
            return Ok(());
        }
        let message = self.to_string_lossy(-1);
        self.set_top(base);
        Err(BridgeError::call_failed("<chunk>", message))
    }

    fn with_name<R>(&mut self, name: &str, f: impl FnOnce(&mut Self, *const c_char) -> R) -> Option<R> {
        CString::new(name).ok().map(|c| f(self, c.as_ptr()))
    }

    fn absolute(&self, index: i32) -> i32 {
        if index > 0 || index <= LUA_REGISTRYINDEX {
            index
        } else {
            self.top() + index + 1
        }
    }
}

impl Drop for LuaState {
    fn drop(&mut self) {
        if self.owned {
            unsafe { (self.api.lua_close)(self.raw) };
        }
    }
}

impl std::fmt::Debug for LuaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LuaState")
            .field("raw", &self.raw)
            .field("owned", &self.owned)
            .finish()
    }
}

impl LuaStack for LuaState {
    fn top(&self) -> i32 {
        unsafe { (self.api.lua_gettop)(self.raw) }
    }

    fn set_top(&mut self, index: i32) {
        unsafe { (self.api.lua_settop)(self.raw, index) }
    }

    fn push_nil(&mut self) {
        unsafe { (self.api.lua_pushnil)(self.raw) }
    }

    fn push_bool(&mut self, b: bool) {
        unsafe { (self.api.lua_pushboolean)(self.raw, b as c_int) }
    }

    fn push_integer(&mut self, i: i64) {
        unsafe { (self.api.lua_pushinteger)(self.raw, i) }
    }

    fn push_number(&mut self, n: f64) {
        unsafe { (self.api.lua_pushnumber)(self.raw, n) }
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        unsafe {
            (self.api.lua_pushlstring)(self.raw, bytes.as_ptr() as *const c_char, bytes.len());
        }
    }

    fn push_value(&mut self, index: i32) {
        unsafe { (self.api.lua_pushvalue)(self.raw, index) }
    }

    fn push_host_function(&mut self, func: Rc<HostFunction>) {
        unsafe {
            (self.api.lua_pushlightuserdata)(self.raw, Rc::as_ptr(&func) as *mut c_void);
            (self.api.lua_pushcclosure)(self.raw, trampoline, 1);
        }
    }

    fn value_kind(&self, index: i32) -> ValueKind {
        ValueKind::from_code(unsafe { (self.api.lua_type)(self.raw, index) })
    }

    fn is_number(&self, index: i32) -> bool {
        unsafe { (self.api.lua_isnumber)(self.raw, index) != 0 }
    }

    fn is_integer(&self, index: i32) -> bool {
        unsafe { (self.api.lua_isinteger)(self.raw, index) != 0 }
    }

    fn to_bool(&self, index: i32) -> bool {
        unsafe { (self.api.lua_toboolean)(self.raw, index) != 0 }
    }

    fn to_integer(&self, index: i32) -> i64 {
        unsafe { (self.api.lua_tointegerx)(self.raw, index, ptr::null_mut()) }
    }

    fn to_number(&self, index: i32) -> f64 {
        unsafe { (self.api.lua_tonumberx)(self.raw, index, ptr::null_mut()) }
    }

    fn to_bytes(&mut self, index: i32) -> Vec<u8> {
        let mut len = 0usize;
        let data = unsafe { (self.api.lua_tolstring)(self.raw, index, &mut len) };
        if data.is_null() {
            return Vec::new();
        }
        unsafe { std::slice::from_raw_parts(data as *const u8, len) }.to_vec()
    }

    fn to_pointer(&self, index: i32) -> usize {
        unsafe { (self.api.lua_topointer)(self.raw, index) as usize }
    }

    fn get_global(&mut self, name: &str) -> ValueKind {
        let api = self.api.clone();
        match self.with_name(name, |s, c| unsafe { (api.lua_getglobal)(s.raw, c) }) {
            Some(code) => ValueKind::from_code(code),
            None => {
                self.push_nil();
                ValueKind::Nil
            }
        }
    }

    fn set_global(&mut self, name: &str) {
        let api = self.api.clone();
        if self
            .with_name(name, |s, c| unsafe { (api.lua_setglobal)(s.raw, c) })
            .is_none()
        {
            self.pop(1);
        }
    }

    fn get_field(&mut self, index: i32, key: &str) -> ValueKind {
        let api = self.api.clone();
        let table = self.absolute(index);
        match self.with_name(key, |s, c| unsafe { (api.lua_getfield)(s.raw, table, c) }) {
            Some(code) => ValueKind::from_code(code),
            None => {
                self.push_bytes(key.as_bytes());
                self.get_table(table)
            }
        }
    }

    fn set_field(&mut self, index: i32, key: &str) {
        let api = self.api.clone();
        let table = self.absolute(index);
        if self
            .with_name(key, |s, c| unsafe { (api.lua_setfield)(s.raw, table, c) })
            .is_none()
        {
            // value is on top: insert the key below it
            self.push_bytes(key.as_bytes());
            self.push_value(-2);
            unsafe { (self.api.lua_settable)(self.raw, table) };
            self.pop(1);
        }
    }

    fn get_table(&mut self, index: i32) -> ValueKind {
        ValueKind::from_code(unsafe { (self.api.lua_gettable)(self.raw, index) })
    }

    fn set_table(&mut self, index: i32) {
        unsafe { (self.api.lua_settable)(self.raw, index) }
    }

    fn create_table(&mut self, array_hint: i32, record_hint: i32) {
        unsafe { (self.api.lua_createtable)(self.raw, array_hint, record_hint) }
    }

    fn next(&mut self, index: i32) -> bool {
        unsafe { (self.api.lua_next)(self.raw, index) != 0 }
    }

    fn pcall(&mut self, nargs: i32, nresults: i32) -> CallStatus {
        CallStatus::from_code(unsafe {
            (self.api.lua_pcallk)(self.raw, nargs, nresults, 0, 0, None)
        })
    }

    fn call(&mut self, nargs: i32, nresults: i32) {
        unsafe { (self.api.lua_callk)(self.raw, nargs, nresults, 0, None) }
    }

    fn create_ref(&mut self) -> i32 {
        unsafe { (self.api.luaL_ref)(self.raw, LUA_REGISTRYINDEX) }
    }

    fn push_ref(&mut self, reference: i32) {
        unsafe {
            (self.api.lua_rawgeti)(self.raw, LUA_REGISTRYINDEX, reference as i64);
        }
    }

    fn release_ref(&mut self, reference: i32) {
        unsafe { (self.api.luaL_unref)(self.raw, LUA_REGISTRYINDEX, reference) }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("host function panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("host function panicked: {}", s)
    } else {
        "host function panicked".to_string()
    }
}

/// C entry point shared by every host function.
///
/// Upvalue 1 holds the `HostFunction` pointer. Errors and panics are turned
/// into an engine error raised with `lua_error`, after every Rust value
/// owned by this frame has been dropped (the raise does not return).
unsafe extern "C" fn trampoline(raw: *mut RawState) -> c_int {
    let Some(api) = LuaApi::active() else {
        return 0;
    };

    let message = {
        let data = (api.lua_touserdata)(raw, upvalue_index(1)) as *const HostFunction;
        if data.is_null() {
            "host function is missing".to_string()
        } else {
            let func = &*data;
            log::trace!("dispatching host function {}", func.name());
            let mut view = LuaState {
                api: api.clone(),
                raw,
                owned: false,
            };
            match panic::catch_unwind(AssertUnwindSafe(|| func.invoke(&mut view))) {
                Ok(Ok(count)) => return count,
                Ok(Err(err)) => err.engine_message(),
                Err(payload) => panic_message(payload),
            }
        }
    };

    (api.lua_pushlstring)(raw, message.as_ptr() as *const c_char, message.len());
    drop(message);
    let raise = api.lua_error;
    drop(api);
    raise(raw)
}

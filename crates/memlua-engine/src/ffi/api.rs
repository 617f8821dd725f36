//! Resolved C entry points of the engine library
//!
//! `LuaApi` is the function table the native binding calls through. It is
//! resolved once from the shared library (Lua 5.3 / 5.4 ABI); a missing
//! library or entry point is fatal and reported as
//! `BridgeError::Unavailable`.
//!
//! Host functions are exposed through a single C trampoline that cannot
//! receive context other than the engine state, so the first table that is
//! resolved becomes the process-wide table the trampoline reads upvalues
//! with. A host process embeds exactly one engine library.

use std::os::raw::{c_char, c_int, c_void};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use memlua_sdk::BridgeResult;

use super::loader::{Library, LoadError};

/// Opaque engine state
#[repr(C)]
pub struct RawState {
    _private: [u8; 0],
}

/// `lua_Integer`
pub type LuaInteger = i64;
/// `lua_Number`
pub type LuaNumber = f64;
/// `lua_KContext`
pub type LuaKContext = isize;
/// `lua_CFunction`
pub type LuaCFunction = unsafe extern "C" fn(*mut RawState) -> c_int;
/// `lua_KFunction`
pub type LuaKFunction = unsafe extern "C" fn(*mut RawState, c_int, LuaKContext) -> c_int;

/// Default `LUAI_MAXSTACK`
pub const LUAI_MAXSTACK: c_int = 1_000_000;
/// Pseudo-index of the registry table
pub const LUA_REGISTRYINDEX: c_int = -LUAI_MAXSTACK - 1000;

/// Pseudo-index of upvalue `i` of the running C function
pub const fn upvalue_index(i: c_int) -> c_int {
    LUA_REGISTRYINDEX - i
}

static ACTIVE: Mutex<Option<Arc<LuaApi>>> = parking_lot::const_mutex(None);

macro_rules! lua_api {
    ($( $field:ident : fn($($arg:ty),*) $(-> $ret:ty)? ),* $(,)?) => {
        /// Function table of the engine library
        #[allow(missing_docs, non_snake_case)]
        pub struct LuaApi {
            library: Library,
            $( pub $field: unsafe extern "C" fn($($arg),*) $(-> $ret)?, )*
        }

        impl LuaApi {
            fn resolve(library: Library) -> Result<Self, LoadError> {
                match ($( library.symbol(stringify!($field)), )*) {
                    ($( Some($field), )*) => Ok(Self {
                        // SAFETY: each symbol is the C API function of the same name
                        $( $field: unsafe {
                            std::mem::transmute::<*mut c_void, unsafe extern "C" fn($($arg),*) $(-> $ret)?>($field)
                        }, )*
                        library,
                    }),
                    _ => {
                        let symbols = [$( stringify!($field) ),*]
                            .iter()
                            .filter(|name| library.symbol(name).is_none())
                            .map(|name| name.to_string())
                            .collect();
                        Err(LoadError::MissingSymbols {
                            library: library.path().to_string(),
                            symbols,
                        })
                    }
                }
            }
        }
    };
}

lua_api! {
    luaL_newstate: fn() -> *mut RawState,
    luaL_openlibs: fn(*mut RawState),
    lua_close: fn(*mut RawState),
    luaL_loadstring: fn(*mut RawState, *const c_char) -> c_int,
    lua_gettop: fn(*mut RawState) -> c_int,
    lua_settop: fn(*mut RawState, c_int),
    lua_pushvalue: fn(*mut RawState, c_int),
    lua_type: fn(*mut RawState, c_int) -> c_int,
    lua_isnumber: fn(*mut RawState, c_int) -> c_int,
    lua_isinteger: fn(*mut RawState, c_int) -> c_int,
    lua_toboolean: fn(*mut RawState, c_int) -> c_int,
    lua_tointegerx: fn(*mut RawState, c_int, *mut c_int) -> LuaInteger,
    lua_tonumberx: fn(*mut RawState, c_int, *mut c_int) -> LuaNumber,
    lua_tolstring: fn(*mut RawState, c_int, *mut usize) -> *const c_char,
    lua_topointer: fn(*mut RawState, c_int) -> *const c_void,
    lua_touserdata: fn(*mut RawState, c_int) -> *mut c_void,
    lua_pushnil: fn(*mut RawState),
    lua_pushboolean: fn(*mut RawState, c_int),
    lua_pushinteger: fn(*mut RawState, LuaInteger),
    lua_pushnumber: fn(*mut RawState, LuaNumber),
    lua_pushlstring: fn(*mut RawState, *const c_char, usize) -> *const c_char,
    lua_pushlightuserdata: fn(*mut RawState, *mut c_void),
    lua_pushcclosure: fn(*mut RawState, LuaCFunction, c_int),
    lua_getglobal: fn(*mut RawState, *const c_char) -> c_int,
    lua_setglobal: fn(*mut RawState, *const c_char),
    lua_getfield: fn(*mut RawState, c_int, *const c_char) -> c_int,
    lua_setfield: fn(*mut RawState, c_int, *const c_char),
    lua_gettable: fn(*mut RawState, c_int) -> c_int,
    lua_settable: fn(*mut RawState, c_int),
    lua_createtable: fn(*mut RawState, c_int, c_int),
    lua_next: fn(*mut RawState, c_int) -> c_int,
    lua_rawgeti: fn(*mut RawState, c_int, LuaInteger) -> c_int,
    lua_pcallk: fn(*mut RawState, c_int, c_int, c_int, LuaKContext, Option<LuaKFunction>) -> c_int,
    lua_callk: fn(*mut RawState, c_int, c_int, LuaKContext, Option<LuaKFunction>),
    lua_error: fn(*mut RawState) -> c_int,
    luaL_ref: fn(*mut RawState, c_int) -> c_int,
    luaL_unref: fn(*mut RawState, c_int, c_int),
}

impl LuaApi {
    /// Load the engine library at `path` and resolve every entry point.
    ///
    /// The first table loaded in the process is the one host-function
    /// trampolines use; later calls return that same table.
    pub fn load<P: AsRef<Path>>(path: P) -> BridgeResult<Arc<LuaApi>> {
        let mut active = ACTIVE.lock();
        if let Some(api) = active.as_ref() {
            log::debug!(
                "engine library already loaded from {}, reusing it",
                api.library.path()
            );
            return Ok(api.clone());
        }

        let library = Library::open(path)?;
        let api = Arc::new(LuaApi::resolve(library)?);
        *active = Some(api.clone());
        Ok(api)
    }

    /// Table used by host-function trampolines, if an engine is loaded
    pub fn active() -> Option<Arc<LuaApi>> {
        ACTIVE.lock().clone()
    }

    /// Path of the library the table was resolved from
    pub fn library_path(&self) -> &str {
        self.library.path()
    }
}

impl std::fmt::Debug for LuaApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LuaApi")
            .field("library", &self.library.path())
            .finish()
    }
}

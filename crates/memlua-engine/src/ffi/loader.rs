//! Locating and opening the Lua shared library
//!
//! `engine.library` in the bridge configuration is either a path to the
//! library or a bare library name such as `lua5.4`. Bare names expand to the
//! file names distributions ship the library under, and each candidate is
//! handed to the dynamic linker in turn.
//!
//! Only unix hosts can open a library. Elsewhere `Library::open` reports
//! every candidate as unsupported and the in-process engine remains usable.

use std::ffi::c_void;
use std::path::{Path, PathBuf};

use thiserror::Error;

use memlua_sdk::BridgeError;

#[cfg(target_os = "macos")]
const LIBRARY_SUFFIX: &str = "dylib";
#[cfg(not(target_os = "macos"))]
const LIBRARY_SUFFIX: &str = "so";

/// Errors opening the engine library or resolving its entry points
#[derive(Debug, Error)]
pub enum LoadError {
    /// No candidate could be opened
    #[error("cannot open Lua library {requested}: {}", .attempts.join("; "))]
    NotFound {
        /// Name or path from the configuration
        requested: String,
        /// One `candidate: reason` entry per file tried
        attempts: Vec<String>,
    },

    /// The library opened but lacks part of the C API
    #[error("{library} is not a Lua 5.3/5.4 library, missing {}", .symbols.join(", "))]
    MissingSymbols {
        /// Library that was opened
        library: String,
        /// Entry points not exported by it
        symbols: Vec<String>,
    },
}

impl From<LoadError> for BridgeError {
    fn from(err: LoadError) -> Self {
        BridgeError::Unavailable(err.to_string())
    }
}

/// File names tried for a configured library.
///
/// Anything with a directory component or a library suffix is taken
/// verbatim. A bare name `lua5.4` becomes `liblua5.4.so`, `liblua5.4.so.0`,
/// `liblua-5.4.so` and finally `lua5.4` itself.
pub fn candidates(requested: &Path) -> Vec<PathBuf> {
    let text = requested.to_string_lossy();
    let has_dir = requested
        .parent()
        .map_or(false, |p| !p.as_os_str().is_empty());
    let has_suffix = text.contains(".so") || text.ends_with(".dylib") || text.ends_with(".dll");
    if has_dir || has_suffix || text.starts_with("lib") {
        return vec![requested.to_path_buf()];
    }

    let mut names = vec![
        format!("lib{}.{}", text, LIBRARY_SUFFIX),
        format!("lib{}.{}.0", text, LIBRARY_SUFFIX),
    ];
    if let Some(version) = text.strip_prefix("lua").filter(|v| !v.is_empty()) {
        if !version.starts_with('-') {
            names.push(format!("liblua-{}.{}", version, LIBRARY_SUFFIX));
        }
    }
    names.push(text.into_owned());
    names.into_iter().map(PathBuf::from).collect()
}

/// An opened engine library, closed on drop
pub struct Library {
    handle: *mut c_void,
    path: String,
}

impl Library {
    /// Open the first candidate of `requested` the dynamic linker accepts.
    ///
    /// The library is opened `RTLD_NOW | RTLD_GLOBAL` so that C modules the
    /// engine `require`s later resolve against the same API.
    pub fn open<P: AsRef<Path>>(requested: P) -> Result<Self, LoadError> {
        let requested = requested.as_ref();
        let mut attempts = Vec::new();
        for candidate in candidates(requested) {
            let name = candidate.to_string_lossy().into_owned();
            match sys::open(&name) {
                Ok(handle) => {
                    log::debug!("opened Lua library {}", name);
                    return Ok(Library { handle, path: name });
                }
                Err(reason) => {
                    log::trace!("{}: {}", name, reason);
                    attempts.push(format!("{}: {}", name, reason));
                }
            }
        }
        Err(LoadError::NotFound {
            requested: requested.display().to_string(),
            attempts,
        })
    }

    /// Address of an exported entry point
    pub fn symbol(&self, name: &str) -> Option<*mut c_void> {
        sys::symbol(self.handle, name)
    }

    /// Candidate the library was opened from
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        sys::close(self.handle);
    }
}

// the handle is process-global linker state
unsafe impl Send for Library {}
unsafe impl Sync for Library {}

impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library").field("path", &self.path).finish()
    }
}

#[cfg(unix)]
mod sys {
    use std::ffi::{c_void, CStr, CString};

    pub fn open(name: &str) -> Result<*mut c_void, String> {
        let c_name = CString::new(name).map_err(|_| "embedded NUL in name".to_string())?;
        let handle = unsafe { libc::dlopen(c_name.as_ptr(), libc::RTLD_NOW | libc::RTLD_GLOBAL) };
        if handle.is_null() {
            Err(last_error())
        } else {
            Ok(handle)
        }
    }

    pub fn symbol(handle: *mut c_void, name: &str) -> Option<*mut c_void> {
        let c_name = CString::new(name).ok()?;
        let ptr = unsafe { libc::dlsym(handle, c_name.as_ptr()) };
        (!ptr.is_null()).then_some(ptr)
    }

    pub fn close(handle: *mut c_void) {
        unsafe {
            libc::dlclose(handle);
        }
    }

    fn last_error() -> String {
        let err = unsafe { libc::dlerror() };
        if err.is_null() {
            "unknown dlopen failure".to_string()
        } else {
            unsafe { CStr::from_ptr(err) }.to_string_lossy().into_owned()
        }
    }
}

#[cfg(not(unix))]
mod sys {
    use std::ffi::c_void;

    pub fn open(_name: &str) -> Result<*mut c_void, String> {
        Err("native engine is only supported on unix hosts".to_string())
    }

    pub fn symbol(_handle: *mut c_void, _name: &str) -> Option<*mut c_void> {
        None
    }

    pub fn close(_handle: *mut c_void) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(requested: &str) -> Vec<String> {
        candidates(Path::new(requested))
            .into_iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_paths_are_taken_verbatim() {
        assert_eq!(names("/opt/lua/liblua.so"), vec!["/opt/lua/liblua.so"]);
        assert_eq!(names("liblua5.3.so.0"), vec!["liblua5.3.so.0"]);
        assert_eq!(names("./lua54"), vec!["./lua54"]);
    }

    #[test]
    fn test_bare_name_expands() {
        let ext = LIBRARY_SUFFIX;
        assert_eq!(
            names("lua5.4"),
            vec![
                format!("liblua5.4.{}", ext),
                format!("liblua5.4.{}.0", ext),
                format!("liblua-5.4.{}", ext),
                "lua5.4".to_string(),
            ]
        );
        assert_eq!(
            names("lua"),
            vec![format!("liblua.{}", ext), format!("liblua.{}.0", ext), "lua".to_string()]
        );
    }

    #[test]
    fn test_not_found_lists_every_attempt() {
        match Library::open("memlua-no-such-lua") {
            Err(LoadError::NotFound { requested, attempts }) => {
                assert_eq!(requested, "memlua-no-such-lua");
                assert_eq!(attempts.len(), 3);
                assert!(attempts[0].starts_with("libmemlua-no-such-lua."));
            }
            other => panic!("expected NotFound, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_load_error_maps_to_unavailable() {
        let err: BridgeError = LoadError::MissingSymbols {
            library: "libc.so.6".into(),
            symbols: vec!["lua_gettop".into(), "lua_settop".into()],
        }
        .into();
        match err {
            BridgeError::Unavailable(msg) => {
                assert!(msg.contains("libc.so.6"));
                assert!(msg.contains("lua_gettop, lua_settop"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}

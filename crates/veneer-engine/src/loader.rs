//! Dynamic library loading.
//!
//! Thin cross-platform wrapper producing [`NativeAddress`]es for
//! [`crate::Function::bind`]: `.so`/`.dylib` via `dlopen`, `.dll` via
//! `LoadLibraryW`.

use std::ffi::CString;
use std::path::Path;

use thiserror::Error;

use crate::invoke::NativeAddress;

#[derive(Debug, Error)]
pub enum LoadError {
    /// Library file not found or could not be loaded
    #[error("Library not found: {path}")]
    NotFound {
        /// Path that was attempted
        path: String,
    },

    /// Symbol not found in library
    #[error("Symbol not found: {symbol} in {library}")]
    SymbolNotFound {
        /// Symbol name that was not found
        symbol: String,
        /// Library path
        library: String,
    },

    /// Platform-specific error
    #[error("Platform error: {0}")]
    PlatformError(String),

    /// Invalid path encoding
    #[error("Invalid UTF-8 in path: {0}")]
    InvalidPath(String),
}

/// Cross-platform dynamic library handle. The handle stays open until drop;
/// addresses resolved from it are valid only while it lives.
pub struct Library {
    handle: LibraryHandle,
    path: String,
}

impl Library {
    /// Loads a dynamic library from the given path.
    ///
    /// - **Unix**: `dlopen(RTLD_NOW | RTLD_LOCAL)`
    /// - **Windows**: `LoadLibraryW`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let path_ref = path.as_ref();
        let path_str = path_ref
            .to_str()
            .ok_or_else(|| LoadError::InvalidPath(format!("{:?}", path_ref)))?;

        let handle = LibraryHandle::load(path_str)?;

        Ok(Library {
            handle,
            path: path_str.to_string(),
        })
    }

    /// A handle over the symbols already visible in this process, the
    /// executable and everything it links.
    pub fn this_process() -> Result<Self, LoadError> {
        Ok(Library {
            handle: LibraryHandle::this_process()?,
            path: "<self>".to_string(),
        })
    }

    /// Resolves a symbol to a raw address, ready for binding.
    pub fn symbol(&self, name: &str) -> Result<NativeAddress, LoadError> {
        self.handle.symbol(name, &self.path)
    }

    /// Path this library was loaded from.
    pub fn path(&self) -> &str {
        &self.path
    }
}

// Platform-specific implementations

#[cfg(unix)]
type LibraryHandle = UnixLibrary;

#[cfg(windows)]
type LibraryHandle = WindowsLibrary;

#[cfg(unix)]
struct UnixLibrary {
    handle: *mut std::ffi::c_void,
    owned: bool,
}

#[cfg(unix)]
impl UnixLibrary {
    fn load(path: &str) -> Result<Self, LoadError> {
        let c_path = CString::new(path)
            .map_err(|e| LoadError::PlatformError(format!("Invalid path: {}", e)))?;

        let handle = unsafe {
            // RTLD_NOW: resolve all symbols immediately.
            // RTLD_LOCAL: symbols not exposed to later loads.
            libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL)
        };

        if handle.is_null() {
            return Err(LoadError::NotFound {
                path: format!("{}: {}", path, last_dl_error()),
            });
        }

        Ok(UnixLibrary {
            handle,
            owned: true,
        })
    }

    fn this_process() -> Result<Self, LoadError> {
        // A null path hands back the global symbol scope.
        let handle = unsafe { libc::dlopen(std::ptr::null(), libc::RTLD_NOW) };
        if handle.is_null() {
            return Err(LoadError::PlatformError(last_dl_error()));
        }
        Ok(UnixLibrary {
            handle,
            owned: false,
        })
    }

    fn symbol(&self, name: &str, lib_path: &str) -> Result<NativeAddress, LoadError> {
        let c_name = CString::new(name)
            .map_err(|e| LoadError::PlatformError(format!("Invalid symbol name: {}", e)))?;

        unsafe {
            // Clear any stale error; a symbol may legitimately be null.
            libc::dlerror();
            let symbol = libc::dlsym(self.handle, c_name.as_ptr());
            let err = libc::dlerror();
            if !err.is_null() || symbol.is_null() {
                return Err(LoadError::SymbolNotFound {
                    symbol: name.to_string(),
                    library: lib_path.to_string(),
                });
            }
            Ok(symbol as NativeAddress)
        }
    }
}

#[cfg(unix)]
fn last_dl_error() -> String {
    unsafe {
        let err = libc::dlerror();
        if err.is_null() {
            "Unknown error".to_string()
        } else {
            std::ffi::CStr::from_ptr(err).to_string_lossy().into_owned()
        }
    }
}

#[cfg(unix)]
impl Drop for UnixLibrary {
    fn drop(&mut self) {
        if self.owned {
            unsafe {
                libc::dlclose(self.handle);
            }
        }
    }
}

#[cfg(unix)]
unsafe impl Send for UnixLibrary {}
#[cfg(unix)]
unsafe impl Sync for UnixLibrary {}

#[cfg(windows)]
struct WindowsLibrary {
    handle: *mut std::ffi::c_void,
    owned: bool,
}

#[cfg(windows)]
impl WindowsLibrary {
    fn load(path: &str) -> Result<Self, LoadError> {
        use std::ffi::OsStr;
        use std::os::windows::ffi::OsStrExt;

        let wide: Vec<u16> = OsStr::new(path)
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        let handle = unsafe { LoadLibraryW(wide.as_ptr()) };

        if handle.is_null() {
            let error = unsafe { GetLastError() };
            return Err(LoadError::NotFound {
                path: format!("{} (error code: {})", path, error),
            });
        }

        Ok(WindowsLibrary {
            handle,
            owned: true,
        })
    }

    fn this_process() -> Result<Self, LoadError> {
        let handle = unsafe { GetModuleHandleW(std::ptr::null()) };
        if handle.is_null() {
            let error = unsafe { GetLastError() };
            return Err(LoadError::PlatformError(format!(
                "GetModuleHandleW failed (error code: {})",
                error
            )));
        }
        Ok(WindowsLibrary {
            handle,
            owned: false,
        })
    }

    fn symbol(&self, name: &str, lib_path: &str) -> Result<NativeAddress, LoadError> {
        let c_name = CString::new(name)
            .map_err(|e| LoadError::PlatformError(format!("Invalid symbol name: {}", e)))?;

        let symbol = unsafe { GetProcAddress(self.handle, c_name.as_ptr()) };

        if symbol.is_null() {
            let error = unsafe { GetLastError() };
            return Err(LoadError::SymbolNotFound {
                symbol: name.to_string(),
                library: format!("{} (error code: {})", lib_path, error),
            });
        }

        Ok(symbol as NativeAddress)
    }
}

#[cfg(windows)]
impl Drop for WindowsLibrary {
    fn drop(&mut self) {
        if self.owned {
            unsafe {
                FreeLibrary(self.handle);
            }
        }
    }
}

#[cfg(windows)]
unsafe impl Send for WindowsLibrary {}
#[cfg(windows)]
unsafe impl Sync for WindowsLibrary {}

// Windows FFI declarations
#[cfg(windows)]
extern "system" {
    fn LoadLibraryW(filename: *const u16) -> *mut std::ffi::c_void;
    fn GetModuleHandleW(filename: *const u16) -> *mut std::ffi::c_void;
    fn GetProcAddress(
        module: *mut std::ffi::c_void,
        procname: *const i8,
    ) -> *mut std::ffi::c_void;
    fn FreeLibrary(module: *mut std::ffi::c_void) -> i32;
    fn GetLastError() -> u32;
}

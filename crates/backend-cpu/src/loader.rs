//! Loading compiled graph libraries.

use crate::codegen::{ABI_VERSION, ABI_VERSION_SYMBOL, ENTRY_SYMBOL, OBJECT_COUNT_SYMBOL};
use libloading::Library;
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use tracing::debug;
use vxforge_ir::{VxError, VxResult};

type AbiVersionFn = unsafe extern "C" fn() -> u32;
type ObjectCountFn = unsafe extern "C" fn() -> u32;
pub type ProcessGraphFn = unsafe extern "C" fn(*const *mut c_void, u32) -> i32;

/// A shared library exporting the graph ABI, kept open for the module's lifetime.
pub struct LoadedModule {
    path: PathBuf,
    object_count: usize,
    entry: ProcessGraphFn,
    _lib: Library,
}

impl std::fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModule")
            .field("path", &self.path)
            .field("object_count", &self.object_count)
            .finish()
    }
}

impl LoadedModule {
    /// Open `path` and check it was generated for `expected_objects` handles.
    pub fn open(path: &Path, expected_objects: usize) -> VxResult<Self> {
        let load_error = |reason: String| VxError::Load {
            reason: format!("{}: {reason}", path.display()),
        };

        let lib = unsafe { Library::new(path) }.map_err(|err| load_error(err.to_string()))?;
        let abi_version = unsafe { lib.get::<AbiVersionFn>(ABI_VERSION_SYMBOL.as_bytes()).map(|sym| *sym) }
            .map_err(|err| load_error(format!("missing {ABI_VERSION_SYMBOL}: {err}")))?;
        let object_count = unsafe { lib.get::<ObjectCountFn>(OBJECT_COUNT_SYMBOL.as_bytes()).map(|sym| *sym) }
            .map_err(|err| load_error(format!("missing {OBJECT_COUNT_SYMBOL}: {err}")))?;
        let entry = unsafe { lib.get::<ProcessGraphFn>(ENTRY_SYMBOL.as_bytes()).map(|sym| *sym) }
            .map_err(|err| load_error(format!("missing {ENTRY_SYMBOL}: {err}")))?;

        let version = unsafe { abi_version() };
        if version != ABI_VERSION {
            return Err(load_error(format!(
                "ABI version {version}, expected {ABI_VERSION}"
            )));
        }
        let count = unsafe { object_count() } as usize;
        if count != expected_objects {
            return Err(load_error(format!(
                "module expects {count} objects, graph has {expected_objects}"
            )));
        }

        debug!(path = %path.display(), objects = count, "loaded graph module");
        Ok(Self {
            path: path.to_path_buf(),
            object_count: count,
            entry,
            _lib: lib,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn object_count(&self) -> usize {
        self.object_count
    }

    /// Call the entry point.
    ///
    /// # Safety
    ///
    /// Every handle must point at storage laid out the way the module's
    /// generated source expects, and stay valid for the duration of the call.
    pub unsafe fn invoke(&self, handles: &[*mut c_void]) -> i32 {
        (self.entry)(handles.as_ptr(), handles.len() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_library_is_a_load_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = LoadedModule::open(&dir.path().join("absent.so"), 0).expect_err("no library");
        assert!(matches!(err, VxError::Load { .. }));
        assert!(err.is_build());
    }
}

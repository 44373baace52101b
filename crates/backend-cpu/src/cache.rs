//! Fingerprint-keyed cache of compiled graph libraries.
//!
//! Concurrent requests for one fingerprint share a single build; failed
//! builds are forgotten so a later request retries.

use crate::codegen::GeneratedUnit;
use crate::loader::LoadedModule;
use crate::toolchain::{library_extension, Toolchain};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tracing::{debug, info, warn};
use vxforge_ir::{VxError, VxResult};

/// Overrides [`ArtifactCache::default_dir`].
pub const CACHE_DIR_ENV: &str = "VXFORGE_CACHE_DIR";

type Slot = Arc<OnceLock<VxResult<Arc<LoadedModule>>>>;

#[derive(Debug)]
pub struct ArtifactCache {
    dir: PathBuf,
    entries: Mutex<HashMap<String, Slot>>,
    builds: AtomicUsize,
}

impl ArtifactCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            entries: Mutex::new(HashMap::new()),
            builds: AtomicUsize::new(0),
        }
    }

    /// One cache per directory for the whole process.
    pub fn shared(dir: impl AsRef<Path>) -> Arc<ArtifactCache> {
        static CACHES: OnceLock<Mutex<HashMap<PathBuf, Arc<ArtifactCache>>>> = OnceLock::new();
        let dir = dir.as_ref().to_path_buf();
        let mut caches = CACHES
            .get_or_init(|| Mutex::new(HashMap::new()))
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            caches
                .entry(dir.clone())
                .or_insert_with(|| Arc::new(ArtifactCache::new(dir))),
        )
    }

    pub fn default_dir() -> PathBuf {
        std::env::var_os(CACHE_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("vxforge-cache"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Compiler invocations made by this cache.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Artifact key: generated source plus everything that affects the compiled output.
    pub fn fingerprint(unit: &GeneratedUnit, toolchain: &dyn Toolchain) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(unit.source.as_bytes());
        hasher.update(&[0]);
        hasher.update(toolchain.identity().as_bytes());
        hasher.finalize().to_hex().to_string()
    }

    pub fn get_or_build(&self, unit: &GeneratedUnit, toolchain: &dyn Toolchain) -> VxResult<Arc<LoadedModule>> {
        let key = Self::fingerprint(unit, toolchain);
        let slot = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(entries.entry(key.clone()).or_default())
        };

        let result = slot.get_or_init(|| self.build(&key, unit, toolchain)).clone();
        if let Err(err) = &result {
            warn!(fingerprint = %key, error = %err, "graph build failed");
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            if entries.get(&key).is_some_and(|current| Arc::ptr_eq(current, &slot)) {
                entries.remove(&key);
            }
        }
        result
    }

    fn build(&self, key: &str, unit: &GeneratedUnit, toolchain: &dyn Toolchain) -> VxResult<Arc<LoadedModule>> {
        let lib_path = self.dir.join(format!("libvxf_{key}{}", library_extension()));
        if lib_path.exists() {
            debug!(path = %lib_path.display(), "reusing compiled graph library");
        } else {
            std::fs::create_dir_all(&self.dir).map_err(|err| VxError::CodegenBuild {
                diagnostics: format!("failed to create {}: {err}", self.dir.display()),
            })?;
            let source_path = self.dir.join(format!("vxf_{key}.c"));
            std::fs::write(&source_path, &unit.source).map_err(|err| VxError::CodegenBuild {
                diagnostics: format!("failed to write {}: {err}", source_path.display()),
            })?;

            // Build under a private name so other processes never load a partial file.
            let attempt = self.builds.fetch_add(1, Ordering::SeqCst);
            let staging = self.dir.join(format!(
                "libvxf_{key}.{}.{attempt}{}",
                std::process::id(),
                library_extension()
            ));
            let started = std::time::Instant::now();
            let compiled = toolchain.compile(&source_path, &staging);
            if let Err(err) = compiled {
                let _ = std::fs::remove_file(&staging);
                return Err(err);
            }
            std::fs::rename(&staging, &lib_path).map_err(|err| VxError::CodegenBuild {
                diagnostics: format!("failed to install {}: {err}", lib_path.display()),
            })?;
            info!(
                toolchain = toolchain.name(),
                fingerprint = %key,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "compiled graph library"
            );
        }
        LoadedModule::open(&lib_path, unit.entries.len()).map(Arc::new)
    }
}

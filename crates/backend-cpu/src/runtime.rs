//! CPU runtime entrypoints.

use crate::buffers::{Bindings, HostObject, Marshalled, RawArray};
use crate::cache::ArtifactCache;
use crate::codegen::{
    CodeGenerator, GeneratedUnit, NodeOrigin, STATUS_ALLOCATION, STATUS_BAD_COUNT, STATUS_NULL_HANDLE,
};
use crate::loader::LoadedModule;
use crate::toolchain::{CcToolchain, Toolchain, ToolchainConfig};
use std::collections::BTreeMap;
use std::ffi::c_void;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use vxforge_ir::{ObjectId, ObjectMeta, VerifiedIr, VxError, VxResult};
use vxforge_kernels::KernelRegistry;

#[derive(Debug, Clone, Default)]
pub struct CpuBackendOptions {
    /// Shared artifact directory; [`ArtifactCache::default_dir`] when unset.
    pub cache_dir: Option<PathBuf>,
    pub toolchain: ToolchainConfig,
    /// Remove libraries left on disk by earlier processes before first use.
    pub clear_cache: bool,
}

/// Generates, builds and loads native code for verified graphs.
pub struct CpuBackend {
    registry: Arc<KernelRegistry>,
    toolchain: Arc<dyn Toolchain>,
    cache: Arc<ArtifactCache>,
}

impl CpuBackend {
    pub fn new(registry: Arc<KernelRegistry>, toolchain: Arc<dyn Toolchain>, cache: Arc<ArtifactCache>) -> Self {
        Self {
            registry,
            toolchain,
            cache,
        }
    }

    pub fn with_options(registry: Arc<KernelRegistry>, options: CpuBackendOptions) -> VxResult<Self> {
        let dir = options.cache_dir.unwrap_or_else(ArtifactCache::default_dir);
        if options.clear_cache && dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(|err| VxError::CodegenBuild {
                diagnostics: format!("failed to clear {}: {err}", dir.display()),
            })?;
        }
        let toolchain: Arc<dyn Toolchain> = Arc::new(CcToolchain::new(options.toolchain));
        Ok(Self::new(registry, toolchain, ArtifactCache::shared(&dir)))
    }

    pub fn registry(&self) -> &Arc<KernelRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<ArtifactCache> {
        &self.cache
    }

    pub fn toolchain(&self) -> &Arc<dyn Toolchain> {
        &self.toolchain
    }

    pub fn generate(&self, ir: &VerifiedIr) -> VxResult<GeneratedUnit> {
        CodeGenerator::new(&self.registry).generate(ir)
    }

    pub fn build(&self, ir: &VerifiedIr) -> VxResult<CompiledGraph> {
        let unit = self.generate(ir)?;
        self.build_unit(ir, &unit)
    }

    /// Build (or fetch from the cache) the library for an already generated unit.
    pub fn build_unit(&self, ir: &VerifiedIr, unit: &GeneratedUnit) -> VxResult<CompiledGraph> {
        let module = self.cache.get_or_build(unit, self.toolchain.as_ref())?;
        CompiledGraph::new(module, unit, ir)
    }
}

/// A loaded graph library plus what is needed to call it safely.
#[derive(Debug, Clone)]
pub struct CompiledGraph {
    module: Arc<LoadedModule>,
    entries: Vec<(ObjectId, ObjectMeta)>,
    origins: Vec<NodeOrigin>,
    fingerprint: String,
}

impl CompiledGraph {
    pub fn new(module: Arc<LoadedModule>, unit: &GeneratedUnit, ir: &VerifiedIr) -> VxResult<Self> {
        let entries = unit
            .entries
            .iter()
            .map(|&id| {
                ir.meta(id)
                    .copied()
                    .map(|meta| (id, meta))
                    .ok_or_else(|| VxError::InvalidState(format!("entry {id} is not in the verified graph")))
            })
            .collect::<VxResult<Vec<_>>>()?;
        if module.object_count() != entries.len() {
            return Err(VxError::Load {
                reason: format!(
                    "module expects {} objects, graph has {}",
                    module.object_count(),
                    entries.len()
                ),
            });
        }
        Ok(Self {
            module,
            entries,
            origins: unit.origins.clone(),
            fingerprint: unit.fingerprint.clone(),
        })
    }

    pub fn entries(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.entries.iter().map(|(id, _)| *id)
    }

    pub fn origins(&self) -> &[NodeOrigin] {
        &self.origins
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn module(&self) -> &Arc<LoadedModule> {
        &self.module
    }

    /// Zero-filled storage for every entry object.
    pub fn allocate_bindings(&self) -> VxResult<Bindings> {
        let mut bindings = Bindings::new();
        for (id, meta) in &self.entries {
            bindings.insert(*id, HostObject::from_meta(meta)?);
        }
        Ok(bindings)
    }

    pub fn check_bindings(&self, bindings: &Bindings) -> VxResult<()> {
        for (id, meta) in &self.entries {
            let bound = bindings.get(*id).ok_or_else(|| VxError::BindingMismatch {
                object: *id,
                reason: format!("no {} bound", meta.kind()),
            })?;
            if let Some(reason) = bound.mismatch(meta) {
                return Err(VxError::BindingMismatch { object: *id, reason });
            }
        }
        Ok(())
    }

    /// Run the graph once over `bindings`.
    ///
    /// Delays age only when every node succeeded.
    pub fn process(&self, bindings: &mut Bindings) -> VxResult<()> {
        self.check_bindings(bindings)?;

        let mut bound: BTreeMap<ObjectId, &mut HostObject> = bindings.objects_mut().collect();
        let mut marshalled = Vec::with_capacity(self.entries.len());
        for (id, _) in &self.entries {
            let object = bound
                .get_mut(id)
                .ok_or_else(|| VxError::InvalidState(format!("{id} vanished from bindings")))?;
            marshalled.push(object.marshal());
        }
        let handles: Vec<*mut c_void> = marshalled
            .iter_mut()
            .map(|entry| match entry {
                Marshalled::Direct(ptr) => *ptr,
                Marshalled::Array(raw) => (raw as *mut RawArray).cast(),
                Marshalled::Table(table) => table.as_mut_ptr().cast(),
            })
            .collect();

        // SAFETY: handles follow the unit's entry order and were checked against
        // its metadata; the storage they point at is borrowed for the whole call.
        let status = unsafe { self.module.invoke(&handles) };
        drop(handles);

        for ((id, _), entry) in self.entries.iter().zip(&marshalled) {
            if let (Marshalled::Array(raw), Some(HostObject::Array(array))) = (entry, bound.get_mut(id)) {
                array.sync_len(raw.num_items);
            }
        }

        self.decode_status(status)?;

        for (id, _) in &self.entries {
            if let Some(HostObject::Delay(delay)) = bound.get_mut(id) {
                delay.age();
            }
        }
        debug!(fingerprint = %self.fingerprint, "graph processed");
        Ok(())
    }

    fn decode_status(&self, status: i32) -> VxResult<()> {
        match status {
            0 => Ok(()),
            STATUS_BAD_COUNT => Err(VxError::Execution {
                status,
                reason: "entry point rejected the handle count".to_string(),
            }),
            STATUS_NULL_HANDLE => Err(VxError::Execution {
                status,
                reason: "entry point received a null handle".to_string(),
            }),
            STATUS_ALLOCATION => Err(VxError::Execution {
                status,
                reason: "graph-local allocation failed".to_string(),
            }),
            positive if positive > 0 => {
                let position = positive as usize - 1;
                let origin = self.origins.get(position).ok_or_else(|| VxError::Execution {
                    status,
                    reason: format!("status names schedule position {position}, graph has {}", self.origins.len()),
                })?;
                info!(
                    position,
                    kernels = ?origin.kernels,
                    "graph node reported failure"
                );
                Err(VxError::NodeFailure {
                    position,
                    nodes: origin.nodes.clone(),
                })
            }
            other => Err(VxError::Execution {
                status: other,
                reason: "unknown status".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_use_shared_cache_dir() {
        let options = CpuBackendOptions::default();
        assert!(options.cache_dir.is_none());
        assert!(!options.clear_cache);
        assert_eq!(options.toolchain, ToolchainConfig::default());
    }
}

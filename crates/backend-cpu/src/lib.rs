//! CPU backend for VXForge: C code generation, native build and execution.
//!
//! ```text
//! VerifiedIr ──▶ CodeGenerator ──▶ GeneratedUnit ──▶ ArtifactCache ──▶ LoadedModule
//!                                                     (cc, blake3)       (libloading)
//!                                                                             │
//!                                          Bindings ──▶ CompiledGraph::process
//! ```

pub mod buffers;
pub mod cache;
pub mod codegen;
pub mod loader;
pub mod planner;
pub mod runtime;
pub mod toolchain;

pub use buffers::{
    ArrayBuffer, Bindings, Coordinates2d, DelayBuffer, HostObject, ImageBuffer, PyramidBuffer, ScalarBuffer,
};
pub use cache::{ArtifactCache, CACHE_DIR_ENV};
pub use codegen::{CodeGenerator, GeneratedUnit, NodeOrigin, ABI_VERSION, ENTRY_SYMBOL};
pub use loader::LoadedModule;
pub use planner::{Storage, StoragePlan};
pub use runtime::{CompiledGraph, CpuBackend, CpuBackendOptions};
pub use toolchain::{library_extension, CcToolchain, Toolchain, ToolchainConfig, COMPILER_ENV};

//! VXForge: verify, optimize and natively compile OpenVX-style vision graphs.
//!
//! ```text
//! Graph ──▶ Verifier ──▶ GraphOptimizer ──▶ CodeGenerator ──▶ ArtifactCache ──▶ CompiledGraph::process
//!           (metadata)   (dead nodes,        (C source)        (cc, blake3,
//!                         fusion)                                libloading)
//! ```
//!
//! The member crates are re-exported under their short names; the most used
//! types are also available at the root.

pub use vxforge_backend_cpu as backend;
pub use vxforge_compiler as compiler;
pub use vxforge_ir as ir;
pub use vxforge_kernels as kernels;
pub use vxforge_optimizer as optimizer;

pub use vxforge_backend_cpu::{
    ArrayBuffer, Bindings, CompiledGraph, DelayBuffer, HostObject, ImageBuffer, PyramidBuffer, ScalarBuffer,
};
pub use vxforge_compiler::{CompilerConfig, CompilerPipeline, Graph, GraphState};
pub use vxforge_ir::{
    BorderMode, GraphIr, ImageMeta, ItemType, NodeId, ObjectId, PixelFormat, ScalarType, ScalarValue, VxError,
    VxResult,
};
pub use vxforge_kernels::KernelRegistry;
pub use vxforge_optimizer::{OptimizationReport, OptimizerConfig};

//! Verification and optimization of VXForge graphs.
//!
//! ```text
//! GraphIr ──▶ Verifier ──▶ VerifiedIr ──▶ GraphOptimizer ──▶ VerifiedIr + OptimizationReport
//!                                          (dead-node elimination, element-wise fusion)
//! ```
//!
//! # Key Components
//!
//! - [`verifier::Verifier`]: resolves metadata and schedules nodes
//! - [`dce::DeadNodeElimination`]: drops nodes nothing observable depends on
//! - [`fusion::ElementwiseFusion`]: merges element-wise chains into one loop
//! - [`optimizer::GraphOptimizer`]: runs the passes to a fixed point

pub mod dce;
pub mod fusion;
pub mod optimizer;
pub mod report;
pub mod verifier;

pub use dce::DeadNodeElimination;
pub use fusion::ElementwiseFusion;
pub use optimizer::{GraphOptimizer, OptimizerConfig};
pub use report::{FusionRecord, OptimizationReport};
pub use verifier::Verifier;

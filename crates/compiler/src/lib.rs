//! VXForge compiler facade: configuration, pipeline, graph lifecycle and tooling.

#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod demos;
pub mod eval;
pub mod graph;
pub mod pipeline;

#[cfg(feature = "cli")]
pub use cli::*;
pub use config::*;
pub use demos::*;
pub use eval::*;
pub use graph::*;
pub use pipeline::*;

//! VXForge graph representation: data objects, nodes and verified IR.

pub mod error;
pub mod graph;
pub mod node;
pub mod object;
pub mod passes;
pub mod topology;
pub mod verified;

pub use error::*;
pub use graph::*;
pub use node::*;
pub use object::*;
pub use passes::*;
pub use topology::*;
pub use verified::*;

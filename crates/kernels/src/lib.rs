//! Vision kernels for VXForge: signatures, validation rules and C templates.

pub mod color;
pub mod elementwise;
pub mod enums;
pub mod filters;
pub mod pyramid;
pub mod registry;
pub mod signature;
pub mod statistics;
pub mod template;

pub use color::*;
pub use elementwise::*;
pub use enums::*;
pub use filters::*;
pub use pyramid::*;
pub use registry::*;
pub use signature::*;
pub use statistics::*;
pub use template::*;

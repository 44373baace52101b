//! Error kinds shared by every stage of the graph pipeline.

use crate::node::NodeId;
use crate::object::ObjectId;
use thiserror::Error;

pub type VxResult<T> = std::result::Result<T, VxError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum VxError {
    /// A parameter is unbound, of the wrong kind, or rejected by the kernel's validation rule.
    #[error("{node} parameter {slot}: {reason}")]
    Parameter {
        node: NodeId,
        slot: usize,
        reason: String,
    },
    #[error("graph contains a cycle; unschedulable nodes: {nodes:?}")]
    CyclicGraph { nodes: Vec<NodeId> },
    /// Two inferences disagree on a virtual object's field.
    #[error("conflicting {field} for {object} inferred by {node}: {existing} vs {inferred}")]
    ConflictingMetadata {
        object: ObjectId,
        node: NodeId,
        field: String,
        existing: String,
        inferred: String,
    },
    #[error("{object} used by {node} is still unresolved after verification")]
    UnresolvedVirtualObject { object: ObjectId, node: NodeId },
    #[error("{node} references unknown kernel `{kernel}`")]
    UnknownKernel { node: NodeId, kernel: String },
    /// Internal defect in a kernel's code-generation template.
    #[error("code template for {node} failed: {reason}")]
    Template { node: NodeId, reason: String },
    #[error("native build failed:\n{diagnostics}")]
    CodegenBuild { diagnostics: String },
    #[error("failed to load compiled graph: {reason}")]
    Load { reason: String },
    #[error("binding for {object} rejected: {reason}")]
    BindingMismatch { object: ObjectId, reason: String },
    /// Decoded from a positive entry-point status.
    #[error("node at schedule position {position} failed (nodes {nodes:?})")]
    NodeFailure { position: usize, nodes: Vec<NodeId> },
    #[error("native entry point returned status {status}: {reason}")]
    Execution { status: i32, reason: String },
    #[error("host buffer error: {0}")]
    Buffer(String),
    #[error("invalid graph state: {0}")]
    InvalidState(String),
}

impl VxError {
    pub fn parameter(node: NodeId, slot: usize, reason: impl Into<String>) -> Self {
        VxError::Parameter {
            node,
            slot,
            reason: reason.into(),
        }
    }

    /// Errors raised by the verifier; the graph stays unverified.
    pub fn is_verification(&self) -> bool {
        matches!(
            self,
            VxError::Parameter { .. }
                | VxError::CyclicGraph { .. }
                | VxError::ConflictingMetadata { .. }
                | VxError::UnresolvedVirtualObject { .. }
                | VxError::UnknownKernel { .. }
        )
    }

    /// Errors raised while building or loading native code; the graph stays verified.
    pub fn is_build(&self) -> bool {
        matches!(
            self,
            VxError::CodegenBuild { .. } | VxError::Load { .. } | VxError::Template { .. }
        )
    }
}

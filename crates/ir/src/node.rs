//! Processing nodes and their parameter bindings.

use crate::object::ObjectId;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Input,
    Output,
    Bidirectional,
}

impl Direction {
    pub fn reads(&self) -> bool {
        matches!(self, Direction::Input | Direction::Bidirectional)
    }

    pub fn writes(&self) -> bool {
        matches!(self, Direction::Output | Direction::Bidirectional)
    }
}

/// How neighbourhood kernels sample outside the image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BorderMode {
    #[default]
    Replicate,
    Constant(u8),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kernel: String,
    pub params: Vec<Option<ObjectId>>,
    pub border: BorderMode,
}

impl Node {
    pub fn new<K: Into<String>>(id: NodeId, kernel: K, params: Vec<Option<ObjectId>>) -> Self {
        Self {
            id,
            kernel: kernel.into(),
            params,
            border: BorderMode::default(),
        }
    }

    pub fn bound_objects(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.params.iter().flatten().copied()
    }
}

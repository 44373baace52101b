//! Kernel signatures: ordered, typed, directed parameter lists.

use serde::{Deserialize, Serialize};
use vxforge_ir::{DataKind, Direction};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: DataKind,
    pub direction: Direction,
    pub optional: bool,
}

impl ParamSpec {
    fn new(name: &str, kind: DataKind, direction: Direction) -> Self {
        Self {
            name: name.to_string(),
            kind,
            direction,
            optional: false,
        }
    }

    pub fn input(name: &str, kind: DataKind) -> Self {
        Self::new(name, kind, Direction::Input)
    }

    pub fn output(name: &str, kind: DataKind) -> Self {
        Self::new(name, kind, Direction::Output)
    }

    pub fn bidirectional(name: &str, kind: DataKind) -> Self {
        Self::new(name, kind, Direction::Bidirectional)
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSignature {
    pub name: String,
    pub enum_id: u32,
    pub params: Vec<ParamSpec>,
    /// Output pixel depends only on input pixels at the same location.
    pub elementwise: bool,
}

impl KernelSignature {
    pub fn new<N: Into<String>>(name: N, enum_id: u32) -> Self {
        Self {
            name: name.into(),
            enum_id,
            params: Vec::new(),
            elementwise: false,
        }
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    pub fn elementwise(mut self) -> Self {
        self.elementwise = true;
        self
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn directions(&self) -> Vec<Direction> {
        self.params.iter().map(|spec| spec.direction).collect()
    }
}

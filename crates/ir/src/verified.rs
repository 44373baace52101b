//! Verified IR: fully resolved metadata and topologically ordered nodes.
//!
//! Produced by the verifier and rewritten by optimization passes. A node is a
//! chain of one or more kernel steps; chains longer than one come from
//! element-wise fusion and run inside a single per-pixel loop.

use crate::node::{BorderMode, Direction, NodeId};
use crate::object::{DataObject, ObjectId, ObjectMeta};
use crate::topology::{NodeAccess, Topology};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedObject {
    pub object: DataObject,
    pub resolved: ObjectMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStep {
    pub origin: NodeId,
    pub kernel: String,
    pub params: Vec<Option<ObjectId>>,
    pub directions: Vec<Direction>,
    pub border: BorderMode,
}

impl NodeStep {
    pub fn reads(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.bound(|direction| direction.reads())
    }

    pub fn writes(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.bound(|direction| direction.writes())
    }

    fn bound<F>(&self, keep: F) -> impl Iterator<Item = ObjectId> + '_
    where
        F: Fn(&Direction) -> bool + 'static,
    {
        self.params
            .iter()
            .zip(self.directions.iter())
            .filter(move |(_, direction)| keep(*direction))
            .filter_map(|(param, _)| *param)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedNode {
    pub steps: Vec<NodeStep>,
    /// Intermediates carried in per-pixel locals instead of buffers.
    pub internal: Vec<ObjectId>,
    pub elementwise: bool,
}

impl VerifiedNode {
    pub fn single(step: NodeStep, elementwise: bool) -> Self {
        Self {
            steps: vec![step],
            internal: Vec::new(),
            elementwise,
        }
    }

    pub fn id(&self) -> NodeId {
        self.steps[0].origin
    }

    pub fn origins(&self) -> Vec<NodeId> {
        self.steps.iter().map(|step| step.origin).collect()
    }

    pub fn is_fused(&self) -> bool {
        self.steps.len() > 1
    }

    pub fn kernels(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.kernel.as_str()).collect()
    }

    pub fn reads(&self) -> Vec<ObjectId> {
        let mut reads = Vec::new();
        for step in &self.steps {
            for object in step.reads() {
                if !self.internal.contains(&object) && !reads.contains(&object) {
                    reads.push(object);
                }
            }
        }
        reads
    }

    pub fn writes(&self) -> Vec<ObjectId> {
        let mut writes = Vec::new();
        for step in &self.steps {
            for object in step.writes() {
                if !self.internal.contains(&object) && !writes.contains(&object) {
                    writes.push(object);
                }
            }
        }
        writes
    }

    /// Every object referenced by any step, internal ones included.
    pub fn referenced(&self) -> Vec<ObjectId> {
        let mut all = Vec::new();
        for object in self.steps.iter().flat_map(|step| step.params.iter().flatten()) {
            if !all.contains(object) {
                all.push(*object);
            }
        }
        all
    }

    pub fn access(&self) -> NodeAccess {
        NodeAccess {
            reads: self.reads(),
            writes: self.writes(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerifiedIr {
    pub objects: BTreeMap<ObjectId, ResolvedObject>,
    pub nodes: Vec<VerifiedNode>,
}

impl VerifiedIr {
    pub fn object(&self, id: ObjectId) -> Option<&ResolvedObject> {
        self.objects.get(&id)
    }

    pub fn meta(&self, id: ObjectId) -> Option<&ObjectMeta> {
        self.objects.get(&id).map(|object| &object.resolved)
    }

    pub fn is_external(&self, id: ObjectId) -> bool {
        self.objects
            .get(&id)
            .map(|object| object.object.is_external())
            .unwrap_or(false)
    }

    /// Entry-point handles in registration order.
    pub fn entries(&self) -> Vec<ObjectId> {
        self.objects
            .values()
            .filter(|object| object.object.is_entry())
            .map(|object| object.object.id)
            .collect()
    }

    pub fn topology(&self) -> Topology {
        let accesses: Vec<NodeAccess> = self.nodes.iter().map(VerifiedNode::access).collect();
        Topology::build(&accesses)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

//! Graph verification: kernel lookup, scheduling, structural checks and
//! metadata inference.
//!
//! Verification never mutates the construction graph. The result is a
//! [`VerifiedIr`] whose nodes are in execution order and whose objects carry
//! fully resolved metadata.

use std::collections::BTreeMap;
use tracing::{debug, info};
use vxforge_ir::{
    DataObject, Direction, GraphIr, Node, NodeAccess, NodeStep, ObjectId, ObjectMeta,
    ResolvedObject, Topology, VerifiedIr, VerifiedNode, VxError, VxResult,
};
use vxforge_kernels::{DynKernel, KernelRegistry};

/// Checks a construction graph against a kernel registry.
pub struct Verifier<'a> {
    registry: &'a KernelRegistry,
}

struct Checked<'g> {
    node: &'g Node,
    kernel: DynKernel,
    directions: Vec<Direction>,
}

impl<'a> Verifier<'a> {
    pub fn new(registry: &'a KernelRegistry) -> Self {
        Self { registry }
    }

    pub fn verify(&self, graph: &GraphIr) -> VxResult<VerifiedIr> {
        let checked = graph
            .nodes()
            .iter()
            .map(|node| self.lookup(graph, node))
            .collect::<VxResult<Vec<_>>>()?;

        let accesses: Vec<NodeAccess> = checked.iter().map(access).collect();
        let topology = Topology::build(&accesses);
        let order = topology.order().map_err(|stuck| VxError::CyclicGraph {
            nodes: stuck.iter().map(|&index| checked[index].node.id).collect(),
        })?;

        for &index in &order {
            check_bindings(graph, &topology, index, &checked[index])?;
        }

        let mut resolved: Vec<ObjectMeta> = graph.objects().iter().map(|object| object.meta).collect();
        for &index in &order {
            infer(graph, &checked[index], &mut resolved)?;
        }

        for &index in &order {
            let entry = &checked[index];
            for object in entry.node.bound_objects() {
                if !resolved[object.index()].is_resolved() {
                    return Err(VxError::UnresolvedVirtualObject {
                        object,
                        node: entry.node.id,
                    });
                }
            }
        }

        let referenced: Vec<ObjectId> = graph.nodes().iter().flat_map(Node::bound_objects).collect();
        let mut objects = BTreeMap::new();
        for (object, meta) in graph.objects().iter().zip(resolved) {
            if object.is_virtual && !meta.is_resolved() && !referenced.contains(&object.id) {
                debug!(object = %object.id, "dropping unreferenced unresolved virtual object");
                continue;
            }
            objects.insert(
                object.id,
                ResolvedObject {
                    object: object.clone(),
                    resolved: meta,
                },
            );
        }

        let nodes = order
            .iter()
            .map(|&index| {
                let entry = &checked[index];
                let step = NodeStep {
                    origin: entry.node.id,
                    kernel: entry.node.kernel.clone(),
                    params: entry.node.params.clone(),
                    directions: entry.directions.clone(),
                    border: entry.node.border,
                };
                VerifiedNode::single(step, entry.kernel.is_elementwise())
            })
            .collect::<Vec<_>>();

        info!(
            nodes = nodes.len(),
            objects = objects.len(),
            "graph verified"
        );
        Ok(VerifiedIr { objects, nodes })
    }

    fn lookup<'g>(&self, graph: &GraphIr, node: &'g Node) -> VxResult<Checked<'g>> {
        let kernel = self
            .registry
            .find(&node.kernel)
            .ok_or_else(|| VxError::UnknownKernel {
                node: node.id,
                kernel: node.kernel.clone(),
            })?;
        let signature = kernel.signature();
        if node.params.len() != signature.len() {
            return Err(VxError::parameter(
                node.id,
                node.params.len().min(signature.len()),
                format!(
                    "{} takes {} parameters, {} given",
                    signature.name,
                    signature.len(),
                    node.params.len()
                ),
            ));
        }
        for (slot, object) in node.params.iter().enumerate() {
            if let Some(object) = object {
                if graph.object(*object).is_none() {
                    return Err(VxError::parameter(node.id, slot, format!("unknown {object}")));
                }
            }
        }
        let directions = signature.directions();
        Ok(Checked {
            node,
            kernel,
            directions,
        })
    }
}

fn access(entry: &Checked<'_>) -> NodeAccess {
    let mut access = NodeAccess::default();
    for (param, direction) in entry.node.params.iter().zip(&entry.directions) {
        let Some(object) = *param else { continue };
        if direction.reads() && !access.reads.contains(&object) {
            access.reads.push(object);
        }
        if direction.writes() && !access.writes.contains(&object) {
            access.writes.push(object);
        }
    }
    access
}

fn object_of(graph: &GraphIr, node: &Node, slot: usize, id: ObjectId) -> VxResult<DataObject> {
    graph
        .object(id)
        .cloned()
        .ok_or_else(|| VxError::parameter(node.id, slot, format!("unknown {id}")))
}

fn check_bindings(graph: &GraphIr, topology: &Topology, index: usize, entry: &Checked<'_>) -> VxResult<()> {
    let node = entry.node;
    let signature = entry.kernel.signature();
    for (slot, spec) in signature.params.iter().enumerate() {
        let Some(id) = node.params[slot] else {
            if spec.optional {
                continue;
            }
            return Err(VxError::parameter(
                node.id,
                slot,
                format!("required parameter `{}` is not bound", spec.name),
            ));
        };
        let object = object_of(graph, node, slot, id)?;
        if object.kind() != spec.kind {
            return Err(VxError::parameter(
                node.id,
                slot,
                format!("expected {}, got {} ({id})", spec.kind, object.kind()),
            ));
        }
        if spec.direction.writes() && object.is_constant() {
            return Err(VxError::parameter(
                node.id,
                slot,
                format!("{id} is a constant and cannot be written"),
            ));
        }
        if spec.direction == Direction::Bidirectional && object.is_virtual {
            return Err(VxError::parameter(
                node.id,
                slot,
                format!("bidirectional parameter `{}` needs a non-virtual object", spec.name),
            ));
        }
        let writers = topology.producers(id);
        if spec.direction.writes() {
            if let Some(&first) = writers.first() {
                if first != index {
                    return Err(VxError::parameter(
                        node.id,
                        slot,
                        format!("{id} is already written by another node"),
                    ));
                }
            }
        }
        if spec.direction == Direction::Input
            && object.is_virtual
            && !object.is_constant()
            && writers.is_empty()
        {
            return Err(VxError::parameter(
                node.id,
                slot,
                format!("virtual {id} is read but never written"),
            ));
        }
    }
    Ok(())
}

fn infer(graph: &GraphIr, entry: &Checked<'_>, resolved: &mut [ObjectMeta]) -> VxResult<()> {
    let node = entry.node;
    let metas: Vec<Option<ObjectMeta>> = node
        .params
        .iter()
        .map(|param| param.map(|id| resolved[id.index()]))
        .collect();
    let inferences = entry
        .kernel
        .validate(&metas)
        .map_err(|rejection| VxError::parameter(node.id, rejection.slot, rejection.reason))?;

    for inference in inferences {
        if !entry
            .directions
            .get(inference.slot)
            .is_some_and(|direction| direction.writes())
        {
            return Err(VxError::Template {
                node: node.id,
                reason: format!("{} inferred metadata for input slot {}", node.kernel, inference.slot),
            });
        }
        let Some(id) = node.params[inference.slot] else { continue };
        let object = object_of(graph, node, inference.slot, id)?;
        let current = &mut resolved[id.index()];
        match current.merge(&inference.meta) {
            Ok(changed) => {
                if changed {
                    debug!(node = %node.id, object = %id, "metadata inferred");
                }
            }
            Err(conflict) if object.is_virtual => {
                return Err(VxError::ConflictingMetadata {
                    object: id,
                    node: node.id,
                    field: conflict.field,
                    existing: conflict.existing,
                    inferred: conflict.inferred,
                });
            }
            Err(conflict) => {
                return Err(VxError::parameter(
                    node.id,
                    inference.slot,
                    format!(
                        "declared {} {} of {id} does not match {}",
                        conflict.field, conflict.existing, conflict.inferred
                    ),
                ));
            }
        }
    }
    Ok(())
}

//! Dead-node elimination.
//!
//! A node is live when it writes a graph-visible object, or when it produces
//! something a live node reads. Everything else is removed, followed by the
//! virtual objects no remaining node references.

use anyhow::Result;
use tracing::debug;
use vxforge_ir::{ObjectId, Pass, PassEvent, PassOutcome, VerifiedIr};

pub struct DeadNodeElimination;

impl Pass for DeadNodeElimination {
    fn name(&self) -> &str {
        "eliminate-dead-nodes"
    }

    fn run(&self, ir: &mut VerifiedIr) -> Result<PassOutcome> {
        let mut outcome = PassOutcome::unchanged();
        let topology = ir.topology();

        let mut live = vec![false; ir.nodes.len()];
        let mut worklist: Vec<usize> = ir
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.writes().iter().any(|&object| ir.is_external(object)))
            .map(|(index, _)| index)
            .collect();
        while let Some(index) = worklist.pop() {
            if live[index] {
                continue;
            }
            live[index] = true;
            for object in ir.nodes[index].reads() {
                worklist.extend(topology.producers(object).iter().copied().filter(|&producer| !live[producer]));
            }
        }

        let mut index = 0;
        ir.nodes.retain(|node| {
            let keep = live[index];
            index += 1;
            if !keep {
                debug!(node = %node.id(), kernels = ?node.kernels(), "removing dead node");
                for origin in node.origins() {
                    outcome.record(PassEvent::NodeRemoved(origin));
                }
            }
            keep
        });

        let referenced: Vec<ObjectId> = ir.nodes.iter().flat_map(|node| node.referenced()).collect();
        let unused: Vec<ObjectId> = ir
            .objects
            .values()
            .filter(|entry| {
                !entry.object.is_external() && !referenced.contains(&entry.object.id)
            })
            .map(|entry| entry.object.id)
            .collect();
        for object in unused {
            ir.objects.remove(&object);
            outcome.record(PassEvent::ObjectRemoved(object));
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verifier::Verifier;
    use vxforge_ir::{GraphIr, PixelFormat};
    use vxforge_kernels::KernelRegistry;

    #[test]
    fn removes_unobserved_branch_and_its_intermediates() -> Result<()> {
        let registry = KernelRegistry::with_standard_kernels();
        let mut graph = GraphIr::new();
        let input = graph.create_image(8, 8, PixelFormat::U8);
        let kept = graph.create_image(8, 8, PixelFormat::U8);
        let scratch = graph.create_virtual_image(None, None, None);
        let deeper = graph.create_virtual_image(None, None, None);
        let live = graph.add_node("vx.not", vec![Some(input), Some(kept)]);
        let dead_a = graph.add_node("vx.box_3x3", vec![Some(input), Some(scratch)]);
        let dead_b = graph.add_node("vx.not", vec![Some(scratch), Some(deeper)]);

        let mut ir = Verifier::new(&registry).verify(&graph)?;
        let outcome = DeadNodeElimination.run(&mut ir)?;

        assert_eq!(ir.nodes.len(), 1);
        assert_eq!(ir.nodes[0].id(), live);
        assert!(outcome.events.contains(&PassEvent::NodeRemoved(dead_a)));
        assert!(outcome.events.contains(&PassEvent::NodeRemoved(dead_b)));
        assert!(ir.object(scratch).is_none());
        assert!(ir.object(deeper).is_none());
        assert!(ir.object(input).is_some());
        Ok(())
    }

    #[test]
    fn marked_virtual_output_keeps_its_producer() -> Result<()> {
        let registry = KernelRegistry::with_standard_kernels();
        let mut graph = GraphIr::new();
        let input = graph.create_image(4, 4, PixelFormat::U8);
        let mid = graph.create_virtual_image(None, None, None);
        graph.add_node("vx.not", vec![Some(input), Some(mid)]);
        graph.mark_output(mid)?;

        let mut ir = Verifier::new(&registry).verify(&graph)?;
        let outcome = DeadNodeElimination.run(&mut ir)?;
        assert!(!outcome.changed());
        assert_eq!(ir.nodes.len(), 1);
        Ok(())
    }
}

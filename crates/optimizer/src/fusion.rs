//! Element-wise fusion.
//!
//! Merges a producer into its consumer when both are element-wise and the
//! image between them is a private intermediate: virtual, not graph-visible,
//! written only by the producer, read only by the consumer, and of the same
//! element count as the consumer's outputs. The intermediate then lives in a
//! per-pixel local of its own element type.

use anyhow::Result;
use tracing::debug;
use vxforge_ir::{
    DataKind, ObjectId, Pass, PassEvent, PassOutcome, Topology, VerifiedIr, VerifiedNode,
};

pub struct ElementwiseFusion;

struct Candidate {
    producer: usize,
    consumer: usize,
    intermediate: ObjectId,
}

fn element_count(ir: &VerifiedIr, object: ObjectId) -> Option<usize> {
    ir.meta(object)?.as_image()?.element_count()
}

fn is_private_image(ir: &VerifiedIr, object: ObjectId) -> bool {
    ir.object(object).is_some_and(|entry| {
        entry.object.kind() == DataKind::Image
            && entry.object.is_virtual
            && !entry.object.is_external()
            && entry.object.delay_slot.is_none()
    })
}

fn find_candidate(ir: &VerifiedIr, topology: &Topology) -> Option<Candidate> {
    for (consumer_index, consumer) in ir.nodes.iter().enumerate() {
        if !consumer.elementwise {
            continue;
        }
        let outputs = consumer.writes();
        for intermediate in consumer.reads() {
            if !is_private_image(ir, intermediate) {
                continue;
            }
            let &[producer_index] = topology.producers(intermediate) else {
                continue;
            };
            if producer_index == consumer_index || topology.consumers(intermediate) != [consumer_index] {
                continue;
            }
            let producer = &ir.nodes[producer_index];
            if !producer.elementwise || producer.writes() != [intermediate] {
                continue;
            }
            let count = element_count(ir, intermediate);
            if count.is_none() || outputs.iter().any(|&output| element_count(ir, output) != count) {
                continue;
            }
            return Some(Candidate {
                producer: producer_index,
                consumer: consumer_index,
                intermediate,
            });
        }
    }
    None
}

impl Pass for ElementwiseFusion {
    fn name(&self) -> &str {
        "fuse-elementwise"
    }

    fn run(&self, ir: &mut VerifiedIr) -> Result<PassOutcome> {
        let mut outcome = PassOutcome::unchanged();
        while let Some(candidate) = find_candidate(ir, &ir.topology()) {
            let producer = ir.nodes[candidate.producer].clone();
            let consumer = &ir.nodes[candidate.consumer];

            let mut internal = producer.internal.clone();
            internal.extend(consumer.internal.iter().copied());
            internal.push(candidate.intermediate);
            let fused = VerifiedNode {
                steps: producer.steps.iter().chain(&consumer.steps).cloned().collect(),
                internal,
                elementwise: true,
            };
            debug!(
                producer = ?producer.origins(),
                consumer = ?consumer.origins(),
                intermediate = %candidate.intermediate,
                "fusing element-wise nodes"
            );
            outcome.record(PassEvent::Fused {
                producer: producer.origins(),
                consumer: consumer.origins(),
                intermediate: candidate.intermediate,
            });

            ir.nodes[candidate.consumer] = fused;
            ir.nodes.remove(candidate.producer);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verifier::Verifier;
    use vxforge_ir::{GraphIr, NodeId, PixelFormat, ScalarValue};
    use vxforge_kernels::{KernelRegistry, VX_CONVERT_POLICY_SATURATE};

    #[test]
    fn fuses_a_maximal_chain() -> Result<()> {
        let registry = KernelRegistry::with_standard_kernels();
        let mut graph = GraphIr::new();
        let a = graph.create_image(8, 4, PixelFormat::U8);
        let b = graph.create_image(8, 4, PixelFormat::U8);
        let policy = graph.create_constant(ScalarValue::Enum(VX_CONVERT_POLICY_SATURATE));
        let factor = graph.create_constant(ScalarValue::F32(0.5));
        let low = graph.create_constant(ScalarValue::U8(10));
        let high = graph.create_constant(ScalarValue::U8(200));
        let sum = graph.create_virtual_image(None, None, None);
        let scaled = graph.create_virtual_image(None, None, None);
        let out = graph.create_image(8, 4, PixelFormat::U8);
        graph.add_node("vx.add", vec![Some(a), Some(b), Some(policy), Some(sum)]);
        graph.add_node("vxf.multiply_scalar", vec![Some(sum), Some(factor), Some(scaled)]);
        graph.add_node("vxf.clamp", vec![Some(scaled), Some(low), Some(high), Some(out)]);

        let mut ir = Verifier::new(&registry).verify(&graph)?;
        let outcome = ElementwiseFusion.run(&mut ir)?;

        assert_eq!(outcome.events.len(), 2);
        assert_eq!(ir.nodes.len(), 1);
        let node = &ir.nodes[0];
        assert_eq!(node.origins(), vec![NodeId(0), NodeId(1), NodeId(2)]);
        assert_eq!(node.internal, vec![sum, scaled]);
        assert_eq!(node.reads(), vec![a, b, policy, factor, low, high]);
        assert_eq!(node.writes(), vec![out]);
        Ok(())
    }

    #[test]
    fn shared_or_visible_intermediates_stay_unfused() -> Result<()> {
        let registry = KernelRegistry::with_standard_kernels();
        let mut graph = GraphIr::new();
        let input = graph.create_image(4, 4, PixelFormat::U8);
        let inverted = graph.create_virtual_image(None, None, None);
        let first = graph.create_image(4, 4, PixelFormat::U8);
        let second = graph.create_image(4, 4, PixelFormat::U8);
        let marked = graph.create_virtual_image(None, None, None);
        let third = graph.create_image(4, 4, PixelFormat::U8);
        graph.add_node("vx.not", vec![Some(input), Some(inverted)]);
        graph.add_node("vx.not", vec![Some(inverted), Some(first)]);
        graph.add_node("vx.not", vec![Some(inverted), Some(second)]);
        graph.add_node("vx.not", vec![Some(input), Some(marked)]);
        graph.add_node("vx.not", vec![Some(marked), Some(third)]);
        graph.mark_output(marked)?;

        let mut ir = Verifier::new(&registry).verify(&graph)?;
        let outcome = ElementwiseFusion.run(&mut ir)?;
        assert!(!outcome.changed());
        assert_eq!(ir.nodes.len(), 5);
        Ok(())
    }

    #[test]
    fn neighbourhood_kernels_are_never_fused() -> Result<()> {
        let registry = KernelRegistry::with_standard_kernels();
        let mut graph = GraphIr::new();
        let input = graph.create_image(6, 6, PixelFormat::U8);
        let blurred = graph.create_virtual_image(None, None, None);
        let out = graph.create_image(6, 6, PixelFormat::U8);
        graph.add_node("vx.gaussian_3x3", vec![Some(input), Some(blurred)]);
        graph.add_node("vx.not", vec![Some(blurred), Some(out)]);

        let mut ir = Verifier::new(&registry).verify(&graph)?;
        assert!(!ElementwiseFusion.run(&mut ir)?.changed());
        Ok(())
    }
}

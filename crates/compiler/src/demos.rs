//! Small ready-made graphs used by the CLI and the parity suite.

use serde::{Deserialize, Serialize};
use vxforge_ir::{GraphIr, ObjectId, PixelFormat, ScalarValue};
use vxforge_kernels::VX_CONVERT_POLICY_SATURATE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum Demo {
    /// RGB to luma, then a binary threshold.
    Threshold,
    /// add, multiply_scalar and clamp, fused into one loop.
    Fusion,
    /// Blur, Sobel gradients, magnitude and threshold, plus an unused phase branch.
    Edges,
}

impl Demo {
    pub const ALL: [Demo; 3] = [Demo::Threshold, Demo::Fusion, Demo::Edges];

    pub fn name(&self) -> &'static str {
        match self {
            Demo::Threshold => "threshold",
            Demo::Fusion => "fusion",
            Demo::Edges => "edges",
        }
    }

    pub fn build(&self, width: u32, height: u32) -> DemoGraph {
        match self {
            Demo::Threshold => threshold(width, height),
            Demo::Fusion => fusion(width, height),
            Demo::Edges => edges(width, height),
        }
    }
}

/// A demo graph plus the objects a caller feeds and reads back.
#[derive(Debug, Clone)]
pub struct DemoGraph {
    pub name: &'static str,
    pub ir: GraphIr,
    pub inputs: Vec<ObjectId>,
    pub outputs: Vec<ObjectId>,
}

pub const THRESHOLD_LEVEL: u8 = 128;
pub const FUSION_FACTOR: f32 = 0.75;
pub const FUSION_RANGE: (u8, u8) = (16, 235);
pub const EDGE_LEVEL: u8 = 64;

fn threshold(width: u32, height: u32) -> DemoGraph {
    let mut ir = GraphIr::new();
    let rgb = ir.create_image(width, height, PixelFormat::Rgb);
    let luma = ir.create_virtual_image(None, None, Some(PixelFormat::U8));
    let level = ir.create_constant(ScalarValue::U8(THRESHOLD_LEVEL));
    let mask = ir.create_image(width, height, PixelFormat::U8);
    ir.add_node("vx.color_convert", vec![Some(rgb), Some(luma)]);
    ir.add_node("vx.threshold", vec![Some(luma), Some(level), Some(mask)]);
    DemoGraph {
        name: "threshold",
        ir,
        inputs: vec![rgb],
        outputs: vec![mask],
    }
}

fn fusion(width: u32, height: u32) -> DemoGraph {
    let mut ir = GraphIr::new();
    let a = ir.create_image(width, height, PixelFormat::U8);
    let b = ir.create_image(width, height, PixelFormat::U8);
    let saturate = ir.create_constant(ScalarValue::Enum(VX_CONVERT_POLICY_SATURATE));
    let sum = ir.create_virtual_image(None, None, None);
    let factor = ir.create_constant(ScalarValue::F32(FUSION_FACTOR));
    let scaled = ir.create_virtual_image(None, None, None);
    let low = ir.create_constant(ScalarValue::U8(FUSION_RANGE.0));
    let high = ir.create_constant(ScalarValue::U8(FUSION_RANGE.1));
    let out = ir.create_image(width, height, PixelFormat::U8);
    ir.add_node("vx.add", vec![Some(a), Some(b), Some(saturate), Some(sum)]);
    ir.add_node("vxf.multiply_scalar", vec![Some(sum), Some(factor), Some(scaled)]);
    ir.add_node("vxf.clamp", vec![Some(scaled), Some(low), Some(high), Some(out)]);
    DemoGraph {
        name: "fusion",
        ir,
        inputs: vec![a, b],
        outputs: vec![out],
    }
}

fn edges(width: u32, height: u32) -> DemoGraph {
    let mut ir = GraphIr::new();
    let input = ir.create_image(width, height, PixelFormat::U8);
    let blurred = ir.create_virtual_image(None, None, None);
    let grad_x = ir.create_virtual_image(None, None, None);
    let grad_y = ir.create_virtual_image(None, None, None);
    let magnitude = ir.create_virtual_image(None, None, None);
    let narrowed = ir.create_virtual_image(None, None, Some(PixelFormat::U8));
    let saturate = ir.create_constant(ScalarValue::Enum(VX_CONVERT_POLICY_SATURATE));
    let shift = ir.create_constant(ScalarValue::S32(0));
    let level = ir.create_constant(ScalarValue::U8(EDGE_LEVEL));
    let edges = ir.create_image(width, height, PixelFormat::U8);
    let orientation = ir.create_virtual_image(None, None, None);

    ir.add_node("vx.gaussian_3x3", vec![Some(input), Some(blurred)]);
    ir.add_node("vx.sobel_3x3", vec![Some(blurred), Some(grad_x), Some(grad_y)]);
    ir.add_node("vx.magnitude", vec![Some(grad_x), Some(grad_y), Some(magnitude)]);
    ir.add_node(
        "vx.convert_depth",
        vec![Some(magnitude), Some(narrowed), Some(saturate), Some(shift)],
    );
    ir.add_node("vx.threshold", vec![Some(narrowed), Some(level), Some(edges)]);
    // Nothing reads the orientation; dead-node elimination drops it.
    ir.add_node("vx.phase", vec![Some(grad_x), Some(grad_y), Some(orientation)]);
    DemoGraph {
        name: "edges",
        ir,
        inputs: vec![input],
        outputs: vec![edges],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vxforge_kernels::KernelRegistry;
    use vxforge_optimizer::{GraphOptimizer, OptimizerConfig, Verifier};

    #[test]
    fn every_demo_verifies() {
        let registry = KernelRegistry::global();
        for demo in Demo::ALL {
            let graph = demo.build(32, 24);
            let verified = Verifier::new(&registry)
                .verify(&graph.ir)
                .unwrap_or_else(|err| panic!("{} failed to verify: {err}", demo.name()));
            assert_eq!(verified.entries(), [graph.inputs.clone(), graph.outputs.clone()].concat());
        }
    }

    #[test]
    fn fusion_demo_collapses_to_one_node() {
        let registry = KernelRegistry::global();
        let graph = Demo::Fusion.build(16, 16);
        let verified = Verifier::new(&registry).verify(&graph.ir).expect("verifies");
        let (optimized, report) = GraphOptimizer::new(OptimizerConfig::default()).optimize(&verified);
        assert_eq!(optimized.node_count(), 1);
        assert_eq!(report.fusions.len(), 2);
    }

    #[test]
    fn edges_demo_drops_the_phase_branch() {
        let registry = KernelRegistry::global();
        let graph = Demo::Edges.build(16, 16);
        let verified = Verifier::new(&registry).verify(&graph.ir).expect("verifies");
        let (optimized, report) = GraphOptimizer::new(OptimizerConfig::default()).optimize(&verified);
        assert_eq!(report.removed_nodes.len(), 1);
        assert!(optimized
            .nodes
            .iter()
            .all(|node| !node.kernels().contains(&"vx.phase")));
    }
}

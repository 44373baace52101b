//! Pass driver: runs the enabled passes over verified IR until nothing changes.

use crate::dce::DeadNodeElimination;
use crate::fusion::ElementwiseFusion;
use crate::report::OptimizationReport;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use vxforge_ir::{PassPipeline, VerifiedIr};

/// Which passes run, and how many sweeps the fixed-point loop may take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub eliminate_dead_nodes: bool,
    pub fuse_elementwise: bool,
    pub max_iterations: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            eliminate_dead_nodes: true,
            fuse_elementwise: true,
            max_iterations: 8,
        }
    }
}

impl OptimizerConfig {
    /// No passes; code is generated from the verified IR as is.
    pub fn disabled() -> Self {
        Self {
            eliminate_dead_nodes: false,
            fuse_elementwise: false,
            ..Self::default()
        }
    }
}

pub struct GraphOptimizer {
    config: OptimizerConfig,
    pipeline: PassPipeline,
}

impl GraphOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        let mut pipeline = PassPipeline::new();
        if config.eliminate_dead_nodes {
            pipeline.add_pass(DeadNodeElimination);
        }
        if config.fuse_elementwise {
            pipeline.add_pass(ElementwiseFusion);
        }
        Self { config, pipeline }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Never fails: a pass that errors is rolled back and reported, and the
    /// last consistent IR is returned.
    pub fn optimize(&self, ir: &VerifiedIr) -> (VerifiedIr, OptimizationReport) {
        let mut current = ir.clone();
        let mut report = OptimizationReport::new(ir.node_count());

        while report.iterations < self.config.max_iterations && !self.pipeline.is_empty() {
            report.iterations += 1;
            let mut changed = false;
            for pass in self.pipeline.passes() {
                let mut candidate = current.clone();
                match pass.run(&mut candidate) {
                    Ok(outcome) => {
                        if outcome.changed() {
                            changed = true;
                            report.absorb(&outcome);
                            current = candidate;
                        }
                    }
                    Err(err) => {
                        warn!(pass = pass.name(), error = %err, "optimization pass failed; keeping previous IR");
                        report.failed_passes.push(pass.name().to_string());
                    }
                }
            }
            if !changed {
                break;
            }
        }

        report.nodes_after = current.node_count();
        info!(
            before = report.nodes_before,
            after = report.nodes_after,
            fused = report.fusions.len(),
            removed = report.removed_nodes.len(),
            "graph optimized"
        );
        (current, report)
    }
}

impl Default for GraphOptimizer {
    fn default() -> Self {
        Self::new(OptimizerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verifier::Verifier;
    use anyhow::Result;
    use vxforge_ir::{GraphIr, Pass, PassOutcome, PixelFormat};
    use vxforge_kernels::KernelRegistry;

    fn chain_with_dead_branch() -> GraphIr {
        let mut graph = GraphIr::new();
        let input = graph.create_image(8, 8, PixelFormat::U8);
        let mid = graph.create_virtual_image(None, None, None);
        let out = graph.create_image(8, 8, PixelFormat::U8);
        let unused = graph.create_virtual_image(None, None, None);
        graph.add_node("vx.not", vec![Some(input), Some(mid)]);
        graph.add_node("vx.not", vec![Some(mid), Some(out)]);
        graph.add_node("vx.erode_3x3", vec![Some(input), Some(unused)]);
        graph
    }

    #[test]
    fn reaches_fixed_point() -> Result<()> {
        let registry = KernelRegistry::with_standard_kernels();
        let ir = Verifier::new(&registry).verify(&chain_with_dead_branch())?;
        let (optimized, report) = GraphOptimizer::default().optimize(&ir);
        assert_eq!(report.nodes_before, 3);
        assert_eq!(report.nodes_after, 1);
        assert_eq!(report.fusions.len(), 1);
        assert!(optimized.nodes[0].is_fused());
        assert!(report.iterations >= 2);
        Ok(())
    }

    #[test]
    fn disabled_config_leaves_ir_untouched() -> Result<()> {
        let registry = KernelRegistry::with_standard_kernels();
        let ir = Verifier::new(&registry).verify(&chain_with_dead_branch())?;
        let (optimized, report) = GraphOptimizer::new(OptimizerConfig::disabled()).optimize(&ir);
        assert_eq!(optimized, ir);
        assert!(!report.changed());
        Ok(())
    }

    struct Broken;

    impl Pass for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn run(&self, ir: &mut VerifiedIr) -> Result<PassOutcome> {
            ir.nodes.clear();
            anyhow::bail!("half-applied rewrite")
        }
    }

    #[test]
    fn failing_pass_is_rolled_back() -> Result<()> {
        let registry = KernelRegistry::with_standard_kernels();
        let ir = Verifier::new(&registry).verify(&chain_with_dead_branch())?;
        let mut optimizer = GraphOptimizer::new(OptimizerConfig::disabled());
        optimizer.pipeline.add_pass(Broken);
        let (optimized, report) = optimizer.optimize(&ir);
        assert_eq!(optimized.nodes.len(), 3);
        assert_eq!(report.failed_passes, vec!["broken".to_string()]);
        Ok(())
    }

    #[test]
    fn config_fields_default_when_missing() -> Result<()> {
        let config: OptimizerConfig = serde_json::from_str(r#"{"fuse_elementwise": false}"#)?;
        assert!(config.eliminate_dead_nodes);
        assert!(!config.fuse_elementwise);
        Ok(())
    }
}

//! Compiler pipeline assembly: verify, optimize, generate and build.

use crate::config::CompilerConfig;
use rayon::prelude::*;
use std::sync::Arc;
use tracing::{debug, info};
use vxforge_backend_cpu::{CompiledGraph, CpuBackend, GeneratedUnit};
use vxforge_ir::{GraphIr, VerifiedIr, VxResult};
use vxforge_kernels::KernelRegistry;
use vxforge_optimizer::{GraphOptimizer, OptimizationReport, Verifier};

#[derive(Debug)]
pub struct CompileArtifacts {
    pub verified: VerifiedIr,
    pub optimized: VerifiedIr,
    pub report: OptimizationReport,
    pub unit: GeneratedUnit,
    pub compiled: CompiledGraph,
}

pub struct CompilerPipeline {
    config: CompilerConfig,
    registry: Arc<KernelRegistry>,
    optimizer: GraphOptimizer,
    backend: CpuBackend,
}

impl CompilerPipeline {
    /// Pipeline over the process-wide standard kernel registry.
    pub fn new(config: CompilerConfig) -> VxResult<Self> {
        Self::with_registry(config, KernelRegistry::global())
    }

    pub fn with_registry(config: CompilerConfig, registry: Arc<KernelRegistry>) -> VxResult<Self> {
        let backend = CpuBackend::with_options(Arc::clone(&registry), config.backend_options())?;
        Ok(Self::with_backend(config, backend))
    }

    /// Use a prepared backend, e.g. one with a custom toolchain.
    pub fn with_backend(config: CompilerConfig, backend: CpuBackend) -> Self {
        Self {
            optimizer: GraphOptimizer::new(config.optimizer.clone()),
            registry: Arc::clone(backend.registry()),
            backend,
            config,
        }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<KernelRegistry> {
        &self.registry
    }

    pub fn backend(&self) -> &CpuBackend {
        &self.backend
    }

    pub fn verify(&self, graph: &GraphIr) -> VxResult<VerifiedIr> {
        Verifier::new(&self.registry).verify(graph)
    }

    pub fn optimize(&self, verified: &VerifiedIr) -> (VerifiedIr, OptimizationReport) {
        self.optimizer.optimize(verified)
    }

    pub fn generate(&self, optimized: &VerifiedIr) -> VxResult<GeneratedUnit> {
        self.backend.generate(optimized)
    }

    pub fn build(&self, optimized: &VerifiedIr, unit: &GeneratedUnit) -> VxResult<CompiledGraph> {
        self.backend.build_unit(optimized, unit)
    }

    pub fn compile(&self, graph: &GraphIr) -> VxResult<CompileArtifacts> {
        let verified = self.verify(graph)?;
        let (optimized, report) = self.optimize(&verified);
        debug!(
            nodes_before = report.nodes_before,
            nodes_after = report.nodes_after,
            "optimized graph"
        );
        let unit = self.generate(&optimized)?;
        let compiled = self.build(&optimized, &unit)?;
        info!(fingerprint = %compiled.fingerprint(), nodes = optimized.node_count(), "compiled graph");
        Ok(CompileArtifacts {
            verified,
            optimized,
            report,
            unit,
            compiled,
        })
    }

    /// Compile independent graphs in parallel; identical graphs share one build.
    pub fn compile_all(&self, graphs: &[GraphIr]) -> Vec<VxResult<CompileArtifacts>> {
        graphs.par_iter().map(|graph| self.compile(graph)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vxforge_ir::{PixelFormat, VxError};
    use vxforge_optimizer::OptimizerConfig;

    fn pipeline(optimizer: OptimizerConfig) -> (tempfile::TempDir, CompilerPipeline) {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = CompilerConfig::default()
            .with_optimizer(optimizer)
            .with_cache_dir(dir.path());
        let pipeline = CompilerPipeline::new(config).expect("pipeline");
        (dir, pipeline)
    }

    fn chain() -> GraphIr {
        let mut graph = GraphIr::new();
        let input = graph.create_image(16, 8, PixelFormat::U8);
        let inverted = graph.create_virtual_image(None, None, None);
        let output = graph.create_image(16, 8, PixelFormat::U8);
        graph.add_node("vx.not", vec![Some(input), Some(inverted)]);
        graph.add_node("vx.not", vec![Some(inverted), Some(output)]);
        graph
    }

    #[test]
    fn optimizer_config_reaches_the_passes() {
        let (_dir, fused) = pipeline(OptimizerConfig::default());
        let verified = fused.verify(&chain()).expect("verifies");
        let (optimized, report) = fused.optimize(&verified);
        assert_eq!(optimized.node_count(), 1);
        assert_eq!(report.nodes_before, 2);

        let (_dir, plain) = pipeline(OptimizerConfig::disabled());
        let (unchanged, report) = plain.optimize(&verified);
        assert_eq!(unchanged.node_count(), 2);
        assert!(!report.changed());
    }

    #[test]
    fn verification_errors_stop_before_codegen() {
        let (_dir, pipeline) = pipeline(OptimizerConfig::default());
        let mut graph = GraphIr::new();
        let input = graph.create_image(4, 4, PixelFormat::U8);
        graph.add_node("vx.not", vec![Some(input), None]);
        let err = pipeline.compile(&graph).expect_err("unbound output");
        assert!(matches!(err, VxError::Parameter { slot: 1, .. }));
    }

    #[test]
    fn generated_source_is_stable() {
        let (_dir, pipeline) = pipeline(OptimizerConfig::default());
        let verified = pipeline.verify(&chain()).expect("verifies");
        let (optimized, _) = pipeline.optimize(&verified);
        let first = pipeline.generate(&optimized).expect("generates");
        let second = pipeline.generate(&optimized).expect("generates");
        assert_eq!(first.source, second.source);
        assert_eq!(first.fingerprint, second.fingerprint);
    }
}

//! Parity evaluation: optimized versus unoptimized builds of the same graph.
//!
//! Each case compiles a demo graph twice, once through the configured
//! optimizer and once with every pass disabled, runs both on identical
//! seeded inputs, and records the largest per-output difference together
//! with per-call latency in a reproducible JSON report.

use crate::config::CompilerConfig;
use crate::demos::{Demo, DemoGraph};
use crate::pipeline::{CompileArtifacts, CompilerPipeline};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::info;
use vxforge_backend_cpu::{Bindings, ImageBuffer};
use vxforge_ir::{ObjectId, PixelFormat};
use vxforge_optimizer::OptimizerConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParityCase {
    pub demo: Demo,
    pub width: u32,
    pub height: u32,
}

impl ParityCase {
    pub fn new(demo: Demo, width: u32, height: u32) -> Self {
        Self { demo, width, height }
    }

    pub fn name(&self) -> String {
        format!("{}_{}x{}", self.demo.name(), self.width, self.height)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParityResult {
    pub case: String,
    pub nodes_reference: usize,
    pub nodes_optimized: usize,
    pub fusions: usize,
    pub removed_nodes: usize,
    /// Largest absolute difference per output object.
    pub output_max_abs_error: BTreeMap<String, f64>,
    pub max_abs_error: f64,
    pub reference_latency_ms: f64,
    pub optimized_latency_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub target: String,
    pub generated_at_unix_ms: u128,
    pub seed: u64,
    pub cases: Vec<ParityResult>,
}

impl EvaluationReport {
    pub fn as_map(&self) -> BTreeMap<&str, &ParityResult> {
        self.cases.iter().map(|case| (case.case.as_str(), case)).collect()
    }

    pub fn diff<'a>(&'a self, baseline: &'a EvaluationReport) -> BTreeMap<&'a str, EvaluationDelta<'a>> {
        let mut deltas = BTreeMap::new();
        let previous = baseline.as_map();

        for (case, result) in self.as_map() {
            if let Some(&baseline_result) = previous.get(case) {
                deltas.insert(
                    case,
                    EvaluationDelta {
                        current: result,
                        baseline: baseline_result,
                        latency_ms_delta: result.optimized_latency_ms - baseline_result.optimized_latency_ms,
                        max_abs_error_delta: result.max_abs_error - baseline_result.max_abs_error,
                    },
                );
            }
        }

        deltas
    }

    /// True when every case produced identical outputs.
    pub fn is_exact(&self) -> bool {
        self.cases.iter().all(|case| case.max_abs_error == 0.0)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).with_context(|| format!("reading report {}", path.display()))?;
        Ok(serde_json::from_str(&json)?)
    }
}

#[derive(Debug)]
pub struct EvaluationDelta<'a> {
    pub current: &'a ParityResult,
    pub baseline: &'a ParityResult,
    pub latency_ms_delta: f64,
    pub max_abs_error_delta: f64,
}

pub struct ParitySuite {
    cases: Vec<ParityCase>,
    iterations: usize,
    seed: u64,
}

impl ParitySuite {
    pub fn new(cases: Vec<ParityCase>) -> Self {
        Self {
            cases,
            iterations: 5,
            seed: 0x5eed,
        }
    }

    /// Every demo at a small and a camera-like resolution.
    pub fn demo_smoke() -> Self {
        let cases = Demo::ALL
            .iter()
            .flat_map(|&demo| [ParityCase::new(demo, 64, 48), ParityCase::new(demo, 640, 480)])
            .collect();
        Self::new(cases)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations.max(1);
        self
    }

    pub fn cases(&self) -> &[ParityCase] {
        &self.cases
    }

    pub fn run(&self, config: &CompilerConfig) -> Result<EvaluationReport> {
        let optimized = CompilerPipeline::new(config.clone())?;
        let reference = CompilerPipeline::new(config.clone().with_optimizer(OptimizerConfig::disabled()))?;
        let mut rng = fastrand::Rng::with_seed(self.seed);
        let mut results = Vec::with_capacity(self.cases.len());

        for case in &self.cases {
            let graph = case.demo.build(case.width, case.height);
            let fast = optimized
                .compile(&graph.ir)
                .with_context(|| format!("compiling {} with optimizations", case.name()))?;
            let plain = reference
                .compile(&graph.ir)
                .with_context(|| format!("compiling {} without optimizations", case.name()))?;

            let mut fast_bindings = fast.compiled.allocate_bindings()?;
            seed_inputs(&graph, &mut fast_bindings, &mut rng)?;
            let mut plain_bindings = plain.compiled.allocate_bindings()?;
            for &input in &graph.inputs {
                if let Some(object) = fast_bindings.get(input) {
                    plain_bindings.insert(input, object.clone());
                }
            }

            let optimized_latency = run_timed(&fast, &mut fast_bindings, self.iterations)?;
            let reference_latency = run_timed(&plain, &mut plain_bindings, self.iterations)?;

            let mut output_max_abs_error = BTreeMap::new();
            for &output in &graph.outputs {
                let error = max_abs_error(image(&fast_bindings, output)?, image(&plain_bindings, output)?)?;
                output_max_abs_error.insert(output.to_string(), error);
            }
            let max_abs_error = output_max_abs_error.values().copied().fold(0.0_f64, f64::max);

            info!(
                case = %case.name(),
                nodes = fast.optimized.node_count(),
                max_abs_error,
                optimized_ms = optimized_latency,
                reference_ms = reference_latency,
                "parity case finished"
            );

            results.push(ParityResult {
                case: case.name(),
                nodes_reference: plain.optimized.node_count(),
                nodes_optimized: fast.optimized.node_count(),
                fusions: fast.report.fusions.len(),
                removed_nodes: fast.report.removed_nodes.len(),
                output_max_abs_error,
                max_abs_error,
                reference_latency_ms: reference_latency,
                optimized_latency_ms: optimized_latency,
            });
        }

        let generated_at_unix_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|_| Duration::from_secs(0))
            .as_millis();

        Ok(EvaluationReport {
            target: "cpu-c".to_string(),
            generated_at_unix_ms,
            seed: self.seed,
            cases: results,
        })
    }
}

/// Fill every demo input with seeded noise.
pub fn seed_inputs(graph: &DemoGraph, bindings: &mut Bindings, rng: &mut fastrand::Rng) -> Result<()> {
    for &input in &graph.inputs {
        let image = bindings
            .image_mut(input)
            .ok_or_else(|| anyhow!("{input} is not bound to an image"))?;
        randomize(image, rng)?;
    }
    Ok(())
}

fn randomize(image: &mut ImageBuffer, rng: &mut fastrand::Rng) -> Result<()> {
    if image.format() == PixelFormat::F32 {
        for value in image.as_mut_slice::<f32>()? {
            *value = rng.f32() * 255.0;
        }
    } else {
        rng.fill(image.bytes_mut());
    }
    Ok(())
}

fn image(bindings: &Bindings, id: ObjectId) -> Result<&ImageBuffer> {
    bindings
        .image(id)
        .ok_or_else(|| anyhow!("output {id} is not bound to an image"))
}

fn max_abs_error(lhs: &ImageBuffer, rhs: &ImageBuffer) -> Result<f64> {
    let (lhs, rhs) = (lhs.values_f64()?, rhs.values_f64()?);
    if lhs.len() != rhs.len() {
        return Err(anyhow!("outputs differ in size: {} vs {}", lhs.len(), rhs.len()));
    }
    Ok(lhs
        .iter()
        .zip(&rhs)
        .fold(0.0_f64, |acc, (a, b)| acc.max((a - b).abs())))
}

/// Mean milliseconds per call.
fn run_timed(artifacts: &CompileArtifacts, bindings: &mut Bindings, iterations: usize) -> Result<f64> {
    let (elapsed, ()) = timed(|| {
        for _ in 0..iterations {
            artifacts.compiled.process(bindings)?;
        }
        Ok(())
    })?;
    Ok(elapsed.as_secs_f64() * 1000.0 / iterations as f64)
}

pub fn timed<F, T>(f: F) -> Result<(Duration, T)>
where
    F: FnOnce() -> Result<T>,
{
    let start = Instant::now();
    let value = f()?;
    Ok((start.elapsed(), value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(case: &str, latency: f64, error: f64) -> ParityResult {
        ParityResult {
            case: case.to_string(),
            nodes_reference: 3,
            nodes_optimized: 1,
            fusions: 2,
            removed_nodes: 0,
            output_max_abs_error: BTreeMap::new(),
            max_abs_error: error,
            reference_latency_ms: latency * 2.0,
            optimized_latency_ms: latency,
        }
    }

    fn report(cases: Vec<ParityResult>) -> EvaluationReport {
        EvaluationReport {
            target: "cpu-c".into(),
            generated_at_unix_ms: 0,
            seed: 1,
            cases,
        }
    }

    #[test]
    fn diff_pairs_matching_cases() {
        let current = report(vec![result("fusion_64x48", 1.5, 0.0), result("edges_64x48", 2.0, 0.0)]);
        let baseline = report(vec![result("fusion_64x48", 2.0, 1.0)]);
        let deltas = current.diff(&baseline);
        assert_eq!(deltas.len(), 1);
        let delta = &deltas["fusion_64x48"];
        approx::assert_relative_eq!(delta.latency_ms_delta, -0.5);
        approx::assert_relative_eq!(delta.max_abs_error_delta, -1.0);
    }

    #[test]
    fn reports_round_trip_through_json() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("parity.json");
        let original = report(vec![result("threshold_64x48", 0.25, 0.0)]);
        original.save(&path)?;
        let loaded = EvaluationReport::load(&path)?;
        assert_eq!(loaded.cases, original.cases);
        assert!(loaded.is_exact());
        Ok(())
    }

    #[test]
    fn smoke_suite_covers_every_demo() {
        let suite = ParitySuite::demo_smoke();
        for demo in Demo::ALL {
            assert!(suite.cases().iter().any(|case| case.demo == demo));
        }
    }

    #[test]
    fn seeded_inputs_are_reproducible() -> Result<()> {
        let graph = Demo::Fusion.build(8, 4);
        let mut first = Bindings::new();
        let mut second = Bindings::new();
        for &input in &graph.inputs {
            first.bind_image(input, ImageBuffer::new(8, 4, PixelFormat::U8));
            second.bind_image(input, ImageBuffer::new(8, 4, PixelFormat::U8));
        }
        seed_inputs(&graph, &mut first, &mut fastrand::Rng::with_seed(7))?;
        seed_inputs(&graph, &mut second, &mut fastrand::Rng::with_seed(7))?;
        assert_eq!(first, second);
        Ok(())
    }
}

//! Compile and execution benchmarks over the demo graphs.
//!
//! Every selected demo is compiled twice per resolution (the second compile
//! measures an in-process cache hit), then run on seeded input. Per-call
//! timings are reported as min and mean alongside throughput.

use anyhow::{anyhow, Result};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;
use vxforge_compiler::{seed_inputs, timed, CompilerConfig, CompilerPipeline, Demo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
struct Resolution {
    width: u32,
    height: u32,
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (width, height) = value
            .split_once('x')
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got `{value}`"))?;
        let parse = |part: &str| {
            part.trim()
                .parse::<u32>()
                .ok()
                .filter(|&n| n > 0)
                .ok_or_else(|| format!("invalid dimension `{part}` in `{value}`"))
        };
        Ok(Self {
            width: parse(width)?,
            height: parse(height)?,
        })
    }
}

#[derive(Parser, Debug)]
#[command(name = "vxforge-bench", about = "Benchmark compiled VXForge demo graphs")]
struct BenchArgs {
    /// JSON compiler configuration; environment overrides apply on top.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Benchmark one demo instead of all of them.
    #[arg(long, value_enum)]
    demo: Option<Demo>,

    #[arg(long = "size", default_values_t = [
        Resolution { width: 64, height: 48 },
        Resolution { width: 640, height: 480 },
        Resolution { width: 1920, height: 1080 },
    ])]
    sizes: Vec<Resolution>,

    #[arg(long, default_value_t = 20)]
    iterations: usize,

    /// Write the measurements as JSON.
    #[arg(long)]
    output: Option<PathBuf>,
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Serialize)]
struct BenchRecord {
    demo: &'static str,
    resolution: Resolution,
    nodes: usize,
    fusions: usize,
    compile_ms: f64,
    recompile_ms: f64,
    min_call_ms: f64,
    mean_call_ms: f64,
    megapixels_per_s: f64,
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

fn bench(pipeline: &CompilerPipeline, demo: Demo, resolution: Resolution, iterations: usize) -> Result<BenchRecord> {
    let graph = demo.build(resolution.width, resolution.height);
    let (compile, artifacts) = timed(|| Ok(pipeline.compile(&graph.ir)?))?;
    let (recompile, _) = timed(|| Ok(pipeline.compile(&graph.ir)?))?;

    let mut bindings = artifacts.compiled.allocate_bindings()?;
    seed_inputs(&graph, &mut bindings, &mut fastrand::Rng::with_seed(0x5eed))?;
    artifacts.compiled.process(&mut bindings)?;

    let mut calls = Vec::with_capacity(iterations);
    for _ in 0..iterations {
        let (elapsed, ()) = timed(|| Ok(artifacts.compiled.process(&mut bindings)?))?;
        calls.push(elapsed);
    }
    let min = calls.iter().min().copied().unwrap_or_default();
    let mean = calls.iter().sum::<Duration>() / iterations as u32;
    let pixels = f64::from(resolution.width) * f64::from(resolution.height);

    Ok(BenchRecord {
        demo: demo.name(),
        resolution,
        nodes: artifacts.optimized.node_count(),
        fusions: artifacts.report.fusions.len(),
        compile_ms: millis(compile),
        recompile_ms: millis(recompile),
        min_call_ms: millis(min),
        mean_call_ms: millis(mean),
        megapixels_per_s: pixels / mean.as_secs_f64().max(f64::EPSILON) / 1.0e6,
    })
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let args = BenchArgs::parse();
    let config = match &args.config {
        Some(path) => CompilerConfig::load_from_file(path)?,
        None => CompilerConfig::default(),
    }
    .with_env_overrides();
    let pipeline = CompilerPipeline::new(config)?;
    let iterations = args.iterations.max(1);
    let demos = match args.demo {
        Some(demo) => vec![demo],
        None => Demo::ALL.to_vec(),
    };
    if args.sizes.is_empty() {
        return Err(anyhow!("no resolutions to benchmark"));
    }

    let mut records = Vec::new();
    for &demo in &demos {
        for &resolution in &args.sizes {
            let record = bench(&pipeline, demo, resolution, iterations)?;
            info!(demo = record.demo, %resolution, mean_ms = record.mean_call_ms, "benchmark finished");
            println!(
                "{:<10} {:>10} nodes={} fusions={} compile_ms={:.1} recompile_ms={:.3} call_ms={:.3} (min {:.3}) {:.1} MP/s",
                record.demo,
                record.resolution,
                record.nodes,
                record.fusions,
                record.compile_ms,
                record.recompile_ms,
                record.mean_call_ms,
                record.min_call_ms,
                record.megapixels_per_s
            );
            records.push(record);
        }
    }

    if let Some(path) = args.output {
        std::fs::write(path, serde_json::to_string_pretty(&records)?)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolutions_parse_from_width_by_height() {
        assert_eq!(
            "640x480".parse::<Resolution>(),
            Ok(Resolution {
                width: 640,
                height: 480
            })
        );
        assert!("640".parse::<Resolution>().is_err());
        assert!("0x480".parse::<Resolution>().is_err());
        assert!("640xabc".parse::<Resolution>().is_err());
    }

    #[test]
    fn default_sizes_cover_three_resolutions() {
        let args = BenchArgs::parse_from(["vxforge-bench", "--demo", "fusion"]);
        assert_eq!(args.sizes.len(), 3);
        assert_eq!(args.demo, Some(Demo::Fusion));

        let args = BenchArgs::parse_from(["vxforge-bench", "--size", "32x16", "--size", "8x8"]);
        assert_eq!(
            args.sizes,
            vec![
                Resolution { width: 32, height: 16 },
                Resolution { width: 8, height: 8 }
            ]
        );
    }
}

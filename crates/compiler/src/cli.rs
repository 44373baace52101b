//! CLI wiring for the VXForge compiler.

use crate::config::CompilerConfig;
use crate::demos::Demo;
use crate::eval::{seed_inputs, timed, EvaluationReport, ParityCase, ParitySuite};
use crate::pipeline::CompilerPipeline;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use tracing::info;
use vxforge_optimizer::OptimizerConfig;

#[derive(Parser, Debug)]
#[command(name = "vxforge", about = "VXForge vision graph compiler toolkit")]
pub struct Cli {
    /// JSON compiler configuration; environment overrides apply on top.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    #[arg(long)]
    pub opt_level: Option<u8>,

    /// Disable dead-node elimination and fusion.
    #[arg(long, default_value_t = false)]
    pub no_optimize: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the generated C translation unit for a demo graph.
    EmitC {
        #[arg(long, value_enum, default_value = "fusion")]
        demo: Demo,
        #[arg(long, default_value_t = 640)]
        width: u32,
        #[arg(long, default_value_t = 480)]
        height: u32,
        /// Also print the optimization report.
        #[arg(long, default_value_t = false)]
        report: bool,
    },
    /// Compile and time a demo graph on seeded input.
    RunDemo {
        #[arg(long, value_enum, default_value = "threshold")]
        demo: Demo,
        #[arg(long, default_value_t = 640)]
        width: u32,
        #[arg(long, default_value_t = 480)]
        height: u32,
        #[arg(long, default_value_t = 10)]
        iterations: usize,
    },
    /// Compare optimized and unoptimized builds of every demo and emit a JSON report.
    Parity {
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        baseline: Option<PathBuf>,
        #[arg(long, default_value_t = 0x5eed)]
        seed: u64,
        #[arg(long, value_enum)]
        demo: Option<Demo>,
    },
}

impl Cli {
    fn compiler_config(&self) -> Result<CompilerConfig> {
        let mut config = match &self.config {
            Some(path) => CompilerConfig::load_from_file(path)?,
            None => CompilerConfig::default(),
        }
        .with_env_overrides();
        if let Some(dir) = &self.cache_dir {
            config.cache_dir = Some(dir.clone());
        }
        if let Some(level) = self.opt_level {
            config.toolchain.opt_level = level.min(3);
        }
        if self.no_optimize {
            config.optimizer = OptimizerConfig::disabled();
        }
        Ok(config)
    }
}

pub fn run_cli(cli: Cli) -> Result<()> {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let config = cli.compiler_config()?;

    match cli.command {
        Command::EmitC {
            demo,
            width,
            height,
            report,
        } => {
            let pipeline = CompilerPipeline::new(config)?;
            let graph = demo.build(width, height);
            let verified = pipeline.verify(&graph.ir)?;
            let (optimized, optimization) = pipeline.optimize(&verified);
            let unit = pipeline.generate(&optimized)?;
            println!("{}", unit.source);
            if report {
                eprintln!("{}", serde_json::to_string_pretty(&optimization)?);
            }
        }
        Command::RunDemo {
            demo,
            width,
            height,
            iterations,
        } => {
            let pipeline = CompilerPipeline::new(config)?;
            let graph = demo.build(width, height);
            let (compile_time, artifacts) = timed(|| Ok(pipeline.compile(&graph.ir)?))?;
            info!(
                demo = demo.name(),
                nodes = artifacts.optimized.node_count(),
                fusions = artifacts.report.fusions.len(),
                compile_ms = compile_time.as_secs_f64() * 1000.0,
                "demo compiled"
            );

            let mut bindings = artifacts.compiled.allocate_bindings()?;
            seed_inputs(&graph, &mut bindings, &mut fastrand::Rng::with_seed(0x5eed))?;
            let iterations = iterations.max(1);
            let (elapsed, ()) = timed(|| {
                for _ in 0..iterations {
                    artifacts.compiled.process(&mut bindings)?;
                }
                Ok(())
            })?;

            let per_call_ms = elapsed.as_secs_f64() * 1000.0 / iterations as f64;
            println!(
                "demo={} size={}x{} nodes={} fingerprint={} per_call_ms={:.3}",
                demo.name(),
                width,
                height,
                artifacts.optimized.node_count(),
                artifacts.compiled.fingerprint(),
                per_call_ms
            );
            for &output in &graph.outputs {
                if let Some(image) = bindings.image(output) {
                    let values = image.values_f64()?;
                    let set = values.iter().filter(|&&value| value != 0.0).count();
                    println!("- {output}: {} of {} elements non-zero", set, values.len());
                }
            }
        }
        Command::Parity {
            output,
            baseline,
            seed,
            demo,
        } => {
            let suite = match demo {
                Some(demo) => ParitySuite::new(vec![
                    ParityCase::new(demo, 64, 48),
                    ParityCase::new(demo, 640, 480),
                ]),
                None => ParitySuite::demo_smoke(),
            }
            .with_seed(seed);
            let report = suite.run(&config)?;

            println!(
                "target={}, cases={}, seed={}, generated_at={}",
                report.target,
                report.cases.len(),
                report.seed,
                report.generated_at_unix_ms
            );
            for case in &report.cases {
                println!(
                    "- {}: nodes={}->{} fusions={} max_abs_error={:.3e} latency_ms={:.3} (reference {:.3})",
                    case.case,
                    case.nodes_reference,
                    case.nodes_optimized,
                    case.fusions,
                    case.max_abs_error,
                    case.optimized_latency_ms,
                    case.reference_latency_ms
                );
            }

            if let Some(path) = baseline {
                if path.exists() {
                    let baseline_report = EvaluationReport::load(&path)?;
                    for (name, delta) in report.diff(&baseline_report) {
                        println!(
                            "Δ {}: latency_ms={:+.3} max_abs_error={:+.3e}",
                            name, delta.latency_ms_delta, delta.max_abs_error_delta
                        );
                    }
                } else {
                    info!(path = %path.display(), "baseline report not found; skipping diff");
                }
            }

            if let Some(path) = output {
                fs::write(path, serde_json::to_string_pretty(&report)?)?;
            }

            if !report.is_exact() {
                anyhow::bail!("optimized and reference builds disagree");
            }
        }
    }

    Ok(())
}

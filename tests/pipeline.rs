use anyhow::Result;
use ndarray::Array2;
use std::sync::Arc;
use tempfile::TempDir;
use vxforge::backend::ArrayBuffer;
use vxforge::compiler::Demo;
use vxforge::kernels::{luma, VX_CONVERT_POLICY_SATURATE};
use vxforge::{
    Bindings, CompilerConfig, CompilerPipeline, Graph, GraphIr, GraphState, ImageBuffer, ImageMeta, ItemType,
    OptimizerConfig, PixelFormat, ScalarType, ScalarValue, VxError,
};

fn pipeline(optimizer: OptimizerConfig) -> Result<(TempDir, Arc<CompilerPipeline>)> {
    let dir = tempfile::tempdir()?;
    let config = CompilerConfig::default()
        .with_optimizer(optimizer)
        .with_cache_dir(dir.path());
    Ok((dir, Arc::new(CompilerPipeline::new(config)?)))
}

fn noise(rows: usize, cols: usize, seed: u64) -> Array2<u8> {
    let mut rng = fastrand::Rng::with_seed(seed);
    Array2::from_shape_simple_fn((rows, cols), || rng.u8(..))
}

#[test]
fn luma_threshold_matches_reference() -> Result<()> {
    let (_dir, pipeline) = pipeline(OptimizerConfig::default())?;
    let (width, height) = (37, 21);
    let mut graph = Graph::new(pipeline);
    let rgb = graph.create_image(width, height, PixelFormat::Rgb);
    let gray = graph.create_virtual_image(None, None, Some(PixelFormat::U8));
    let level = graph.create_constant(ScalarValue::U8(100));
    let mask = graph.create_image(width, height, PixelFormat::U8);
    graph.add_node("vx.color_convert", vec![Some(rgb), Some(gray)]);
    graph.add_node("vx.threshold", vec![Some(gray), Some(level), Some(mask)]);

    let pixels = noise(height as usize, width as usize * 3, 11);
    let mut bindings = Bindings::new();
    bindings.bind_image(rgb, ImageBuffer::from_array2(PixelFormat::Rgb, pixels.view())?);
    bindings.bind_image(mask, ImageBuffer::new(width, height, PixelFormat::U8));
    graph.process(&mut bindings)?;
    assert_eq!(graph.state(), GraphState::Compiled);

    let produced = bindings.image(mask).expect("mask bound").to_array2::<u8>()?;
    for y in 0..height as usize {
        for x in 0..width as usize {
            let (r, g, b) = (pixels[[y, 3 * x]], pixels[[y, 3 * x + 1]], pixels[[y, 3 * x + 2]]);
            let expected = if luma(r, g, b) > 100 { 255 } else { 0 };
            assert_eq!(produced[[y, x]], expected, "pixel ({x}, {y})");
        }
    }
    Ok(())
}

fn fused_chain(graph: &mut Graph, width: u32, height: u32) -> [vxforge::ObjectId; 3] {
    let a = graph.create_image(width, height, PixelFormat::U8);
    let b = graph.create_image(width, height, PixelFormat::U8);
    let saturate = graph.create_constant(ScalarValue::Enum(VX_CONVERT_POLICY_SATURATE));
    let sum = graph.create_virtual_image(None, None, None);
    let factor = graph.create_constant(ScalarValue::F32(0.75));
    let scaled = graph.create_virtual_image(None, None, None);
    let low = graph.create_constant(ScalarValue::U8(16));
    let high = graph.create_constant(ScalarValue::U8(235));
    let out = graph.create_image(width, height, PixelFormat::U8);
    graph.add_node("vx.add", vec![Some(a), Some(b), Some(saturate), Some(sum)]);
    graph.add_node("vxf.multiply_scalar", vec![Some(sum), Some(factor), Some(scaled)]);
    graph.add_node("vxf.clamp", vec![Some(scaled), Some(low), Some(high), Some(out)]);
    [a, b, out]
}

#[test]
fn fused_chain_matches_reference_and_unfused_run() -> Result<()> {
    let (width, height) = (64, 9);
    let lhs = noise(height, width, 1);
    let rhs = noise(height, width, 2);

    let mut outputs = Vec::new();
    for optimizer in [OptimizerConfig::default(), OptimizerConfig::disabled()] {
        let (_dir, pipeline) = pipeline(optimizer)?;
        let mut graph = Graph::new(pipeline);
        let [a, b, out] = fused_chain(&mut graph, width as u32, height as u32);
        let mut bindings = graph.allocate_bindings()?;
        bindings.bind_image(a, ImageBuffer::from_array2(PixelFormat::U8, lhs.view())?);
        bindings.bind_image(b, ImageBuffer::from_array2(PixelFormat::U8, rhs.view())?);
        graph.process(&mut bindings)?;

        let source = graph.generated_source().expect("compiled");
        let loops = source.matches("for (size_t i = 0;").count();
        let nodes = graph.optimized().expect("optimized").node_count();
        outputs.push((nodes, loops, bindings.image(out).expect("out").to_array2::<u8>()?));
    }

    let (fused_nodes, _, fused) = &outputs[0];
    let (plain_nodes, _, plain) = &outputs[1];
    assert_eq!(*fused_nodes, 1);
    assert_eq!(*plain_nodes, 3);
    assert!(outputs[0].1 < outputs[1].1);
    assert_eq!(fused, plain);

    let expected = ndarray::Zip::from(&lhs).and(&rhs).map_collect(|&x, &y| {
        let sum = (x as u32 + y as u32).min(255);
        let scaled = ((sum as f64) * 0.75_f64) as i64;
        scaled.clamp(16, 235) as u8
    });
    assert_eq!(fused, &expected);
    Ok(())
}

#[test]
fn mismatched_rebinding_is_rejected_before_running() -> Result<()> {
    let (_dir, pipeline) = pipeline(OptimizerConfig::default())?;
    let mut graph = Graph::new(pipeline);
    let input = graph.create_image(16, 16, PixelFormat::U8);
    let output = graph.create_image(16, 16, PixelFormat::U8);
    graph.add_node("vx.not", vec![Some(input), Some(output)]);

    let mut bindings = graph.allocate_bindings()?;
    bindings.bind_image(input, ImageBuffer::new(8, 16, PixelFormat::U8));
    let err = graph.process(&mut bindings).expect_err("width mismatch");
    assert!(matches!(err, VxError::BindingMismatch { object, .. } if object == input));
    assert!(bindings.image(output).expect("output").bytes().iter().all(|&v| v == 0));

    let mut frame = ImageBuffer::new(16, 16, PixelFormat::U8);
    frame.fill(7u8)?;
    bindings.bind_image(input, frame);
    graph.process(&mut bindings)?;
    assert!(bindings.image(output).expect("output").bytes().iter().all(|&v| v == 248));

    bindings.remove(output);
    let err = graph.process(&mut bindings).expect_err("output unbound");
    assert!(matches!(err, VxError::BindingMismatch { object, .. } if object == output));
    Ok(())
}

#[test]
fn dead_branch_is_absent_from_source_and_outputs_agree() -> Result<()> {
    let demo = Demo::Edges.build(48, 32);
    let input = noise(32, 48, 5);
    let mut results = Vec::new();
    for optimizer in [OptimizerConfig::default(), OptimizerConfig::disabled()] {
        let (_dir, pipeline) = pipeline(optimizer)?;
        let mut graph = Graph::from_ir(demo.ir.clone(), pipeline);
        let mut bindings = graph.allocate_bindings()?;
        bindings.bind_image(demo.inputs[0], ImageBuffer::from_array2(PixelFormat::U8, input.view())?);
        graph.process(&mut bindings)?;
        let source = graph.generated_source().expect("compiled").to_string();
        results.push((source, bindings.image(demo.outputs[0]).expect("edges").clone()));
    }
    assert!(!results[0].0.contains("vx.phase"));
    assert!(results[1].0.contains("vx.phase"));
    assert_eq!(results[0].1, results[1].1);
    Ok(())
}

#[test]
fn cycles_fail_before_code_generation() -> Result<()> {
    let (_dir, pipeline) = pipeline(OptimizerConfig::default())?;
    let mut graph = Graph::new(pipeline);
    let first = graph.create_virtual_image(None, None, None);
    let second = graph.create_virtual_image(None, None, None);
    graph.add_node("vx.not", vec![Some(second), Some(first)]);
    graph.add_node("vx.not", vec![Some(first), Some(second)]);
    let err = graph.compile().expect_err("cyclic");
    assert!(matches!(err, VxError::CyclicGraph { ref nodes } if nodes.len() == 2));
    assert!(graph.generated_source().is_none());
    assert_eq!(graph.state(), GraphState::Unverified);
    Ok(())
}

#[test]
fn kind_mismatch_is_a_parameter_error() -> Result<()> {
    let (_dir, pipeline) = pipeline(OptimizerConfig::default())?;
    let mut graph = Graph::new(pipeline);
    let input = graph.create_image(8, 8, PixelFormat::U8);
    let array = graph.create_array(ItemType::U8, 8);
    let node = graph.add_node("vx.box_3x3", vec![Some(input), Some(array)]);
    let err = graph.verify().expect_err("array in image slot");
    assert!(matches!(err, VxError::Parameter { node: n, slot: 1, .. } if n == node));
    Ok(())
}

#[test]
fn repeated_verification_is_stable() -> Result<()> {
    let (_dir, pipeline) = pipeline(OptimizerConfig::default())?;
    let graph = Demo::Edges.build(20, 10);
    let first = pipeline.verify(&graph.ir)?;
    let second = pipeline.verify(&graph.ir)?;
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn delays_age_once_per_successful_call() -> Result<()> {
    let (_dir, pipeline) = pipeline(OptimizerConfig::default())?;
    let mut graph = Graph::new(pipeline);
    let input = graph.create_image(8, 4, PixelFormat::U8);
    let history = graph.create_delay(2, ImageMeta::new(8, 4, PixelFormat::U8))?;
    let current = graph.delay_slot(history, 0)?;
    graph.add_node("vx.not", vec![Some(input), Some(current)]);

    let mut bindings = graph.allocate_bindings()?;
    for (frame, expected_previous) in [(10u8, 245u8), (20, 235), (30, 225)] {
        bindings.image_mut(input).expect("input").fill(frame)?;
        graph.process(&mut bindings)?;
        let delay = bindings.delay(history).expect("delay bound");
        assert!(delay.slot(1).expect("slot 1").bytes().iter().all(|&v| v == expected_previous));
    }
    Ok(())
}

#[test]
fn failing_node_is_reported_and_delays_keep_their_age() -> Result<()> {
    let (_dir, pipeline) = pipeline(OptimizerConfig::default())?;
    let mut graph = Graph::new(pipeline);
    let input = graph.create_image(8, 8, PixelFormat::U8);
    let history = graph.create_delay(2, ImageMeta::new(8, 8, PixelFormat::U8))?;
    let current = graph.delay_slot(history, 0)?;
    let lut = graph.create_array(ItemType::U8, 256);
    let mapped = graph.create_image(8, 8, PixelFormat::U8);
    graph.add_node("vx.not", vec![Some(input), Some(current)]);
    let lookup = graph.add_node("vx.table_lookup", vec![Some(input), Some(lut), Some(mapped)]);

    let mut bindings = graph.allocate_bindings()?;
    let short_table: Vec<u8> = (0..100).collect();
    bindings.insert(
        lut,
        vxforge::HostObject::Array(ArrayBuffer::from_items(ItemType::U8, 256, &short_table)?),
    );
    bindings.image_mut(input).expect("input").fill(200u8)?;

    let err = graph.process(&mut bindings).expect_err("index past the table");
    match err {
        VxError::NodeFailure { nodes, .. } => assert!(nodes.contains(&lookup)),
        other => panic!("unexpected error: {other}"),
    }
    let delay = bindings.delay(history).expect("delay");
    assert!(delay.slot(0).expect("slot 0").bytes().iter().all(|&v| v == 55));
    assert!(delay.slot(1).expect("slot 1").bytes().iter().all(|&v| v == 0));
    assert_eq!(graph.state(), GraphState::Compiled);

    let full_table: Vec<u8> = (0..=255u8).rev().collect();
    bindings
        .array_mut(lut)
        .expect("lut")
        .set_items(&full_table)?;
    graph.process(&mut bindings)?;
    assert!(bindings.image(mapped).expect("mapped").bytes().iter().all(|&v| v == 55));
    let delay = bindings.delay(history).expect("delay");
    assert!(delay.slot(1).expect("slot 1").bytes().iter().all(|&v| v == 55));
    Ok(())
}

#[test]
fn out_of_range_runtime_shift_fails_the_node() -> Result<()> {
    let (_dir, pipeline) = pipeline(OptimizerConfig::default())?;
    let mut graph = Graph::new(pipeline);
    let input = graph.create_image(8, 4, PixelFormat::U8);
    let policy = graph.create_constant(ScalarValue::Enum(VX_CONVERT_POLICY_SATURATE));
    let shift = graph.create_scalar(ScalarType::S32);
    let widened = graph.create_image(8, 4, PixelFormat::S16);
    let convert = graph.add_node(
        "vx.convert_depth",
        vec![Some(input), Some(widened), Some(policy), Some(shift)],
    );

    let mut bindings = graph.allocate_bindings()?;
    bindings.image_mut(input).expect("input").fill(3u8)?;
    bindings.bind_scalar(shift, ScalarValue::S32(9));
    match graph.process(&mut bindings) {
        Err(VxError::NodeFailure { nodes, .. }) => assert!(nodes.contains(&convert)),
        other => panic!("expected a node failure, got {other:?}"),
    }

    bindings.bind_scalar(shift, ScalarValue::S32(2));
    graph.process(&mut bindings)?;
    let out = bindings.image(widened).expect("widened");
    assert!(out.as_slice::<i16>()?.iter().all(|&v| v == 12));
    Ok(())
}

#[test]
fn constant_shift_out_of_range_is_a_parameter_error() -> Result<()> {
    let (_dir, pipeline) = pipeline(OptimizerConfig::default())?;
    let mut graph = Graph::new(pipeline);
    let input = graph.create_image(8, 4, PixelFormat::U8);
    let policy = graph.create_constant(ScalarValue::Enum(VX_CONVERT_POLICY_SATURATE));
    let shift = graph.create_constant(ScalarValue::S32(-1));
    let widened = graph.create_image(8, 4, PixelFormat::S16);
    graph.add_node(
        "vx.convert_depth",
        vec![Some(input), Some(widened), Some(policy), Some(shift)],
    );

    let err = graph.verify().expect_err("negative shift");
    assert!(matches!(err, VxError::Parameter { .. }), "unexpected error: {err}");
    assert_eq!(graph.state(), GraphState::Unverified);
    Ok(())
}

#[test]
fn identical_graphs_share_one_artifact() -> Result<()> {
    let (_dir, pipeline) = pipeline(OptimizerConfig::default())?;
    let graphs: Vec<GraphIr> = (0..4).map(|_| Demo::Fusion.build(32, 32).ir).collect();
    let results = pipeline.compile_all(&graphs);
    let fingerprints = results
        .into_iter()
        .map(|artifacts| artifacts.map(|artifacts| artifacts.compiled.fingerprint().to_string()))
        .collect::<Result<Vec<_>, _>>()?;
    assert!(fingerprints.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(pipeline.backend().cache().builds(), 1);

    let mut graph = Graph::from_ir(Demo::Fusion.build(32, 32).ir, Arc::clone(&pipeline));
    graph.compile()?;
    assert_eq!(pipeline.backend().cache().builds(), 1);

    let mut other = Graph::from_ir(Demo::Fusion.build(16, 32).ir, Arc::clone(&pipeline));
    other.compile()?;
    assert_eq!(pipeline.backend().cache().builds(), 2);
    Ok(())
}

#[test]
fn scalar_outputs_are_written_back() -> Result<()> {
    let (_dir, pipeline) = pipeline(OptimizerConfig::default())?;
    let mut graph = Graph::new(pipeline);
    let input = graph.create_image(6, 5, PixelFormat::U8);
    let low = graph.create_scalar(ScalarType::U8);
    let high = graph.create_scalar(ScalarType::U8);
    graph.add_node("vx.minmaxloc", vec![Some(input), Some(low), Some(high), None, None, None, None]);

    let pixels = noise(5, 6, 9);
    let mut bindings = graph.allocate_bindings()?;
    bindings.bind_image(input, ImageBuffer::from_array2(PixelFormat::U8, pixels.view())?);
    graph.process(&mut bindings)?;

    let expected_min = pixels.iter().copied().min().unwrap_or_default();
    let expected_max = pixels.iter().copied().max().unwrap_or_default();
    assert_eq!(bindings.scalar(low).expect("min").value(), ScalarValue::U8(expected_min));
    assert_eq!(bindings.scalar(high).expect("max").value(), ScalarValue::U8(expected_max));
    Ok(())
}

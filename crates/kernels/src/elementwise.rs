//! Per-pixel kernels: arithmetic, bitwise, threshold and depth conversion.
//!
//! Every kernel here is flagged element-wise and only provides a per-pixel
//! statement, so the optimizer may fuse adjacent ones into one loop.

use crate::enums::*;
use crate::signature::{KernelSignature, ParamSpec};
use crate::template::{
    choose_format, convert_expr, convert_policy, input_image, lane, output_image, require_format,
    same_dims, saturate_policy, scalar_of, EmitContext, ImageInfo, Inference, Kernel, Rejection,
    TemplateError,
};
use vxforge_ir::{DataKind, ObjectMeta, PixelFormat, ScalarType, ScalarValue};

use vxforge_ir::PixelFormat::{F32, S16, S32, U16, U32, U8};

const SINGLE_CHANNEL: &[PixelFormat] = &[U8, U16, S16, U32, S32, F32];
const FROM_U8: &[PixelFormat] = &[U8, S16];
const ONLY_S16: &[PixelFormat] = &[S16];
const WIDEN_U8: &[PixelFormat] = &[S16, U16, S32];
const NARROW_OR_S32: &[PixelFormat] = &[U8, S32];
const NARROW_S32: &[PixelFormat] = &[U8, S16];
const NUMERIC_SCALARS: &[ScalarType] = &[
    ScalarType::U8,
    ScalarType::U16,
    ScalarType::S16,
    ScalarType::U32,
    ScalarType::S32,
    ScalarType::F32,
];

fn binary_inputs(params: &[Option<ObjectMeta>], allowed: &[PixelFormat]) -> Result<(ImageInfo, ImageInfo), Rejection> {
    let first = input_image(params, 0)?;
    require_format(0, &first, allowed)?;
    let second = input_image(params, 1)?;
    require_format(1, &second, allowed)?;
    same_dims(1, &first, &second)?;
    Ok((first, second))
}

/// Output format rule shared by add, subtract and multiply.
fn arithmetic_output(first: &ImageInfo, second: &ImageInfo) -> (PixelFormat, &'static [PixelFormat]) {
    if first.format == U8 && second.format == U8 {
        (U8, FROM_U8)
    } else {
        (S16, ONLY_S16)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Subtract,
}

/// `vx.add` / `vx.subtract`: `(in1, in2, policy, out)`.
pub struct ArithmeticKernel {
    signature: KernelSignature,
    op: ArithmeticOp,
}

impl ArithmeticKernel {
    pub fn new(op: ArithmeticOp) -> Self {
        let (name, id) = match op {
            ArithmeticOp::Add => ("vx.add", VX_KERNEL_ADD),
            ArithmeticOp::Subtract => ("vx.subtract", VX_KERNEL_SUBTRACT),
        };
        let signature = KernelSignature::new(name, id)
            .elementwise()
            .param(ParamSpec::input("in1", DataKind::Image))
            .param(ParamSpec::input("in2", DataKind::Image))
            .param(ParamSpec::input("policy", DataKind::Scalar))
            .param(ParamSpec::output("out", DataKind::Image));
        Self { signature, op }
    }
}

impl Kernel for ArithmeticKernel {
    fn signature(&self) -> &KernelSignature {
        &self.signature
    }

    fn validate(&self, params: &[Option<ObjectMeta>]) -> Result<Vec<Inference>, Rejection> {
        let (first, second) = binary_inputs(params, &[U8, S16])?;
        convert_policy(params, 2)?;
        let out = output_image(params, 3)?;
        let (default, allowed) = arithmetic_output(&first, &second);
        let format = choose_format(3, out.format, default, allowed)?;
        Ok(vec![Inference::image(3, first.width, first.height, format)])
    }

    fn pixel_body(&self, ctx: &EmitContext<'_>, lanes: &[Option<String>]) -> Result<String, TemplateError> {
        let saturate = saturate_policy(ctx, 2)?;
        let out = ctx.image(3)?;
        let op = match self.op {
            ArithmeticOp::Add => "+",
            ArithmeticOp::Subtract => "-",
        };
        let expr = format!("(int32_t){} {op} (int32_t){}", lane(lanes, 0)?, lane(lanes, 1)?);
        Ok(format!(
            "{} = {};",
            lane(lanes, 3)?,
            convert_expr(out.format, &expr, saturate)
        ))
    }
}

/// `vx.multiply`: `(in1, in2, scale, policy, out)`, truncating toward zero.
pub struct MultiplyKernel {
    signature: KernelSignature,
}

impl MultiplyKernel {
    pub fn new() -> Self {
        let signature = KernelSignature::new("vx.multiply", VX_KERNEL_MULTIPLY)
            .elementwise()
            .param(ParamSpec::input("in1", DataKind::Image))
            .param(ParamSpec::input("in2", DataKind::Image))
            .param(ParamSpec::input("scale", DataKind::Scalar))
            .param(ParamSpec::input("policy", DataKind::Scalar))
            .param(ParamSpec::output("out", DataKind::Image));
        Self { signature }
    }
}

impl Default for MultiplyKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel for MultiplyKernel {
    fn signature(&self) -> &KernelSignature {
        &self.signature
    }

    fn validate(&self, params: &[Option<ObjectMeta>]) -> Result<Vec<Inference>, Rejection> {
        let (first, second) = binary_inputs(params, &[U8, S16])?;
        scalar_of(params, 2, &[ScalarType::F32])?;
        convert_policy(params, 3)?;
        let out = output_image(params, 4)?;
        let (default, allowed) = arithmetic_output(&first, &second);
        let format = choose_format(4, out.format, default, allowed)?;
        Ok(vec![Inference::image(4, first.width, first.height, format)])
    }

    fn pixel_body(&self, ctx: &EmitContext<'_>, lanes: &[Option<String>]) -> Result<String, TemplateError> {
        let saturate = saturate_policy(ctx, 3)?;
        let out = ctx.image(4)?;
        let expr = format!(
            "vxf_trunc_f64((double){} * (double){} * (double){})",
            lane(lanes, 0)?,
            lane(lanes, 1)?,
            lane(lanes, 2)?
        );
        Ok(format!(
            "{} = {};",
            lane(lanes, 4)?,
            convert_expr(out.format, &expr, saturate)
        ))
    }
}

/// `vx.absdiff`: `(in1, in2, out)`, saturating.
pub struct AbsDiffKernel {
    signature: KernelSignature,
}

impl AbsDiffKernel {
    pub fn new() -> Self {
        let signature = KernelSignature::new("vx.absdiff", VX_KERNEL_ABSDIFF)
            .elementwise()
            .param(ParamSpec::input("in1", DataKind::Image))
            .param(ParamSpec::input("in2", DataKind::Image))
            .param(ParamSpec::output("out", DataKind::Image));
        Self { signature }
    }
}

impl Default for AbsDiffKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel for AbsDiffKernel {
    fn signature(&self) -> &KernelSignature {
        &self.signature
    }

    fn validate(&self, params: &[Option<ObjectMeta>]) -> Result<Vec<Inference>, Rejection> {
        let (first, second) = binary_inputs(params, &[U8, S16])?;
        if first.format != second.format {
            return Err(Rejection::new(1, "inputs must share a format"));
        }
        let out = output_image(params, 2)?;
        let format = choose_format(2, out.format, first.format, &[first.format])?;
        Ok(vec![Inference::image(2, first.width, first.height, format)])
    }

    fn pixel_body(&self, ctx: &EmitContext<'_>, lanes: &[Option<String>]) -> Result<String, TemplateError> {
        let out = ctx.image(2)?;
        let (a, b) = (lane(lanes, 0)?, lane(lanes, 1)?);
        let expr = format!(
            "(int32_t){a} > (int32_t){b} ? (int32_t){a} - (int32_t){b} : (int32_t){b} - (int32_t){a}"
        );
        Ok(format!("{} = {};", lane(lanes, 2)?, convert_expr(out.format, &expr, true)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitwiseOp {
    And,
    Or,
    Xor,
}

/// `vx.and` / `vx.or` / `vx.xor` on U8 images.
pub struct BitwiseKernel {
    signature: KernelSignature,
    op: BitwiseOp,
}

impl BitwiseKernel {
    pub fn new(op: BitwiseOp) -> Self {
        let (name, id) = match op {
            BitwiseOp::And => ("vx.and", VX_KERNEL_AND),
            BitwiseOp::Or => ("vx.or", VX_KERNEL_OR),
            BitwiseOp::Xor => ("vx.xor", VX_KERNEL_XOR),
        };
        let signature = KernelSignature::new(name, id)
            .elementwise()
            .param(ParamSpec::input("in1", DataKind::Image))
            .param(ParamSpec::input("in2", DataKind::Image))
            .param(ParamSpec::output("out", DataKind::Image));
        Self { signature, op }
    }
}

impl Kernel for BitwiseKernel {
    fn signature(&self) -> &KernelSignature {
        &self.signature
    }

    fn validate(&self, params: &[Option<ObjectMeta>]) -> Result<Vec<Inference>, Rejection> {
        let (first, _) = binary_inputs(params, &[U8])?;
        let out = output_image(params, 2)?;
        let format = choose_format(2, out.format, U8, &[U8])?;
        Ok(vec![Inference::image(2, first.width, first.height, format)])
    }

    fn pixel_body(&self, _ctx: &EmitContext<'_>, lanes: &[Option<String>]) -> Result<String, TemplateError> {
        let op = match self.op {
            BitwiseOp::And => "&",
            BitwiseOp::Or => "|",
            BitwiseOp::Xor => "^",
        };
        Ok(format!(
            "{} = (uint8_t)({} {op} {});",
            lane(lanes, 2)?,
            lane(lanes, 0)?,
            lane(lanes, 1)?
        ))
    }
}

/// `vx.not`: `(in, out)`.
pub struct NotKernel {
    signature: KernelSignature,
}

impl NotKernel {
    pub fn new() -> Self {
        let signature = KernelSignature::new("vx.not", VX_KERNEL_NOT)
            .elementwise()
            .param(ParamSpec::input("in", DataKind::Image))
            .param(ParamSpec::output("out", DataKind::Image));
        Self { signature }
    }
}

impl Default for NotKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel for NotKernel {
    fn signature(&self) -> &KernelSignature {
        &self.signature
    }

    fn validate(&self, params: &[Option<ObjectMeta>]) -> Result<Vec<Inference>, Rejection> {
        let input = input_image(params, 0)?;
        require_format(0, &input, &[U8])?;
        let out = output_image(params, 1)?;
        let format = choose_format(1, out.format, U8, &[U8])?;
        Ok(vec![Inference::image(1, input.width, input.height, format)])
    }

    fn pixel_body(&self, _ctx: &EmitContext<'_>, lanes: &[Option<String>]) -> Result<String, TemplateError> {
        Ok(format!("{} = (uint8_t)(~{});", lane(lanes, 1)?, lane(lanes, 0)?))
    }
}

/// `vx.threshold`: binary threshold, `in > thresh ? 255 : 0`.
pub struct ThresholdKernel {
    signature: KernelSignature,
}

impl ThresholdKernel {
    pub fn new() -> Self {
        let signature = KernelSignature::new("vx.threshold", VX_KERNEL_THRESHOLD)
            .elementwise()
            .param(ParamSpec::input("in", DataKind::Image))
            .param(ParamSpec::input("thresh", DataKind::Scalar))
            .param(ParamSpec::output("out", DataKind::Image));
        Self { signature }
    }
}

impl Default for ThresholdKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel for ThresholdKernel {
    fn signature(&self) -> &KernelSignature {
        &self.signature
    }

    fn validate(&self, params: &[Option<ObjectMeta>]) -> Result<Vec<Inference>, Rejection> {
        let input = input_image(params, 0)?;
        require_format(0, &input, &[U8])?;
        scalar_of(params, 1, &[ScalarType::U8])?;
        let out = output_image(params, 2)?;
        let format = choose_format(2, out.format, U8, &[U8])?;
        Ok(vec![Inference::image(2, input.width, input.height, format)])
    }

    fn pixel_body(&self, _ctx: &EmitContext<'_>, lanes: &[Option<String>]) -> Result<String, TemplateError> {
        Ok(format!(
            "{} = (uint8_t)({} > {} ? 255u : 0u);",
            lane(lanes, 2)?,
            lane(lanes, 0)?,
            lane(lanes, 1)?
        ))
    }
}

/// `vx.magnitude`: rounded gradient magnitude of two S16 planes.
pub struct MagnitudeKernel {
    signature: KernelSignature,
}

impl MagnitudeKernel {
    pub fn new() -> Self {
        let signature = KernelSignature::new("vx.magnitude", VX_KERNEL_MAGNITUDE)
            .elementwise()
            .param(ParamSpec::input("grad_x", DataKind::Image))
            .param(ParamSpec::input("grad_y", DataKind::Image))
            .param(ParamSpec::output("mag", DataKind::Image));
        Self { signature }
    }
}

impl Default for MagnitudeKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel for MagnitudeKernel {
    fn signature(&self) -> &KernelSignature {
        &self.signature
    }

    fn validate(&self, params: &[Option<ObjectMeta>]) -> Result<Vec<Inference>, Rejection> {
        let (first, _) = binary_inputs(params, &[S16])?;
        let out = output_image(params, 2)?;
        let format = choose_format(2, out.format, S16, &[S16])?;
        Ok(vec![Inference::image(2, first.width, first.height, format)])
    }

    fn pixel_body(&self, _ctx: &EmitContext<'_>, lanes: &[Option<String>]) -> Result<String, TemplateError> {
        let (x, y) = (lane(lanes, 0)?, lane(lanes, 1)?);
        Ok(format!(
            "{} = vxf_sat_s16((int64_t)(sqrt((double){x} * (double){x} + (double){y} * (double){y}) + 0.5));",
            lane(lanes, 2)?
        ))
    }
}

/// `vx.phase`: gradient orientation quantized to `0..=255` over a full turn.
pub struct PhaseKernel {
    signature: KernelSignature,
}

impl PhaseKernel {
    pub fn new() -> Self {
        let signature = KernelSignature::new("vx.phase", VX_KERNEL_PHASE)
            .elementwise()
            .param(ParamSpec::input("grad_x", DataKind::Image))
            .param(ParamSpec::input("grad_y", DataKind::Image))
            .param(ParamSpec::output("orientation", DataKind::Image));
        Self { signature }
    }
}

impl Default for PhaseKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel for PhaseKernel {
    fn signature(&self) -> &KernelSignature {
        &self.signature
    }

    fn validate(&self, params: &[Option<ObjectMeta>]) -> Result<Vec<Inference>, Rejection> {
        let (first, _) = binary_inputs(params, &[S16])?;
        let out = output_image(params, 2)?;
        let format = choose_format(2, out.format, U8, &[U8])?;
        Ok(vec![Inference::image(2, first.width, first.height, format)])
    }

    fn pixel_body(&self, _ctx: &EmitContext<'_>, lanes: &[Option<String>]) -> Result<String, TemplateError> {
        Ok(format!(
            "{{ double vxf_angle = atan2((double){y}, (double){x}); if (vxf_angle < 0.0) vxf_angle += 6.283185307179586; {out} = (uint8_t)((int32_t)(vxf_angle * 256.0 / 6.283185307179586 + 0.5) & 0xFF); }}",
            x = lane(lanes, 0)?,
            y = lane(lanes, 1)?,
            out = lane(lanes, 2)?
        ))
    }
}

/// Valid `vx.convert_depth` shifts.
pub const DEPTH_SHIFTS: std::ops::Range<i32> = 0..8;

fn depth_conversions(input: PixelFormat) -> Option<(PixelFormat, &'static [PixelFormat])> {
    match input {
        U8 => Some((S16, WIDEN_U8)),
        S16 | U16 => Some((U8, NARROW_OR_S32)),
        S32 => Some((U8, NARROW_S32)),
        _ => None,
    }
}

/// `vx.convert_depth`: `(in, out, policy, shift)`; widening shifts left, narrowing shifts right.
pub struct ConvertDepthKernel {
    signature: KernelSignature,
}

impl ConvertDepthKernel {
    pub fn new() -> Self {
        let signature = KernelSignature::new("vx.convert_depth", VX_KERNEL_CONVERTDEPTH)
            .elementwise()
            .param(ParamSpec::input("in", DataKind::Image))
            .param(ParamSpec::output("out", DataKind::Image))
            .param(ParamSpec::input("policy", DataKind::Scalar))
            .param(ParamSpec::input("shift", DataKind::Scalar));
        Self { signature }
    }
}

impl Default for ConvertDepthKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel for ConvertDepthKernel {
    fn signature(&self) -> &KernelSignature {
        &self.signature
    }

    fn validate(&self, params: &[Option<ObjectMeta>]) -> Result<Vec<Inference>, Rejection> {
        let input = input_image(params, 0)?;
        let (default, allowed) = depth_conversions(input.format)
            .ok_or_else(|| Rejection::new(0, format!("cannot convert depth of {}", input.format)))?;
        convert_policy(params, 2)?;
        let shift = scalar_of(params, 3, &[ScalarType::S32])?;
        if let Some(ScalarValue::S32(value)) = shift.value {
            if !DEPTH_SHIFTS.contains(&value) {
                return Err(Rejection::new(
                    3,
                    format!("shift {value} outside {}..{}", DEPTH_SHIFTS.start, DEPTH_SHIFTS.end),
                ));
            }
        }
        let out = output_image(params, 1)?;
        let format = choose_format(1, out.format, default, allowed)?;
        Ok(vec![Inference::image(1, input.width, input.height, format)])
    }

    fn pixel_body(&self, ctx: &EmitContext<'_>, lanes: &[Option<String>]) -> Result<String, TemplateError> {
        let input = ctx.image(0)?;
        let out = ctx.image(1)?;
        let saturate = saturate_policy(ctx, 2)?;
        let (value, shift) = (lane(lanes, 0)?, lane(lanes, 3)?);
        let expr = if out.format.element_size() > input.format.element_size() {
            format!("(int64_t){value} * ((int64_t)1 << {shift})")
        } else {
            format!("(int64_t){value} >> {shift}")
        };
        Ok(format!(
            "{} = {};",
            lane(lanes, 1)?,
            convert_expr(out.format, &expr, saturate)
        ))
    }

    fn pixel_guard(&self, ctx: &EmitContext<'_>, lanes: &[Option<String>]) -> Result<Option<String>, TemplateError> {
        if ctx.param(3)?.constant.is_some() {
            return Ok(None);
        }
        let shift = lane(lanes, 3)?;
        Ok(Some(format!(
            "if ({shift} < {} || {shift} >= {}) VXF_NODE_FAIL;",
            DEPTH_SHIFTS.start, DEPTH_SHIFTS.end
        )))
    }
}

/// `vxf.multiply_scalar`: `(in, factor, out)`, truncating and saturating.
pub struct MultiplyScalarKernel {
    signature: KernelSignature,
}

impl MultiplyScalarKernel {
    pub fn new() -> Self {
        let signature = KernelSignature::new("vxf.multiply_scalar", VXF_KERNEL_MULTIPLY_SCALAR)
            .elementwise()
            .param(ParamSpec::input("in", DataKind::Image))
            .param(ParamSpec::input("factor", DataKind::Scalar))
            .param(ParamSpec::output("out", DataKind::Image));
        Self { signature }
    }
}

impl Default for MultiplyScalarKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel for MultiplyScalarKernel {
    fn signature(&self) -> &KernelSignature {
        &self.signature
    }

    fn validate(&self, params: &[Option<ObjectMeta>]) -> Result<Vec<Inference>, Rejection> {
        let input = input_image(params, 0)?;
        require_format(0, &input, SINGLE_CHANNEL)?;
        scalar_of(params, 1, NUMERIC_SCALARS)?;
        let out = output_image(params, 2)?;
        let format = choose_format(2, out.format, input.format, SINGLE_CHANNEL)?;
        Ok(vec![Inference::image(2, input.width, input.height, format)])
    }

    fn pixel_body(&self, ctx: &EmitContext<'_>, lanes: &[Option<String>]) -> Result<String, TemplateError> {
        let out = ctx.image(2)?;
        let product = format!("(double){} * (double){}", lane(lanes, 0)?, lane(lanes, 1)?);
        let value = if out.format.is_float() {
            format!("(float)({product})")
        } else {
            convert_expr(out.format, &format!("vxf_trunc_f64({product})"), true)
        };
        Ok(format!("{} = {value};", lane(lanes, 2)?))
    }
}

/// `vxf.clamp`: `(in, min, max, out)` in the input's format.
pub struct ClampKernel {
    signature: KernelSignature,
}

impl ClampKernel {
    pub fn new() -> Self {
        let signature = KernelSignature::new("vxf.clamp", VXF_KERNEL_CLAMP)
            .elementwise()
            .param(ParamSpec::input("in", DataKind::Image))
            .param(ParamSpec::input("min", DataKind::Scalar))
            .param(ParamSpec::input("max", DataKind::Scalar))
            .param(ParamSpec::output("out", DataKind::Image));
        Self { signature }
    }
}

impl Default for ClampKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel for ClampKernel {
    fn signature(&self) -> &KernelSignature {
        &self.signature
    }

    fn validate(&self, params: &[Option<ObjectMeta>]) -> Result<Vec<Inference>, Rejection> {
        let input = input_image(params, 0)?;
        require_format(0, &input, SINGLE_CHANNEL)?;
        scalar_of(params, 1, NUMERIC_SCALARS)?;
        scalar_of(params, 2, NUMERIC_SCALARS)?;
        let out = output_image(params, 3)?;
        let format = choose_format(3, out.format, input.format, &[input.format])?;
        Ok(vec![Inference::image(3, input.width, input.height, format)])
    }

    fn pixel_body(&self, ctx: &EmitContext<'_>, lanes: &[Option<String>]) -> Result<String, TemplateError> {
        let out = ctx.image(3)?;
        let (value, low, high) = (lane(lanes, 0)?, lane(lanes, 1)?, lane(lanes, 2)?);
        let clamped = if out.format.is_float() {
            format!("(float)vxf_clamp_f64((double){value}, (double){low}, (double){high})")
        } else {
            format!(
                "({})vxf_clamp_i64((int64_t){value}, (int64_t){low}, (int64_t){high})",
                out.c_type()
            )
        };
        Ok(format!("{} = {clamped};", lane(lanes, 3)?))
    }
}

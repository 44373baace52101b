//! 3x3 neighbourhood kernels on U8 images.
//!
//! Samples outside the image follow the node's border mode: replicate the
//! nearest edge pixel or read a constant.

use crate::enums::*;
use crate::signature::{KernelSignature, ParamSpec};
use crate::template::{
    choose_format, input_image, is_bound, output_image, require_format, CodeFragment, EmitContext,
    Inference, Kernel, Rejection, TemplateError, FETCH_U8,
};
use std::fmt::Write;
use vxforge_ir::{DataKind, ObjectMeta, PixelFormat};

const MEDIAN9: (&str, &str) = (
    "vxf_median9",
    "static inline int32_t vxf_median9(int32_t *v)
{
    for (int32_t i = 1; i < 9; ++i) {
        int32_t key = v[i];
        int32_t j = i - 1;
        while (j >= 0 && v[j] > key) {
            v[j + 1] = v[j];
            --j;
        }
        v[j + 1] = key;
    }
    return v[4];
}",
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Gaussian,
    Box,
    Median,
    Dilate,
    Erode,
}

impl FilterOp {
    fn kernel_id(&self) -> (&'static str, u32) {
        match self {
            FilterOp::Gaussian => ("vx.gaussian_3x3", VX_KERNEL_GAUSSIAN_3X3),
            FilterOp::Box => ("vx.box_3x3", VX_KERNEL_BOX_3X3),
            FilterOp::Median => ("vx.median_3x3", VX_KERNEL_MEDIAN_3X3),
            FilterOp::Dilate => ("vx.dilate_3x3", VX_KERNEL_DILATE_3X3),
            FilterOp::Erode => ("vx.erode_3x3", VX_KERNEL_ERODE_3X3),
        }
    }

    /// Reduction of the taps `p[0..9]` (row-major) to one value.
    fn reduce(&self) -> &'static str {
        match self {
            FilterOp::Gaussian => {
                "(p[0] + 2 * p[1] + p[2] + 2 * p[3] + 4 * p[4] + 2 * p[5] + p[6] + 2 * p[7] + p[8]) >> 4"
            }
            FilterOp::Box => "(p[0] + p[1] + p[2] + p[3] + p[4] + p[5] + p[6] + p[7] + p[8]) / 9",
            FilterOp::Median => "vxf_median9(p)",
            FilterOp::Dilate => "vxf_reduce_max9(p)",
            FilterOp::Erode => "vxf_reduce_min9(p)",
        }
    }
}

const REDUCE_MAX9: (&str, &str) = (
    "vxf_reduce_max9",
    "static inline int32_t vxf_reduce_max9(const int32_t *v)
{
    int32_t m = v[0];
    for (int32_t i = 1; i < 9; ++i) {
        m = v[i] > m ? v[i] : m;
    }
    return m;
}",
);

const REDUCE_MIN9: (&str, &str) = (
    "vxf_reduce_min9",
    "static inline int32_t vxf_reduce_min9(const int32_t *v)
{
    int32_t m = v[0];
    for (int32_t i = 1; i < 9; ++i) {
        m = v[i] < m ? v[i] : m;
    }
    return m;
}",
);

fn gather_taps(out: &mut String, width: u32, height: u32, replicate: i32, value: i32) {
    let mut index = 0;
    for dy in -1..=1 {
        for dx in -1..=1 {
            let _ = writeln!(
                out,
                "        p[{index}] = vxf_fetch_u8(src, {width}, {height}, x + ({dx}), y + ({dy}), {replicate}, {value});"
            );
            index += 1;
        }
    }
}

/// `(in, out)` U8 filters: gaussian, box, median, dilate, erode.
pub struct Filter3x3Kernel {
    signature: KernelSignature,
    op: FilterOp,
}

impl Filter3x3Kernel {
    pub fn new(op: FilterOp) -> Self {
        let (name, id) = op.kernel_id();
        let signature = KernelSignature::new(name, id)
            .param(ParamSpec::input("in", DataKind::Image))
            .param(ParamSpec::output("out", DataKind::Image));
        Self { signature, op }
    }
}

impl Kernel for Filter3x3Kernel {
    fn signature(&self) -> &KernelSignature {
        &self.signature
    }

    fn validate(&self, params: &[Option<ObjectMeta>]) -> Result<Vec<Inference>, Rejection> {
        let input = input_image(params, 0)?;
        require_format(0, &input, &[PixelFormat::U8])?;
        let out = output_image(params, 1)?;
        let format = choose_format(1, out.format, PixelFormat::U8, &[PixelFormat::U8])?;
        Ok(vec![Inference::image(1, input.width, input.height, format)])
    }

    fn emit(&self, ctx: &EmitContext<'_>) -> Result<CodeFragment, TemplateError> {
        let input = ctx.image(0)?;
        let (replicate, value) = ctx.border_args();
        let mut body = String::new();
        let _ = writeln!(body, "const uint8_t *src = {};", ctx.expr(0)?);
        let _ = writeln!(body, "uint8_t *dst = {};", ctx.expr(1)?);
        let _ = writeln!(body, "for (int32_t y = 0; y < {}; ++y) {{", input.height);
        let _ = writeln!(body, "    for (int32_t x = 0; x < {}; ++x) {{", input.width);
        let _ = writeln!(body, "        int32_t p[9];");
        gather_taps(&mut body, input.width, input.height, replicate, value);
        let _ = writeln!(
            body,
            "        dst[(size_t)y * {} + (size_t)x] = (uint8_t)({});",
            input.width,
            self.op.reduce()
        );
        body.push_str("    }\n}\n");

        let fragment = CodeFragment::new(body).with_declaration(FETCH_U8.0, FETCH_U8.1);
        Ok(match self.op {
            FilterOp::Median => fragment.with_declaration(MEDIAN9.0, MEDIAN9.1),
            FilterOp::Dilate => fragment.with_declaration(REDUCE_MAX9.0, REDUCE_MAX9.1),
            FilterOp::Erode => fragment.with_declaration(REDUCE_MIN9.0, REDUCE_MIN9.1),
            FilterOp::Gaussian | FilterOp::Box => fragment,
        })
    }
}

/// `vx.sobel_3x3`: `(in, out_x?, out_y?)` S16 gradients; at least one output must be bound.
pub struct SobelKernel {
    signature: KernelSignature,
}

impl SobelKernel {
    pub fn new() -> Self {
        let signature = KernelSignature::new("vx.sobel_3x3", VX_KERNEL_SOBEL_3X3)
            .param(ParamSpec::input("in", DataKind::Image))
            .param(ParamSpec::output("grad_x", DataKind::Image).optional())
            .param(ParamSpec::output("grad_y", DataKind::Image).optional());
        Self { signature }
    }
}

impl Default for SobelKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel for SobelKernel {
    fn signature(&self) -> &KernelSignature {
        &self.signature
    }

    fn validate(&self, params: &[Option<ObjectMeta>]) -> Result<Vec<Inference>, Rejection> {
        let input = input_image(params, 0)?;
        require_format(0, &input, &[PixelFormat::U8])?;
        if !is_bound(params, 1) && !is_bound(params, 2) {
            return Err(Rejection::new(1, "at least one gradient output must be bound"));
        }
        let mut inferred = Vec::new();
        for slot in [1, 2] {
            if is_bound(params, slot) {
                let out = output_image(params, slot)?;
                let format = choose_format(slot, out.format, PixelFormat::S16, &[PixelFormat::S16])?;
                inferred.push(Inference::image(slot, input.width, input.height, format));
            }
        }
        Ok(inferred)
    }

    fn emit(&self, ctx: &EmitContext<'_>) -> Result<CodeFragment, TemplateError> {
        let input = ctx.image(0)?;
        let (replicate, value) = ctx.border_args();
        let mut body = String::new();
        let _ = writeln!(body, "const uint8_t *src = {};", ctx.expr(0)?);
        for (slot, name) in [(1, "dst_x"), (2, "dst_y")] {
            if ctx.is_bound(slot) {
                let _ = writeln!(body, "int16_t *{name} = {};", ctx.expr(slot)?);
            }
        }
        let _ = writeln!(body, "for (int32_t y = 0; y < {}; ++y) {{", input.height);
        let _ = writeln!(body, "    for (int32_t x = 0; x < {}; ++x) {{", input.width);
        let _ = writeln!(body, "        int32_t p[9];");
        gather_taps(&mut body, input.width, input.height, replicate, value);
        let _ = writeln!(
            body,
            "        const size_t at = (size_t)y * {} + (size_t)x;",
            input.width
        );
        if ctx.is_bound(1) {
            body.push_str(
                "        dst_x[at] = (int16_t)((p[2] + 2 * p[5] + p[8]) - (p[0] + 2 * p[3] + p[6]));\n",
            );
        }
        if ctx.is_bound(2) {
            body.push_str(
                "        dst_y[at] = (int16_t)((p[6] + 2 * p[7] + p[8]) - (p[0] + 2 * p[1] + p[2]));\n",
            );
        }
        body.push_str("    }\n}\n");
        Ok(CodeFragment::new(body).with_declaration(FETCH_U8.0, FETCH_U8.1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::ParamRef;
    use vxforge_ir::{BorderMode, ImageMeta, NodeId, ObjectId};

    fn image_ref(id: u32, format: PixelFormat, expr: &str) -> Option<ParamRef> {
        Some(ParamRef {
            object: ObjectId(id),
            meta: ObjectMeta::Image(ImageMeta::new(6, 4, format)),
            expr: expr.to_string(),
            constant: None,
        })
    }

    #[test]
    fn sobel_requires_an_output() {
        let kernel = SobelKernel::new();
        let params = vec![Some(ObjectMeta::Image(ImageMeta::new(6, 4, PixelFormat::U8))), None, None];
        let rejection = kernel.validate(&params).expect_err("no outputs");
        assert_eq!(rejection.slot, 1);
    }

    #[test]
    fn constant_border_is_threaded_into_fetches() -> Result<(), TemplateError> {
        let kernel = Filter3x3Kernel::new(FilterOp::Dilate);
        let params = vec![image_ref(0, PixelFormat::U8, "v0"), image_ref(1, PixelFormat::U8, "v1")];
        let ctx = EmitContext {
            node: NodeId(0),
            border: BorderMode::Constant(9),
            params: &params,
        };
        let fragment = kernel.emit(&ctx)?;
        assert!(fragment.body.contains("vxf_fetch_u8(src, 6, 4, x + (-1), y + (-1), 0, 9)"));
        assert!(fragment.body.contains("vxf_reduce_max9(p)"));
        let keys: Vec<&str> = fragment.declarations.iter().map(|(key, _)| key.as_str()).collect();
        assert_eq!(keys, vec!["vxf_fetch_u8", "vxf_reduce_max9"]);
        Ok(())
    }

    #[test]
    fn sobel_emits_only_bound_gradients() -> Result<(), TemplateError> {
        let kernel = SobelKernel::new();
        let params = vec![image_ref(0, PixelFormat::U8, "src0"), None, image_ref(2, PixelFormat::S16, "gy")];
        let ctx = EmitContext {
            node: NodeId(1),
            border: BorderMode::Replicate,
            params: &params,
        };
        let fragment = kernel.emit(&ctx)?;
        assert!(!fragment.body.contains("dst_x"));
        assert!(fragment.body.contains("int16_t *dst_y = gy;"));
        Ok(())
    }
}

//! Gaussian image pyramid.

use crate::enums::VX_KERNEL_GAUSSIAN_PYRAMID;
use crate::signature::{KernelSignature, ParamSpec};
use crate::template::{
    input_image, pyramid, require_format, CodeFragment, EmitContext, Inference, Kernel, Rejection,
    TemplateError, FETCH_U8,
};
use std::fmt::Write;
use vxforge_ir::{DataKind, ObjectMeta, PixelFormat, PyramidMeta};

const BINOMIAL5: (&str, &str) = (
    "vxf_binomial5",
    "static inline int32_t vxf_binomial5(const uint8_t *src, int32_t w, int32_t h, int32_t cx, int32_t cy, int32_t replicate, int32_t value)
{
    static const int32_t taps[5] = {1, 4, 6, 4, 1};
    int32_t acc = 0;
    for (int32_t dy = -2; dy <= 2; ++dy) {
        for (int32_t dx = -2; dx <= 2; ++dx) {
            acc += taps[dy + 2] * taps[dx + 2] * vxf_fetch_u8(src, w, h, cx + dx, cy + dy, replicate, value);
        }
    }
    return acc;
}",
);

/// `vx.gaussian_pyramid`: `(in, out)`. Level 0 copies the input; level `k`
/// smooths level `k - 1` with a 5x5 binomial and keeps every second pixel.
pub struct GaussianPyramidKernel {
    signature: KernelSignature,
}

impl GaussianPyramidKernel {
    pub fn new() -> Self {
        let signature = KernelSignature::new("vx.gaussian_pyramid", VX_KERNEL_GAUSSIAN_PYRAMID)
            .param(ParamSpec::input("in", DataKind::Image))
            .param(ParamSpec::output("gaussian", DataKind::Pyramid));
        Self { signature }
    }
}

impl Default for GaussianPyramidKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel for GaussianPyramidKernel {
    fn signature(&self) -> &KernelSignature {
        &self.signature
    }

    fn validate(&self, params: &[Option<ObjectMeta>]) -> Result<Vec<Inference>, Rejection> {
        let input = input_image(params, 0)?;
        require_format(0, &input, &[PixelFormat::U8])?;
        let declared = pyramid(params, 1)?;
        let levels = declared
            .levels
            .ok_or_else(|| Rejection::new(1, "pyramid level count must be fixed"))?;
        if levels == 0 {
            return Err(Rejection::new(1, "pyramid needs at least one level"));
        }
        if matches!(declared.format, Some(format) if format != PixelFormat::U8) {
            return Err(Rejection::new(1, "gaussian pyramid levels are u8"));
        }
        Ok(vec![Inference {
            slot: 1,
            meta: ObjectMeta::Pyramid(PyramidMeta::new(
                levels,
                input.width,
                input.height,
                PixelFormat::U8,
            )),
        }])
    }

    fn emit(&self, ctx: &EmitContext<'_>) -> Result<CodeFragment, TemplateError> {
        let input = ctx.image(0)?;
        let meta = ctx.pyramid(1)?;
        let levels = meta
            .levels
            .ok_or_else(|| TemplateError("pyramid level count is unresolved".into()))?;
        let (replicate, value) = ctx.border_args();
        let mut body = String::new();
        let _ = writeln!(body, "void **levels = {};", ctx.expr(1)?);
        let _ = writeln!(
            body,
            "memcpy(levels[0], {}, {});",
            ctx.expr(0)?,
            input.len()
        );
        for level in 1..levels {
            let (prev_w, prev_h) = meta
                .level_dims(level - 1)
                .ok_or_else(|| TemplateError("pyramid base is unresolved".into()))?;
            let (width, height) = meta
                .level_dims(level)
                .ok_or_else(|| TemplateError("pyramid base is unresolved".into()))?;
            body.push_str("{\n");
            let _ = writeln!(
                body,
                "    const uint8_t *src = (const uint8_t *)levels[{}];",
                level - 1
            );
            let _ = writeln!(body, "    uint8_t *dst = (uint8_t *)levels[{level}];");
            let _ = writeln!(body, "    for (int32_t y = 0; y < {height}; ++y) {{");
            let _ = writeln!(body, "        for (int32_t x = 0; x < {width}; ++x) {{");
            let _ = writeln!(
                body,
                "            const int32_t acc = vxf_binomial5(src, {prev_w}, {prev_h}, 2 * x, 2 * y, {replicate}, {value});"
            );
            let _ = writeln!(
                body,
                "            dst[(size_t)y * {width} + (size_t)x] = (uint8_t)((acc + 128) >> 8);"
            );
            body.push_str("        }\n    }\n}\n");
        }
        Ok(CodeFragment::new(body)
            .with_declaration(FETCH_U8.0, FETCH_U8.1)
            .with_declaration(BINOMIAL5.0, BINOMIAL5.1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vxforge_ir::ImageMeta;

    #[test]
    fn levels_must_be_fixed() {
        let kernel = GaussianPyramidKernel::new();
        let params = vec![
            Some(ObjectMeta::Image(ImageMeta::new(8, 8, PixelFormat::U8))),
            Some(ObjectMeta::Pyramid(PyramidMeta::default())),
        ];
        assert_eq!(kernel.validate(&params).expect_err("no levels").slot, 1);
    }

    #[test]
    fn base_follows_input() {
        let kernel = GaussianPyramidKernel::new();
        let params = vec![
            Some(ObjectMeta::Image(ImageMeta::new(9, 5, PixelFormat::U8))),
            Some(ObjectMeta::Pyramid(PyramidMeta {
                levels: Some(3),
                ..PyramidMeta::default()
            })),
        ];
        let inferred = kernel.validate(&params).expect("valid pyramid");
        let meta = inferred[0].meta.as_pyramid().copied().expect("pyramid");
        assert_eq!(meta.level_dims(2), Some((3, 2)));
    }
}

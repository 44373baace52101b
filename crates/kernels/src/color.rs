//! Colour conversion and channel kernels on interleaved RGB/RGBX images.

use crate::enums::*;
use crate::signature::{KernelSignature, ParamSpec};
use crate::template::{
    choose_format, input_image, is_bound, output_image, require_format, same_dims, scalar,
    CodeFragment, EmitContext, Inference, Kernel, Rejection, TemplateError,
};
use std::fmt::Write;
use vxforge_ir::{DataKind, ObjectMeta, PixelFormat, ScalarValue};

use vxforge_ir::PixelFormat::{Rgb, Rgbx, U8};

const FROM_RGB: &[PixelFormat] = &[U8, Rgbx];
const FROM_RGBX: &[PixelFormat] = &[U8, Rgb];
const RGB_ONLY: &[PixelFormat] = &[Rgb, Rgbx];
const RGBX_ONLY: &[PixelFormat] = &[Rgbx];

/// BT.709 luma in 8.8 fixed point: `(54 r + 183 g + 19 b + 128) >> 8`.
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((54 * r as u32 + 183 * g as u32 + 19 * b as u32 + 128) >> 8) as u8
}

/// `vx.color_convert`: RGB/RGBX to U8 luma, or between RGB and RGBX.
pub struct ColorConvertKernel {
    signature: KernelSignature,
}

impl ColorConvertKernel {
    pub fn new() -> Self {
        let signature = KernelSignature::new("vx.color_convert", VX_KERNEL_COLOR_CONVERT)
            .param(ParamSpec::input("in", DataKind::Image))
            .param(ParamSpec::output("out", DataKind::Image));
        Self { signature }
    }
}

impl Default for ColorConvertKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel for ColorConvertKernel {
    fn signature(&self) -> &KernelSignature {
        &self.signature
    }

    fn validate(&self, params: &[Option<ObjectMeta>]) -> Result<Vec<Inference>, Rejection> {
        let input = input_image(params, 0)?;
        let allowed = match require_format(0, &input, &[Rgb, Rgbx])? {
            Rgb => FROM_RGB,
            _ => FROM_RGBX,
        };
        let out = output_image(params, 1)?;
        let format = choose_format(1, out.format, U8, allowed)?;
        Ok(vec![Inference::image(1, input.width, input.height, format)])
    }

    fn emit(&self, ctx: &EmitContext<'_>) -> Result<CodeFragment, TemplateError> {
        let input = ctx.image(0)?;
        let out = ctx.image(1)?;
        let src_channels = input.format.channels();
        let mut body = String::new();
        let _ = writeln!(body, "const uint8_t *src = {};", ctx.expr(0)?);
        let _ = writeln!(body, "uint8_t *dst = {};", ctx.expr(1)?);
        let _ = writeln!(body, "for (size_t i = 0; i < {}; ++i) {{", input.len());
        let _ = writeln!(body, "    const uint8_t *px = src + i * {src_channels};");
        match out.format {
            U8 => body.push_str(
                "    dst[i] = (uint8_t)((54u * px[0] + 183u * px[1] + 19u * px[2] + 128u) >> 8);\n",
            ),
            Rgbx => body.push_str(
                "    dst[i * 4] = px[0];\n    dst[i * 4 + 1] = px[1];\n    dst[i * 4 + 2] = px[2];\n    dst[i * 4 + 3] = 255;\n",
            ),
            Rgb => body.push_str(
                "    dst[i * 3] = px[0];\n    dst[i * 3 + 1] = px[1];\n    dst[i * 3 + 2] = px[2];\n",
            ),
            other => {
                return Err(TemplateError(format!("unsupported colour conversion to {other}")));
            }
        }
        body.push_str("}\n");
        Ok(CodeFragment::new(body))
    }
}

/// `vx.channel_extract`: `(in, channel, out)` with a constant channel enum.
pub struct ChannelExtractKernel {
    signature: KernelSignature,
}

impl ChannelExtractKernel {
    pub fn new() -> Self {
        let signature = KernelSignature::new("vx.channel_extract", VX_KERNEL_CHANNEL_EXTRACT)
            .param(ParamSpec::input("in", DataKind::Image))
            .param(ParamSpec::input("channel", DataKind::Scalar))
            .param(ParamSpec::output("out", DataKind::Image));
        Self { signature }
    }
}

impl Default for ChannelExtractKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel for ChannelExtractKernel {
    fn signature(&self) -> &KernelSignature {
        &self.signature
    }

    fn validate(&self, params: &[Option<ObjectMeta>]) -> Result<Vec<Inference>, Rejection> {
        let input = input_image(params, 0)?;
        let format = require_format(0, &input, &[Rgb, Rgbx])?;
        let channel = match scalar(params, 1)?.value {
            Some(ScalarValue::Enum(value)) => value,
            _ => return Err(Rejection::new(1, "channel must be a constant enum")),
        };
        match channel_index(channel) {
            Some(index) if index < format.channels() => {}
            _ => {
                return Err(Rejection::new(
                    1,
                    format!("channel {channel:#x} is not present in {format}"),
                ))
            }
        }
        let out = output_image(params, 2)?;
        let out_format = choose_format(2, out.format, U8, &[U8])?;
        Ok(vec![Inference::image(2, input.width, input.height, out_format)])
    }

    fn emit(&self, ctx: &EmitContext<'_>) -> Result<CodeFragment, TemplateError> {
        let input = ctx.image(0)?;
        let index = channel_index(ctx.constant_enum(1)?)
            .ok_or_else(|| TemplateError("unknown channel".into()))?;
        let mut body = String::new();
        let _ = writeln!(body, "const uint8_t *src = {};", ctx.expr(0)?);
        let _ = writeln!(body, "uint8_t *dst = {};", ctx.expr(2)?);
        let _ = writeln!(body, "for (size_t i = 0; i < {}; ++i) {{", input.len());
        let _ = writeln!(
            body,
            "    dst[i] = src[i * {} + {index}];",
            input.format.channels()
        );
        body.push_str("}\n");
        Ok(CodeFragment::new(body))
    }
}

/// `vx.channel_combine`: three or four U8 planes into RGB/RGBX.
pub struct ChannelCombineKernel {
    signature: KernelSignature,
}

impl ChannelCombineKernel {
    pub fn new() -> Self {
        let signature = KernelSignature::new("vx.channel_combine", VX_KERNEL_CHANNEL_COMBINE)
            .param(ParamSpec::input("plane0", DataKind::Image))
            .param(ParamSpec::input("plane1", DataKind::Image))
            .param(ParamSpec::input("plane2", DataKind::Image))
            .param(ParamSpec::input("plane3", DataKind::Image).optional())
            .param(ParamSpec::output("out", DataKind::Image));
        Self { signature }
    }
}

impl Default for ChannelCombineKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel for ChannelCombineKernel {
    fn signature(&self) -> &KernelSignature {
        &self.signature
    }

    fn validate(&self, params: &[Option<ObjectMeta>]) -> Result<Vec<Inference>, Rejection> {
        let first = input_image(params, 0)?;
        require_format(0, &first, &[U8])?;
        let planes = if is_bound(params, 3) { 4 } else { 3 };
        for slot in 1..planes {
            let plane = input_image(params, slot)?;
            require_format(slot, &plane, &[U8])?;
            same_dims(slot, &first, &plane)?;
        }
        let out = output_image(params, 4)?;
        let format = if planes == 4 {
            choose_format(4, out.format, Rgbx, RGBX_ONLY)?
        } else {
            choose_format(4, out.format, Rgb, RGB_ONLY)?
        };
        Ok(vec![Inference::image(4, first.width, first.height, format)])
    }

    fn emit(&self, ctx: &EmitContext<'_>) -> Result<CodeFragment, TemplateError> {
        let out = ctx.image(4)?;
        let channels = out.format.channels();
        let mut body = String::new();
        for slot in 0..4 {
            if ctx.is_bound(slot) {
                let _ = writeln!(body, "const uint8_t *plane{slot} = {};", ctx.expr(slot)?);
            }
        }
        let _ = writeln!(body, "uint8_t *dst = {};", ctx.expr(4)?);
        let _ = writeln!(body, "for (size_t i = 0; i < {}; ++i) {{", out.len());
        for channel in 0..channels {
            if ctx.is_bound(channel) {
                let _ = writeln!(body, "    dst[i * {channels} + {channel}] = plane{channel}[i];");
            } else {
                let _ = writeln!(body, "    dst[i * {channels} + {channel}] = 255;");
            }
        }
        body.push_str("}\n");
        Ok(CodeFragment::new(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vxforge_ir::{ImageMeta, ScalarMeta};

    #[test]
    fn luma_weights_sum_to_unity() {
        assert_eq!(luma(0, 0, 0), 0);
        assert_eq!(luma(255, 255, 255), 255);
        assert_eq!(luma(255, 0, 0), 54);
        assert_eq!(luma(0, 255, 0), 182);
    }

    #[test]
    fn alpha_channel_requires_rgbx() {
        let kernel = ChannelExtractKernel::new();
        let params = vec![
            Some(ObjectMeta::Image(ImageMeta::new(4, 4, Rgb))),
            Some(ObjectMeta::Scalar(ScalarMeta::constant(ScalarValue::Enum(VX_CHANNEL_A)))),
            Some(ObjectMeta::Image(ImageMeta::default())),
        ];
        let rejection = kernel.validate(&params).expect_err("rgb has no alpha");
        assert_eq!(rejection.slot, 1);
    }

    #[test]
    fn combine_picks_rgbx_with_fourth_plane() {
        let kernel = ChannelCombineKernel::new();
        let plane = Some(ObjectMeta::Image(ImageMeta::new(2, 2, U8)));
        let params = vec![
            plane,
            plane,
            plane,
            plane,
            Some(ObjectMeta::Image(ImageMeta::default())),
        ];
        let inferred = kernel.validate(&params).expect("valid combine");
        assert_eq!(inferred, vec![Inference::image(4, 2, 2, Rgbx)]);
    }
}

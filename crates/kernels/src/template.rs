//! Kernel interface: validation rules and C code templates.

use crate::enums::{VX_CONVERT_POLICY_SATURATE, VX_CONVERT_POLICY_WRAP};
use crate::signature::KernelSignature;
use std::sync::Arc;
use thiserror::Error;
use vxforge_ir::{
    ArrayMeta, BorderMode, ImageMeta, NodeId, ObjectId, ObjectMeta, PixelFormat, PyramidMeta,
    ScalarMeta, ScalarType, ScalarValue,
};

/// Metadata a validation rule infers for an output or bidirectional slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Inference {
    pub slot: usize,
    pub meta: ObjectMeta,
}

impl Inference {
    pub fn image(slot: usize, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            slot,
            meta: ObjectMeta::Image(ImageMeta::new(width, height, format)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub slot: usize,
    pub reason: String,
}

impl Rejection {
    pub fn new(slot: usize, reason: impl Into<String>) -> Self {
        Self {
            slot,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TemplateError(pub String);

/// A bound parameter as the code generator sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamRef {
    pub object: ObjectId,
    pub meta: ObjectMeta,
    /// Typed pointer for images, value for scalars, `vxf_array_t *` for arrays, `void **` for pyramids.
    pub expr: String,
    pub constant: Option<ScalarValue>,
}

/// Resolved geometry of an image parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl ImageInfo {
    pub fn len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn c_type(&self) -> &'static str {
        self.format.c_type()
    }
}

pub struct EmitContext<'a> {
    pub node: NodeId,
    pub border: BorderMode,
    pub params: &'a [Option<ParamRef>],
}

impl<'a> EmitContext<'a> {
    pub fn param(&self, slot: usize) -> Result<&'a ParamRef, TemplateError> {
        self.params
            .get(slot)
            .and_then(Option::as_ref)
            .ok_or_else(|| TemplateError(format!("parameter {slot} is not bound")))
    }

    pub fn is_bound(&self, slot: usize) -> bool {
        matches!(self.params.get(slot), Some(Some(_)))
    }

    pub fn expr(&self, slot: usize) -> Result<&'a str, TemplateError> {
        Ok(self.param(slot)?.expr.as_str())
    }

    pub fn image(&self, slot: usize) -> Result<ImageInfo, TemplateError> {
        let param = self.param(slot)?;
        let meta = param
            .meta
            .as_image()
            .ok_or_else(|| TemplateError(format!("parameter {slot} is not an image")))?;
        match (meta.width, meta.height, meta.format) {
            (Some(width), Some(height), Some(format)) => Ok(ImageInfo {
                width,
                height,
                format,
            }),
            _ => Err(TemplateError(format!("image parameter {slot} is unresolved"))),
        }
    }

    pub fn scalar_type(&self, slot: usize) -> Result<ScalarType, TemplateError> {
        self.param(slot)?
            .meta
            .as_scalar()
            .and_then(|scalar| scalar.scalar_type)
            .ok_or_else(|| TemplateError(format!("parameter {slot} is not a resolved scalar")))
    }

    pub fn array(&self, slot: usize) -> Result<&'a ArrayMeta, TemplateError> {
        self.param(slot)?
            .meta
            .as_array()
            .ok_or_else(|| TemplateError(format!("parameter {slot} is not an array")))
    }

    pub fn pyramid(&self, slot: usize) -> Result<&'a PyramidMeta, TemplateError> {
        self.param(slot)?
            .meta
            .as_pyramid()
            .ok_or_else(|| TemplateError(format!("parameter {slot} is not a pyramid")))
    }

    pub fn constant_enum(&self, slot: usize) -> Result<u32, TemplateError> {
        self.param(slot)?
            .constant
            .and_then(|value| value.as_enum())
            .ok_or_else(|| TemplateError(format!("parameter {slot} is not a constant enum")))
    }

    /// `(replicate, value)` arguments for the border-aware fetch helpers.
    pub fn border_args(&self) -> (i32, i32) {
        match self.border {
            BorderMode::Replicate => (1, 0),
            BorderMode::Constant(value) => (0, value as i32),
        }
    }
}

/// C block for one node plus file-scope helpers it depends on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeFragment {
    pub body: String,
    /// `(key, text)`; the generator emits each key once per unit.
    pub declarations: Vec<(String, String)>,
}

impl CodeFragment {
    pub fn new(body: String) -> Self {
        Self {
            body,
            declarations: Vec::new(),
        }
    }

    pub fn with_declaration(mut self, key: &str, text: &str) -> Self {
        self.declarations.push((key.to_string(), text.to_string()));
        self
    }
}

/// Registry entry: signature, validation rule and code template.
///
/// Element-wise kernels implement [`Kernel::pixel_body`]; the generator wraps it in
/// the per-pixel loop, which lets fused chains share a loop. Other kernels
/// implement [`Kernel::emit`].
pub trait Kernel: Send + Sync {
    fn signature(&self) -> &KernelSignature;

    /// Receives the currently resolved metadata of every slot (outputs may be partial).
    fn validate(&self, params: &[Option<ObjectMeta>]) -> Result<Vec<Inference>, Rejection>;

    fn emit(&self, _ctx: &EmitContext<'_>) -> Result<CodeFragment, TemplateError> {
        Err(TemplateError(format!(
            "{} has no block template",
            self.signature().name
        )))
    }

    /// Per-pixel statement over `lanes`: `dst[i]`-style lvalues for images, values for scalars.
    fn pixel_body(&self, _ctx: &EmitContext<'_>, _lanes: &[Option<String>]) -> Result<String, TemplateError> {
        Err(TemplateError(format!(
            "{} is not an element-wise kernel",
            self.signature().name
        )))
    }

    /// Statement checked once before the per-pixel loop; it may `VXF_NODE_FAIL`.
    fn pixel_guard(&self, _ctx: &EmitContext<'_>, _lanes: &[Option<String>]) -> Result<Option<String>, TemplateError> {
        Ok(None)
    }

    fn name(&self) -> &str {
        &self.signature().name
    }

    fn enum_id(&self) -> u32 {
        self.signature().enum_id
    }

    fn is_elementwise(&self) -> bool {
        self.signature().elementwise
    }
}

pub type DynKernel = Arc<dyn Kernel>;

pub fn lane(lanes: &[Option<String>], slot: usize) -> Result<&str, TemplateError> {
    lanes
        .get(slot)
        .and_then(|lane| lane.as_deref())
        .ok_or_else(|| TemplateError(format!("no lane for parameter {slot}")))
}

/// Convert an integer C expression to `format`, wrapping or saturating.
pub fn convert_expr(format: PixelFormat, expr: &str, saturate: bool) -> String {
    if format.is_float() {
        return format!("(float)({expr})");
    }
    if !saturate {
        return format!("({})({expr})", format.c_type());
    }
    let helper = match format {
        PixelFormat::U16 => "vxf_sat_u16",
        PixelFormat::S16 => "vxf_sat_s16",
        PixelFormat::U32 => "vxf_sat_u32",
        PixelFormat::S32 => "vxf_sat_s32",
        _ => "vxf_sat_u8",
    };
    format!("{helper}((int64_t)({expr}))")
}

fn slot_meta(params: &[Option<ObjectMeta>], slot: usize) -> Result<&ObjectMeta, Rejection> {
    params
        .get(slot)
        .and_then(Option::as_ref)
        .ok_or_else(|| Rejection::new(slot, "parameter is not bound"))
}

pub fn is_bound(params: &[Option<ObjectMeta>], slot: usize) -> bool {
    matches!(params.get(slot), Some(Some(_)))
}

/// A fully resolved input image.
pub fn input_image(params: &[Option<ObjectMeta>], slot: usize) -> Result<ImageInfo, Rejection> {
    let meta = slot_meta(params, slot)?
        .as_image()
        .ok_or_else(|| Rejection::new(slot, "expected an image"))?;
    match (meta.width, meta.height, meta.format) {
        (Some(width), Some(height), Some(format)) => Ok(ImageInfo {
            width,
            height,
            format,
        }),
        _ => Err(Rejection::new(slot, "input image is not resolved")),
    }
}

/// Whatever is known so far about an output image.
pub fn output_image(params: &[Option<ObjectMeta>], slot: usize) -> Result<ImageMeta, Rejection> {
    slot_meta(params, slot)?
        .as_image()
        .copied()
        .ok_or_else(|| Rejection::new(slot, "expected an image"))
}

pub fn scalar(params: &[Option<ObjectMeta>], slot: usize) -> Result<ScalarMeta, Rejection> {
    slot_meta(params, slot)?
        .as_scalar()
        .copied()
        .ok_or_else(|| Rejection::new(slot, "expected a scalar"))
}

pub fn array(params: &[Option<ObjectMeta>], slot: usize) -> Result<ArrayMeta, Rejection> {
    slot_meta(params, slot)?
        .as_array()
        .copied()
        .ok_or_else(|| Rejection::new(slot, "expected an array"))
}

pub fn pyramid(params: &[Option<ObjectMeta>], slot: usize) -> Result<PyramidMeta, Rejection> {
    slot_meta(params, slot)?
        .as_pyramid()
        .copied()
        .ok_or_else(|| Rejection::new(slot, "expected a pyramid"))
}

pub fn require_format(slot: usize, image: &ImageInfo, allowed: &[PixelFormat]) -> Result<PixelFormat, Rejection> {
    if allowed.contains(&image.format) {
        Ok(image.format)
    } else {
        Err(Rejection::new(
            slot,
            format!("format {} not supported; expected one of {}", image.format, list(allowed)),
        ))
    }
}

/// The declared output format if supported, `default` when unset.
pub fn choose_format(
    slot: usize,
    declared: Option<PixelFormat>,
    default: PixelFormat,
    allowed: &[PixelFormat],
) -> Result<PixelFormat, Rejection> {
    let format = declared.unwrap_or(default);
    if allowed.contains(&format) {
        Ok(format)
    } else {
        Err(Rejection::new(
            slot,
            format!("output format {format} not supported; expected one of {}", list(allowed)),
        ))
    }
}

pub fn same_dims(slot: usize, reference: &ImageInfo, other: &ImageInfo) -> Result<(), Rejection> {
    if (reference.width, reference.height) == (other.width, other.height) {
        Ok(())
    } else {
        Err(Rejection::new(
            slot,
            format!(
                "image is {}x{}, expected {}x{}",
                other.width, other.height, reference.width, reference.height
            ),
        ))
    }
}

/// Scalar of one of `allowed` types.
pub fn scalar_of(params: &[Option<ObjectMeta>], slot: usize, allowed: &[ScalarType]) -> Result<ScalarMeta, Rejection> {
    let meta = scalar(params, slot)?;
    match meta.scalar_type {
        Some(kind) if allowed.contains(&kind) => Ok(meta),
        Some(kind) => Err(Rejection::new(slot, format!("scalar type {kind} not supported"))),
        None => Err(Rejection::new(slot, "scalar type is not resolved")),
    }
}

/// Convert policies must be compile-time constants; returns whether to saturate.
pub fn convert_policy(params: &[Option<ObjectMeta>], slot: usize) -> Result<bool, Rejection> {
    let meta = scalar(params, slot)?;
    match meta.value {
        Some(ScalarValue::Enum(VX_CONVERT_POLICY_WRAP)) => Ok(false),
        Some(ScalarValue::Enum(VX_CONVERT_POLICY_SATURATE)) => Ok(true),
        Some(other) => Err(Rejection::new(slot, format!("unknown convert policy {other:?}"))),
        None => Err(Rejection::new(slot, "convert policy must be a constant enum")),
    }
}

pub fn saturate_policy(ctx: &EmitContext<'_>, slot: usize) -> Result<bool, TemplateError> {
    match ctx.constant_enum(slot)? {
        VX_CONVERT_POLICY_WRAP => Ok(false),
        VX_CONVERT_POLICY_SATURATE => Ok(true),
        other => Err(TemplateError(format!("unknown convert policy {other:#x}"))),
    }
}

fn list(formats: &[PixelFormat]) -> String {
    formats
        .iter()
        .map(PixelFormat::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

pub const FETCH_U8: (&str, &str) = (
    "vxf_fetch_u8",
    "static inline int32_t vxf_fetch_u8(const uint8_t *src, int32_t w, int32_t h, int32_t x, int32_t y, int32_t replicate, int32_t value)
{
    if (x < 0 || y < 0 || x >= w || y >= h) {
        if (!replicate) {
            return value;
        }
        x = x < 0 ? 0 : (x >= w ? w - 1 : x);
        y = y < 0 ? 0 : (y >= h ? h - 1 : y);
    }
    return src[(size_t)y * (size_t)w + (size_t)x];
}",
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convert_expr_picks_saturation_helper() {
        assert_eq!(
            convert_expr(PixelFormat::S16, "a + b", true),
            "vxf_sat_s16((int64_t)(a + b))"
        );
        assert_eq!(convert_expr(PixelFormat::U8, "a + b", false), "(uint8_t)(a + b)");
        assert_eq!(convert_expr(PixelFormat::F32, "a", true), "(float)(a)");
    }

    #[test]
    fn choose_format_prefers_declared() {
        let allowed = [PixelFormat::U8, PixelFormat::S16];
        assert_eq!(
            choose_format(2, Some(PixelFormat::S16), PixelFormat::U8, &allowed),
            Ok(PixelFormat::S16)
        );
        assert_eq!(choose_format(2, None, PixelFormat::U8, &allowed), Ok(PixelFormat::U8));
        let rejected = choose_format(2, Some(PixelFormat::F32), PixelFormat::U8, &allowed)
            .expect_err("f32 not allowed");
        assert_eq!(rejected.slot, 2);
    }

    #[test]
    fn policy_must_be_constant() {
        let params = vec![Some(ObjectMeta::Scalar(ScalarMeta::of_type(ScalarType::Enum)))];
        assert!(convert_policy(&params, 0).is_err());
        let params = vec![Some(ObjectMeta::Scalar(ScalarMeta::constant(ScalarValue::Enum(
            VX_CONVERT_POLICY_SATURATE,
        ))))];
        assert_eq!(convert_policy(&params, 0), Ok(true));
    }
}

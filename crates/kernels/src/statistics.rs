//! Whole-image kernels: lookup tables, histograms, extrema and accumulation.

use crate::enums::*;
use crate::signature::{KernelSignature, ParamSpec};
use crate::template::{
    array, choose_format, input_image, is_bound, output_image, require_format, same_dims, scalar,
    CodeFragment, EmitContext, Inference, Kernel, Rejection, TemplateError,
};
use std::fmt::Write;
use vxforge_ir::{
    ArrayMeta, DataKind, ItemType, ObjectMeta, PixelFormat, ScalarMeta, ScalarType,
};

/// Bins produced by `vx.histogram`.
pub const HISTOGRAM_BINS: u32 = 256;

/// `vx.table_lookup`: `(in, lut, out)`; an index past the table's item count fails the node.
pub struct TableLookupKernel {
    signature: KernelSignature,
}

impl TableLookupKernel {
    pub fn new() -> Self {
        let signature = KernelSignature::new("vx.table_lookup", VX_KERNEL_TABLE_LOOKUP)
            .param(ParamSpec::input("in", DataKind::Image))
            .param(ParamSpec::input("lut", DataKind::Array))
            .param(ParamSpec::output("out", DataKind::Image));
        Self { signature }
    }
}

impl Default for TableLookupKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel for TableLookupKernel {
    fn signature(&self) -> &KernelSignature {
        &self.signature
    }

    fn validate(&self, params: &[Option<ObjectMeta>]) -> Result<Vec<Inference>, Rejection> {
        let input = input_image(params, 0)?;
        require_format(0, &input, &[PixelFormat::U8])?;
        let lut = array(params, 1)?;
        if lut.item_type != Some(ItemType::U8) {
            return Err(Rejection::new(1, "lookup table must hold u8 items"));
        }
        let out = output_image(params, 2)?;
        let format = choose_format(2, out.format, PixelFormat::U8, &[PixelFormat::U8])?;
        Ok(vec![Inference::image(2, input.width, input.height, format)])
    }

    fn emit(&self, ctx: &EmitContext<'_>) -> Result<CodeFragment, TemplateError> {
        let input = ctx.image(0)?;
        let mut body = String::new();
        let _ = writeln!(body, "const uint8_t *src = {};", ctx.expr(0)?);
        let _ = writeln!(body, "const vxf_array_t *lut = {};", ctx.expr(1)?);
        body.push_str("const uint8_t *table = (const uint8_t *)lut->items;\n");
        let _ = writeln!(body, "uint8_t *dst = {};", ctx.expr(2)?);
        let _ = writeln!(body, "for (size_t i = 0; i < {}; ++i) {{", input.len());
        body.push_str("    if ((uint64_t)src[i] >= lut->num_items) VXF_NODE_FAIL;\n");
        body.push_str("    dst[i] = table[src[i]];\n");
        body.push_str("}\n");
        Ok(CodeFragment::new(body))
    }
}

/// `vx.histogram`: `(in, distribution)` with 256 u32 bins, one per U8 value.
pub struct HistogramKernel {
    signature: KernelSignature,
}

impl HistogramKernel {
    pub fn new() -> Self {
        let signature = KernelSignature::new("vx.histogram", VX_KERNEL_HISTOGRAM)
            .param(ParamSpec::input("in", DataKind::Image))
            .param(ParamSpec::output("distribution", DataKind::Array));
        Self { signature }
    }
}

impl Default for HistogramKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel for HistogramKernel {
    fn signature(&self) -> &KernelSignature {
        &self.signature
    }

    fn validate(&self, params: &[Option<ObjectMeta>]) -> Result<Vec<Inference>, Rejection> {
        let input = input_image(params, 0)?;
        require_format(0, &input, &[PixelFormat::U8])?;
        let declared = array(params, 1)?;
        if matches!(declared.item_type, Some(item) if item != ItemType::U32) {
            return Err(Rejection::new(1, "histogram bins are u32"));
        }
        let capacity = declared.capacity.unwrap_or(HISTOGRAM_BINS);
        if capacity < HISTOGRAM_BINS {
            return Err(Rejection::new(
                1,
                format!("capacity {capacity} is below {HISTOGRAM_BINS} bins"),
            ));
        }
        Ok(vec![Inference {
            slot: 1,
            meta: ObjectMeta::Array(ArrayMeta::new(ItemType::U32, capacity)),
        }])
    }

    fn emit(&self, ctx: &EmitContext<'_>) -> Result<CodeFragment, TemplateError> {
        let input = ctx.image(0)?;
        let mut body = String::new();
        let _ = writeln!(body, "const uint8_t *src = {};", ctx.expr(0)?);
        let _ = writeln!(body, "vxf_array_t *hist = {};", ctx.expr(1)?);
        body.push_str("uint32_t *bins = (uint32_t *)hist->items;\n");
        let _ = writeln!(body, "for (size_t k = 0; k < {HISTOGRAM_BINS}; ++k) {{");
        body.push_str("    bins[k] = 0;\n}\n");
        let _ = writeln!(body, "for (size_t i = 0; i < {}; ++i) {{", input.len());
        body.push_str("    bins[src[i]] += 1u;\n}\n");
        let _ = writeln!(body, "hist->num_items = {HISTOGRAM_BINS};");
        Ok(CodeFragment::new(body))
    }
}

/// `vx.minmaxloc`: `(in, min, max, min_loc?, max_loc?, min_count?, max_count?)`.
///
/// Location arrays are filled in raster order up to their capacity; the
/// counts always cover every occurrence.
pub struct MinMaxLocKernel {
    signature: KernelSignature,
}

impl MinMaxLocKernel {
    pub fn new() -> Self {
        let signature = KernelSignature::new("vx.minmaxloc", VX_KERNEL_MINMAXLOC)
            .param(ParamSpec::input("in", DataKind::Image))
            .param(ParamSpec::output("min", DataKind::Scalar))
            .param(ParamSpec::output("max", DataKind::Scalar))
            .param(ParamSpec::output("min_loc", DataKind::Array).optional())
            .param(ParamSpec::output("max_loc", DataKind::Array).optional())
            .param(ParamSpec::output("min_count", DataKind::Scalar).optional())
            .param(ParamSpec::output("max_count", DataKind::Scalar).optional());
        Self { signature }
    }
}

impl Default for MinMaxLocKernel {
    fn default() -> Self {
        Self::new()
    }
}

fn scalar_output(params: &[Option<ObjectMeta>], slot: usize, kind: ScalarType) -> Result<Inference, Rejection> {
    let declared = scalar(params, slot)?;
    match declared.scalar_type {
        Some(existing) if existing != kind => Err(Rejection::new(
            slot,
            format!("expected a {kind} scalar, found {existing}"),
        )),
        _ => Ok(Inference {
            slot,
            meta: ObjectMeta::Scalar(ScalarMeta::of_type(kind)),
        }),
    }
}

impl Kernel for MinMaxLocKernel {
    fn signature(&self) -> &KernelSignature {
        &self.signature
    }

    fn validate(&self, params: &[Option<ObjectMeta>]) -> Result<Vec<Inference>, Rejection> {
        let input = input_image(params, 0)?;
        let format = require_format(0, &input, &[PixelFormat::U8, PixelFormat::S16])?;
        let value_type = ScalarType::for_format(format)
            .ok_or_else(|| Rejection::new(0, format!("no scalar type for {format}")))?;
        let mut inferred = vec![
            scalar_output(params, 1, value_type)?,
            scalar_output(params, 2, value_type)?,
        ];
        for slot in [3, 4] {
            if !is_bound(params, slot) {
                continue;
            }
            let declared = array(params, slot)?;
            if matches!(declared.item_type, Some(item) if item != ItemType::Coordinates2d) {
                return Err(Rejection::new(slot, "locations are coordinates2d items"));
            }
            let capacity = match declared.capacity {
                Some(capacity) => capacity,
                None => input.width.checked_mul(input.height).ok_or_else(|| {
                    Rejection::new(slot, "image too large for an inferred location capacity")
                })?,
            };
            inferred.push(Inference {
                slot,
                meta: ObjectMeta::Array(ArrayMeta::new(ItemType::Coordinates2d, capacity)),
            });
        }
        for slot in [5, 6] {
            if is_bound(params, slot) {
                inferred.push(scalar_output(params, slot, ScalarType::U32)?);
            }
        }
        Ok(inferred)
    }

    fn emit(&self, ctx: &EmitContext<'_>) -> Result<CodeFragment, TemplateError> {
        let input = ctx.image(0)?;
        if input.is_empty() {
            return Err(TemplateError("minmaxloc needs a non-empty image".into()));
        }
        let c_type = input.c_type();
        let mut body = String::new();
        let _ = writeln!(body, "const {c_type} *src = {};", ctx.expr(0)?);
        let _ = writeln!(body, "{c_type} lo = src[0];");
        let _ = writeln!(body, "{c_type} hi = src[0];");
        let _ = writeln!(body, "for (size_t i = 1; i < {}; ++i) {{", input.len());
        body.push_str("    if (src[i] < lo) lo = src[i];\n");
        body.push_str("    if (src[i] > hi) hi = src[i];\n");
        body.push_str("}\n");
        let _ = writeln!(body, "{} = lo;", ctx.expr(1)?);
        let _ = writeln!(body, "{} = hi;", ctx.expr(2)?);

        if !(3..=6).any(|slot| ctx.is_bound(slot)) {
            return Ok(CodeFragment::new(body));
        }
        body.push_str("uint32_t lo_count = 0;\nuint32_t hi_count = 0;\n");
        for (slot, name) in [(3, "lo_loc"), (4, "hi_loc")] {
            if ctx.is_bound(slot) {
                let _ = writeln!(body, "vxf_array_t *{name} = {};", ctx.expr(slot)?);
                let _ = writeln!(body, "{name}->num_items = 0;");
            }
        }
        let _ = writeln!(body, "for (int32_t y = 0; y < {}; ++y) {{", input.height);
        let _ = writeln!(body, "    for (int32_t x = 0; x < {}; ++x) {{", input.width);
        let _ = writeln!(
            body,
            "        const {c_type} value = src[(size_t)y * {} + (size_t)x];",
            input.width
        );
        for (slot, extreme, counter, name) in [(3, "lo", "lo_count", "lo_loc"), (4, "hi", "hi_count", "hi_loc")] {
            let _ = writeln!(body, "        if (value == {extreme}) {{");
            if ctx.is_bound(slot) {
                let _ = writeln!(body, "            if ({name}->num_items < {name}->capacity) {{");
                let _ = writeln!(
                    body,
                    "                vxf_coordinates2d_t *at = (vxf_coordinates2d_t *){name}->items + {name}->num_items;"
                );
                body.push_str("                at->x = x;\n                at->y = y;\n");
                let _ = writeln!(body, "                {name}->num_items += 1;");
                body.push_str("            }\n");
            }
            let _ = writeln!(body, "            {counter} += 1u;");
            body.push_str("        }\n");
        }
        body.push_str("    }\n}\n");
        for (slot, counter) in [(5, "lo_count"), (6, "hi_count")] {
            if ctx.is_bound(slot) {
                let _ = writeln!(body, "{} = {counter};", ctx.expr(slot)?);
            }
        }
        Ok(CodeFragment::new(body))
    }
}

/// `vx.accumulate`: `(in, accum)`; adds a U8 image into an S16 accumulator, saturating.
pub struct AccumulateKernel {
    signature: KernelSignature,
}

impl AccumulateKernel {
    pub fn new() -> Self {
        let signature = KernelSignature::new("vx.accumulate", VX_KERNEL_ACCUMULATE)
            .param(ParamSpec::input("in", DataKind::Image))
            .param(ParamSpec::bidirectional("accum", DataKind::Image));
        Self { signature }
    }
}

impl Default for AccumulateKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel for AccumulateKernel {
    fn signature(&self) -> &KernelSignature {
        &self.signature
    }

    fn validate(&self, params: &[Option<ObjectMeta>]) -> Result<Vec<Inference>, Rejection> {
        let input = input_image(params, 0)?;
        require_format(0, &input, &[PixelFormat::U8])?;
        let accum = output_image(params, 1)?;
        if !accum.is_resolved() {
            return Err(Rejection::new(1, "accumulator must be fully specified"));
        }
        let accum = input_image(params, 1)?;
        require_format(1, &accum, &[PixelFormat::S16])?;
        same_dims(1, &input, &accum)?;
        Ok(Vec::new())
    }

    fn emit(&self, ctx: &EmitContext<'_>) -> Result<CodeFragment, TemplateError> {
        let input = ctx.image(0)?;
        let mut body = String::new();
        let _ = writeln!(body, "const uint8_t *src = {};", ctx.expr(0)?);
        let _ = writeln!(body, "int16_t *dst = {};", ctx.expr(1)?);
        let _ = writeln!(body, "for (size_t i = 0; i < {}; ++i) {{", input.len());
        body.push_str("    dst[i] = vxf_sat_s16((int64_t)dst[i] + (int64_t)src[i]);\n");
        body.push_str("}\n");
        Ok(CodeFragment::new(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::ParamRef;
    use vxforge_ir::{BorderMode, ImageMeta, NodeId, ObjectId};

    #[test]
    fn histogram_rejects_small_capacity() {
        let kernel = HistogramKernel::new();
        let params = vec![
            Some(ObjectMeta::Image(ImageMeta::new(4, 4, PixelFormat::U8))),
            Some(ObjectMeta::Array(ArrayMeta::new(ItemType::U32, 16))),
        ];
        let rejection = kernel.validate(&params).expect_err("16 bins");
        assert_eq!(rejection.slot, 1);
    }

    #[test]
    fn histogram_infers_bins_for_virtual_output() {
        let kernel = HistogramKernel::new();
        let params = vec![
            Some(ObjectMeta::Image(ImageMeta::new(4, 4, PixelFormat::U8))),
            Some(ObjectMeta::Array(ArrayMeta::default())),
        ];
        let inferred = kernel.validate(&params).expect("valid histogram");
        assert_eq!(
            inferred[0].meta,
            ObjectMeta::Array(ArrayMeta::new(ItemType::U32, HISTOGRAM_BINS))
        );
    }

    #[test]
    fn minmaxloc_types_follow_input() {
        let kernel = MinMaxLocKernel::new();
        let params = vec![
            Some(ObjectMeta::Image(ImageMeta::new(3, 2, PixelFormat::S16))),
            Some(ObjectMeta::Scalar(ScalarMeta::default())),
            Some(ObjectMeta::Scalar(ScalarMeta::default())),
            Some(ObjectMeta::Array(ArrayMeta::default())),
            None,
            None,
            Some(ObjectMeta::Scalar(ScalarMeta::default())),
        ];
        let inferred = kernel.validate(&params).expect("valid minmaxloc");
        let slots: Vec<usize> = inferred.iter().map(|inference| inference.slot).collect();
        assert_eq!(slots, vec![1, 2, 3, 6]);
        assert_eq!(
            inferred[0].meta,
            ObjectMeta::Scalar(ScalarMeta::of_type(ScalarType::S16))
        );
        assert_eq!(
            inferred[2].meta,
            ObjectMeta::Array(ArrayMeta::new(ItemType::Coordinates2d, 6))
        );
    }

    #[test]
    fn minmaxloc_rejects_unbounded_location_capacity() {
        let kernel = MinMaxLocKernel::new();
        let mut params = vec![
            Some(ObjectMeta::Image(ImageMeta::new(65536, 65536, PixelFormat::U8))),
            Some(ObjectMeta::Scalar(ScalarMeta::default())),
            Some(ObjectMeta::Scalar(ScalarMeta::default())),
            Some(ObjectMeta::Array(ArrayMeta::default())),
            None,
            None,
            None,
        ];
        let rejection = kernel.validate(&params).expect_err("2^32 locations");
        assert_eq!(rejection.slot, 3);

        params[3] = Some(ObjectMeta::Array(ArrayMeta::new(ItemType::Coordinates2d, 16)));
        let inferred = kernel.validate(&params).expect("declared capacity");
        assert_eq!(
            inferred[2].meta,
            ObjectMeta::Array(ArrayMeta::new(ItemType::Coordinates2d, 16))
        );
    }

    #[test]
    fn lookup_fails_node_past_table_end() -> Result<(), TemplateError> {
        let kernel = TableLookupKernel::new();
        let image = ObjectMeta::Image(ImageMeta::new(2, 2, PixelFormat::U8));
        let params = vec![
            Some(ParamRef {
                object: ObjectId(0),
                meta: image,
                expr: "v0".into(),
                constant: None,
            }),
            Some(ParamRef {
                object: ObjectId(1),
                meta: ObjectMeta::Array(ArrayMeta::new(ItemType::U8, 8)),
                expr: "a1".into(),
                constant: None,
            }),
            Some(ParamRef {
                object: ObjectId(2),
                meta: image,
                expr: "v2".into(),
                constant: None,
            }),
        ];
        let ctx = EmitContext {
            node: NodeId(0),
            border: BorderMode::Replicate,
            params: &params,
        };
        let fragment = kernel.emit(&ctx)?;
        assert!(fragment.body.contains("if ((uint64_t)src[i] >= lut->num_items) VXF_NODE_FAIL;"));
        Ok(())
    }
}

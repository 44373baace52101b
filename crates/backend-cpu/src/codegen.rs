//! C code generation for verified graphs.
//!
//! One translation unit per graph. It exports a fixed ABI:
//!
//! ```text
//! uint32_t vxf_abi_version(void);
//! uint32_t vxf_object_count(void);
//! int32_t  vxf_process_graph(void *const *objects, uint32_t count);
//! ```
//!
//! `objects` holds one handle per entry object in registration order:
//! typed pixel storage for images, a value slot for scalars, a
//! `vxf_array_t` header for arrays and a table of per-level (or per-slot)
//! pointers for pyramids and delays. The return value is `0` on success,
//! negative for ABI misuse and `k + 1` when the node at schedule position
//! `k` reports a runtime failure.

use crate::planner::{Storage, StoragePlan};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use tracing::debug;
use vxforge_ir::{NodeId, ObjectId, ObjectMeta, VerifiedIr, VerifiedNode, VxError, VxResult};
use vxforge_kernels::{CodeFragment, EmitContext, KernelRegistry, ParamRef, TemplateError};

pub const ABI_VERSION: u32 = 1;
pub const ENTRY_SYMBOL: &str = "vxf_process_graph";
pub const ABI_VERSION_SYMBOL: &str = "vxf_abi_version";
pub const OBJECT_COUNT_SYMBOL: &str = "vxf_object_count";

/// Status codes below zero reported by the entry point itself.
pub const STATUS_BAD_COUNT: i32 = -1;
pub const STATUS_NULL_HANDLE: i32 = -2;
pub const STATUS_ALLOCATION: i32 = -3;

const PRELUDE: &str = r#"#include <stddef.h>
#include <stdint.h>
#include <stdlib.h>
#include <string.h>
#include <math.h>

typedef struct {
    void *items;
    uint64_t num_items;
    uint64_t capacity;
} vxf_array_t;

typedef struct {
    int32_t x;
    int32_t y;
} vxf_coordinates2d_t;

static inline int64_t vxf_clamp_i64(int64_t v, int64_t lo, int64_t hi)
{
    return v < lo ? lo : (v > hi ? hi : v);
}

static inline double vxf_clamp_f64(double v, double lo, double hi)
{
    return v < lo ? lo : (v > hi ? hi : v);
}

/* Truncates toward zero; NaN maps to 0 and the range covers every integer pixel format. */
static inline int64_t vxf_trunc_f64(double v)
{
    if (v != v) {
        return 0;
    }
    return (int64_t)vxf_clamp_f64(v, -2147483648.0, 4294967295.0);
}

static inline uint8_t vxf_sat_u8(int64_t v) { return (uint8_t)vxf_clamp_i64(v, 0, 255); }
static inline uint16_t vxf_sat_u16(int64_t v) { return (uint16_t)vxf_clamp_i64(v, 0, 65535); }
static inline int16_t vxf_sat_s16(int64_t v) { return (int16_t)vxf_clamp_i64(v, -32768, 32767); }
static inline uint32_t vxf_sat_u32(int64_t v) { return (uint32_t)vxf_clamp_i64(v, 0, 4294967295LL); }
static inline int32_t vxf_sat_s32(int64_t v) { return (int32_t)vxf_clamp_i64(v, -2147483648LL, 2147483647LL); }
"#;

/// Source nodes behind one schedule position, for decoding failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeOrigin {
    pub position: usize,
    pub nodes: Vec<NodeId>,
    pub kernels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedUnit {
    pub source: String,
    /// Handle order expected by the entry point.
    pub entries: Vec<ObjectId>,
    pub origins: Vec<NodeOrigin>,
    /// blake3 of `source`, hex encoded.
    pub fingerprint: String,
}

impl GeneratedUnit {
    /// Schedule position decoded from a positive status.
    pub fn origin_for_status(&self, status: i32) -> Option<&NodeOrigin> {
        let position = usize::try_from(status).ok()?.checked_sub(1)?;
        self.origins.get(position)
    }
}

/// Deduplicated file-scope helpers in first-seen order.
#[derive(Default)]
struct Declarations {
    entries: Vec<(String, String)>,
}

impl Declarations {
    fn extend(&mut self, fragment: &CodeFragment) {
        for (key, text) in &fragment.declarations {
            if !self.entries.iter().any(|(existing, _)| existing == key) {
                self.entries.push((key.clone(), text.clone()));
            }
        }
    }
}

pub struct CodeGenerator<'a> {
    registry: &'a KernelRegistry,
}

impl<'a> CodeGenerator<'a> {
    pub fn new(registry: &'a KernelRegistry) -> Self {
        Self { registry }
    }

    pub fn generate(&self, ir: &VerifiedIr) -> VxResult<GeneratedUnit> {
        let plan = StoragePlan::build(ir)?;
        let mut declarations = Declarations::default();
        let mut blocks = Vec::with_capacity(ir.nodes.len());
        let mut origins = Vec::with_capacity(ir.nodes.len());

        for (position, node) in ir.nodes.iter().enumerate() {
            let fragment = if node.elementwise {
                self.elementwise_block(ir, &plan, node)?
            } else {
                self.kernel_block(ir, &plan, node)?
            };
            declarations.extend(&fragment);
            blocks.push(node_block(position, node, &fragment.body));
            origins.push(NodeOrigin {
                position,
                nodes: node.origins(),
                kernels: node.kernels().into_iter().map(str::to_string).collect(),
            });
        }

        let source = assemble(ir, &plan, &declarations, &blocks)?;
        let fingerprint = blake3::hash(source.as_bytes()).to_hex().to_string();
        debug!(
            nodes = ir.nodes.len(),
            entries = plan.entries().len(),
            fingerprint = %fingerprint,
            "generated C unit"
        );
        Ok(GeneratedUnit {
            source,
            entries: plan.entries().to_vec(),
            origins,
            fingerprint,
        })
    }

    fn kernel_block(&self, ir: &VerifiedIr, plan: &StoragePlan, node: &VerifiedNode) -> VxResult<CodeFragment> {
        let step = &node.steps[0];
        let kernel = self.registry.find(&step.kernel).ok_or_else(|| VxError::UnknownKernel {
            node: step.origin,
            kernel: step.kernel.clone(),
        })?;
        let params = param_refs(ir, plan, &step.params)?;
        let ctx = EmitContext {
            node: step.origin,
            border: step.border,
            params: &params,
        };
        kernel.emit(&ctx).map_err(|err| VxError::Template {
            node: step.origin,
            reason: err.to_string(),
        })
    }

    /// One loop over the shared element count; fused intermediates live in `tN` locals.
    fn elementwise_block(&self, ir: &VerifiedIr, plan: &StoragePlan, node: &VerifiedNode) -> VxResult<CodeFragment> {
        let count = elementwise_extent(ir, node).ok_or_else(|| VxError::Template {
            node: node.id(),
            reason: "element-wise node has no resolved image".to_string(),
        })?;

        let mut guards = String::new();
        let mut body = String::new();
        let _ = writeln!(body, "for (size_t i = 0; i < (size_t){count}u; ++i) {{");
        for &object in &node.internal {
            let c_type = ir
                .meta(object)
                .and_then(ObjectMeta::as_image)
                .and_then(|image| image.format)
                .map(|format| format.c_type())
                .ok_or_else(|| VxError::Template {
                    node: node.id(),
                    reason: format!("fused intermediate {object} has no format"),
                })?;
            let _ = writeln!(body, "    {c_type} t{};", object.0);
        }

        for step in &node.steps {
            let kernel = self.registry.find(&step.kernel).ok_or_else(|| VxError::UnknownKernel {
                node: step.origin,
                kernel: step.kernel.clone(),
            })?;
            let params = param_refs(ir, plan, &step.params)?;
            let lanes: Vec<Option<String>> = params
                .iter()
                .map(|param| param.as_ref().and_then(|param| lane_for(plan, param)))
                .collect();
            let ctx = EmitContext {
                node: step.origin,
                border: step.border,
                params: &params,
            };
            let template_error = |err: TemplateError| VxError::Template {
                node: step.origin,
                reason: err.to_string(),
            };
            if let Some(guard) = kernel.pixel_guard(&ctx, &lanes).map_err(template_error)? {
                let _ = writeln!(guards, "{guard}");
            }
            let statement = kernel.pixel_body(&ctx, &lanes).map_err(template_error)?;
            let _ = writeln!(body, "    {statement}");
        }
        body.push_str("}\n");
        guards.push_str(&body);
        Ok(CodeFragment::new(guards))
    }
}

/// Channel elements per image of the node; every image of an element-wise node agrees.
fn elementwise_extent(ir: &VerifiedIr, node: &VerifiedNode) -> Option<usize> {
    node.referenced().into_iter().find_map(|id| {
        let image = ir.meta(id)?.as_image()?;
        Some(image.element_count()? * image.format?.channels())
    })
}

fn param_refs(ir: &VerifiedIr, plan: &StoragePlan, params: &[Option<ObjectId>]) -> VxResult<Vec<Option<ParamRef>>> {
    params
        .iter()
        .map(|param| param.map(|id| param_ref(ir, plan, id)).transpose())
        .collect()
}

fn param_ref(ir: &VerifiedIr, plan: &StoragePlan, id: ObjectId) -> VxResult<ParamRef> {
    let resolved = ir
        .object(id)
        .ok_or_else(|| VxError::InvalidState(format!("{id} is not part of the verified graph")))?;
    let storage = plan
        .storage(id)
        .ok_or_else(|| VxError::InvalidState(format!("{id} has no storage")))?;
    Ok(ParamRef {
        object: id,
        meta: resolved.resolved,
        expr: object_expr(id, &resolved.resolved, storage)?,
        constant: resolved.object.constant(),
    })
}

/// C expression naming the object inside `vxf_process_graph`.
fn object_expr(id: ObjectId, meta: &ObjectMeta, storage: Storage) -> VxResult<String> {
    let unresolved = || VxError::InvalidState(format!("{id} reached code generation unresolved"));
    let expr = match (meta, storage) {
        (_, Storage::Constant(value)) => value.c_literal(),
        (ObjectMeta::Image(_), Storage::Internal) => format!("t{}", id.0),
        (ObjectMeta::Image(image), Storage::Entry(index)) => {
            let c_type = image.format.ok_or_else(unresolved)?.c_type();
            format!("(({c_type} *)objects[{index}])")
        }
        (ObjectMeta::Image(image), Storage::DelaySlot { entry, age }) => {
            let c_type = image.format.ok_or_else(unresolved)?.c_type();
            format!("(({c_type} *)((void *const *)objects[{entry}])[{age}])")
        }
        (ObjectMeta::Image(_), Storage::Local) => format!("v{}", id.0),
        (ObjectMeta::Scalar(scalar), Storage::Entry(index)) => {
            let c_type = scalar.scalar_type.ok_or_else(unresolved)?.c_type();
            format!("(*({c_type} *)objects[{index}])")
        }
        (ObjectMeta::Scalar(_), Storage::Local) => format!("s{}", id.0),
        (ObjectMeta::Array(_), Storage::Entry(index)) => format!("((vxf_array_t *)objects[{index}])"),
        (ObjectMeta::Array(_), Storage::Local) => format!("(&a{})", id.0),
        (ObjectMeta::Pyramid(_), Storage::Entry(index)) => format!("((void **)objects[{index}])"),
        (ObjectMeta::Pyramid(_), Storage::Local) => format!("p{}", id.0),
        (meta, storage) => {
            return Err(VxError::InvalidState(format!(
                "{id} ({}) cannot be placed as {storage:?}",
                meta.kind()
            )))
        }
    };
    Ok(expr)
}

/// Per-element lane: `ptr[i]` for image storage, the value itself for scalars.
fn lane_for(plan: &StoragePlan, param: &ParamRef) -> Option<String> {
    match (&param.meta, plan.storage(param.object)?) {
        (ObjectMeta::Image(_), Storage::Internal) => Some(param.expr.clone()),
        (ObjectMeta::Image(_), _) => Some(format!("{}[i]", param.expr)),
        (ObjectMeta::Scalar(_), _) => Some(param.expr.clone()),
        _ => None,
    }
}

fn node_block(position: usize, node: &VerifiedNode, body: &str) -> String {
    let origins: Vec<String> = node.origins().iter().map(NodeId::to_string).collect();
    let mut block = String::new();
    let _ = writeln!(
        block,
        "    /* [{position}] {} ({}) */",
        node.kernels().join(" + "),
        origins.join(", ")
    );
    block.push_str("    {\n");
    let _ = writeln!(
        block,
        "#define VXF_NODE_FAIL do {{ status = {}; goto done; }} while (0)",
        position + 1
    );
    for line in body.lines() {
        if line.is_empty() {
            block.push('\n');
        } else {
            let _ = writeln!(block, "        {line}");
        }
    }
    block.push_str("#undef VXF_NODE_FAIL\n");
    block.push_str("    }\n");
    block
}

fn assemble(ir: &VerifiedIr, plan: &StoragePlan, declarations: &Declarations, blocks: &[String]) -> VxResult<String> {
    let entries = plan.entries();
    let mut src = String::new();
    src.push_str("/* Generated by vxforge. */\n");
    src.push_str(PRELUDE);
    let _ = writeln!(src, "\n#define VXF_ABI_VERSION {ABI_VERSION}u");
    let _ = writeln!(src, "#define VXF_OBJECT_COUNT {}u\n", entries.len());
    for (_, text) in &declarations.entries {
        src.push_str(text.trim_end());
        src.push_str("\n\n");
    }
    let _ = writeln!(src, "uint32_t {ABI_VERSION_SYMBOL}(void) {{ return VXF_ABI_VERSION; }}");
    let _ = writeln!(src, "uint32_t {OBJECT_COUNT_SYMBOL}(void) {{ return VXF_OBJECT_COUNT; }}\n");

    let _ = writeln!(src, "int32_t {ENTRY_SYMBOL}(void *const *objects, uint32_t count)");
    src.push_str("{\n");
    src.push_str("    int32_t status = 0;\n");

    let locals: Vec<(ObjectId, ObjectMeta)> = plan
        .locals()
        .map(|id| {
            ir.meta(id)
                .copied()
                .map(|meta| (id, meta))
                .ok_or_else(|| VxError::InvalidState(format!("{id} has no metadata")))
        })
        .collect::<VxResult<_>>()?;
    for (id, meta) in &locals {
        declare_local(&mut src, *id, meta)?;
    }
    let _ = writeln!(src, "    if (count != VXF_OBJECT_COUNT) {{\n        return {STATUS_BAD_COUNT};\n    }}");
    let _ = writeln!(
        src,
        "    for (uint32_t k = 0; k < count; ++k) {{\n        if (objects[k] == NULL) {{\n            return {STATUS_NULL_HANDLE};\n        }}\n    }}"
    );
    for (index, id) in entries.iter().enumerate() {
        let tables = match ir.meta(*id) {
            Some(ObjectMeta::Delay(delay)) => Some(delay.slots),
            Some(ObjectMeta::Pyramid(pyramid)) => pyramid.levels,
            _ => None,
        };
        if let Some(len) = tables {
            let _ = writeln!(
                src,
                "    for (uint32_t k = 0; k < {len}u; ++k) {{\n        if (((void *const *)objects[{index}])[k] == NULL) {{\n            return {STATUS_NULL_HANDLE};\n        }}\n    }}"
            );
        }
    }
    for (id, meta) in &locals {
        allocate_local(&mut src, *id, meta)?;
    }
    src.push('\n');
    for block in blocks {
        src.push_str(block);
    }
    src.push_str("\ndone:\n");
    for (id, meta) in &locals {
        free_local(&mut src, *id, meta);
    }
    src.push_str("    return status;\n}\n");
    Ok(src)
}

fn declare_local(src: &mut String, id: ObjectId, meta: &ObjectMeta) -> VxResult<()> {
    let n = id.0;
    match meta {
        ObjectMeta::Image(image) => {
            let format = image
                .format
                .ok_or_else(|| VxError::InvalidState(format!("{id} has no format")))?;
            let _ = writeln!(src, "    {} *v{n} = NULL;", format.c_type());
        }
        ObjectMeta::Scalar(scalar) => {
            let scalar_type = scalar
                .scalar_type
                .ok_or_else(|| VxError::InvalidState(format!("{id} has no scalar type")))?;
            let _ = writeln!(src, "    {} s{n} = 0;", scalar_type.c_type());
        }
        ObjectMeta::Array(_) => {
            let _ = writeln!(src, "    vxf_array_t a{n} = {{ NULL, 0, 0 }};");
        }
        ObjectMeta::Pyramid(pyramid) => {
            let levels = pyramid
                .levels
                .ok_or_else(|| VxError::InvalidState(format!("{id} has no level count")))?;
            let _ = writeln!(src, "    void *p{n}[{}] = {{ 0 }};", levels.max(1));
        }
        ObjectMeta::Delay(_) => {
            return Err(VxError::InvalidState(format!("{id}: delays are never graph-local")));
        }
    }
    Ok(())
}

fn allocate_local(src: &mut String, id: ObjectId, meta: &ObjectMeta) -> VxResult<()> {
    let n = id.0;
    let missing = || VxError::InvalidState(format!("{id} is not fully resolved"));
    let fail = format!("status = {STATUS_ALLOCATION}; goto done;");
    match meta {
        ObjectMeta::Image(image) => {
            let format = image.format.ok_or_else(missing)?;
            let elements = image.element_count().ok_or_else(missing)? * format.channels();
            let _ = writeln!(
                src,
                "    v{n} = ({} *)calloc({}u, sizeof({}));\n    if (v{n} == NULL) {{ {fail} }}",
                format.c_type(),
                elements.max(1),
                format.c_type()
            );
        }
        ObjectMeta::Array(array) => {
            let item = array.item_type.ok_or_else(missing)?;
            let capacity = array.capacity.ok_or_else(missing)?;
            let _ = writeln!(
                src,
                "    a{n}.items = calloc({}u, sizeof({}));\n    a{n}.capacity = {capacity}u;\n    if (a{n}.items == NULL) {{ {fail} }}",
                capacity.max(1),
                item.c_type()
            );
        }
        ObjectMeta::Pyramid(pyramid) => {
            let levels = pyramid.levels.ok_or_else(missing)?;
            let format = pyramid.format.ok_or_else(missing)?;
            for level in 0..levels {
                let (width, height) = pyramid.level_dims(level).ok_or_else(missing)?;
                let elements = width as usize * height as usize * format.channels();
                let _ = writeln!(
                    src,
                    "    p{n}[{level}] = calloc({}u, sizeof({}));\n    if (p{n}[{level}] == NULL) {{ {fail} }}",
                    elements.max(1),
                    format.c_type()
                );
            }
        }
        ObjectMeta::Scalar(_) | ObjectMeta::Delay(_) => {}
    }
    Ok(())
}

fn free_local(src: &mut String, id: ObjectId, meta: &ObjectMeta) {
    let n = id.0;
    match meta {
        ObjectMeta::Image(_) => {
            let _ = writeln!(src, "    free(v{n});");
        }
        ObjectMeta::Array(_) => {
            let _ = writeln!(src, "    free(a{n}.items);");
        }
        ObjectMeta::Pyramid(pyramid) => {
            let _ = writeln!(
                src,
                "    for (uint32_t k = 0; k < {}u; ++k) {{\n        free(p{n}[k]);\n    }}",
                pyramid.levels.unwrap_or(0).max(1)
            );
        }
        ObjectMeta::Scalar(_) | ObjectMeta::Delay(_) => {}
    }
}

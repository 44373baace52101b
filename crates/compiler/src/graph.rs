//! User-facing graph with a verify/optimize/compile lifecycle.
//!
//! Every structural edit drops the verified IR and any compiled library, so
//! the next `process` re-runs the whole pipeline.

use crate::config::CompilerConfig;
use crate::pipeline::CompilerPipeline;
use std::sync::Arc;
use tracing::{debug, info};
use vxforge_backend_cpu::{Bindings, CompiledGraph, GeneratedUnit};
use vxforge_ir::{
    BorderMode, GraphIr, ImageMeta, ItemType, Node, NodeId, ObjectId, PixelFormat, ScalarType, ScalarValue,
    VerifiedIr, VxError, VxResult,
};
use vxforge_optimizer::OptimizationReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum GraphState {
    Unverified,
    Verified,
    Compiled,
}

pub struct Graph {
    ir: GraphIr,
    pipeline: Arc<CompilerPipeline>,
    verified: Option<VerifiedIr>,
    optimized: Option<(VerifiedIr, OptimizationReport)>,
    unit: Option<GeneratedUnit>,
    compiled: Option<CompiledGraph>,
}

impl Graph {
    pub fn new(pipeline: Arc<CompilerPipeline>) -> Self {
        Self::from_ir(GraphIr::new(), pipeline)
    }

    pub fn with_config(config: CompilerConfig) -> VxResult<Self> {
        Ok(Self::new(Arc::new(CompilerPipeline::new(config)?)))
    }

    pub fn from_ir(ir: GraphIr, pipeline: Arc<CompilerPipeline>) -> Self {
        Self {
            ir,
            pipeline,
            verified: None,
            optimized: None,
            unit: None,
            compiled: None,
        }
    }

    pub fn ir(&self) -> &GraphIr {
        &self.ir
    }

    pub fn pipeline(&self) -> &Arc<CompilerPipeline> {
        &self.pipeline
    }

    pub fn state(&self) -> GraphState {
        if self.compiled.is_some() {
            GraphState::Compiled
        } else if self.verified.is_some() {
            GraphState::Verified
        } else {
            GraphState::Unverified
        }
    }

    fn edit(&mut self) -> &mut GraphIr {
        if self.verified.is_some() {
            debug!(state = ?self.state(), "graph edited, dropping verified state");
        }
        self.verified = None;
        self.optimized = None;
        self.unit = None;
        self.compiled = None;
        &mut self.ir
    }

    pub fn create_image(&mut self, width: u32, height: u32, format: PixelFormat) -> ObjectId {
        self.edit().create_image(width, height, format)
    }

    pub fn create_virtual_image(
        &mut self,
        width: Option<u32>,
        height: Option<u32>,
        format: Option<PixelFormat>,
    ) -> ObjectId {
        self.edit().create_virtual_image(width, height, format)
    }

    pub fn create_array(&mut self, item_type: ItemType, capacity: u32) -> ObjectId {
        self.edit().create_array(item_type, capacity)
    }

    pub fn create_virtual_array(&mut self, item_type: Option<ItemType>, capacity: Option<u32>) -> ObjectId {
        self.edit().create_virtual_array(item_type, capacity)
    }

    pub fn create_scalar(&mut self, scalar_type: ScalarType) -> ObjectId {
        self.edit().create_scalar(scalar_type)
    }

    pub fn create_virtual_scalar(&mut self, scalar_type: Option<ScalarType>) -> ObjectId {
        self.edit().create_virtual_scalar(scalar_type)
    }

    pub fn create_constant(&mut self, value: ScalarValue) -> ObjectId {
        self.edit().create_constant(value)
    }

    pub fn create_pyramid(&mut self, levels: u32, width: u32, height: u32, format: PixelFormat) -> ObjectId {
        self.edit().create_pyramid(levels, width, height, format)
    }

    pub fn create_virtual_pyramid(
        &mut self,
        levels: u32,
        width: Option<u32>,
        height: Option<u32>,
        format: Option<PixelFormat>,
    ) -> ObjectId {
        self.edit().create_virtual_pyramid(levels, width, height, format)
    }

    pub fn create_delay(&mut self, slots: u32, template: ImageMeta) -> VxResult<ObjectId> {
        self.edit().create_delay(slots, template)
    }

    pub fn delay_slot(&self, delay: ObjectId, age: u32) -> VxResult<ObjectId> {
        self.ir.delay_slot(delay, age)
    }

    pub fn add_node<K: Into<String>>(&mut self, kernel: K, params: Vec<Option<ObjectId>>) -> NodeId {
        self.edit().add_node(kernel, params)
    }

    pub fn set_border_mode(&mut self, node: NodeId, border: BorderMode) -> VxResult<()> {
        self.edit().set_border_mode(node, border)
    }

    pub fn bind(&mut self, node: NodeId, slot: usize, object: Option<ObjectId>) -> VxResult<()> {
        self.edit().bind(node, slot, object)
    }

    pub fn remove_node(&mut self, node: NodeId) -> VxResult<Node> {
        self.edit().remove_node(node)
    }

    pub fn mark_output(&mut self, object: ObjectId) -> VxResult<()> {
        self.edit().mark_output(object)
    }

    /// Verify once; later calls return the same IR until the graph is edited.
    pub fn verify(&mut self) -> VxResult<&VerifiedIr> {
        if self.verified.is_none() {
            let verified = self.pipeline.verify(&self.ir)?;
            info!(
                nodes = verified.node_count(),
                objects = verified.objects.len(),
                "graph verified"
            );
            self.verified = Some(verified);
        }
        self.verified
            .as_ref()
            .ok_or_else(|| VxError::InvalidState("verification produced no IR".into()))
    }

    pub fn optimize(&mut self) -> VxResult<&OptimizationReport> {
        let verified = self
            .verified
            .as_ref()
            .ok_or_else(|| VxError::InvalidState("optimize requires a verified graph".into()))?;
        if self.optimized.is_none() {
            self.optimized = Some(self.pipeline.optimize(verified));
        }
        self.optimized
            .as_ref()
            .map(|(_, report)| report)
            .ok_or_else(|| VxError::InvalidState("optimizer produced no IR".into()))
    }

    /// Verify and optimize as needed, then generate, build and load.
    ///
    /// A failed build leaves the graph verified.
    pub fn compile(&mut self) -> VxResult<&CompiledGraph> {
        if self.compiled.is_none() {
            self.verify()?;
            self.optimize()?;
            let (optimized, _) = self
                .optimized
                .as_ref()
                .ok_or_else(|| VxError::InvalidState("graph is not optimized".into()))?;
            let unit = match &self.unit {
                Some(unit) => unit.clone(),
                None => {
                    let unit = self.pipeline.generate(optimized)?;
                    self.unit = Some(unit.clone());
                    unit
                }
            };
            self.compiled = Some(self.pipeline.build(optimized, &unit)?);
        }
        self.compiled
            .as_ref()
            .ok_or_else(|| VxError::InvalidState("graph is not compiled".into()))
    }

    /// Run the graph once, compiling first when needed.
    pub fn process(&mut self, bindings: &mut Bindings) -> VxResult<()> {
        self.compile()?.process(bindings)
    }

    /// Zero-filled storage for every graph-visible object.
    pub fn allocate_bindings(&mut self) -> VxResult<Bindings> {
        self.compile()?.allocate_bindings()
    }

    pub fn verified(&self) -> Option<&VerifiedIr> {
        self.verified.as_ref()
    }

    pub fn optimized(&self) -> Option<&VerifiedIr> {
        self.optimized.as_ref().map(|(ir, _)| ir)
    }

    pub fn report(&self) -> Option<&OptimizationReport> {
        self.optimized.as_ref().map(|(_, report)| report)
    }

    pub fn generated_source(&self) -> Option<&str> {
        self.unit.as_ref().map(|unit| unit.source.as_str())
    }

    pub fn compiled(&self) -> Option<&CompiledGraph> {
        self.compiled.as_ref()
    }
}

//! Construction-time graph: registered data objects plus insertion-ordered nodes.

use crate::error::{VxError, VxResult};
use crate::node::{BorderMode, Node, NodeId};
use crate::object::{
    ArrayMeta, DataObject, DelayMeta, DelaySlot, ImageMeta, ItemType, ObjectId, ObjectMeta,
    PixelFormat, PyramidMeta, ScalarMeta, ScalarType, ScalarValue,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphIr {
    objects: Vec<DataObject>,
    nodes: Vec<Node>,
    next_node: u32,
}

impl GraphIr {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&mut self, meta: ObjectMeta, is_virtual: bool) -> ObjectId {
        let id = ObjectId(self.objects.len() as u32);
        self.objects.push(DataObject {
            id,
            meta,
            is_virtual,
            marked_output: false,
            delay_slot: None,
        });
        id
    }

    pub fn create_image(&mut self, width: u32, height: u32, format: PixelFormat) -> ObjectId {
        self.register(ObjectMeta::Image(ImageMeta::new(width, height, format)), false)
    }

    /// Any field left `None` is inferred during verification.
    pub fn create_virtual_image(
        &mut self,
        width: Option<u32>,
        height: Option<u32>,
        format: Option<PixelFormat>,
    ) -> ObjectId {
        let meta = ImageMeta {
            width,
            height,
            format,
        };
        self.register(ObjectMeta::Image(meta), true)
    }

    pub fn create_array(&mut self, item_type: ItemType, capacity: u32) -> ObjectId {
        self.register(ObjectMeta::Array(ArrayMeta::new(item_type, capacity)), false)
    }

    pub fn create_virtual_array(&mut self, item_type: Option<ItemType>, capacity: Option<u32>) -> ObjectId {
        let meta = ArrayMeta {
            item_type,
            capacity,
        };
        self.register(ObjectMeta::Array(meta), true)
    }

    /// Externally supplied scalar, read or written at execution time.
    pub fn create_scalar(&mut self, scalar_type: ScalarType) -> ObjectId {
        self.register(ObjectMeta::Scalar(ScalarMeta::of_type(scalar_type)), false)
    }

    pub fn create_virtual_scalar(&mut self, scalar_type: Option<ScalarType>) -> ObjectId {
        let meta = ScalarMeta {
            scalar_type,
            value: None,
        };
        self.register(ObjectMeta::Scalar(meta), true)
    }

    /// Graph-owned constant, folded into generated code.
    pub fn create_constant(&mut self, value: ScalarValue) -> ObjectId {
        self.register(ObjectMeta::Scalar(ScalarMeta::constant(value)), true)
    }

    pub fn create_pyramid(&mut self, levels: u32, width: u32, height: u32, format: PixelFormat) -> ObjectId {
        let meta = PyramidMeta::new(levels, width, height, format);
        self.register(ObjectMeta::Pyramid(meta), false)
    }

    /// Level count is fixed; base size and format may be inferred.
    pub fn create_virtual_pyramid(
        &mut self,
        levels: u32,
        width: Option<u32>,
        height: Option<u32>,
        format: Option<PixelFormat>,
    ) -> ObjectId {
        let meta = PyramidMeta {
            levels: Some(levels),
            width,
            height,
            format,
        };
        self.register(ObjectMeta::Pyramid(meta), true)
    }

    /// Creates the delay and one image object per slot; slot `k` holds the value written `k` executions ago.
    pub fn create_delay(&mut self, slots: u32, template: ImageMeta) -> VxResult<ObjectId> {
        if slots == 0 {
            return Err(VxError::InvalidState("a delay needs at least one slot".into()));
        }
        if !template.is_resolved() {
            return Err(VxError::InvalidState(
                "a delay template must fix width, height and format".into(),
            ));
        }
        let delay = self.register(ObjectMeta::Delay(DelayMeta { slots, template }), false);
        for age in 0..slots {
            let slot = self.register(ObjectMeta::Image(template), false);
            self.objects[slot.index()].delay_slot = Some(DelaySlot { delay, age });
        }
        Ok(delay)
    }

    pub fn delay_slot(&self, delay: ObjectId, age: u32) -> VxResult<ObjectId> {
        let object = self.object_checked(delay)?;
        let meta = object
            .meta
            .as_delay()
            .ok_or_else(|| VxError::InvalidState(format!("{delay} is not a delay")))?;
        if age >= meta.slots {
            return Err(VxError::InvalidState(format!(
                "{delay} has {} slots, age {age} requested",
                meta.slots
            )));
        }
        Ok(ObjectId(delay.0 + 1 + age))
    }

    /// Parameters are checked against the kernel signature at verification.
    pub fn add_node<K: Into<String>>(&mut self, kernel: K, params: Vec<Option<ObjectId>>) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        self.nodes.push(Node::new(id, kernel, params));
        id
    }

    pub fn set_border_mode(&mut self, node: NodeId, border: BorderMode) -> VxResult<()> {
        self.node_mut(node)?.border = border;
        Ok(())
    }

    pub fn bind(&mut self, node: NodeId, slot: usize, object: Option<ObjectId>) -> VxResult<()> {
        if let Some(id) = object {
            self.object_checked(id)?;
        }
        let entry = self.node_mut(node)?;
        let count = entry.params.len();
        let param = entry
            .params
            .get_mut(slot)
            .ok_or_else(|| VxError::parameter(node, slot, format!("node has {count} parameters")))?;
        *param = object;
        Ok(())
    }

    pub fn remove_node(&mut self, node: NodeId) -> VxResult<Node> {
        let position = self
            .nodes
            .iter()
            .position(|candidate| candidate.id == node)
            .ok_or_else(|| VxError::InvalidState(format!("unknown {node}")))?;
        Ok(self.nodes.remove(position))
    }

    /// Make an object externally observable; a virtual object then needs caller storage.
    pub fn mark_output(&mut self, object: ObjectId) -> VxResult<()> {
        self.object_checked(object)?;
        let entry = &mut self.objects[object.index()];
        if entry.is_constant() {
            return Err(VxError::InvalidState(format!(
                "{object} is a constant and cannot be a graph output"
            )));
        }
        entry.marked_output = true;
        Ok(())
    }

    pub fn objects(&self) -> &[DataObject] {
        &self.objects
    }

    pub fn object(&self, id: ObjectId) -> Option<&DataObject> {
        self.objects.get(id.index())
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == id)
    }

    fn node_mut(&mut self, id: NodeId) -> VxResult<&mut Node> {
        self.nodes
            .iter_mut()
            .find(|node| node.id == id)
            .ok_or_else(|| VxError::InvalidState(format!("unknown {id}")))
    }

    fn object_checked(&self, id: ObjectId) -> VxResult<&DataObject> {
        self.object(id)
            .ok_or_else(|| VxError::InvalidState(format!("unknown {id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_slots_follow_the_delay() -> VxResult<()> {
        let mut graph = GraphIr::new();
        let delay = graph.create_delay(3, ImageMeta::new(8, 8, PixelFormat::U8))?;
        let oldest = graph.delay_slot(delay, 2)?;
        let slot = graph.object(oldest).expect("slot registered");
        assert_eq!(slot.delay_slot, Some(DelaySlot { delay, age: 2 }));
        assert!(!slot.is_entry());
        assert!(graph.object(delay).expect("delay").is_entry());
        assert!(graph.delay_slot(delay, 3).is_err());
        Ok(())
    }

    #[test]
    fn bind_checks_slot_range() {
        let mut graph = GraphIr::new();
        let image = graph.create_image(4, 4, PixelFormat::U8);
        let node = graph.add_node("vx.not", vec![Some(image), None]);
        assert!(graph.bind(node, 1, Some(image)).is_ok());
        let err = graph.bind(node, 2, Some(image)).expect_err("slot out of range");
        assert!(matches!(err, VxError::Parameter { slot: 2, .. }));
    }

    #[test]
    fn constants_cannot_be_marked() {
        let mut graph = GraphIr::new();
        let constant = graph.create_constant(ScalarValue::U8(1));
        assert!(graph.mark_output(constant).is_err());
    }

    #[test]
    fn removed_nodes_keep_remaining_ids() -> VxResult<()> {
        let mut graph = GraphIr::new();
        let a = graph.add_node("vx.not", vec![]);
        let b = graph.add_node("vx.not", vec![]);
        graph.remove_node(a)?;
        assert_eq!(graph.nodes().len(), 1);
        assert_eq!(graph.nodes()[0].id, b);
        let c = graph.add_node("vx.not", vec![]);
        assert_eq!(c, NodeId(2));
        Ok(())
    }
}

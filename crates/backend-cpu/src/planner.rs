//! Storage planning: where every object referenced by the schedule lives
//! inside the generated entry point.

use std::collections::BTreeMap;
use vxforge_ir::{ObjectId, ScalarValue, VerifiedIr, VxError, VxResult};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Storage {
    /// Handle `index` of the entry point's object table.
    Entry(usize),
    /// Slot `age` of the delay passed at handle `entry`.
    DelaySlot { entry: usize, age: u32 },
    /// Allocated per invocation, freed before returning.
    Local,
    /// Folded into the source as a literal.
    Constant(ScalarValue),
    /// Per-pixel variable inside a fused loop.
    Internal,
}

#[derive(Debug, Clone, Default)]
pub struct StoragePlan {
    entries: Vec<ObjectId>,
    storage: BTreeMap<ObjectId, Storage>,
}

impl StoragePlan {
    pub fn build(ir: &VerifiedIr) -> VxResult<Self> {
        let entries = ir.entries();
        let entry_index = |id: ObjectId| entries.iter().position(|&entry| entry == id);
        let mut storage = BTreeMap::new();

        for node in &ir.nodes {
            for &object in &node.internal {
                storage.insert(object, Storage::Internal);
            }
            for id in node.referenced() {
                if storage.contains_key(&id) {
                    continue;
                }
                let entry = ir
                    .object(id)
                    .ok_or_else(|| VxError::InvalidState(format!("{id} is not part of the verified graph")))?;
                let placed = if let Some(value) = entry.object.constant() {
                    Storage::Constant(value)
                } else if let Some(slot) = entry.object.delay_slot {
                    let index = entry_index(slot.delay).ok_or_else(|| {
                        VxError::InvalidState(format!("{id} belongs to {} which is not an entry", slot.delay))
                    })?;
                    Storage::DelaySlot {
                        entry: index,
                        age: slot.age,
                    }
                } else if let Some(index) = entry_index(id) {
                    Storage::Entry(index)
                } else {
                    Storage::Local
                };
                storage.insert(id, placed);
            }
        }

        Ok(Self { entries, storage })
    }

    /// Entry-point handles in registration order.
    pub fn entries(&self) -> &[ObjectId] {
        &self.entries
    }

    pub fn storage(&self, id: ObjectId) -> Option<Storage> {
        self.storage.get(&id).copied()
    }

    /// Objects allocated per invocation, in id order.
    pub fn locals(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.storage
            .iter()
            .filter(|(_, storage)| matches!(storage, Storage::Local))
            .map(|(id, _)| *id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vxforge_ir::{GraphIr, ImageMeta, PixelFormat};
    use vxforge_kernels::KernelRegistry;
    use vxforge_optimizer::{GraphOptimizer, Verifier};

    #[test]
    fn places_every_referenced_object() -> VxResult<()> {
        let registry = KernelRegistry::with_standard_kernels();
        let mut graph = GraphIr::new();
        let input = graph.create_image(4, 4, PixelFormat::U8);
        let threshold = graph.create_constant(ScalarValue::U8(9));
        let blurred = graph.create_virtual_image(None, None, None);
        let inverted = graph.create_virtual_image(None, None, None);
        let delay = graph.create_delay(2, ImageMeta::new(4, 4, PixelFormat::U8))?;
        let current = graph.delay_slot(delay, 0)?;
        graph.add_node("vx.box_3x3", vec![Some(input), Some(blurred)]);
        graph.add_node("vx.not", vec![Some(blurred), Some(inverted)]);
        graph.add_node("vx.threshold", vec![Some(inverted), Some(threshold), Some(current)]);

        let verified = Verifier::new(&registry).verify(&graph)?;
        let (optimized, _) = GraphOptimizer::default().optimize(&verified);
        let plan = StoragePlan::build(&optimized)?;

        assert_eq!(plan.entries(), &[input, delay]);
        assert_eq!(plan.storage(input), Some(Storage::Entry(0)));
        assert_eq!(plan.storage(threshold), Some(Storage::Constant(ScalarValue::U8(9))));
        assert_eq!(plan.storage(blurred), Some(Storage::Local));
        assert_eq!(plan.storage(inverted), Some(Storage::Internal));
        assert_eq!(plan.storage(current), Some(Storage::DelaySlot { entry: 1, age: 0 }));
        assert_eq!(plan.locals().collect::<Vec<_>>(), vec![blurred]);
        Ok(())
    }
}

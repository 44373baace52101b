//! Producer/consumer index and deterministic scheduling.

use crate::object::ObjectId;
use std::collections::{BTreeMap, BTreeSet};

/// Objects a node reads and writes, in slot order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeAccess {
    pub reads: Vec<ObjectId>,
    pub writes: Vec<ObjectId>,
}

/// Indices refer to positions in the access list the topology was built from.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    node_count: usize,
    producers: BTreeMap<ObjectId, Vec<usize>>,
    consumers: BTreeMap<ObjectId, Vec<usize>>,
}

impl Topology {
    pub fn build(accesses: &[NodeAccess]) -> Self {
        let mut producers: BTreeMap<ObjectId, Vec<usize>> = BTreeMap::new();
        let mut consumers: BTreeMap<ObjectId, Vec<usize>> = BTreeMap::new();
        for (index, access) in accesses.iter().enumerate() {
            for object in &access.writes {
                let entry = producers.entry(*object).or_default();
                if !entry.contains(&index) {
                    entry.push(index);
                }
            }
            for object in &access.reads {
                let entry = consumers.entry(*object).or_default();
                if !entry.contains(&index) {
                    entry.push(index);
                }
            }
        }
        Self {
            node_count: accesses.len(),
            producers,
            consumers,
        }
    }

    pub fn producers(&self, object: ObjectId) -> &[usize] {
        self.producers.get(&object).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn consumers(&self, object: ObjectId) -> &[usize] {
        self.consumers.get(&object).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Kahn ordering; among ready nodes the lowest index goes first.
    ///
    /// On a cycle, returns the indices that could not be scheduled.
    pub fn order(&self) -> Result<Vec<usize>, Vec<usize>> {
        let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); self.node_count];
        let mut in_degree = vec![0usize; self.node_count];
        for (object, writers) in &self.producers {
            for &writer in writers {
                for &reader in self.consumers(*object) {
                    if reader != writer && successors[writer].insert(reader) {
                        in_degree[reader] += 1;
                    }
                }
            }
        }

        let mut ready: BTreeSet<usize> = (0..self.node_count)
            .filter(|&index| in_degree[index] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.node_count);
        while let Some(next) = ready.pop_first() {
            order.push(next);
            for &successor in &successors[next] {
                in_degree[successor] -= 1;
                if in_degree[successor] == 0 {
                    ready.insert(successor);
                }
            }
        }

        if order.len() == self.node_count {
            Ok(order)
        } else {
            Err((0..self.node_count)
                .filter(|&index| in_degree[index] > 0)
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn access(reads: &[u32], writes: &[u32]) -> NodeAccess {
        NodeAccess {
            reads: reads.iter().map(|&id| ObjectId(id)).collect(),
            writes: writes.iter().map(|&id| ObjectId(id)).collect(),
        }
    }

    #[test]
    fn orders_consumers_after_producers() {
        let accesses = vec![access(&[1], &[2]), access(&[0], &[1]), access(&[2], &[3])];
        let order = Topology::build(&accesses).order().expect("acyclic");
        assert_eq!(order, vec![1, 0, 2]);
    }

    #[test]
    fn independent_nodes_keep_insertion_order() {
        let accesses = vec![access(&[0], &[1]), access(&[0], &[2]), access(&[0], &[3])];
        let order = Topology::build(&accesses).order().expect("acyclic");
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn reports_nodes_left_on_cycle() {
        let accesses = vec![access(&[0], &[1]), access(&[1], &[2]), access(&[2], &[0])];
        let stuck = Topology::build(&accesses).order().expect_err("cyclic");
        assert_eq!(stuck, vec![0, 1, 2]);
    }

    #[test]
    fn read_modify_write_has_no_self_edge() {
        let accesses = vec![access(&[0, 1], &[1])];
        assert_eq!(Topology::build(&accesses).order(), Ok(vec![0]));
    }
}

//! Optimization reports.

use serde::{Deserialize, Serialize};
use std::path::Path;
use vxforge_ir::{NodeId, ObjectId, PassEvent, PassOutcome};

/// One producer/consumer merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusionRecord {
    pub producer: Vec<NodeId>,
    pub consumer: Vec<NodeId>,
    pub intermediate: ObjectId,
}

/// What the optimizer did to one verified graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub nodes_before: usize,
    pub nodes_after: usize,
    /// Fixed-point sweeps over the pass pipeline.
    pub iterations: usize,
    pub removed_nodes: Vec<NodeId>,
    pub removed_objects: Vec<ObjectId>,
    pub fusions: Vec<FusionRecord>,
    /// Passes that errored; their changes were rolled back.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_passes: Vec<String>,
}

impl OptimizationReport {
    pub fn new(nodes_before: usize) -> Self {
        Self {
            nodes_before,
            nodes_after: nodes_before,
            ..Self::default()
        }
    }

    pub fn absorb(&mut self, outcome: &PassOutcome) {
        for event in &outcome.events {
            match event {
                PassEvent::NodeRemoved(node) => self.removed_nodes.push(*node),
                PassEvent::ObjectRemoved(object) => self.removed_objects.push(*object),
                PassEvent::Fused {
                    producer,
                    consumer,
                    intermediate,
                } => self.fusions.push(FusionRecord {
                    producer: producer.clone(),
                    consumer: consumer.clone(),
                    intermediate: *intermediate,
                }),
            }
        }
    }

    pub fn changed(&self) -> bool {
        !self.removed_nodes.is_empty() || !self.removed_objects.is_empty() || !self.fusions.is_empty()
    }

    /// Save report to JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load report from JSON file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let report = serde_json::from_str(&json)?;
        Ok(report)
    }
}

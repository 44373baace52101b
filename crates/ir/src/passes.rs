//! Transformation pass interface over verified IR.

use crate::node::NodeId;
use crate::object::ObjectId;
use crate::verified::VerifiedIr;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PassEvent {
    NodeRemoved(NodeId),
    ObjectRemoved(ObjectId),
    Fused {
        producer: Vec<NodeId>,
        consumer: Vec<NodeId>,
        intermediate: ObjectId,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassOutcome {
    pub events: Vec<PassEvent>,
}

impl PassOutcome {
    pub fn unchanged() -> Self {
        Self::default()
    }

    pub fn changed(&self) -> bool {
        !self.events.is_empty()
    }

    pub fn record(&mut self, event: PassEvent) {
        self.events.push(event);
    }
}

/// A rewrite that must preserve externally observable results.
pub trait Pass {
    fn name(&self) -> &str;
    fn run(&self, ir: &mut VerifiedIr) -> Result<PassOutcome>;
}

pub struct PassPipeline {
    passes: Vec<Box<dyn Pass + Send + Sync>>,
}

impl PassPipeline {
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    pub fn add_pass<P>(&mut self, pass: P)
    where
        P: Pass + Send + Sync + 'static,
    {
        self.passes.push(Box::new(pass));
    }

    pub fn passes(&self) -> &[Box<dyn Pass + Send + Sync>] {
        &self.passes
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// One sweep over every pass, in registration order.
    pub fn run(&self, ir: &mut VerifiedIr) -> Result<Vec<(String, PassOutcome)>> {
        let mut outcomes = Vec::with_capacity(self.passes.len());
        for pass in &self.passes {
            let outcome = pass.run(ir)?;
            debug!(pass = pass.name(), events = outcome.events.len(), "pass finished");
            outcomes.push((pass.name().to_string(), outcome));
        }
        Ok(outcomes)
    }
}

impl Default for PassPipeline {
    fn default() -> Self {
        Self::new()
    }
}

//! Name-keyed storage for node output tensors.
//!
//! Keys combine the producing node's name with the context key active when it
//! ran, so the same node executed in different loop iterations occupies
//! distinct slots. A `None` slot marks a dead branch (the untaken side of a
//! `Switch`) and resolves as "not available".

use std::collections::HashMap;

use smallvec::SmallVec;

use crate::executor::context::ExecutionContext;
use crate::graph::parse_node_name;
use crate::tensor::Tensor;

/// Ordered output list of one node invocation.
pub type NodeOutputs = SmallVec<[Option<Tensor>; 4]>;

/// Combines a node name with a context key into a map key.
pub fn node_name_with_context(name: &str, context_id: &str) -> String {
    if context_id.is_empty() {
        name.to_string()
    } else {
        format!("{name}-{context_id}")
    }
}

#[derive(Debug, Default)]
pub struct TensorsMap {
    map: HashMap<String, NodeOutputs>,
}

impl TensorsMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: String, outputs: NodeOutputs) {
        self.map.insert(key, outputs);
    }

    /// Stores a single tensor at `name[:index]` under the root context.
    pub fn insert_named(&mut self, name: &str, tensor: Tensor) {
        let (base, index) = parse_node_name(name);
        let mut outputs = NodeOutputs::new();
        outputs.resize(index + 1, None);
        outputs[index] = Some(tensor);
        self.map.insert(base.to_string(), outputs);
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    /// Resolves `"producer[:index]"` by walking the visible context keys,
    /// most specific first. Stops at the first key with an entry, so the
    /// closest enclosing frame wins.
    pub fn get_tensor(&self, name: &str, context: &ExecutionContext) -> Option<Tensor> {
        let (base, index) = parse_node_name(name);
        for context_id in context.current_context_ids() {
            if let Some(outputs) = self.map.get(&node_name_with_context(base, &context_id)) {
                return outputs.get(index).cloned().flatten();
            }
        }
        None
    }

    /// Outputs of a node under the current context key only; used by disposal
    /// bookkeeping, which must not reach into enclosing frames.
    pub fn get_for_current_context(
        &self,
        node_name: &str,
        context: &ExecutionContext,
    ) -> Option<&NodeOutputs> {
        self.map
            .get(&node_name_with_context(node_name, &context.current_context_id()))
    }

    pub fn get(&self, key: &str) -> Option<&NodeOutputs> {
        self.map.get(key)
    }

    pub fn values(&self) -> impl Iterator<Item = &NodeOutputs> {
        self.map.values()
    }
}

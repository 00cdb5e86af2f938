//! Backward-reachability analysis and static ordering of execution plans.

use std::collections::HashSet;

use crate::graph::{is_control_flow, is_dynamic_shape, Graph, NodeId};

/// Result of the reachability walk from the requested outputs back to the
/// available inputs and weights.
#[derive(Debug)]
pub struct ExecutionInfo {
    pub inputs: Vec<NodeId>,
    pub outputs: Vec<NodeId>,
    /// Names of every node the execution needs.
    pub used_nodes: HashSet<String>,
    /// Zero-input nodes that are neither caller inputs nor weights.
    pub missing_inputs: Vec<String>,
    /// First control-flow or dynamic-shape node encountered, if any.
    pub dynamic_node: Option<NodeId>,
    /// Already-used consumers of the dynamic node; providing these as inputs
    /// would let the caller stay on the synchronous path.
    pub sync_inputs: Vec<String>,
}

/// Walks backwards from `outputs`, stopping at caller inputs and weights.
pub fn get_execution_subgraph(
    graph: &Graph,
    input_names: &HashSet<String>,
    weight_names: &HashSet<String>,
    inputs: &[NodeId],
    outputs: &[NodeId],
) -> ExecutionInfo {
    let mut used_nodes: HashSet<String> = HashSet::new();
    let mut missing_inputs = Vec::new();
    let mut dynamic_node = None;
    let mut sync_inputs = Vec::new();

    let mut frontier: Vec<NodeId> = outputs.to_vec();
    while let Some(id) = frontier.pop() {
        let node = graph.node(id);
        if used_nodes.contains(&node.name) {
            continue;
        }
        used_nodes.insert(node.name.clone());
        // Weights and caller inputs are dead-ends; their producers are
        // never explored.
        if weight_names.contains(&node.name) {
            continue;
        }
        if input_names.contains(&node.name) {
            continue;
        }
        if dynamic_node.is_none() && (is_control_flow(node) || is_dynamic_shape(node)) {
            dynamic_node = Some(id);
            sync_inputs = node
                .children
                .iter()
                .map(|c| graph.node(*c).name.clone())
                .filter(|name| used_nodes.contains(name))
                .collect();
        }
        if node.inputs.is_empty() {
            missing_inputs.push(node.name.clone());
            continue;
        }
        frontier.extend(node.inputs.iter().copied());
    }

    ExecutionInfo {
        inputs: inputs.to_vec(),
        outputs: outputs.to_vec(),
        used_nodes,
        missing_inputs,
        dynamic_node,
        sync_inputs,
    }
}

/// Kahn-style order over the used subgraph, seeded from inputs and weights.
/// Weights are excluded from the returned order; their values are already
/// materialized in the tensor map.
pub fn get_nodes_in_topological_order(graph: &Graph, info: &ExecutionInfo) -> Vec<NodeId> {
    let weight_ids: HashSet<NodeId> = graph.weights().iter().copied().collect();
    let mut frontier: Vec<NodeId> = info.inputs.clone();
    frontier.extend(graph.weights().iter().copied());

    let mut seen: HashSet<String> = HashSet::new();
    let mut ordered: Vec<NodeId> = Vec::new();
    while let Some(id) = frontier.pop() {
        let node = graph.node(id);
        if seen.contains(&node.name) {
            continue;
        }
        seen.insert(node.name.clone());
        ordered.push(id);
        for child_id in &node.children {
            let child = graph.node(*child_id);
            if seen.contains(&child.name) || !info.used_nodes.contains(&child.name) {
                continue;
            }
            if child
                .inputs
                .iter()
                .all(|input| seen.contains(&graph.node(*input).name))
            {
                frontier.push(*child_id);
            }
        }
    }

    ordered
        .into_iter()
        .filter(|id| info.used_nodes.contains(&graph.node(*id).name) && !weight_ids.contains(id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;

    fn chain() -> Graph {
        // a -> b -> c, where only b may be supplied by the caller.
        let mut builder = GraphBuilder::new();
        builder
            .op("a", "Placeholder", &[])
            .op("b", "Relu", &["a"])
            .op("c", "Relu", &["b"]);
        builder.build().unwrap()
    }

    #[test]
    fn supplied_intermediate_makes_upstream_unreachable() {
        let graph = chain();
        let b = graph.node_by_name("b").unwrap();
        let c = graph.node_by_name("c").unwrap();
        let inputs: HashSet<String> = ["b".to_string()].into();
        let info = get_execution_subgraph(&graph, &inputs, &HashSet::new(), &[b], &[c]);
        assert!(info.missing_inputs.is_empty());
        // `a` is never visited: `b` is a dead-end.
        assert!(!info.used_nodes.contains("a"));
    }

    #[test]
    fn unsupplied_placeholder_is_reported_missing() {
        let graph = chain();
        let c = graph.node_by_name("c").unwrap();
        let info =
            get_execution_subgraph(&graph, &HashSet::new(), &HashSet::new(), &[], &[c]);
        assert_eq!(info.missing_inputs, vec!["a".to_string()]);
    }

    #[test]
    fn topological_order_respects_dependencies() {
        let mut builder = GraphBuilder::new();
        builder
            .op("x", "Placeholder", &[])
            .op("a", "Relu", &["x"])
            .op("b", "Neg", &["x"])
            .op("c", "Add", &["a", "b"]);
        let graph = builder.build().unwrap();
        let x = graph.node_by_name("x").unwrap();
        let c = graph.node_by_name("c").unwrap();
        let inputs: HashSet<String> = ["x".to_string()].into();
        let info = get_execution_subgraph(&graph, &inputs, &HashSet::new(), &[x], &[c]);
        let order = get_nodes_in_topological_order(&graph, &info);

        let position = |name: &str| {
            order
                .iter()
                .position(|id| graph.node(*id).name == name)
                .unwrap()
        };
        assert!(position("x") < position("a"));
        assert!(position("x") < position("b"));
        assert!(position("a") < position("c"));
        assert!(position("b") < position("c"));
    }
}

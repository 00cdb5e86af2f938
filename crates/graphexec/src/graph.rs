//! Immutable, arena-indexed graph model.
//!
//! Nodes live in a flat arena and refer to each other through [`NodeId`]
//! indices rather than shared pointers, so the structure carries no reference
//! cycles even though control-flow edges (Merge fed by NextIteration) are
//! cyclic at the dataflow level. The executor never mutates a built graph.

use std::collections::{HashMap, HashSet};

use crate::error::ExecutorError;
use crate::tensor::DType;

/// Stable index of a node inside [`Graph::arena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

/// Closed set of operation categories the dispatcher keys on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCategory {
    /// Structural ops: constants, placeholders, identity.
    Graph,
    /// Elementwise arithmetic and comparisons.
    Arithmetic,
    /// Unary math ops.
    BasicMath,
    /// Control flow and tensor-array ops; always asynchronous.
    Control,
    /// Ops whose output shape depends on tensor values.
    Dynamic,
    /// Anything the built-in tables do not recognise.
    Custom,
}

/// Resolved node attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    I64(i64),
    F64(f64),
    Bool(bool),
    Str(String),
    IntList(Vec<i64>),
    Shape(Vec<i64>),
    DType(DType),
}

/// A single operation in the dataflow graph.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub op: String,
    pub category: OpCategory,
    /// Raw input references in `"producer[:outputIndex]"` form, in op order.
    pub input_names: Vec<String>,
    /// Resolved producer ids; same length and order as `input_names`.
    pub inputs: Vec<NodeId>,
    /// Consumers, derived while building.
    pub children: Vec<NodeId>,
    pub attrs: HashMap<String, AttrValue>,
}

impl Node {
    pub fn attr(&self, key: &str) -> Option<&AttrValue> {
        self.attrs.get(key)
    }
}

/// Splits `"name:2"` into `("name", 2)`; a bare name maps to output 0.
pub fn parse_node_name(name: &str) -> (&str, usize) {
    match name.split_once(':') {
        Some((base, index)) => (base, index.parse().unwrap_or(0)),
        None => (name, 0),
    }
}

/// Assigns the dispatch category for a TensorFlow op name.
pub fn category_for_op(op: &str) -> OpCategory {
    match op {
        "Switch" | "Merge" | "Enter" | "Exit" | "NextIteration" | "LoopCond"
        | "TensorArrayV3" | "TensorArrayWriteV3" | "TensorArrayReadV3"
        | "TensorArrayGatherV3" | "TensorArrayConcatV3" | "TensorArrayScatterV3"
        | "TensorArraySplitV3" | "TensorArraySizeV3" | "TensorArrayCloseV3" => OpCategory::Control,
        "Where" | "NonMaxSuppressionV2" | "NonMaxSuppressionV3" | "Unique" | "ListDiff" => {
            OpCategory::Dynamic
        }
        "Const" | "Placeholder" | "PlaceholderWithDefault" | "Identity" | "Snapshot" | "Shape"
        | "NoOp" => OpCategory::Graph,
        "Add" | "AddV2" | "BiasAdd" | "Sub" | "Mul" | "Div" | "Less" | "LessEqual" | "Greater"
        | "GreaterEqual" | "Equal" => OpCategory::Arithmetic,
        "Relu" | "Neg" | "Abs" => OpCategory::BasicMath,
        _ => OpCategory::Custom,
    }
}

/// True for ops whose execution order is resolved at runtime.
pub fn is_control_flow(node: &Node) -> bool {
    node.category == OpCategory::Control
}

/// True for ops whose output shape depends on runtime tensor values.
pub fn is_dynamic_shape(node: &Node) -> bool {
    node.category == OpCategory::Dynamic
}

/// A validated graph ready for execution.
#[derive(Debug)]
pub struct Graph {
    arena: Vec<Node>,
    by_name: HashMap<String, NodeId>,
    inputs: Vec<NodeId>,
    outputs: Vec<NodeId>,
    weights: Vec<NodeId>,
}

impl Graph {
    pub fn node(&self, id: NodeId) -> &Node {
        &self.arena[id.0]
    }

    pub fn node_by_name(&self, name: &str) -> Option<NodeId> {
        self.by_name.get(name).copied()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.arena.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Placeholder nodes (in-degree zero, not weights).
    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    /// Nodes no other node consumes.
    pub fn outputs(&self) -> &[NodeId] {
        &self.outputs
    }

    /// Constant-valued nodes whose tensors are stored in the weight map.
    pub fn weights(&self) -> &[NodeId] {
        &self.weights
    }
}

struct NodeDef {
    name: String,
    op: String,
    input_names: Vec<String>,
    attrs: HashMap<String, AttrValue>,
}

/// Two-phase builder so loop bodies can reference nodes defined later
/// (Merge consuming a NextIteration that appears further down).
#[derive(Default)]
pub struct GraphBuilder {
    defs: Vec<NodeDef>,
    weight_names: HashSet<String>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn op(&mut self, name: &str, op: &str, inputs: &[&str]) -> &mut Self {
        self.op_with_attrs(name, op, inputs, Vec::new())
    }

    pub fn op_with_attrs(
        &mut self,
        name: &str,
        op: &str,
        inputs: &[&str],
        attrs: Vec<(&str, AttrValue)>,
    ) -> &mut Self {
        self.defs.push(NodeDef {
            name: name.to_string(),
            op: op.to_string(),
            input_names: inputs.iter().map(|s| s.to_string()).collect(),
            attrs: attrs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        });
        self
    }

    /// Marks a node (typically a `Const`) as a stored weight.
    pub fn weight(&mut self, name: &str) -> &mut Self {
        self.weight_names.insert(name.to_string());
        self
    }

    pub fn build(&mut self) -> Result<Graph, ExecutorError> {
        let mut by_name: HashMap<String, NodeId> = HashMap::new();
        for (i, def) in self.defs.iter().enumerate() {
            if by_name.insert(def.name.clone(), NodeId(i)).is_some() {
                return Err(ExecutorError::GraphValidation(format!(
                    "duplicate node name '{}'",
                    def.name
                )));
            }
        }

        let mut arena = Vec::with_capacity(self.defs.len());
        for def in self.defs.drain(..) {
            let mut inputs = Vec::with_capacity(def.input_names.len());
            for raw in &def.input_names {
                let (base, _) = parse_node_name(raw);
                let id = by_name.get(base).copied().ok_or_else(|| {
                    ExecutorError::GraphValidation(format!(
                        "node '{}' references unknown input '{}'",
                        def.name, raw
                    ))
                })?;
                inputs.push(id);
            }
            let category = category_for_op(&def.op);
            arena.push(Node {
                name: def.name,
                op: def.op,
                category,
                input_names: def.input_names,
                inputs,
                children: Vec::new(),
                attrs: def.attrs,
            });
        }

        // Derive children from resolved inputs.
        let edges: Vec<(NodeId, usize)> = arena
            .iter()
            .enumerate()
            .flat_map(|(i, node)| node.inputs.iter().map(move |p| (*p, i)))
            .collect();
        for (producer, consumer) in edges {
            let child = NodeId(consumer);
            let children = &mut arena[producer.0].children;
            if !children.contains(&child) {
                children.push(child);
            }
        }

        let mut weights = Vec::new();
        for name in &self.weight_names {
            let id = by_name.get(name).copied().ok_or_else(|| {
                ExecutorError::GraphValidation(format!("weight '{name}' is not a graph node"))
            })?;
            weights.push(id);
        }
        weights.sort_by_key(|id| id.0);

        let inputs: Vec<NodeId> = arena
            .iter()
            .enumerate()
            .filter(|(_, node)| {
                node.inputs.is_empty()
                    && (node.op == "Placeholder" || node.op == "PlaceholderWithDefault")
                    && !self.weight_names.contains(&node.name)
            })
            .map(|(i, _)| NodeId(i))
            .collect();
        let outputs: Vec<NodeId> = arena
            .iter()
            .enumerate()
            .filter(|(_, node)| node.children.is_empty())
            .map(|(i, _)| NodeId(i))
            .collect();

        Ok(Graph {
            arena,
            by_name,
            inputs,
            outputs,
            weights,
        })
    }
}

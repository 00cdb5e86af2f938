//! Category-keyed operation dispatch.
//!
//! The registry is an explicit value built once and passed by reference into
//! every executor, never a process global, so independent executions can use
//! different registries (custom-op overrides in tests, for instance).

mod arithmetic;
mod basic_math;
mod control;
mod dynamic;
mod graph_ops;

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use smallvec::smallvec;

use crate::error::ExecutorError;
use crate::executor::context::ExecutionContext;
use crate::executor::tensor_map::{NodeOutputs, TensorsMap};
use crate::graph::{AttrValue, Graph, Node, OpCategory};
use crate::tensor::{DType, Tensor};

pub use arithmetic::ArithmeticOps;
pub use basic_math::BasicMathOps;
pub use control::ControlOps;
pub use dynamic::DynamicOps;
pub use graph_ops::GraphOps;

/// Outcome of dispatching one node: either the outputs are immediately
/// available, or they arrive through a future the driver must await before
/// resolving the node's children.
pub enum OpResult {
    Ready(NodeOutputs),
    Pending(BoxFuture<'static, Result<NodeOutputs, ExecutorError>>),
}

impl OpResult {
    /// Wraps already-computed outputs.
    pub fn ready(outputs: NodeOutputs) -> Self {
        OpResult::Ready(outputs)
    }

    /// Wraps already-computed outputs in a resolved future. Control and
    /// dynamic ops report their results this way so that their presence
    /// forces the asynchronous execution path.
    pub fn pending_ready(outputs: NodeOutputs) -> Self {
        OpResult::Pending(Box::pin(futures::future::ready(Ok(outputs))))
    }
}

/// Executes every op of one category.
pub trait OpExecutor: Send + Sync {
    fn dispatch(
        &self,
        node: &Node,
        graph: &Graph,
        tensors: &TensorsMap,
        context: &mut ExecutionContext,
    ) -> Result<OpResult, ExecutorError>;
}

/// Category-keyed table of op executors.
pub struct OpRegistry {
    executors: HashMap<OpCategory, Arc<dyn OpExecutor>>,
}

impl OpRegistry {
    /// An empty registry; every dispatch fails with `UnimplementedOp`.
    pub fn new() -> Self {
        OpRegistry {
            executors: HashMap::new(),
        }
    }

    /// The registry with every built-in executor installed.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(OpCategory::Graph, Arc::new(GraphOps));
        registry.register(OpCategory::Arithmetic, Arc::new(ArithmeticOps));
        registry.register(OpCategory::BasicMath, Arc::new(BasicMathOps));
        registry.register(OpCategory::Control, Arc::new(ControlOps));
        registry.register(OpCategory::Dynamic, Arc::new(DynamicOps));
        registry
    }

    /// Installs (or overrides) the executor for one category.
    pub fn register(&mut self, category: OpCategory, executor: Arc<dyn OpExecutor>) {
        self.executors.insert(category, executor);
    }

    /// Routes a node to the executor registered for its category.
    pub fn dispatch(
        &self,
        node: &Node,
        graph: &Graph,
        tensors: &TensorsMap,
        context: &mut ExecutionContext,
    ) -> Result<OpResult, ExecutorError> {
        let executor = self
            .executors
            .get(&node.category)
            .ok_or_else(|| ExecutorError::UnimplementedOp {
                op: node.op.clone(),
            })?;
        executor.dispatch(node, graph, tensors, context)
    }
}

impl Default for OpRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Resolves the tensor behind `node.input_names[index]` under the current
/// context.
pub(crate) fn input_tensor(
    node: &Node,
    index: usize,
    tensors: &TensorsMap,
    context: &ExecutionContext,
) -> Result<Tensor, ExecutorError> {
    let name = node.input_names.get(index).ok_or_else(|| {
        ExecutorError::Internal(format!(
            "op '{}' ({}) expects an input at position {index}",
            node.op, node.name
        ))
    })?;
    tensors.get_tensor(name, context).ok_or_else(|| {
        ExecutorError::Internal(format!(
            "input '{name}' of node '{}' is not available",
            node.name
        ))
    })
}

fn missing_attr(node: &Node, key: &str) -> ExecutorError {
    ExecutorError::Internal(format!(
        "node '{}' ({}) is missing the '{key}' attribute",
        node.name, node.op
    ))
}

pub(crate) fn attr_str<'a>(node: &'a Node, key: &str) -> Result<&'a str, ExecutorError> {
    match node.attr(key) {
        Some(AttrValue::Str(value)) => Ok(value),
        _ => Err(missing_attr(node, key)),
    }
}

pub(crate) fn attr_bool(node: &Node, key: &str, default: bool) -> bool {
    match node.attr(key) {
        Some(AttrValue::Bool(value)) => *value,
        _ => default,
    }
}

pub(crate) fn attr_dtype(node: &Node, key: &str) -> Option<DType> {
    match node.attr(key) {
        Some(AttrValue::DType(value)) => Some(*value),
        _ => None,
    }
}

pub(crate) fn attr_shape(node: &Node, key: &str) -> Option<Vec<i64>> {
    match node.attr(key) {
        Some(AttrValue::Shape(value)) => Some(value.clone()),
        Some(AttrValue::IntList(value)) => Some(value.clone()),
        _ => None,
    }
}

/// Shorthand for a single-tensor output list.
pub(crate) fn single(tensor: Tensor) -> NodeOutputs {
    smallvec![Some(tensor)]
}

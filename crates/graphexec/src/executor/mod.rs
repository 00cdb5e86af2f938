//! Execution state and drivers.

pub mod analysis;
pub mod context;
pub mod graph_executor;
pub mod tensor_array;
pub mod tensor_map;

pub use analysis::{get_execution_subgraph, get_nodes_in_topological_order, ExecutionInfo};
pub use context::{ExecutionContext, ExecutionContextFrame};
pub use graph_executor::GraphExecutor;
pub use tensor_array::TensorArray;
pub use tensor_map::{NodeOutputs, TensorsMap};

use crate::graph::{AttrValue, Node};

/// Whether an `Enter` node marks its value as loop-invariant.
pub(crate) fn attr_is_constant(node: &Node) -> bool {
    matches!(node.attr("is_constant"), Some(AttrValue::Bool(true)))
}

//! Ops whose output shape depends on runtime tensor values.
//!
//! Their results are reported as pending so a graph containing one can only
//! be run through the dynamic driver.

use super::{input_tensor, single, OpExecutor, OpResult};
use crate::error::ExecutorError;
use crate::executor::context::ExecutionContext;
use crate::executor::tensor_map::TensorsMap;
use crate::graph::{Graph, Node};
use crate::tensor::kernels;

pub struct DynamicOps;

impl OpExecutor for DynamicOps {
    fn dispatch(
        &self,
        node: &Node,
        _graph: &Graph,
        tensors: &TensorsMap,
        context: &mut ExecutionContext,
    ) -> Result<OpResult, ExecutorError> {
        match node.op.as_str() {
            "Where" => {
                let condition = input_tensor(node, 0, tensors, context)?;
                Ok(OpResult::pending_ready(single(kernels::where_indices(
                    &condition,
                )?)))
            }
            _ => Err(ExecutorError::UnimplementedOp {
                op: node.op.clone(),
            }),
        }
    }
}

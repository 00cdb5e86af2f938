//! Unary math ops.

use super::{input_tensor, single, OpExecutor, OpResult};
use crate::error::ExecutorError;
use crate::executor::context::ExecutionContext;
use crate::executor::tensor_map::TensorsMap;
use crate::graph::{Graph, Node};
use crate::tensor::kernels;

pub struct BasicMathOps;

impl OpExecutor for BasicMathOps {
    fn dispatch(
        &self,
        node: &Node,
        _graph: &Graph,
        tensors: &TensorsMap,
        context: &mut ExecutionContext,
    ) -> Result<OpResult, ExecutorError> {
        let input = input_tensor(node, 0, tensors, context)?;
        let result = match node.op.as_str() {
            "Relu" => kernels::relu(&input)?,
            "Neg" => kernels::neg(&input)?,
            "Abs" => kernels::abs(&input)?,
            _ => {
                return Err(ExecutorError::UnimplementedOp {
                    op: node.op.clone(),
                })
            }
        };
        Ok(OpResult::ready(single(result)))
    }
}

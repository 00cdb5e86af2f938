//! Elementwise arithmetic and comparison ops.

use super::{input_tensor, single, OpExecutor, OpResult};
use crate::error::ExecutorError;
use crate::executor::context::ExecutionContext;
use crate::executor::tensor_map::TensorsMap;
use crate::graph::{Graph, Node};
use crate::tensor::kernels;

pub struct ArithmeticOps;

impl OpExecutor for ArithmeticOps {
    fn dispatch(
        &self,
        node: &Node,
        _graph: &Graph,
        tensors: &TensorsMap,
        context: &mut ExecutionContext,
    ) -> Result<OpResult, ExecutorError> {
        let a = input_tensor(node, 0, tensors, context)?;
        let b = input_tensor(node, 1, tensors, context)?;
        let result = match node.op.as_str() {
            "Add" | "AddV2" | "BiasAdd" => kernels::add(&a, &b)?,
            "Sub" => kernels::sub(&a, &b)?,
            "Mul" => kernels::mul(&a, &b)?,
            "Div" => kernels::div(&a, &b)?,
            "Less" => kernels::less(&a, &b)?,
            "LessEqual" => kernels::less_equal(&a, &b)?,
            "Greater" => kernels::greater(&a, &b)?,
            "GreaterEqual" => kernels::greater_equal(&a, &b)?,
            "Equal" => kernels::equal(&a, &b)?,
            _ => {
                return Err(ExecutorError::UnimplementedOp {
                    op: node.op.clone(),
                })
            }
        };
        Ok(OpResult::ready(single(result)))
    }
}

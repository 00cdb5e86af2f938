//! Structural ops: constants, placeholders, identity.
//!
//! `Const` and `Placeholder` values normally arrive pre-seeded in the tensor
//! map (from the weight map and the caller's inputs respectively) and the
//! driver skips nodes whose values are already present, so reaching the
//! dispatcher with one of them means the value was never supplied.

use smallvec::smallvec;

use super::{input_tensor, single, OpExecutor, OpResult};
use crate::error::ExecutorError;
use crate::executor::context::ExecutionContext;
use crate::executor::tensor_map::TensorsMap;
use crate::graph::{Graph, Node};
use crate::tensor::{Shape, Tensor};

pub struct GraphOps;

impl OpExecutor for GraphOps {
    fn dispatch(
        &self,
        node: &Node,
        _graph: &Graph,
        tensors: &TensorsMap,
        context: &mut ExecutionContext,
    ) -> Result<OpResult, ExecutorError> {
        match node.op.as_str() {
            "Const" => Err(ExecutorError::Internal(format!(
                "constant '{}' has no stored weight value",
                node.name
            ))),
            "Placeholder" => Err(ExecutorError::Internal(format!(
                "placeholder '{}' was not supplied as an input",
                node.name
            ))),
            "PlaceholderWithDefault" => {
                // Falls back to the default input when the caller did not
                // supply a value under this name.
                let value = tensors
                    .get_tensor(&node.name, context)
                    .map(Ok)
                    .unwrap_or_else(|| input_tensor(node, 0, tensors, context))?;
                Ok(OpResult::ready(single(value.deep_clone()?)))
            }
            "Identity" | "Snapshot" => {
                let input = input_tensor(node, 0, tensors, context)?;
                Ok(OpResult::ready(single(input.deep_clone()?)))
            }
            "Shape" => {
                let input = input_tensor(node, 0, tensors, context)?;
                let dims: Vec<i32> = input.shape().dims().iter().map(|d| *d as i32).collect();
                let rank = dims.len() as i64;
                Ok(OpResult::ready(single(Tensor::from_i32(
                    Shape::new(vec![rank]),
                    dims,
                )?)))
            }
            "NoOp" => Ok(OpResult::ready(smallvec![])),
            _ => Err(ExecutorError::UnimplementedOp {
                op: node.op.clone(),
            }),
        }
    }
}

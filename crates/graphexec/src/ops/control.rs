//! Control-flow and tensor-array ops.
//!
//! These ops manipulate the execution context's frame stack and tensor-array
//! table, and always report their outputs as pending: any graph containing
//! one can only be executed by the dynamic worklist driver. Frame-crossing
//! values are deep-cloned so disposal in one frame cannot invalidate the
//! copy living in another.

use smallvec::smallvec;

use super::{
    attr_bool, attr_dtype, attr_shape, attr_str, input_tensor, single, OpExecutor, OpResult,
};
use crate::error::ExecutorError;
use crate::executor::context::ExecutionContext;
use crate::executor::tensor_array::TensorArray;
use crate::executor::tensor_map::TensorsMap;
use crate::graph::{Graph, Node};
use crate::tensor::{DType, Tensor};

pub struct ControlOps;

fn tensor_array_id(
    node: &Node,
    tensors: &TensorsMap,
    context: &ExecutionContext,
) -> Result<i64, ExecutorError> {
    let handle = input_tensor(node, 0, tensors, context)?;
    let values = handle.i32_data()?;
    values.first().map(|v| *v as i64).ok_or_else(|| {
        ExecutorError::Internal(format!(
            "node '{}' received an empty tensor-array handle",
            node.name
        ))
    })
}

fn index_list(tensor: &Tensor) -> Result<Vec<i64>, ExecutorError> {
    Ok(tensor.i32_data()?.into_iter().map(|v| v as i64).collect())
}

fn scalar_index(tensor: &Tensor, node: &Node) -> Result<i64, ExecutorError> {
    let values = tensor.i32_data()?;
    values.first().map(|v| *v as i64).ok_or_else(|| {
        ExecutorError::Internal(format!(
            "node '{}' received an empty index tensor",
            node.name
        ))
    })
}

impl OpExecutor for ControlOps {
    fn dispatch(
        &self,
        node: &Node,
        _graph: &Graph,
        tensors: &TensorsMap,
        context: &mut ExecutionContext,
    ) -> Result<OpResult, ExecutorError> {
        match node.op.as_str() {
            "Enter" => {
                // The input is resolved in the enclosing frame before the
                // new frame is pushed; the output is then stored under the
                // new frame's context key.
                let data = input_tensor(node, 0, tensors, context)?;
                let frame_name = attr_str(node, "frame_name")?;
                context.enter_frame(frame_name);
                Ok(OpResult::pending_ready(single(data.deep_clone()?)))
            }
            "Exit" => {
                let data = input_tensor(node, 0, tensors, context)?;
                context.exit_frame()?;
                Ok(OpResult::pending_ready(single(data.deep_clone()?)))
            }
            "NextIteration" => {
                let data = input_tensor(node, 0, tensors, context)?;
                context.next_iteration()?;
                Ok(OpResult::pending_ready(single(data.deep_clone()?)))
            }
            "Merge" => {
                // First-available-wins join.
                let available = node
                    .input_names
                    .iter()
                    .find_map(|name| tensors.get_tensor(name, context));
                match available {
                    Some(tensor) => Ok(OpResult::pending_ready(single(tensor.deep_clone()?))),
                    None => Err(ExecutorError::Internal(format!(
                        "merge node '{}' was dispatched with no available input",
                        node.name
                    ))),
                }
            }
            "Switch" => {
                let data = input_tensor(node, 0, tensors, context)?;
                let pred = input_tensor(node, 1, tensors, context)?;
                // Output 0 carries the false branch, output 1 the true branch.
                let outputs = if pred.as_bool_scalar()? {
                    smallvec![None, Some(data.deep_clone()?)]
                } else {
                    smallvec![Some(data.deep_clone()?), None]
                };
                Ok(OpResult::pending_ready(outputs))
            }
            "LoopCond" => {
                let pred = input_tensor(node, 0, tensors, context)?;
                Ok(OpResult::pending_ready(single(pred.deep_clone()?)))
            }
            "TensorArrayV3" => {
                let size = scalar_index(&input_tensor(node, 0, tensors, context)?, node)?;
                let dtype = attr_dtype(node, "dtype").unwrap_or(DType::F32);
                let element_shape =
                    attr_shape(node, "element_shape").filter(|dims| !dims.is_empty());
                let array = TensorArray::new(
                    attr_str(node, "tensor_array_name").unwrap_or(&node.name),
                    dtype,
                    size.max(0) as usize,
                    element_shape,
                    attr_bool(node, "identical_element_shapes", false),
                    attr_bool(node, "dynamic_size", false),
                    attr_bool(node, "clear_after_read", true),
                );
                let handle = Tensor::scalar_i32(array.id() as i32);
                context.add_tensor_array(array);
                Ok(OpResult::pending_ready(smallvec![
                    Some(handle),
                    Some(Tensor::scalar_f32(1.0)),
                ]))
            }
            "TensorArrayWriteV3" => {
                let id = tensor_array_id(node, tensors, context)?;
                let index = scalar_index(&input_tensor(node, 1, tensors, context)?, node)?;
                let value = input_tensor(node, 2, tensors, context)?;
                context.tensor_array(id)?.write(index, value.deep_clone()?)?;
                Ok(OpResult::pending_ready(single(Tensor::scalar_f32(1.0))))
            }
            "TensorArrayReadV3" => {
                let id = tensor_array_id(node, tensors, context)?;
                let index = scalar_index(&input_tensor(node, 1, tensors, context)?, node)?;
                let tensor = context.tensor_array(id)?.read(index)?;
                Ok(OpResult::pending_ready(single(tensor)))
            }
            "TensorArrayGatherV3" => {
                let id = tensor_array_id(node, tensors, context)?;
                let indices = index_list(&input_tensor(node, 1, tensors, context)?)?;
                let dtype = attr_dtype(node, "dtype");
                let tensor = context.tensor_array(id)?.gather(Some(&indices), dtype)?;
                Ok(OpResult::pending_ready(single(tensor)))
            }
            "TensorArrayConcatV3" => {
                let id = tensor_array_id(node, tensors, context)?;
                let dtype = attr_dtype(node, "dtype");
                let tensor = context.tensor_array(id)?.concat(dtype)?;
                Ok(OpResult::pending_ready(single(tensor)))
            }
            "TensorArrayScatterV3" => {
                let id = tensor_array_id(node, tensors, context)?;
                let indices = index_list(&input_tensor(node, 1, tensors, context)?)?;
                let value = input_tensor(node, 2, tensors, context)?;
                context
                    .tensor_array(id)?
                    .scatter(&indices, value.deep_clone()?)?;
                Ok(OpResult::pending_ready(single(Tensor::scalar_f32(1.0))))
            }
            "TensorArraySplitV3" => {
                let id = tensor_array_id(node, tensors, context)?;
                let value = input_tensor(node, 1, tensors, context)?;
                let lengths = index_list(&input_tensor(node, 2, tensors, context)?)?;
                context
                    .tensor_array(id)?
                    .split(&lengths, value.deep_clone()?)?;
                Ok(OpResult::pending_ready(single(Tensor::scalar_f32(1.0))))
            }
            "TensorArraySizeV3" => {
                let id = tensor_array_id(node, tensors, context)?;
                let size = context.tensor_array(id)?.size();
                Ok(OpResult::pending_ready(single(Tensor::scalar_i32(
                    size as i32,
                ))))
            }
            "TensorArrayCloseV3" => {
                let id = tensor_array_id(node, tensors, context)?;
                context
                    .tensor_array(id)?
                    .clear_and_close(&Default::default());
                Ok(OpResult::pending_ready(single(Tensor::scalar_f32(0.0))))
            }
            _ => Err(ExecutorError::UnimplementedOp {
                op: node.op.clone(),
            }),
        }
    }
}

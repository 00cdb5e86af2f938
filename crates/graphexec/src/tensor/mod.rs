//! Host tensor types shared by the graph executor and its op registry.

mod dtype;
mod host_tensor;
pub mod kernels;
mod shape;

pub use dtype::DType;
pub use host_tensor::{num_live_tensors, Tensor};
pub use shape::{shapes_equal_allow_undefined_size, Shape};

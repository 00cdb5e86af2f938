//! Dataflow graph execution engine.
//!
//! A model is a directed graph of named nodes. Callers feed tensors into
//! placeholder nodes and ask for the tensors produced by output nodes; the
//! executor compiles the minimal subgraph connecting the two, runs it, and
//! disposes every intermediate tensor it created along the way.
//!
//! Graphs without control-flow or dynamic-shape ops run through
//! [`executor::GraphExecutor::execute`], which walks a cached topological
//! order. Graphs with loops, branches, tensor arrays or value-dependent
//! shapes must go through [`executor::GraphExecutor::execute_async`], which
//! discovers the execution order at runtime.

pub mod error;
pub mod executor;
pub mod graph;
pub mod ops;
pub mod profiling;
pub mod tensor;

pub use error::ExecutorError;
pub use executor::{ExecutionContext, GraphExecutor, TensorArray, TensorsMap};
pub use graph::{Graph, GraphBuilder, Node, NodeId, OpCategory};
pub use ops::{OpExecutor, OpRegistry, OpResult};
pub use tensor::{DType, Shape, Tensor};

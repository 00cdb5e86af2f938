//! Typed error surface of the execution engine.
//!
//! Validation errors are raised before any node runs; dispatcher errors abort
//! the remaining plan immediately. There is no retry or rollback anywhere in
//! this crate.

use thiserror::Error;

/// Errors produced while compiling or executing a graph.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// An input or output name does not resolve against the graph, or the
    /// graph itself is malformed (duplicate node names, dangling references).
    #[error("graph validation failed: {0}")]
    GraphValidation(String),

    /// Backward reachability found nodes whose values can never be produced
    /// from the provided inputs and stored weights.
    #[error(
        "cannot compute the outputs [{outputs}] from the provided inputs \
         [{inputs}]; missing the following inputs: [{missing_inputs}]"
    )]
    Compile {
        inputs: String,
        outputs: String,
        missing_inputs: String,
    },

    /// The requested subgraph contains a control-flow or dynamic-shape node,
    /// so a static execution order cannot be produced.
    #[error(
        "this execution contains the node '{node}', which has the dynamic op \
         '{op}'; use execute_async instead, or to avoid the dynamic ops \
         specify the inputs [{sync_inputs}]"
    )]
    DynamicExecutionRequired {
        node: String,
        op: String,
        sync_inputs: String,
    },

    /// The dynamic driver drained its worklist without producing every
    /// requested output.
    #[error(
        "cannot compute the outputs [{outputs}] from the provided inputs \
         [{inputs}]; consider providing the following inputs: \
         [{missing_inputs}]{alternative}"
    )]
    MissingOutputs {
        inputs: String,
        outputs: String,
        missing_inputs: String,
        alternative: String,
    },

    /// Two shapes that were required to match (modulo the `-1` wildcard) did
    /// not.
    #[error("{0}")]
    ShapeMismatch(String),

    /// A tensor's dtype did not match the declared or adopted dtype.
    #[error("{0}")]
    DtypeMismatch(String),

    /// An op name reached the dispatcher that no registered executor handles.
    #[error("op '{op}' is not implemented by the operation registry")]
    UnimplementedOp { op: String },

    /// A pending (asynchronous) dispatcher result was observed on the
    /// synchronous execution path.
    #[error(
        "the execution of the op '{op}' returned a pending result; \
         use execute_async instead"
    )]
    AsyncResultMisuse { op: String },

    /// A tensor-array contract violation (closed array, out-of-bounds index,
    /// double write, cleared slot read, ...).
    #[error("TensorArray {name}: {message}")]
    TensorArray { name: String, message: String },

    /// The buffer behind a tensor handle was already released.
    #[error("tensor {id} has been disposed and can no longer be read")]
    TensorDisposed { id: usize },

    /// An engine invariant was violated; indicates a bug in graph
    /// construction or in the engine itself.
    #[error("internal executor error: {0}")]
    Internal(String),
}

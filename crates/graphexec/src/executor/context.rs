//! Frame stack that namespaces tensors across loop iterations.
//!
//! Each loop entry pushes a frame; each `NextIteration` bumps the innermost
//! iteration counter. The derived context key (`frameName-iterationId` joined
//! most specific first) keeps values from different iterations of the same
//! node name from aliasing while earlier iterations still have pending
//! consumers.

use std::collections::HashMap;
use std::collections::HashSet;

use crate::error::ExecutorError;
use crate::executor::tensor_array::TensorArray;

/// One level of loop/conditional nesting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContextFrame {
    /// Monotonic id, refreshed on every push and every iteration advance.
    pub id: u64,
    pub frame_name: String,
    pub iteration_id: u64,
}

/// Mutable per-invocation execution state: the frame stack plus the
/// tensor-array table control ops allocate into.
#[derive(Debug)]
pub struct ExecutionContext {
    frames: Vec<ExecutionContextFrame>,
    last_id: u64,
    tensor_arrays: HashMap<i64, TensorArray>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    pub fn new() -> Self {
        ExecutionContext {
            frames: vec![ExecutionContextFrame {
                id: 0,
                frame_name: String::new(),
                iteration_id: 0,
            }],
            last_id: 0,
            tensor_arrays: HashMap::new(),
        }
    }

    /// Pushes a fresh frame for the named loop, starting at iteration 0.
    pub fn enter_frame(&mut self, frame_name: &str) {
        self.last_id += 1;
        self.frames.push(ExecutionContextFrame {
            id: self.last_id,
            frame_name: frame_name.to_string(),
            iteration_id: 0,
        });
    }

    /// Pops the innermost frame; the root frame cannot be popped.
    pub fn exit_frame(&mut self) -> Result<(), ExecutorError> {
        if self.frames.len() <= 1 {
            return Err(ExecutorError::Internal(
                "cannot exit the root execution frame".to_string(),
            ));
        }
        self.frames.pop();
        Ok(())
    }

    /// Replaces the innermost frame with its next iteration.
    pub fn next_iteration(&mut self) -> Result<(), ExecutorError> {
        if self.frames.len() <= 1 {
            return Err(ExecutorError::Internal(
                "cannot advance the iteration of the root frame".to_string(),
            ));
        }
        self.last_id += 1;
        let frame = self.frames.last_mut().expect("frame stack is never empty");
        frame.id = self.last_id;
        frame.iteration_id += 1;
        Ok(())
    }

    pub fn frames(&self) -> &[ExecutionContextFrame] {
        &self.frames
    }

    /// Snapshot of the frame stack, tagged onto worklist items by the
    /// dynamic driver.
    pub fn snapshot(&self) -> Vec<ExecutionContextFrame> {
        self.frames.clone()
    }

    /// Restores a snapshot taken with [`snapshot`](Self::snapshot).
    pub fn restore(&mut self, frames: Vec<ExecutionContextFrame>) {
        self.frames = frames;
    }

    // frames[0] is always the root frame and never contributes to the key.
    fn key_for(frames: &[ExecutionContextFrame]) -> String {
        frames[1..]
            .iter()
            .rev()
            .map(|f| format!("{}-{}", f.frame_name, f.iteration_id))
            .collect::<Vec<_>>()
            .join("/")
    }

    /// The most specific context key; empty in the root frame.
    pub fn current_context_id(&self) -> String {
        Self::key_for(&self.frames)
    }

    /// All visible context keys, most specific first, ending with the root
    /// key. Name resolution walks this list so a node can see values from an
    /// enclosing frame.
    pub fn current_context_ids(&self) -> Vec<String> {
        let mut ids = Vec::with_capacity(self.frames.len());
        for end in (1..=self.frames.len()).rev() {
            ids.push(Self::key_for(&self.frames[..end]));
        }
        // frames[0] is the root frame, so the final entry is always "".
        ids
    }

    /// Registers a tensor array created by a `TensorArrayV3` op.
    pub fn add_tensor_array(&mut self, array: TensorArray) {
        self.tensor_arrays.insert(array.id(), array);
    }

    pub fn tensor_array(&mut self, id: i64) -> Result<&mut TensorArray, ExecutorError> {
        self.tensor_arrays.get_mut(&id).ok_or_else(|| {
            ExecutorError::Internal(format!("tensor array with id {id} does not exist"))
        })
    }

    /// Closes every live tensor array, keeping tensors whose ids are frozen.
    pub fn dispose(&mut self, keep_ids: &HashSet<usize>) {
        for array in self.tensor_arrays.values_mut() {
            if !array.closed() {
                array.clear_and_close(keep_ids);
            }
        }
    }
}

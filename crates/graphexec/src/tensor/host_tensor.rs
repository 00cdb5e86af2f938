//! Host-backed tensor handle with explicit disposal.
//!
//! Handles are cheap to clone; clones share the same buffer and id. The
//! lifecycle manager frees a buffer through [`Tensor::dispose`] exactly once,
//! after which any read fails with [`ExecutorError::TensorDisposed`]. A
//! process-wide gauge tracks how many buffers are currently alive so tests can
//! verify disposal exactness.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{dtype::DType, shape::Shape};
use crate::error::ExecutorError;

static NEXT_TENSOR_ID: AtomicUsize = AtomicUsize::new(0);
static LIVE_TENSORS: AtomicUsize = AtomicUsize::new(0);

/// Number of tensor buffers currently allocated and not yet disposed.
pub fn num_live_tensors() -> usize {
    LIVE_TENSORS.load(Ordering::SeqCst)
}

#[derive(Debug, Clone)]
enum Buffer {
    F32(Vec<f32>),
    I32(Vec<i32>),
    Bool(Vec<bool>),
}

#[derive(Debug)]
struct TensorInner {
    id: usize,
    dtype: DType,
    shape: Shape,
    buffer: Mutex<Option<Buffer>>,
}

/// Shared handle to an immutable host buffer.
#[derive(Debug, Clone)]
pub struct Tensor {
    inner: Arc<TensorInner>,
}

impl Tensor {
    fn alloc(dtype: DType, shape: Shape, buffer: Buffer) -> Self {
        LIVE_TENSORS.fetch_add(1, Ordering::SeqCst);
        Tensor {
            inner: Arc::new(TensorInner {
                id: NEXT_TENSOR_ID.fetch_add(1, Ordering::SeqCst),
                dtype,
                shape,
                buffer: Mutex::new(Some(buffer)),
            }),
        }
    }

    /// Constructs an `F32` tensor, validating the length against the shape.
    pub fn from_f32(shape: Shape, data: Vec<f32>) -> Result<Self, ExecutorError> {
        if data.len() != shape.num_elements() {
            return Err(ExecutorError::ShapeMismatch(format!(
                "tensor data length ({}) does not match shape {}",
                data.len(),
                shape
            )));
        }
        Ok(Self::alloc(DType::F32, shape, Buffer::F32(data)))
    }

    /// Constructs an `I32` tensor, validating the length against the shape.
    pub fn from_i32(shape: Shape, data: Vec<i32>) -> Result<Self, ExecutorError> {
        if data.len() != shape.num_elements() {
            return Err(ExecutorError::ShapeMismatch(format!(
                "tensor data length ({}) does not match shape {}",
                data.len(),
                shape
            )));
        }
        Ok(Self::alloc(DType::I32, shape, Buffer::I32(data)))
    }

    /// Constructs a `Bool` tensor, validating the length against the shape.
    pub fn from_bool(shape: Shape, data: Vec<bool>) -> Result<Self, ExecutorError> {
        if data.len() != shape.num_elements() {
            return Err(ExecutorError::ShapeMismatch(format!(
                "tensor data length ({}) does not match shape {}",
                data.len(),
                shape
            )));
        }
        Ok(Self::alloc(DType::Bool, shape, Buffer::Bool(data)))
    }

    pub fn scalar_f32(value: f32) -> Self {
        Self::alloc(DType::F32, Shape::scalar(), Buffer::F32(vec![value]))
    }

    pub fn scalar_i32(value: i32) -> Self {
        Self::alloc(DType::I32, Shape::scalar(), Buffer::I32(vec![value]))
    }

    pub fn scalar_bool(value: bool) -> Self {
        Self::alloc(DType::Bool, Shape::scalar(), Buffer::Bool(vec![value]))
    }

    /// Process-unique identity of the underlying buffer.
    pub fn id(&self) -> usize {
        self.inner.id
    }

    pub fn dtype(&self) -> DType {
        self.inner.dtype
    }

    pub fn shape(&self) -> &Shape {
        &self.inner.shape
    }

    pub fn len(&self) -> usize {
        self.inner.shape.num_elements()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Releases the buffer. Further reads fail; releasing twice is a no-op.
    pub fn dispose(&self) {
        let mut slot = self.inner.buffer.lock().expect("tensor buffer poisoned");
        if slot.take().is_some() {
            LIVE_TENSORS.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner
            .buffer
            .lock()
            .expect("tensor buffer poisoned")
            .is_none()
    }

    fn with_buffer<R>(
        &self,
        f: impl FnOnce(&Buffer) -> Result<R, ExecutorError>,
    ) -> Result<R, ExecutorError> {
        let slot = self.inner.buffer.lock().expect("tensor buffer poisoned");
        match slot.as_ref() {
            Some(buffer) => f(buffer),
            None => Err(ExecutorError::TensorDisposed { id: self.inner.id }),
        }
    }

    /// Copies the values out as `f32`; fails for other dtypes or if disposed.
    pub fn f32_data(&self) -> Result<Vec<f32>, ExecutorError> {
        self.with_buffer(|buffer| match buffer {
            Buffer::F32(values) => Ok(values.clone()),
            _ => Err(ExecutorError::DtypeMismatch(format!(
                "tensor {} has dtype {}, expected float32",
                self.inner.id, self.inner.dtype
            ))),
        })
    }

    /// Copies the values out as `i32`; fails for other dtypes or if disposed.
    pub fn i32_data(&self) -> Result<Vec<i32>, ExecutorError> {
        self.with_buffer(|buffer| match buffer {
            Buffer::I32(values) => Ok(values.clone()),
            _ => Err(ExecutorError::DtypeMismatch(format!(
                "tensor {} has dtype {}, expected int32",
                self.inner.id, self.inner.dtype
            ))),
        })
    }

    /// Copies the values out as `bool`; fails for other dtypes or if disposed.
    pub fn bool_data(&self) -> Result<Vec<bool>, ExecutorError> {
        self.with_buffer(|buffer| match buffer {
            Buffer::Bool(values) => Ok(values.clone()),
            _ => Err(ExecutorError::DtypeMismatch(format!(
                "tensor {} has dtype {}, expected bool",
                self.inner.id, self.inner.dtype
            ))),
        })
    }

    /// Interprets a scalar (or first element) as a branch predicate.
    pub fn as_bool_scalar(&self) -> Result<bool, ExecutorError> {
        self.with_buffer(|buffer| {
            let value = match buffer {
                Buffer::F32(values) => values.first().map(|v| *v != 0.0),
                Buffer::I32(values) => values.first().map(|v| *v != 0),
                Buffer::Bool(values) => values.first().copied(),
            };
            value.ok_or_else(|| {
                ExecutorError::Internal(format!(
                    "tensor {} is empty and cannot be read as a predicate",
                    self.inner.id
                ))
            })
        })
    }

    /// Produces a fresh buffer with a new id holding the same values.
    ///
    /// Frame-crossing control ops copy values so that disposing the source
    /// tensor cannot invalidate the copy living in another frame.
    pub fn deep_clone(&self) -> Result<Tensor, ExecutorError> {
        self.with_buffer(|buffer| {
            Ok(Self::alloc(
                self.inner.dtype,
                self.inner.shape.clone(),
                buffer.clone(),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispose_is_idempotent_and_blocks_reads() {
        let t = Tensor::from_f32(Shape::new(vec![2]), vec![1.0, 2.0]).unwrap();
        assert!(!t.is_disposed());
        t.dispose();
        t.dispose();
        assert!(t.is_disposed());
        assert!(matches!(
            t.f32_data(),
            Err(ExecutorError::TensorDisposed { .. })
        ));
    }

    #[test]
    fn deep_clone_gets_a_fresh_identity() {
        let t = Tensor::scalar_f32(3.0);
        let c = t.deep_clone().unwrap();
        assert_ne!(t.id(), c.id());
        t.dispose();
        assert_eq!(c.f32_data().unwrap(), vec![3.0]);
    }
}

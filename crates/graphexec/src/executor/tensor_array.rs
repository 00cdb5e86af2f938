//! Growable, randomly-addressed tensor container with write-once semantics.
//!
//! Backs the `TensorArrayV3` family of control ops. Slots may be written once
//! and, with `clear_after_read`, read once; the element shape may be adopted
//! from the first write and tolerates `-1` wildcard dimensions on checks.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::error::ExecutorError;
use crate::tensor::{kernels, shapes_equal_allow_undefined_size, DType, Shape, Tensor};

static NEXT_TENSOR_ARRAY_ID: AtomicI64 = AtomicI64::new(0);

#[derive(Debug, Default, Clone)]
struct TensorSlot {
    tensor: Option<Tensor>,
    written: bool,
    read: bool,
    cleared: bool,
}

#[derive(Debug)]
pub struct TensorArray {
    id: i64,
    name: String,
    dtype: DType,
    max_size: usize,
    element_shape: Option<Vec<i64>>,
    identical_element_shapes: bool,
    dynamic_size: bool,
    clear_after_read: bool,
    tensors: Vec<TensorSlot>,
    closed: bool,
}

impl TensorArray {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        dtype: DType,
        max_size: usize,
        element_shape: Option<Vec<i64>>,
        identical_element_shapes: bool,
        dynamic_size: bool,
        clear_after_read: bool,
    ) -> Self {
        TensorArray {
            id: NEXT_TENSOR_ARRAY_ID.fetch_add(1, Ordering::SeqCst),
            name: name.into(),
            dtype,
            max_size,
            element_shape,
            identical_element_shapes,
            dynamic_size,
            clear_after_read,
            tensors: Vec::new(),
            closed: false,
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn closed(&self) -> bool {
        self.closed
    }

    pub fn size(&self) -> usize {
        self.tensors.len()
    }

    pub fn identical_element_shapes(&self) -> bool {
        self.identical_element_shapes
    }

    fn err(&self, message: impl Into<String>) -> ExecutorError {
        ExecutorError::TensorArray {
            name: self.name.clone(),
            message: message.into(),
        }
    }

    fn check_open(&self) -> Result<(), ExecutorError> {
        if self.closed {
            Err(self.err("has already been closed"))
        } else {
            Ok(())
        }
    }

    fn check_element_shape(&self, shape: &Shape, index: i64) -> Result<(), ExecutorError> {
        if let Some(expected) = &self.element_shape {
            if !shapes_equal_allow_undefined_size(expected, shape.dims()) {
                return Err(ExecutorError::ShapeMismatch(format!(
                    "TensorArray {}: could not write to index {index}; shapes \
                     {:?} and {:?} must match",
                    self.name,
                    expected,
                    shape.dims()
                )));
            }
        }
        Ok(())
    }

    /// Writes a tensor into a slot. Slots are write-once and must not have
    /// been read before the write.
    pub fn write(&mut self, index: i64, tensor: Tensor) -> Result<(), ExecutorError> {
        self.check_open()?;
        if index < 0 || (!self.dynamic_size && index as usize >= self.max_size) {
            return Err(self.err(format!(
                "tried to write to index {index}, but array is not resizeable \
                 and size is: {}",
                self.max_size
            )));
        }
        let index = index as usize;
        if tensor.dtype() != self.dtype {
            return Err(ExecutorError::DtypeMismatch(format!(
                "TensorArray {}: could not write to index {index}, because the \
                 value dtype is {} but TensorArray dtype is {}",
                self.name,
                tensor.dtype(),
                self.dtype
            )));
        }

        // First write to an array with unknown element shape adopts it.
        if self.tensors.is_empty() && self.element_shape.is_none() {
            self.element_shape = Some(tensor.shape().dims().to_vec());
        }
        self.check_element_shape(tensor.shape(), index as i64)?;

        if index < self.tensors.len() {
            let slot = &self.tensors[index];
            if slot.read {
                return Err(self.err(format!(
                    "could not write to index {index}, because it has already been read"
                )));
            }
            if slot.written {
                return Err(self.err(format!(
                    "could not write to index {index}, because it has already been written"
                )));
            }
        } else {
            self.tensors.resize(index + 1, TensorSlot::default());
        }

        self.tensors[index] = TensorSlot {
            tensor: Some(tensor),
            written: true,
            read: false,
            cleared: false,
        };
        Ok(())
    }

    pub fn write_many(&mut self, indices: &[i64], tensors: Vec<Tensor>) -> Result<(), ExecutorError> {
        if indices.len() != tensors.len() {
            return Err(self.err(format!(
                "could not write multiple tensors, because the index count {} \
                 is not the same as the tensor count {}",
                indices.len(),
                tensors.len()
            )));
        }
        for (index, tensor) in indices.iter().zip(tensors) {
            self.write(*index, tensor)?;
        }
        Ok(())
    }

    /// Reads the value at `index`, marking the slot cleared when the array
    /// was created with `clear_after_read`.
    pub fn read(&mut self, index: i64) -> Result<Tensor, ExecutorError> {
        self.check_open()?;
        if index < 0 || index as usize >= self.tensors.len() {
            return Err(self.err(format!(
                "tried to read from index {index}, but array size is: {}",
                self.tensors.len()
            )));
        }
        let clear_after_read = self.clear_after_read;
        let name = self.name.clone();
        let slot = &mut self.tensors[index as usize];
        if slot.cleared {
            return Err(ExecutorError::TensorArray {
                name,
                message: format!(
                    "could not read index {index} twice because it was cleared \
                     after a previous read (perhaps try setting \
                     clear_after_read = false?)"
                ),
            });
        }
        let tensor = slot.tensor.clone().ok_or_else(|| ExecutorError::TensorArray {
            name,
            message: format!("no tensor has been written to index {index}"),
        })?;
        if clear_after_read {
            slot.cleared = true;
        }
        slot.read = true;
        Ok(tensor)
    }

    pub fn read_many(&mut self, indices: &[i64]) -> Result<Vec<Tensor>, ExecutorError> {
        indices.iter().map(|i| self.read(*i)).collect()
    }

    fn check_dtype(&self, dtype: Option<DType>, op: &str) -> Result<(), ExecutorError> {
        if let Some(dtype) = dtype {
            if dtype != self.dtype {
                return Err(ExecutorError::DtypeMismatch(format!(
                    "TensorArray dtype is {} but {op} requested dtype {dtype}",
                    self.dtype
                )));
            }
        }
        Ok(())
    }

    fn empty_result(&self) -> Result<Tensor, ExecutorError> {
        let mut dims = vec![0i64];
        if let Some(element_shape) = &self.element_shape {
            dims.extend(element_shape.iter().map(|d| (*d).max(0)));
        }
        let shape = Shape::new(dims);
        match self.dtype {
            DType::F32 => Tensor::from_f32(shape, Vec::new()),
            DType::I32 => Tensor::from_i32(shape, Vec::new()),
            DType::Bool => Tensor::from_bool(shape, Vec::new()),
        }
    }

    /// Reads the selected indices and stacks them along a new leading axis.
    pub fn gather(
        &mut self,
        indices: Option<&[i64]>,
        dtype: Option<DType>,
    ) -> Result<Tensor, ExecutorError> {
        self.check_dtype(dtype, "gather")?;
        let indices: Vec<i64> = match indices {
            Some(indices) => indices.to_vec(),
            None => (0..self.size() as i64).collect(),
        };
        if indices.is_empty() {
            return self.empty_result();
        }
        let tensors = self.read_many(&indices)?;
        self.check_element_shape(tensors[0].shape(), indices[0])?;
        kernels::stack(&tensors)
    }

    /// Reads every slot and concatenates along the existing leading axis.
    pub fn concat(&mut self, dtype: Option<DType>) -> Result<Tensor, ExecutorError> {
        self.check_dtype(dtype, "concat")?;
        if self.size() == 0 {
            return self.empty_result();
        }
        let indices: Vec<i64> = (0..self.size() as i64).collect();
        let tensors = self.read_many(&indices)?;
        self.check_element_shape(tensors[0].shape(), 0)?;
        kernels::concat(&tensors)
    }

    /// Unstacks `tensor` along axis 0 and writes each slice to the
    /// corresponding index.
    pub fn scatter(&mut self, indices: &[i64], tensor: Tensor) -> Result<(), ExecutorError> {
        if tensor.dtype() != self.dtype {
            return Err(ExecutorError::DtypeMismatch(format!(
                "TensorArray dtype is {} but tensor has dtype {}",
                self.dtype,
                tensor.dtype()
            )));
        }
        let leading = tensor.shape().dims().first().copied().unwrap_or(0);
        if indices.len() as i64 != leading {
            return Err(self.err(format!(
                "expected len(indices) == tensor.shape[0], but saw: {} vs. {leading}",
                indices.len()
            )));
        }
        if let Some(max_index) = indices.iter().max() {
            if !self.dynamic_size && *max_index >= self.max_size as i64 {
                return Err(self.err(format!(
                    "max index must be < array size ({max_index} vs. {})",
                    self.max_size
                )));
            }
        }
        let slices = kernels::unstack(&tensor)?;
        self.write_many(indices, slices)
    }

    /// Splits `tensor` along axis 0 into `lengths.len()` pieces and writes
    /// them at indices `0..lengths.len()`.
    pub fn split(&mut self, lengths: &[i64], tensor: Tensor) -> Result<(), ExecutorError> {
        if tensor.dtype() != self.dtype {
            return Err(ExecutorError::DtypeMismatch(format!(
                "TensorArray dtype is {} but tensor has dtype {}",
                self.dtype,
                tensor.dtype()
            )));
        }
        let total: i64 = lengths.iter().sum();
        let leading = tensor.shape().dims().first().copied().unwrap_or(0);
        if total != leading {
            return Err(self.err(format!(
                "expected sum of lengths to be equal to tensor.shape[0], but \
                 sum of lengths is {total} and tensor's shape is {}",
                tensor.shape()
            )));
        }
        if !self.dynamic_size && lengths.len() != self.max_size {
            return Err(self.err(format!(
                "array size is not equal to the size of lengths ({} vs. {}), \
                 and the TensorArray is not marked as dynamically resizeable",
                self.max_size,
                lengths.len()
            )));
        }
        let element_shape = self.element_shape.clone().ok_or_else(|| {
            self.err("element shape must be known before calling split")
        })?;
        let lengths_usize: Vec<usize> = lengths.iter().map(|l| (*l).max(0) as usize).collect();
        let pieces = kernels::split_rows(&tensor, &lengths_usize, &element_shape)?;
        let indices: Vec<i64> = (0..lengths.len() as i64).collect();
        self.write_many(&indices, pieces)
    }

    /// Disposes every held tensor (except frozen ids) and marks the array
    /// closed; all further operations fail.
    pub fn clear_and_close(&mut self, keep_ids: &HashSet<usize>) {
        for slot in &self.tensors {
            if let Some(tensor) = &slot.tensor {
                if !keep_ids.contains(&tensor.id()) {
                    tensor.dispose();
                }
            }
        }
        self.tensors.clear();
        self.closed = true;
    }
}

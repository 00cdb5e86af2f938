//! Reference kernels backing the built-in operation executors.
//!
//! These are intentionally minimal host implementations; the engine under
//! test is the graph driver, not the numerics. Binary ops support equal
//! shapes plus scalar broadcast on either side.

use super::{DType, Shape, Tensor};
use crate::error::ExecutorError;

fn check_same_dtype(a: &Tensor, b: &Tensor, op: &str) -> Result<DType, ExecutorError> {
    if a.dtype() != b.dtype() {
        return Err(ExecutorError::DtypeMismatch(format!(
            "{op}: operand dtypes {} and {} do not match",
            a.dtype(),
            b.dtype()
        )));
    }
    Ok(a.dtype())
}

fn result_shape(a: &Tensor, b: &Tensor, op: &str) -> Result<Shape, ExecutorError> {
    if a.shape() == b.shape() {
        Ok(a.shape().clone())
    } else if a.shape().rank() == 0 {
        Ok(b.shape().clone())
    } else if b.shape().rank() == 0 {
        Ok(a.shape().clone())
    } else {
        Err(ExecutorError::ShapeMismatch(format!(
            "{op}: operand shapes {} and {} do not match",
            a.shape(),
            b.shape()
        )))
    }
}

fn zip_broadcast<T: Copy, R>(lhs: &[T], rhs: &[T], f: impl Fn(T, T) -> R) -> Vec<R> {
    let len = lhs.len().max(rhs.len());
    (0..len)
        .map(|i| {
            let a = lhs[if lhs.len() == 1 { 0 } else { i }];
            let b = rhs[if rhs.len() == 1 { 0 } else { i }];
            f(a, b)
        })
        .collect()
}

fn binary(
    a: &Tensor,
    b: &Tensor,
    op: &str,
    ff: impl Fn(f32, f32) -> f32,
    fi: impl Fn(i32, i32) -> i32,
) -> Result<Tensor, ExecutorError> {
    let dtype = check_same_dtype(a, b, op)?;
    let shape = result_shape(a, b, op)?;
    match dtype {
        DType::F32 => Tensor::from_f32(shape, zip_broadcast(&a.f32_data()?, &b.f32_data()?, ff)),
        DType::I32 => Tensor::from_i32(shape, zip_broadcast(&a.i32_data()?, &b.i32_data()?, fi)),
        DType::Bool => Err(ExecutorError::DtypeMismatch(format!(
            "{op} is not defined for bool tensors"
        ))),
    }
}

pub fn add(a: &Tensor, b: &Tensor) -> Result<Tensor, ExecutorError> {
    binary(a, b, "Add", |x, y| x + y, |x, y| x + y)
}

pub fn sub(a: &Tensor, b: &Tensor) -> Result<Tensor, ExecutorError> {
    binary(a, b, "Sub", |x, y| x - y, |x, y| x - y)
}

pub fn mul(a: &Tensor, b: &Tensor) -> Result<Tensor, ExecutorError> {
    binary(a, b, "Mul", |x, y| x * y, |x, y| x * y)
}

pub fn div(a: &Tensor, b: &Tensor) -> Result<Tensor, ExecutorError> {
    binary(
        a,
        b,
        "Div",
        |x, y| x / y,
        |x, y| if y == 0 { 0 } else { x / y },
    )
}

fn compare(
    a: &Tensor,
    b: &Tensor,
    op: &str,
    ff: impl Fn(f32, f32) -> bool,
    fi: impl Fn(i32, i32) -> bool,
) -> Result<Tensor, ExecutorError> {
    let dtype = check_same_dtype(a, b, op)?;
    let shape = result_shape(a, b, op)?;
    match dtype {
        DType::F32 => Tensor::from_bool(
            shape,
            zip_broadcast(&a.f32_data()?, &b.f32_data()?, ff),
        ),
        DType::I32 => Tensor::from_bool(
            shape,
            zip_broadcast(&a.i32_data()?, &b.i32_data()?, fi),
        ),
        DType::Bool => Err(ExecutorError::DtypeMismatch(format!(
            "{op} is not defined for bool tensors"
        ))),
    }
}

/// Elementwise `a < b`, producing a bool tensor.
pub fn less(a: &Tensor, b: &Tensor) -> Result<Tensor, ExecutorError> {
    compare(a, b, "Less", |x, y| x < y, |x, y| x < y)
}

pub fn less_equal(a: &Tensor, b: &Tensor) -> Result<Tensor, ExecutorError> {
    compare(a, b, "LessEqual", |x, y| x <= y, |x, y| x <= y)
}

pub fn greater(a: &Tensor, b: &Tensor) -> Result<Tensor, ExecutorError> {
    compare(a, b, "Greater", |x, y| x > y, |x, y| x > y)
}

pub fn greater_equal(a: &Tensor, b: &Tensor) -> Result<Tensor, ExecutorError> {
    compare(a, b, "GreaterEqual", |x, y| x >= y, |x, y| x >= y)
}

pub fn equal(a: &Tensor, b: &Tensor) -> Result<Tensor, ExecutorError> {
    compare(a, b, "Equal", |x, y| x == y, |x, y| x == y)
}

fn unary_f32(t: &Tensor, op: &str, f: impl Fn(f32) -> f32) -> Result<Tensor, ExecutorError> {
    match t.dtype() {
        DType::F32 => Tensor::from_f32(
            t.shape().clone(),
            t.f32_data()?.into_iter().map(f).collect(),
        ),
        other => Err(ExecutorError::DtypeMismatch(format!(
            "{op} expects a float32 tensor, got {other}"
        ))),
    }
}

pub fn relu(t: &Tensor) -> Result<Tensor, ExecutorError> {
    unary_f32(t, "Relu", |x| x.max(0.0))
}

pub fn neg(t: &Tensor) -> Result<Tensor, ExecutorError> {
    unary_f32(t, "Neg", |x| -x)
}

pub fn abs(t: &Tensor) -> Result<Tensor, ExecutorError> {
    unary_f32(t, "Abs", |x| x.abs())
}

fn check_uniform(tensors: &[Tensor], op: &str) -> Result<(DType, Shape), ExecutorError> {
    let first = tensors.first().ok_or_else(|| {
        ExecutorError::Internal(format!("{op} requires at least one input tensor"))
    })?;
    for t in tensors {
        check_same_dtype(first, t, op)?;
    }
    Ok((first.dtype(), first.shape().clone()))
}

/// Stacks tensors of identical shape along a new leading axis.
pub fn stack(tensors: &[Tensor]) -> Result<Tensor, ExecutorError> {
    let (dtype, shape) = check_uniform(tensors, "Stack")?;
    for t in tensors {
        if t.shape() != &shape {
            return Err(ExecutorError::ShapeMismatch(format!(
                "Stack: tensor shape {} does not match {}",
                t.shape(),
                shape
            )));
        }
    }
    let mut dims = vec![tensors.len() as i64];
    dims.extend_from_slice(shape.dims());
    assemble(dtype, Shape::new(dims), tensors)
}

/// Concatenates tensors along the existing leading axis.
pub fn concat(tensors: &[Tensor]) -> Result<Tensor, ExecutorError> {
    let (dtype, shape) = check_uniform(tensors, "Concat")?;
    if shape.rank() == 0 {
        return Err(ExecutorError::ShapeMismatch(
            "Concat requires tensors of rank >= 1".to_string(),
        ));
    }
    let mut leading = 0i64;
    for t in tensors {
        if t.shape().dims()[1..] != shape.dims()[1..] {
            return Err(ExecutorError::ShapeMismatch(format!(
                "Concat: tensor shape {} is not compatible with {}",
                t.shape(),
                shape
            )));
        }
        leading += t.shape().dims()[0];
    }
    let mut dims = vec![leading];
    dims.extend_from_slice(&shape.dims()[1..]);
    assemble(dtype, Shape::new(dims), tensors)
}

fn assemble(dtype: DType, shape: Shape, tensors: &[Tensor]) -> Result<Tensor, ExecutorError> {
    match dtype {
        DType::F32 => {
            let mut data = Vec::with_capacity(shape.num_elements());
            for t in tensors {
                data.extend(t.f32_data()?);
            }
            Tensor::from_f32(shape, data)
        }
        DType::I32 => {
            let mut data = Vec::with_capacity(shape.num_elements());
            for t in tensors {
                data.extend(t.i32_data()?);
            }
            Tensor::from_i32(shape, data)
        }
        DType::Bool => {
            let mut data = Vec::with_capacity(shape.num_elements());
            for t in tensors {
                data.extend(t.bool_data()?);
            }
            Tensor::from_bool(shape, data)
        }
    }
}

/// Splits a tensor into per-row slices along axis 0.
pub fn unstack(t: &Tensor) -> Result<Vec<Tensor>, ExecutorError> {
    let dims = t.shape().dims();
    if dims.is_empty() {
        return Err(ExecutorError::ShapeMismatch(
            "Unstack requires a tensor of rank >= 1".to_string(),
        ));
    }
    let rows = dims[0].max(0) as usize;
    let row_shape = Shape::new(dims[1..].to_vec());
    let row_len = row_shape.num_elements();
    let mut out = Vec::with_capacity(rows);
    match t.dtype() {
        DType::F32 => {
            let data = t.f32_data()?;
            for r in 0..rows {
                out.push(Tensor::from_f32(
                    row_shape.clone(),
                    data[r * row_len..(r + 1) * row_len].to_vec(),
                )?);
            }
        }
        DType::I32 => {
            let data = t.i32_data()?;
            for r in 0..rows {
                out.push(Tensor::from_i32(
                    row_shape.clone(),
                    data[r * row_len..(r + 1) * row_len].to_vec(),
                )?);
            }
        }
        DType::Bool => {
            let data = t.bool_data()?;
            for r in 0..rows {
                out.push(Tensor::from_bool(
                    row_shape.clone(),
                    data[r * row_len..(r + 1) * row_len].to_vec(),
                )?);
            }
        }
    }
    Ok(out)
}

/// Fills in at most one `-1` dimension so the shape covers `count` elements.
fn resolve_unknown_dim(dims: &[i64], count: usize) -> Vec<i64> {
    let mut resolved = dims.to_vec();
    if let Some(pos) = resolved.iter().position(|d| *d < 0) {
        let known: usize = resolved
            .iter()
            .filter(|d| **d >= 0)
            .map(|d| *d as usize)
            .product();
        resolved[pos] = if known == 0 { 0 } else { (count / known) as i64 };
    }
    resolved
}

/// Slices `lengths.len()` pieces out of the leading axis, reshaping each
/// piece to `element_shape` (with a single unknown dimension inferred).
pub fn split_rows(
    t: &Tensor,
    lengths: &[usize],
    element_shape: &[i64],
) -> Result<Vec<Tensor>, ExecutorError> {
    let total: usize = lengths.iter().sum();
    let elements_per_row = if total == 0 { 0 } else { t.len() / total };
    let mut out = Vec::with_capacity(lengths.len());
    let mut offset = 0usize;
    match t.dtype() {
        DType::F32 => {
            let data = t.f32_data()?;
            for len in lengths {
                let count = len * elements_per_row;
                let shape = Shape::new(resolve_unknown_dim(element_shape, count));
                out.push(Tensor::from_f32(shape, data[offset..offset + count].to_vec())?);
                offset += count;
            }
        }
        DType::I32 => {
            let data = t.i32_data()?;
            for len in lengths {
                let count = len * elements_per_row;
                let shape = Shape::new(resolve_unknown_dim(element_shape, count));
                out.push(Tensor::from_i32(shape, data[offset..offset + count].to_vec())?);
                offset += count;
            }
        }
        DType::Bool => {
            let data = t.bool_data()?;
            for len in lengths {
                let count = len * elements_per_row;
                let shape = Shape::new(resolve_unknown_dim(element_shape, count));
                out.push(Tensor::from_bool(shape, data[offset..offset + count].to_vec())?);
                offset += count;
            }
        }
    }
    Ok(out)
}

/// Coordinates of the non-zero (or true) entries, shape `[n, rank]`.
///
/// The output shape depends on the tensor's values, which is what makes
/// `Where` a dynamic op.
pub fn where_indices(t: &Tensor) -> Result<Tensor, ExecutorError> {
    let dims = t.shape().dims().to_vec();
    let rank = dims.len().max(1);
    let mask: Vec<bool> = match t.dtype() {
        DType::F32 => t.f32_data()?.into_iter().map(|v| v != 0.0).collect(),
        DType::I32 => t.i32_data()?.into_iter().map(|v| v != 0).collect(),
        DType::Bool => t.bool_data()?,
    };
    let mut coords = Vec::new();
    let mut count = 0i64;
    for (flat, hit) in mask.iter().enumerate() {
        if !hit {
            continue;
        }
        count += 1;
        if dims.is_empty() {
            coords.push(0);
            continue;
        }
        let mut rem = flat;
        let mut coord = vec![0i32; dims.len()];
        for axis in (0..dims.len()).rev() {
            let size = dims[axis].max(1) as usize;
            coord[axis] = (rem % size) as i32;
            rem /= size;
        }
        coords.extend(coord);
    }
    Tensor::from_i32(Shape::new(vec![count, rank as i64]), coords)
}

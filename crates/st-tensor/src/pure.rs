// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Pure Rust tensor primitives with only lightweight external dependencies.
//!
//! Everything is a row-major 2D [`Tensor`]. Batched images keep one batch
//! element per row and flatten `channels * height * width` into the columns,
//! described by an [`ImageShape`]. Row-wise reductions and projections used by
//! the constrained optimizers live in [`rows`].

pub mod image;
pub mod rows;

pub use self::image::ImageShape;

use core::fmt;
use rand::distributions::{Distribution, Uniform};
use rand::Rng;
use rayon::prelude::*;
use spiral_config::determinism;
use std::error::Error;
use std::sync::Arc;

/// Result alias used throughout the pure module.
pub type PureResult<T> = Result<T, TensorError>;

/// Errors emitted by tensor utilities.
#[derive(Clone, Debug, PartialEq)]
pub enum TensorError {
    /// A tensor constructor received an invalid shape.
    InvalidDimensions { rows: usize, cols: usize },
    /// Data provided to a constructor or operator does not match the tensor shape.
    DataLength { expected: usize, got: usize },
    /// An operator was asked to combine tensors of incompatible shapes.
    ShapeMismatch {
        left: (usize, usize),
        right: (usize, usize),
    },
    /// Computation received an empty input which would otherwise trigger a panic.
    EmptyInput(&'static str),
    /// An index (label, column range, block) fell outside its valid range.
    IndexOutOfRange {
        label: &'static str,
        index: usize,
        bound: usize,
    },
    /// Numeric guard detected a non-finite value.
    NonFiniteValue { label: &'static str, value: f32 },
    /// Generic configuration violation.
    InvalidValue { label: &'static str },
}

impl fmt::Display for TensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TensorError::InvalidDimensions { rows, cols } => {
                write!(
                    f,
                    "invalid tensor dimensions ({rows} x {cols}); both axes must be non-zero"
                )
            }
            TensorError::DataLength { expected, got } => {
                write!(f, "data length mismatch: expected {expected}, got {got}")
            }
            TensorError::ShapeMismatch { left, right } => {
                write!(
                    f,
                    "shape mismatch: left={:?}, right={:?} cannot be combined",
                    left, right
                )
            }
            TensorError::EmptyInput(label) => {
                write!(f, "{label} must not be empty for this computation")
            }
            TensorError::IndexOutOfRange {
                label,
                index,
                bound,
            } => {
                write!(f, "{label} index {index} is out of range (bound {bound})")
            }
            TensorError::NonFiniteValue { label, value } => {
                write!(f, "non-finite value detected for {label}: {value}")
            }
            TensorError::InvalidValue { label } => {
                write!(f, "invalid value: {label}")
            }
        }
    }
}

impl Error for TensorError {}

/// Sign with `sign(0) = 0`, unlike [`f32::signum`].
#[inline]
pub fn sign(value: f32) -> f32 {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// A simple 2D row-major tensor backed by a reference-counted buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    data: Arc<Vec<f32>>,
    rows: usize,
    cols: usize,
}

impl Tensor {
    fn from_buffer(rows: usize, cols: usize, data: Vec<f32>) -> PureResult<Self> {
        if rows == 0 || cols == 0 {
            return Err(TensorError::InvalidDimensions { rows, cols });
        }
        let expected = rows * cols;
        if expected != data.len() {
            return Err(TensorError::DataLength {
                expected,
                got: data.len(),
            });
        }
        Ok(Self {
            data: Arc::new(data),
            rows,
            cols,
        })
    }

    /// Create a tensor filled with zeros.
    pub fn zeros(rows: usize, cols: usize) -> PureResult<Self> {
        Self::full(rows, cols, 0.0)
    }

    /// Create a tensor where every element equals `value`.
    pub fn full(rows: usize, cols: usize, value: f32) -> PureResult<Self> {
        Self::from_buffer(rows, cols, vec![value; rows * cols])
    }

    /// Create a tensor from raw data. The provided vector must match
    /// `rows * cols` elements.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f32>) -> PureResult<Self> {
        Self::from_buffer(rows, cols, data)
    }

    /// Construct a tensor by applying a generator function to each coordinate.
    pub fn from_fn<F>(rows: usize, cols: usize, mut f: F) -> PureResult<Self>
    where
        F: FnMut(usize, usize) -> f32,
    {
        if rows == 0 || cols == 0 {
            return Err(TensorError::InvalidDimensions { rows, cols });
        }
        let mut data = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                data.push(f(r, c));
            }
        }
        Self::from_buffer(rows, cols, data)
    }

    /// Draws every element from `distribution` using the caller's RNG.
    pub fn sample<R, D>(rows: usize, cols: usize, distribution: &D, rng: &mut R) -> PureResult<Self>
    where
        R: Rng + ?Sized,
        D: Distribution<f32>,
    {
        if rows == 0 || cols == 0 {
            return Err(TensorError::InvalidDimensions { rows, cols });
        }
        let data = (0..rows * cols).map(|_| distribution.sample(rng)).collect();
        Self::from_buffer(rows, cols, data)
    }

    /// Construct a tensor by sampling a uniform distribution in `[min, max)`.
    ///
    /// When `seed` is provided the RNG becomes deterministic which makes tests
    /// reproducible. Otherwise the process determinism policy decides.
    pub fn random_uniform(
        rows: usize,
        cols: usize,
        min: f32,
        max: f32,
        seed: Option<u64>,
    ) -> PureResult<Self> {
        if !(min < max) {
            return Err(TensorError::InvalidValue {
                label: "random_uniform_bounds",
            });
        }
        let mut rng = determinism::rng_from_optional(seed, "st-tensor/tensor/uniform");
        Self::sample(rows, cols, &Uniform::new(min, max), &mut rng)
    }

    /// Returns the `(rows, cols)` pair of the tensor.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Total number of elements stored in the tensor.
    #[inline]
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    /// Tensors always hold at least one element; kept for API symmetry.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Immutable view of the row-major buffer.
    pub fn data(&self) -> &[f32] {
        self.data.as_slice()
    }

    /// Mutable view of the row-major buffer (copy-on-write when shared).
    pub fn data_mut(&mut self) -> &mut [f32] {
        Arc::make_mut(&mut self.data).as_mut_slice()
    }

    /// Borrow a single row.
    pub fn row(&self, row: usize) -> PureResult<&[f32]> {
        if row >= self.rows {
            return Err(TensorError::IndexOutOfRange {
                label: "row",
                index: row,
                bound: self.rows,
            });
        }
        Ok(&self.data[row * self.cols..(row + 1) * self.cols])
    }

    fn ensure_same_shape(&self, other: &Tensor) -> PureResult<()> {
        if self.shape() != other.shape() {
            return Err(TensorError::ShapeMismatch {
                left: self.shape(),
                right: other.shape(),
            });
        }
        Ok(())
    }

    /// Element-wise map into a new tensor.
    pub fn map<F>(&self, f: F) -> Tensor
    where
        F: Fn(f32) -> f32,
    {
        Tensor {
            data: Arc::new(self.data.iter().map(|&v| f(v)).collect()),
            rows: self.rows,
            cols: self.cols,
        }
    }

    /// Element-wise combination of two tensors of identical shape.
    pub fn zip_map<F>(&self, other: &Tensor, f: F) -> PureResult<Tensor>
    where
        F: Fn(f32, f32) -> f32,
    {
        self.ensure_same_shape(other)?;
        let data = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(&a, &b)| f(a, b))
            .collect();
        Tensor::from_buffer(self.rows, self.cols, data)
    }

    /// Element-wise addition.
    pub fn add(&self, other: &Tensor) -> PureResult<Tensor> {
        self.zip_map(other, |a, b| a + b)
    }

    /// Element-wise subtraction.
    pub fn sub(&self, other: &Tensor) -> PureResult<Tensor> {
        self.zip_map(other, |a, b| a - b)
    }

    /// Returns a new tensor where every element is scaled by `value`.
    pub fn scale(&self, value: f32) -> PureResult<Tensor> {
        Ok(self.map(|a| a * value))
    }

    /// Add a scaled tensor to this tensor (`self += scale * other`).
    pub fn add_scaled(&mut self, other: &Tensor, scale: f32) -> PureResult<()> {
        self.ensure_same_shape(other)?;
        let data = Arc::make_mut(&mut self.data);
        for (a, b) in data.iter_mut().zip(other.data.iter()) {
            *a += scale * b;
        }
        Ok(())
    }

    /// Add the provided row vector to every row (`self[row] += bias`).
    pub fn add_row_inplace(&mut self, bias: &[f32]) -> PureResult<()> {
        if bias.len() != self.cols {
            return Err(TensorError::DataLength {
                expected: self.cols,
                got: bias.len(),
            });
        }
        let cols = self.cols;
        let data = Arc::make_mut(&mut self.data);
        for row in data.chunks_mut(cols) {
            for (value, b) in row.iter_mut().zip(bias) {
                *value += b;
            }
        }
        Ok(())
    }

    /// Element-wise sign with `sign(0) = 0`.
    pub fn signum(&self) -> Tensor {
        self.map(sign)
    }

    /// Element-wise clamp into `[min, max]`.
    pub fn clamp(&self, min: f32, max: f32) -> Tensor {
        self.map(|v| v.max(min).min(max))
    }

    /// Returns the transpose of the tensor.
    pub fn transpose(&self) -> Tensor {
        let mut data = vec![0.0; self.len()];
        for r in 0..self.rows {
            for c in 0..self.cols {
                data[c * self.rows + r] = self.data[r * self.cols + c];
            }
        }
        Tensor {
            data: Arc::new(data),
            rows: self.cols,
            cols: self.rows,
        }
    }

    /// Dense matrix product `self (m x k) * other (k x n)`. Output rows are
    /// filled in parallel.
    pub fn matmul(&self, other: &Tensor) -> PureResult<Tensor> {
        if self.cols != other.rows {
            return Err(TensorError::ShapeMismatch {
                left: self.shape(),
                right: other.shape(),
            });
        }
        let (inner, cols) = (self.cols, other.cols);
        let lhs = self.data();
        let rhs = other.data();
        let mut out = vec![0.0f32; self.rows * cols];
        out.par_chunks_mut(cols)
            .enumerate()
            .for_each(|(r, out_row)| {
                let lhs_row = &lhs[r * inner..(r + 1) * inner];
                for (k, &a) in lhs_row.iter().enumerate() {
                    if a == 0.0 {
                        continue;
                    }
                    let rhs_row = &rhs[k * cols..(k + 1) * cols];
                    for (o, &b) in out_row.iter_mut().zip(rhs_row) {
                        *o += a * b;
                    }
                }
            });
        Tensor::from_buffer(self.rows, cols, out)
    }

    /// Numerically stable row-wise softmax.
    pub fn row_softmax(&self) -> PureResult<Tensor> {
        let mut out = self.data.as_ref().clone();
        for row in out.chunks_mut(self.cols) {
            let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let mut total = 0.0f32;
            for value in row.iter_mut() {
                *value = (*value - max).exp();
                total += *value;
            }
            for value in row.iter_mut() {
                *value /= total;
            }
        }
        Tensor::from_buffer(self.rows, self.cols, out)
    }

    /// Returns the sum over rows for each column.
    pub fn sum_axis0(&self) -> Vec<f32> {
        let mut sums = vec![0.0; self.cols];
        for row in self.data.chunks(self.cols) {
            for (s, v) in sums.iter_mut().zip(row) {
                *s += v;
            }
        }
        sums
    }

    /// Returns the sum over columns for each row.
    pub fn sum_axis1(&self) -> Vec<f32> {
        self.data.chunks(self.cols).map(|row| row.iter().sum()).collect()
    }

    /// Largest absolute element-wise difference to `other`.
    pub fn max_abs_diff(&self, other: &Tensor) -> PureResult<f32> {
        self.ensure_same_shape(other)?;
        Ok(self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f32::max))
    }

    /// Copies the column range `[start, end)` of every row.
    pub fn slice_cols(&self, start: usize, end: usize) -> PureResult<Tensor> {
        if start >= end || end > self.cols {
            return Err(TensorError::IndexOutOfRange {
                label: "column slice end",
                index: end,
                bound: self.cols,
            });
        }
        let width = end - start;
        let mut data = Vec::with_capacity(self.rows * width);
        for row in self.data.chunks(self.cols) {
            data.extend_from_slice(&row[start..end]);
        }
        Tensor::from_buffer(self.rows, width, data)
    }

    /// Concatenates tensors column-wise; every input must share the row count.
    pub fn cat_cols(tensors: &[Tensor]) -> PureResult<Tensor> {
        let Some(first) = tensors.first() else {
            return Err(TensorError::EmptyInput("Tensor::cat_cols"));
        };
        let rows = first.rows;
        let mut total_cols = 0usize;
        for tensor in tensors {
            if tensor.rows != rows {
                return Err(TensorError::ShapeMismatch {
                    left: first.shape(),
                    right: tensor.shape(),
                });
            }
            total_cols += tensor.cols;
        }
        let mut data = Vec::with_capacity(rows * total_cols);
        for r in 0..rows {
            for tensor in tensors {
                data.extend_from_slice(&tensor.data[r * tensor.cols..(r + 1) * tensor.cols]);
            }
        }
        Tensor::from_buffer(rows, total_cols, data)
    }
}

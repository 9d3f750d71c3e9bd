// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Per-row reductions and projections. Each row is one batch element, so the
//! norms and clamps here are the per-example constraint geometry.

use super::{PureResult, Tensor, TensorError};
use std::sync::Arc;

impl Tensor {
    fn check_row_scalars(&self, values: &[f32]) -> PureResult<()> {
        if values.len() != self.rows {
            return Err(TensorError::DataLength {
                expected: self.rows,
                got: values.len(),
            });
        }
        Ok(())
    }

    pub fn row_l1_norms(&self) -> Vec<f32> {
        self.data
            .chunks(self.cols)
            .map(|row| row.iter().map(|v| v.abs()).sum())
            .collect()
    }

    pub fn row_l2_norms(&self) -> Vec<f32> {
        self.data
            .chunks(self.cols)
            .map(|row| row.iter().map(|v| v * v).sum::<f32>().sqrt())
            .collect()
    }

    pub fn row_linf_norms(&self) -> Vec<f32> {
        self.data
            .chunks(self.cols)
            .map(|row| row.iter().fold(0.0f32, |acc, v| acc.max(v.abs())))
            .collect()
    }

    /// Multiplies row `r` by `factors[r]`.
    pub fn scale_rows(&self, factors: &[f32]) -> PureResult<Tensor> {
        self.check_row_scalars(factors)?;
        let mut data = self.data.as_ref().clone();
        for (row, factor) in data.chunks_mut(self.cols).zip(factors) {
            for value in row.iter_mut() {
                *value *= factor;
            }
        }
        Tensor::from_vec(self.rows, self.cols, data)
    }

    /// In-place `self[r] += factors[r] * other[r]`.
    pub fn add_scaled_rows(&mut self, other: &Tensor, factors: &[f32]) -> PureResult<()> {
        if self.shape() != other.shape() {
            return Err(TensorError::ShapeMismatch {
                left: self.shape(),
                right: other.shape(),
            });
        }
        self.check_row_scalars(factors)?;
        let cols = self.cols;
        let data = Arc::make_mut(&mut self.data);
        for ((row, src), factor) in data
            .chunks_mut(cols)
            .zip(other.data.chunks(cols))
            .zip(factors)
        {
            for (value, s) in row.iter_mut().zip(src) {
                *value += factor * s;
            }
        }
        Ok(())
    }

    /// Clamps row `r` into `[-bounds[r], bounds[r]]`.
    pub fn clamp_rows_symmetric(&mut self, bounds: &[f32]) -> PureResult<()> {
        self.check_row_scalars(bounds)?;
        let cols = self.cols;
        let data = Arc::make_mut(&mut self.data);
        for (row, bound) in data.chunks_mut(cols).zip(bounds) {
            let bound = bound.abs();
            for value in row.iter_mut() {
                *value = value.max(-bound).min(bound);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_norms_are_independent() {
        let t = Tensor::from_vec(2, 2, vec![3.0, -4.0, 0.0, 1.0]).unwrap();
        assert_eq!(t.row_l1_norms(), vec![7.0, 1.0]);
        assert_eq!(t.row_l2_norms(), vec![5.0, 1.0]);
        assert_eq!(t.row_linf_norms(), vec![4.0, 1.0]);
    }

    #[test]
    fn scaling_and_clamping_follow_rows() {
        let mut t = Tensor::from_vec(2, 2, vec![1.0, -2.0, 3.0, -4.0]).unwrap();
        let scaled = t.scale_rows(&[2.0, 0.5]).unwrap();
        assert_eq!(scaled.data(), &[2.0, -4.0, 1.5, -2.0]);
        t.clamp_rows_symmetric(&[1.5, 3.5]).unwrap();
        assert_eq!(t.data(), &[1.0, -1.5, 3.0, -3.5]);
        assert!(t.scale_rows(&[1.0]).is_err());
    }

    #[test]
    fn add_scaled_rows_uses_row_factor() {
        let mut t = Tensor::zeros(2, 2).unwrap();
        let step = Tensor::from_vec(2, 2, vec![1.0, -1.0, 1.0, 0.0]).unwrap();
        t.add_scaled_rows(&step, &[0.1, 0.2]).unwrap();
        assert_eq!(t.data(), &[0.1, -0.1, 0.2, 0.0]);
    }
}

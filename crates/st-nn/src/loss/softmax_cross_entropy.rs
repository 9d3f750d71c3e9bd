// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use super::Loss;
use crate::{PureResult, Tensor, TensorError};

/// Cross entropy on raw logits with one-hot targets, averaged over the batch.
#[derive(Debug, Clone, Copy)]
pub struct SoftmaxCrossEntropy {
    epsilon: f32,
}

impl Default for SoftmaxCrossEntropy {
    fn default() -> Self {
        Self { epsilon: 1e-12 }
    }
}

impl SoftmaxCrossEntropy {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(prediction: &Tensor, target: &Tensor) -> PureResult<()> {
        if prediction.shape() != target.shape() {
            return Err(TensorError::ShapeMismatch {
                left: prediction.shape(),
                right: target.shape(),
            });
        }
        Ok(())
    }

    /// Loss of each batch row before averaging.
    pub fn per_sample(&self, prediction: &Tensor, target: &Tensor) -> PureResult<Vec<f32>> {
        Self::check(prediction, target)?;
        let probs = prediction.row_softmax()?;
        let cols = probs.shape().1;
        Ok(probs
            .data()
            .chunks(cols)
            .zip(target.data().chunks(cols))
            .map(|(p_row, t_row)| {
                p_row
                    .iter()
                    .zip(t_row)
                    .map(|(p, t)| -t * p.max(self.epsilon).ln())
                    .sum()
            })
            .collect())
    }
}

impl Loss for SoftmaxCrossEntropy {
    fn forward(&mut self, prediction: &Tensor, target: &Tensor) -> PureResult<Tensor> {
        let losses = self.per_sample(prediction, target)?;
        let mean = losses.iter().sum::<f32>() / losses.len() as f32;
        Tensor::from_vec(1, 1, vec![mean])
    }

    fn backward(&mut self, prediction: &Tensor, target: &Tensor) -> PureResult<Tensor> {
        Self::check(prediction, target)?;
        let inv_batch = 1.0 / prediction.shape().0 as f32;
        prediction
            .row_softmax()?
            .zip_map(target, |p, t| (p - t) * inv_batch)
    }
}

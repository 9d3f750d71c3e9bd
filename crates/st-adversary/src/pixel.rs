// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Bridge between the classifier's `[-1, 1]` inputs and the `[0, 255]` pixel
//! domain the forward models operate in.

use st_nn::{one_hot, Loss, Module, PureResult, SoftmaxCrossEntropy, Tensor};

const PIXEL_SCALE: f32 = 255.0;

/// `[-1, 1]` to `[0, 255]`.
pub fn to_pixel(normalized: &Tensor) -> Tensor {
    normalized.map(|v| (v * 0.5 + 0.5) * PIXEL_SCALE)
}

/// `[0, 255]` to `[-1, 1]`.
pub fn to_normalized(pixels: &Tensor) -> Tensor {
    pixels.map(|v| v / PIXEL_SCALE * 2.0 - 1.0)
}

/// Mean loss of a batch together with its gradient in pixel space.
#[derive(Clone, Debug)]
pub struct LossGradient {
    pub loss: f32,
    pub grad: Tensor,
}

/// Wraps a fixed classifier so it can be scored and differentiated on pixels.
#[derive(Debug)]
pub struct PixelModel<M> {
    model: M,
    criterion: SoftmaxCrossEntropy,
}

impl<M: Module> PixelModel<M> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            criterion: SoftmaxCrossEntropy::new(),
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn into_inner(self) -> M {
        self.model
    }

    /// Class scores for a pixel-domain batch.
    pub fn scores(&self, pixels: &Tensor) -> PureResult<Tensor> {
        self.model.forward(&to_normalized(pixels))
    }

    /// Pulls `grad_scores` back to the pixels. The classifier's parameter
    /// accumulators are cleared afterwards; it is never trained.
    pub fn input_gradient(&mut self, pixels: &Tensor, grad_scores: &Tensor) -> PureResult<Tensor> {
        let grad = self
            .model
            .backward(&to_normalized(pixels), grad_scores)?
            .scale(2.0 / PIXEL_SCALE)?;
        self.model.zero_accumulators()?;
        Ok(grad)
    }

    /// Cross entropy against integer `labels` and its pixel gradient.
    pub fn loss_gradient(&mut self, pixels: &Tensor, labels: &[usize]) -> PureResult<LossGradient> {
        let scores = self.scores(pixels)?;
        let target = one_hot(labels, scores.shape().1)?;
        let loss = self.criterion.forward(&scores, &target)?.data()[0];
        let grad_scores = self.criterion.backward(&scores, &target)?;
        let grad = self.input_gradient(pixels, &grad_scores)?;
        Ok(LossGradient { loss, grad })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use st_nn::Linear;

    #[test]
    fn domain_maps_invert() {
        let images = Tensor::from_vec(1, 3, vec![-1.0, 0.0, 1.0]).unwrap();
        let pixels = to_pixel(&images);
        assert_eq!(pixels.data(), &[0.0, 127.5, 255.0]);
        let back = to_normalized(&pixels);
        assert!(back.max_abs_diff(&images).unwrap() < 1e-6);
    }

    #[test]
    fn pixel_gradient_matches_finite_difference() {
        let weight = Tensor::from_vec(2, 2, vec![0.5, -0.25, 1.0, 0.75]).unwrap();
        let bias = Tensor::zeros(1, 2).unwrap();
        let mut model = PixelModel::new(Linear::from_tensors("head", weight, bias).unwrap());
        let pixels = Tensor::from_vec(1, 2, vec![100.0, 30.0]).unwrap();
        let LossGradient { grad, .. } = model.loss_gradient(&pixels, &[0]).unwrap();
        assert!(model.model().weight().gradient().is_none());

        let h = 0.5;
        for i in 0..2 {
            let mut plus = pixels.clone();
            plus.data_mut()[i] += h;
            let mut minus = pixels.clone();
            minus.data_mut()[i] -= h;
            let lp = model.loss_gradient(&plus, &[0]).unwrap().loss;
            let lm = model.loss_gradient(&minus, &[0]).unwrap().loss;
            let fd = (lp - lm) / (2.0 * h);
            assert!((fd - grad.data()[i]).abs() < 1e-4, "{fd} vs {}", grad.data()[i]);
        }
        assert!(model.loss_gradient(&pixels, &[2]).is_err());
    }
}

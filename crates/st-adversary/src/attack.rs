// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Classifier-facing entry points. Both take `[-1, 1]` images with one row
//! per example and return adversarial images in the same domain.

use crate::config::{AttackOptions, ElasticAttackConfig, JpegAttackConfig};
use crate::elastic::ElasticAttackBase;
use crate::error::{AttackError, AttackResult};
use crate::jpeg::JpegAttackBase;
use crate::pixel::{to_normalized, to_pixel, PixelModel};
use st_nn::Module;
use st_tensor::{ImageShape, Tensor};

/// Recovers `(channels, R, R)` from the column count of a batch.
fn infer_shape(images: &Tensor, resolution: usize) -> AttackResult<ImageShape> {
    let plane = resolution * resolution;
    let cols = images.shape().1;
    if plane == 0 || cols % plane != 0 {
        return Err(AttackError::invalid(
            "images",
            format!("{cols} columns do not hold whole {resolution}x{resolution} planes"),
        ));
    }
    Ok(ImageShape::new(cols / plane, resolution, resolution)?)
}

fn pixel_domain(images: &Tensor) -> Tensor {
    to_pixel(&images.clamp(-1.0, 1.0))
}

/// Smooth flow-field warp attack against a fixed classifier.
#[derive(Debug)]
pub struct ElasticAttack<M> {
    pixel_model: PixelModel<M>,
    base: ElasticAttackBase,
}

impl<M: Module> ElasticAttack<M> {
    /// `eps_max` and `step_size` are in pixels.
    pub fn new(
        model: M,
        nb_iters: usize,
        eps_max: f32,
        step_size: f32,
        resolution: usize,
    ) -> AttackResult<Self> {
        Self::from_config(
            model,
            ElasticAttackConfig::new(nb_iters, eps_max, step_size, resolution),
        )
    }

    pub fn from_config(model: M, config: ElasticAttackConfig) -> AttackResult<Self> {
        Ok(Self {
            pixel_model: PixelModel::new(model),
            base: ElasticAttackBase::new(config)?,
        })
    }

    pub fn base(&self) -> &ElasticAttackBase {
        &self.base
    }

    pub fn model(&self) -> &M {
        self.pixel_model.model()
    }

    pub fn perturb(&mut self, images: &Tensor, labels: &[usize]) -> AttackResult<Tensor> {
        self.perturb_with(images, labels, AttackOptions::default())
    }

    pub fn perturb_with(
        &mut self,
        images: &Tensor,
        labels: &[usize],
        options: AttackOptions,
    ) -> AttackResult<Tensor> {
        let shape = infer_shape(images, self.base.config().resolution)?;
        let pixels = pixel_domain(images);
        let outcome = self
            .base
            .forward(&mut self.pixel_model, &pixels, shape, labels, options)?;
        Ok(to_normalized(&outcome.pixels))
    }
}

/// Quantization-offset attack through a differentiable JPEG round trip.
#[derive(Debug)]
pub struct JpegAttack<M> {
    pixel_model: PixelModel<M>,
    base: JpegAttackBase,
}

impl<M: Module> JpegAttack<M> {
    /// `opt` is one of `linf`, `l1`, `l2`.
    pub fn new(
        model: M,
        nb_iters: usize,
        eps_max: f32,
        step_size: f32,
        opt: &str,
        resolution: usize,
    ) -> AttackResult<Self> {
        Self::from_config(
            model,
            JpegAttackConfig::new(nb_iters, eps_max, step_size, opt, resolution),
        )
    }

    pub fn from_config(model: M, config: JpegAttackConfig) -> AttackResult<Self> {
        Ok(Self {
            pixel_model: PixelModel::new(model),
            base: JpegAttackBase::new(config)?,
        })
    }

    pub fn base(&self) -> &JpegAttackBase {
        &self.base
    }

    pub fn model(&self) -> &M {
        self.pixel_model.model()
    }

    pub fn perturb(&mut self, images: &Tensor, labels: &[usize]) -> AttackResult<Tensor> {
        self.perturb_with(images, labels, AttackOptions::default())
    }

    pub fn perturb_with(
        &mut self,
        images: &Tensor,
        labels: &[usize],
        options: AttackOptions,
    ) -> AttackResult<Tensor> {
        let shape = infer_shape(images, self.base.config().resolution)?;
        let pixels = pixel_domain(images);
        let outcome = self
            .base
            .forward(&mut self.pixel_model, &pixels, shape, labels, options)?;
        Ok(to_normalized(&outcome.pixels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use st_nn::Linear;

    fn linear(inputs: usize) -> Linear {
        Linear::from_tensors(
            "head",
            Tensor::full(inputs, 2, 0.01).unwrap(),
            Tensor::zeros(1, 2).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn shape_follows_resolution() {
        let images = Tensor::zeros(2, 3 * 16 * 16).unwrap();
        let shape = infer_shape(&images, 16).unwrap();
        assert_eq!((shape.channels, shape.height, shape.width), (3, 16, 16));
        assert!(infer_shape(&images, 10).is_err());
    }

    #[test]
    fn unknown_geometry_fails_at_construction() {
        assert!(matches!(
            JpegAttack::new(linear(768), 1, 1.0, 1.0, "l0", 16),
            Err(AttackError::UnknownConstraint { .. })
        ));
    }

    #[test]
    fn out_of_range_inputs_are_clamped_first() {
        let mut config = ElasticAttackConfig::new(0, 0.0, 0.0, 8);
        config.kernel_size = 3;
        let mut attack = ElasticAttack::from_config(linear(64), config).unwrap();
        let images = Tensor::from_fn(1, 64, |_, c| if c % 2 == 0 { 3.0 } else { -0.5 }).unwrap();
        let out = attack.perturb(&images, &[1]).unwrap();
        assert!(out.data().iter().all(|v| v.abs() <= 1.0 + 1e-4));
        assert!((out.data()[0] - 1.0).abs() < 1e-4);
        assert!((out.data()[1] + 0.5).abs() < 1e-4);
    }
}

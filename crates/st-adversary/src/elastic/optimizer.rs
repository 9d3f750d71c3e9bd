// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use super::warp::ElasticDeformation;
use crate::budget::Budget;
use crate::config::{AttackOptions, ElasticAttackConfig};
use crate::error::{AttackError, AttackResult};
use crate::pixel::{LossGradient, PixelModel};
use rand::distributions::Uniform;
use rand::rngs::StdRng;
use spiral_config::determinism;
use st_nn::Module;
use st_tensor::{ImageShape, Tensor};
use tracing::{debug, info};

/// Final warped pixels and the flow field that produced them.
#[derive(Clone, Debug)]
pub struct ElasticOutcome {
    pub pixels: Tensor,
    pub flow: Tensor,
}

/// L∞-bounded sign-gradient ascent over the elastic flow field.
#[derive(Debug)]
pub struct ElasticAttackBase {
    config: ElasticAttackConfig,
    deformer: ElasticDeformation,
    rng: StdRng,
}

impl ElasticAttackBase {
    pub fn new(config: ElasticAttackConfig) -> AttackResult<Self> {
        config.validate()?;
        let deformer =
            ElasticDeformation::new(config.resolution, config.kernel_size, config.kernel_std)?;
        let rng = determinism::rng_from_optional(config.seed, "st-adversary/elastic");
        Ok(Self {
            config,
            deformer,
            rng,
        })
    }

    pub fn config(&self) -> &ElasticAttackConfig {
        &self.config
    }

    pub fn deformer(&self) -> &ElasticDeformation {
        &self.deformer
    }

    /// Initial flow: uniform in `[-eps, eps)` per example, or zero.
    fn init(&mut self, batch: usize, eps: &[f32]) -> AttackResult<Tensor> {
        let len = self.deformer.flow_len();
        if !self.config.rand_init {
            return Ok(Tensor::zeros(batch, len)?);
        }
        let unit = Tensor::sample(batch, len, &Uniform::new(-1.0f32, 1.0), &mut self.rng)?;
        Ok(unit.scale_rows(eps)?)
    }

    /// Runs the search on a pixel-domain batch. `labels` holds one class
    /// index per row.
    pub fn forward<M: Module>(
        &mut self,
        pixel_model: &mut PixelModel<M>,
        pixels: &Tensor,
        shape: ImageShape,
        labels: &[usize],
        options: AttackOptions,
    ) -> AttackResult<ElasticOutcome> {
        let batch = pixels.shape().0;
        if labels.len() != batch {
            return Err(AttackError::invalid(
                "labels",
                format!("expected {batch} labels, got {}", labels.len()),
            ));
        }
        let budget = Budget::draw(
            self.config.eps_max,
            self.config.step_size,
            batch,
            options.scale_eps,
            self.config.scale_each,
            &mut self.rng,
        )
        .scaled(2.0 / self.config.resolution as f32);
        info!(
            batch,
            iterations = self.config.nb_iters,
            eps_max = self.config.eps_max,
            avoid_target = options.avoid_target,
            "elastic attack started"
        );

        let mut flow = self.init(batch, &budget.eps)?;
        let mut adversarial = self.deformer.forward(pixels, shape, &flow)?;
        for iteration in 0..self.config.nb_iters {
            let LossGradient { loss, grad } = pixel_model.loss_gradient(&adversarial, labels)?;
            let grad_flow = self.deformer.backward_flow(pixels, shape, &flow, &grad)?;
            let mut direction = grad_flow.signum();
            if !options.avoid_target {
                direction = direction.scale(-1.0)?;
            }
            flow.add_scaled_rows(&direction, &budget.step)?;
            flow.clamp_rows_symmetric(&budget.eps)?;
            adversarial = self.deformer.forward(pixels, shape, &flow)?;
            debug!(
                iteration,
                loss,
                flow_linf = flow.row_linf_norms().iter().fold(0.0f32, |a, b| a.max(*b)),
                "elastic step"
            );
        }

        info!(batch, "elastic attack finished");
        Ok(ElasticOutcome {
            pixels: adversarial,
            flow,
        })
    }
}

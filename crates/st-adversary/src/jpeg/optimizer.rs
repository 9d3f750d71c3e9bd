// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use super::codec::{CatLayout, JpegCodec};
use super::init::initial_perturbation;
use crate::budget::Budget;
use crate::config::{AttackOptions, ConstraintGeometry, JpegAttackConfig};
use crate::error::{AttackError, AttackResult};
use crate::pixel::{LossGradient, PixelModel};
use rand::rngs::StdRng;
use rayon::prelude::*;
use spiral_config::determinism;
use st_nn::Module;
use st_tensor::{pure::sign, ImageShape, Tensor, TensorError};
use tracing::{debug, info, warn};

/// Final compressed pixels and the cat variable that produced them.
#[derive(Clone, Debug)]
pub struct JpegOutcome {
    pub pixels: Tensor,
    pub perturbation: Tensor,
}

/// Bisection rounds needed to locate a prefix length in `0..len`.
fn search_rounds(len: usize) -> usize {
    let exact = len.next_power_of_two().trailing_zeros() as usize + 1;
    exact.max(17)
}

fn check_rows(tensor: &Tensor, values: &[f32]) -> AttackResult<()> {
    if values.len() != tensor.shape().0 {
        return Err(TensorError::DataLength {
            expected: tensor.shape().0,
            got: values.len(),
        }
        .into());
    }
    Ok(())
}

/// Vertex of the L1 ball of radius `eps[r]` (intersected with the
/// `[-box_bound, box_bound]` box) that best aligns with `grad`.
///
/// Coordinates are taken in order of decreasing `|grad|` and saturated to
/// their distance from the box face until the cumulative mass would exceed
/// `eps`; the coordinate at the cut receives the remainder.
pub fn frank_wolfe_vertex(
    cat: &Tensor,
    grad: &Tensor,
    eps: &[f32],
    box_bound: f32,
) -> AttackResult<Tensor> {
    if cat.shape() != grad.shape() {
        return Err(TensorError::ShapeMismatch {
            left: cat.shape(),
            right: grad.shape(),
        }
        .into());
    }
    check_rows(cat, eps)?;
    let (rows, len) = cat.shape();
    let rounds = search_rounds(len);
    let mut out = vec![0.0f32; rows * len];
    out.par_chunks_mut(len)
        .zip(cat.data().par_chunks(len))
        .zip(grad.data().par_chunks(len))
        .zip(eps.par_iter())
        .for_each(|(((vertex, current), g), &eps)| {
            let mut order: Vec<usize> = (0..len).collect();
            order.sort_by(|&a, &b| g[b].abs().total_cmp(&g[a].abs()));

            let bound: Vec<f32> = order
                .iter()
                .map(|&i| {
                    let room = if g[i] > 0.0 {
                        box_bound - current[i]
                    } else {
                        current[i] + box_bound
                    };
                    room.max(0.0)
                })
                .collect();
            let mut cumulative = Vec::with_capacity(len);
            let mut total = 0.0f32;
            for b in &bound {
                cumulative.push(total);
                total += b;
            }

            let (mut k_min, mut k_max) = (0usize, len);
            for _ in 0..rounds {
                let mid = (k_min + k_max) / 2;
                if cumulative[mid] > eps {
                    k_max = mid;
                } else {
                    k_min = mid;
                }
            }

            for (rank, &i) in order.iter().enumerate().take(k_min) {
                vertex[i] = sign(g[i]) * bound[rank];
            }
            let cut = order[k_min];
            let remainder = (eps - cumulative[k_min]).max(0.0).min(bound[k_min]);
            vertex[cut] = sign(g[cut]) * remainder;
        });
    Ok(Tensor::from_vec(rows, len, out)?)
}

/// `cat[r] += step[r] * grad[r] / ||grad[r]||`. Rows with a zero gradient
/// are left in place.
pub fn l2_ascent_step(cat: &mut Tensor, grad: &Tensor, step: &[f32]) -> AttackResult<()> {
    check_rows(grad, step)?;
    let factors: Vec<f32> = grad
        .row_l2_norms()
        .into_iter()
        .zip(step)
        .enumerate()
        .map(|(row, (norm, step))| {
            if norm > 0.0 {
                step / norm
            } else {
                warn!(row, "zero gradient norm, skipping l2 step");
                0.0
            }
        })
        .collect();
    cat.add_scaled_rows(grad, &factors)?;
    Ok(())
}

/// Shrinks each row onto the L2 ball of radius `eps[r]` (never grows it),
/// then clamps every coordinate into `[-box_bound, box_bound]`.
pub fn project_l2(cat: &mut Tensor, eps: &[f32], box_bound: f32) -> AttackResult<()> {
    check_rows(cat, eps)?;
    let factors: Vec<f32> = cat
        .row_l2_norms()
        .into_iter()
        .zip(eps)
        .enumerate()
        .map(|(row, (norm, eps))| {
            if norm > 0.0 {
                (eps / norm).min(1.0)
            } else {
                warn!(row, "zero perturbation norm, nothing to project");
                1.0
            }
        })
        .collect();
    *cat = cat.scale_rows(&factors)?;
    cat.clamp_rows_symmetric(&vec![box_bound; factors.len()])?;
    Ok(())
}

fn mean(values: &[f32]) -> f32 {
    values.iter().sum::<f32>() / values.len().max(1) as f32
}

/// Constrained search over per-coefficient quantization offsets.
#[derive(Debug)]
pub struct JpegAttackBase {
    config: JpegAttackConfig,
    codec: JpegCodec,
    geometry: ConstraintGeometry,
    rng: StdRng,
}

impl JpegAttackBase {
    pub fn new(config: JpegAttackConfig) -> AttackResult<Self> {
        config.validate()?;
        let geometry = config.geometry()?;
        let codec = JpegCodec::new()
            .with_factor(config.factor()?)?
            .with_rounding(config.rounding)
            .with_downsample_chroma(config.downsample_chroma);
        let rng = determinism::rng_from_optional(config.seed, "st-adversary/jpeg");
        Ok(Self {
            config,
            codec,
            geometry,
            rng,
        })
    }

    pub fn config(&self) -> &JpegAttackConfig {
        &self.config
    }

    pub fn codec(&self) -> &JpegCodec {
        &self.codec
    }

    pub fn geometry(&self) -> ConstraintGeometry {
        self.geometry
    }

    fn compress(
        &self,
        pixels: &Tensor,
        shape: ImageShape,
        layout: &CatLayout,
        cat: &Tensor,
        budget: &Budget,
        inverse_eps: &[f32],
    ) -> AttackResult<Tensor> {
        let vars = layout.split(&cat.scale_rows(inverse_eps)?)?;
        self.codec.forward(pixels, shape, &vars, &budget.eps)
    }

    fn cat_gradient(
        &self,
        pixels: &Tensor,
        shape: ImageShape,
        layout: &CatLayout,
        cat: &Tensor,
        budget: &Budget,
        inverse_eps: &[f32],
        grad_pixels: &Tensor,
    ) -> AttackResult<Tensor> {
        let vars = layout.split(&cat.scale_rows(inverse_eps)?)?;
        let grad = self
            .codec
            .backward_rounding(pixels, shape, &vars, &budget.eps, grad_pixels)?;
        Ok(layout.join(&grad)?.scale_rows(inverse_eps)?)
    }

    fn norms(&self, cat: &Tensor) -> Vec<f32> {
        match self.geometry {
            ConstraintGeometry::Linf => cat.row_linf_norms(),
            ConstraintGeometry::L2 => cat.row_l2_norms(),
            ConstraintGeometry::L1 => cat.row_l1_norms(),
        }
    }

    /// Runs the search on an RGB pixel batch whose height and width are
    /// multiples of 16.
    pub fn forward<M: Module>(
        &mut self,
        pixel_model: &mut PixelModel<M>,
        pixels: &Tensor,
        shape: ImageShape,
        labels: &[usize],
        options: AttackOptions,
    ) -> AttackResult<JpegOutcome> {
        if shape.height % 16 != 0 || shape.width % 16 != 0 {
            return Err(AttackError::BlockAlignment {
                height: shape.height,
                width: shape.width,
            });
        }
        shape.check(pixels)?;
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
        );
        let inverse_eps = budget.inverse_eps();
        let layout = self.codec.layout(shape.height, shape.width);
        info!(
            batch,
            iterations = self.config.nb_iters,
            geometry = %self.geometry,
            eps_max = self.config.eps_max,
            avoid_target = options.avoid_target,
            "jpeg attack started"
        );

        let mut cat = initial_perturbation(
            self.geometry,
            self.config.rand_init,
            batch,
            layout.len(),
            &budget.eps,
            &mut self.rng,
        )?;
        for iteration in 0..self.config.nb_iters {
            let compressed = self.compress(pixels, shape, &layout, &cat, &budget, &inverse_eps)?;
            let LossGradient { loss, grad } = pixel_model.loss_gradient(&compressed, labels)?;
            let mut grad_cat = self.cat_gradient(
                pixels,
                shape,
                &layout,
                &cat,
                &budget,
                &inverse_eps,
                &grad,
            )?;
            if !options.avoid_target {
                grad_cat = grad_cat.scale(-1.0)?;
            }
            match self.geometry {
                ConstraintGeometry::Linf => {
                    cat.add_scaled_rows(&grad_cat.signum(), &budget.step)?;
                    cat.clamp_rows_symmetric(&budget.eps)?;
                }
                ConstraintGeometry::L2 => {
                    l2_ascent_step(&mut cat, &grad_cat, &budget.step)?;
                    project_l2(&mut cat, &budget.eps, self.config.l1_max)?;
                }
                ConstraintGeometry::L1 => {
                    let vertex =
                        frank_wolfe_vertex(&cat, &grad_cat, &budget.eps, self.config.l1_max)?;
                    let rate = 1.0 / (iteration as f32 + 1.0);
                    cat.add_scaled(&vertex.sub(&cat)?, rate)?;
                }
            }
            debug!(
                iteration,
                loss,
                mean_norm = mean(&self.norms(&cat)),
                "jpeg step"
            );
        }

        let compressed = self.compress(pixels, shape, &layout, &cat, &budget, &inverse_eps)?;
        info!(batch, "jpeg attack finished");
        Ok(JpegOutcome {
            pixels: compressed,
            perturbation: cat,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use st_nn::Linear;

    #[test]
    fn search_rounds_cover_long_variables() {
        assert_eq!(search_rounds(1536), 17);
        assert_eq!(search_rounds(1 << 20), 21);
    }

    #[test]
    fn vertex_saturates_the_largest_gradients() {
        let cat = Tensor::zeros(1, 4).unwrap();
        let grad = Tensor::from_vec(1, 4, vec![0.1, -3.0, 2.0, 0.5]).unwrap();
        let vertex = frank_wolfe_vertex(&cat, &grad, &[2.5], 1.0).unwrap();
        assert_eq!(vertex.data(), &[0.0, -1.0, 1.0, 0.5]);
        assert!((vertex.row_l1_norms()[0] - 2.5).abs() < 1e-6);
    }

    #[test]
    fn vertex_respects_the_box_room() {
        let cat = Tensor::from_vec(1, 3, vec![0.8, 0.0, -0.5]).unwrap();
        let grad = Tensor::from_vec(1, 3, vec![5.0, 0.0, -1.0]).unwrap();
        let vertex = frank_wolfe_vertex(&cat, &grad, &[0.3], 1.0).unwrap();
        // room towards +1 from 0.8 is 0.2, the rest goes to the next coordinate
        assert!((vertex.data()[0] - 0.2).abs() < 1e-6);
        assert!((vertex.data()[2] + 0.1).abs() < 1e-6);
        assert_eq!(vertex.data()[1], 0.0);
    }

    #[test]
    fn l2_projection_only_shrinks() {
        let mut cat = Tensor::from_vec(2, 2, vec![3.0, 4.0, 0.3, 0.4]).unwrap();
        project_l2(&mut cat, &[1.0, 1.0], 10.0).unwrap();
        assert!((cat.row_l2_norms()[0] - 1.0).abs() < 1e-6);
        assert!((cat.row_l2_norms()[1] - 0.5).abs() < 1e-6);
        let mut zero = Tensor::zeros(1, 3).unwrap();
        project_l2(&mut zero, &[1.0], 1.0).unwrap();
        assert!(zero.data().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn zero_gradient_leaves_l2_iterate() {
        let mut cat = Tensor::from_vec(1, 2, vec![0.1, 0.2]).unwrap();
        let before = cat.clone();
        l2_ascent_step(&mut cat, &Tensor::zeros(1, 2).unwrap(), &[1.0]).unwrap();
        assert_eq!(cat, before);
    }

    fn classifier(volume: usize) -> PixelModel<Linear> {
        let weight = Tensor::from_fn(volume, 3, |r, c| (((r * 5 + c * 11) % 13) as f32 - 6.0) * 0.01)
            .unwrap();
        PixelModel::new(Linear::from_tensors("head", weight, Tensor::zeros(1, 3).unwrap()).unwrap())
    }

    #[test]
    fn rejects_unaligned_images_before_iterating() {
        let mut attack = JpegAttackBase::new(JpegAttackConfig::new(2, 1.0, 0.5, "linf", 24)).unwrap();
        let shape = ImageShape::new(3, 24, 24).unwrap();
        let pixels = Tensor::full(1, shape.volume(), 128.0).unwrap();
        let mut model = classifier(shape.volume());
        assert!(matches!(
            attack.forward(&mut model, &pixels, shape, &[0], AttackOptions::default()),
            Err(AttackError::BlockAlignment {
                height: 24,
                width: 24
            })
        ));
    }

    #[test]
    fn l2_iterates_respect_the_coordinate_cap() {
        let shape = ImageShape::new(3, 16, 16).unwrap();
        let pixels = Tensor::random_uniform(3, shape.volume(), 20.0, 235.0, Some(5)).unwrap();
        let mut config = JpegAttackConfig::new(9, 30.0, 10.0, "l2", 16);
        config.l1_max = 0.1;
        config.seed = Some(8);
        let mut attack = JpegAttackBase::new(config).unwrap();
        let mut model = classifier(shape.volume());
        let outcome = attack
            .forward(&mut model, &pixels, shape, &[0, 1, 2], AttackOptions::default())
            .unwrap();
        for norm in outcome.perturbation.row_linf_norms() {
            assert!(norm <= 0.1 + 1e-6, "coordinate {norm} above the cap");
        }
        for norm in outcome.perturbation.row_l2_norms() {
            assert!(norm <= 30.0 * (1.0 + 1e-4));
        }
        // 384 coordinates at 0.1 give an L2 norm below 30, so the cap binds
        assert!(outcome
            .perturbation
            .row_linf_norms()
            .iter()
            .any(|&n| (n - 0.1).abs() < 1e-6));
    }

    #[test]
    fn frank_wolfe_is_feasible_after_each_early_iteration() {
        let shape = ImageShape::new(3, 16, 16).unwrap();
        let pixels = Tensor::random_uniform(2, shape.volume(), 20.0, 235.0, Some(19)).unwrap();
        for (iterations, rand_init) in [(1, true), (1, false), (2, true), (2, false)] {
            let mut config = JpegAttackConfig::new(iterations, 2.0, 0.4, "l1", 16);
            config.rand_init = rand_init;
            config.seed = Some(23);
            let mut attack = JpegAttackBase::new(config).unwrap();
            let mut model = classifier(shape.volume());
            let outcome = attack
                .forward(&mut model, &pixels, shape, &[1, 0], AttackOptions::default())
                .unwrap();
            for norm in outcome.perturbation.row_l1_norms() {
                assert!(
                    norm <= 2.0 * (1.0 + 1e-4),
                    "iterations={iterations} rand_init={rand_init}: {norm}"
                );
            }
        }
    }

    #[test]
    fn every_geometry_stays_feasible() {
        let shape = ImageShape::new(3, 16, 16).unwrap();
        let pixels = Tensor::random_uniform(2, shape.volume(), 20.0, 235.0, Some(12)).unwrap();
        for (opt, eps) in [("linf", 0.5f32), ("l2", 1.5), ("l1", 3.0)] {
            let mut config = JpegAttackConfig::new(3, eps, 0.4, opt, 16);
            config.seed = Some(31);
            let mut attack = JpegAttackBase::new(config).unwrap();
            let mut model = classifier(shape.volume());
            let outcome = attack
                .forward(&mut model, &pixels, shape, &[0, 2], AttackOptions::default())
                .unwrap();
            let norms = match attack.geometry() {
                ConstraintGeometry::Linf => outcome.perturbation.row_linf_norms(),
                ConstraintGeometry::L2 => outcome.perturbation.row_l2_norms(),
                ConstraintGeometry::L1 => outcome.perturbation.row_l1_norms(),
            };
            for norm in norms {
                assert!(norm <= eps * (1.0 + 1e-4), "{opt}: {norm} > {eps}");
            }
            assert!(outcome
                .pixels
                .data()
                .iter()
                .all(|v| (0.0..=255.0).contains(v)));
        }
    }
}

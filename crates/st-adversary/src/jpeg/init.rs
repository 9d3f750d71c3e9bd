// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Starting points for the cat variable, one sampler per constraint geometry.
//! Every sampler draws inside the unit ball; [`initial_perturbation`] scales
//! row `r` by `eps[r]`.

use crate::config::ConstraintGeometry;
use crate::error::AttackResult;
use rand::distributions::Uniform;
use rand::Rng;
use rand_distr::{Distribution, Exp1, StandardNormal};
use st_tensor::{pure::sign, Tensor};

/// All zeros.
pub fn init_empty(batch: usize, len: usize) -> AttackResult<Tensor> {
    Ok(Tensor::zeros(batch, len)?)
}

/// I.i.d. uniform in `[-1, 1)`.
pub fn init_linf<R: Rng + ?Sized>(batch: usize, len: usize, rng: &mut R) -> AttackResult<Tensor> {
    Ok(Tensor::sample(batch, len, &Uniform::new(-1.0f32, 1.0), rng)?)
}

/// Uniform inside the unit L2 ball: a normalised Gaussian direction with
/// radius `u^(1/len)`.
pub fn init_l2<R: Rng + ?Sized>(batch: usize, len: usize, rng: &mut R) -> AttackResult<Tensor> {
    let direction = Tensor::sample(batch, len, &StandardNormal, rng)?;
    let radii: Vec<f32> = direction
        .row_l2_norms()
        .into_iter()
        .map(|norm| {
            let u: f32 = rng.gen();
            let radius = u.powf(1.0 / len as f32);
            if norm > 0.0 {
                radius / norm
            } else {
                0.0
            }
        })
        .collect();
    Ok(direction.scale_rows(&radii)?)
}

/// Uniform inside the unit L1 ball: signed exponential draws divided by
/// one extra exponential draw plus their L1 norm.
pub fn init_l1<R: Rng + ?Sized>(batch: usize, len: usize, rng: &mut R) -> AttackResult<Tensor> {
    let mut data = Vec::with_capacity(batch * len);
    for _ in 0..batch * len {
        let magnitude: f32 = Exp1.sample(rng);
        let direction: f32 = StandardNormal.sample(rng);
        data.push(magnitude * sign(direction));
    }
    let signed = Tensor::from_vec(batch, len, data)?;
    let factors: Vec<f32> = signed
        .row_l1_norms()
        .into_iter()
        .map(|norm| {
            let slack: f32 = Exp1.sample(rng);
            1.0 / (slack + norm)
        })
        .collect();
    Ok(signed.scale_rows(&factors)?)
}

/// Initial cat variable for `geometry`, or zeros when `rand_init` is off.
pub fn initial_perturbation<R: Rng + ?Sized>(
    geometry: ConstraintGeometry,
    rand_init: bool,
    batch: usize,
    len: usize,
    eps: &[f32],
    rng: &mut R,
) -> AttackResult<Tensor> {
    let unit = if !rand_init {
        init_empty(batch, len)?
    } else {
        match geometry {
            ConstraintGeometry::Linf => init_linf(batch, len, rng)?,
            ConstraintGeometry::L2 => init_l2(batch, len, rng)?,
            ConstraintGeometry::L1 => init_l1(batch, len, rng)?,
        }
    };
    Ok(unit.scale_rows(eps)?)
}

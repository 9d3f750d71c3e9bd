// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use rand::Rng;

/// Per-example perturbation radius and step length.
#[derive(Clone, Debug, PartialEq)]
pub struct Budget {
    pub eps: Vec<f32>,
    pub step: Vec<f32>,
}

impl Budget {
    /// Builds the per-example budget for a batch. With `scale_eps` every
    /// example shares one uniform draw in `[0, 1)`, or gets its own when
    /// `scale_each` is set.
    pub fn draw<R: Rng + ?Sized>(
        eps_max: f32,
        step_size: f32,
        batch: usize,
        scale_eps: bool,
        scale_each: bool,
        rng: &mut R,
    ) -> Self {
        let factors: Vec<f32> = if !scale_eps {
            vec![1.0; batch]
        } else if scale_each {
            (0..batch).map(|_| rng.gen::<f32>()).collect()
        } else {
            vec![rng.gen::<f32>(); batch]
        };
        Self {
            eps: factors.iter().map(|f| f * eps_max).collect(),
            step: factors.iter().map(|f| f * step_size).collect(),
        }
    }

    /// Rescales both vectors, e.g. from pixels into normalized flow units.
    pub fn scaled(mut self, factor: f32) -> Self {
        self.eps.iter_mut().for_each(|e| *e *= factor);
        self.step.iter_mut().for_each(|s| *s *= factor);
        self
    }

    /// `1/eps` per example, with `0` where eps is zero.
    pub fn inverse_eps(&self) -> Vec<f32> {
        self.eps
            .iter()
            .map(|&e| if e > 0.0 { 1.0 / e } else { 0.0 })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn fixed_budget_without_scaling() {
        let mut rng = StdRng::seed_from_u64(0);
        let budget = Budget::draw(4.0, 1.0, 3, false, true, &mut rng).scaled(0.5);
        assert_eq!(budget.eps, vec![2.0; 3]);
        assert_eq!(budget.step, vec![0.5; 3]);
    }

    #[test]
    fn shared_draw_is_shared() {
        let mut rng = StdRng::seed_from_u64(1);
        let budget = Budget::draw(4.0, 2.0, 4, true, false, &mut rng);
        assert!(budget.eps.windows(2).all(|w| w[0] == w[1]));
        assert!(budget.eps[0] < 4.0);
        assert!((budget.eps[0] - 2.0 * budget.step[0]).abs() < 1e-6);
    }

    #[test]
    fn per_example_draws_differ() {
        let mut rng = StdRng::seed_from_u64(2);
        let budget = Budget::draw(1.0, 1.0, 8, true, true, &mut rng);
        assert!(budget.eps.windows(2).any(|w| w[0] != w[1]));
        assert_eq!(budget.inverse_eps().len(), 8);
        let zero = Budget::draw(0.0, 0.0, 2, false, false, &mut rng);
        assert_eq!(zero.inverse_eps(), vec![0.0, 0.0]);
    }
}

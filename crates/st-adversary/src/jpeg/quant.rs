// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Quantization tables and the relaxed rounding that keeps them differentiable.

use super::planes::Block;
use crate::error::{AttackError, AttackResult};
use serde::{Deserialize, Serialize};

#[rustfmt::skip]
pub const LUMA_TABLE: Block = [
    16.0, 11.0, 10.0, 16.0, 24.0, 40.0, 51.0, 61.0,
    12.0, 12.0, 14.0, 19.0, 26.0, 58.0, 60.0, 55.0,
    14.0, 13.0, 16.0, 24.0, 40.0, 57.0, 69.0, 56.0,
    14.0, 17.0, 22.0, 29.0, 51.0, 87.0, 80.0, 62.0,
    18.0, 22.0, 37.0, 56.0, 68.0, 109.0, 103.0, 77.0,
    24.0, 35.0, 55.0, 64.0, 81.0, 104.0, 113.0, 92.0,
    49.0, 64.0, 78.0, 87.0, 103.0, 121.0, 120.0, 101.0,
    72.0, 92.0, 95.0, 98.0, 112.0, 100.0, 103.0, 99.0,
];

#[rustfmt::skip]
pub const CHROMA_TABLE: Block = [
    17.0, 18.0, 24.0, 47.0, 99.0, 99.0, 99.0, 99.0,
    18.0, 21.0, 26.0, 66.0, 99.0, 99.0, 99.0, 99.0,
    24.0, 26.0, 56.0, 99.0, 99.0, 99.0, 99.0, 99.0,
    47.0, 66.0, 99.0, 99.0, 99.0, 99.0, 99.0, 99.0,
    99.0, 99.0, 99.0, 99.0, 99.0, 99.0, 99.0, 99.0,
    99.0, 99.0, 99.0, 99.0, 99.0, 99.0, 99.0, 99.0,
    99.0, 99.0, 99.0, 99.0, 99.0, 99.0, 99.0, 99.0,
    99.0, 99.0, 99.0, 99.0, 99.0, 99.0, 99.0, 99.0,
];

/// Table multiplier for a JPEG quality in `(0, 100)`.
pub fn quality_to_factor(quality: f32) -> AttackResult<f32> {
    if !(quality > 0.0 && quality < 100.0) {
        return Err(AttackError::invalid(
            "quality",
            format!("must lie in (0, 100), got {quality}"),
        ));
    }
    Ok(if quality < 50.0 {
        50.0 / quality
    } else {
        (200.0 - quality * 2.0) / 100.0
    })
}

/// How quantized coefficients are rounded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingMode {
    /// `q + λ·(n − 0.5)` with `n = 0.5 + 0.5·v`; no hard rounding.
    #[default]
    Relaxed,
    /// Relaxed term plus a hard round in the forward pass; the round is
    /// treated as identity when differentiating.
    StraightThrough,
}

/// Luma or chroma component of a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Component {
    Luma,
    Chroma,
}

impl Component {
    pub fn table(&self) -> &'static Block {
        match self {
            Component::Luma => &LUMA_TABLE,
            Component::Chroma => &CHROMA_TABLE,
        }
    }
}

/// Scaled tables plus the rounding rule.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Quantizer {
    pub factor: f32,
    pub rounding: RoundingMode,
}

impl Default for Quantizer {
    fn default() -> Self {
        Self {
            factor: 1.0,
            rounding: RoundingMode::Relaxed,
        }
    }
}

impl Quantizer {
    /// Divides by the scaled table and applies the rounding relaxation with
    /// amplitude `lambda` and rounding variable `var` (one value per coefficient).
    pub fn quantize(&self, coeffs: &Block, component: Component, lambda: f32, var: &[f32]) -> Block {
        let table = component.table();
        let mut out = [0.0f32; 64];
        for i in 0..64 {
            let q = coeffs[i] / (table[i] * self.factor);
            let noise = 0.5 + 0.5 * var[i];
            let relaxed = q + lambda * (noise - 0.5);
            out[i] = match self.rounding {
                RoundingMode::Relaxed => relaxed,
                RoundingMode::StraightThrough => relaxed.round(),
            };
        }
        out
    }

    /// Multiplies back by the scaled table.
    pub fn dequantize(&self, quantized: &Block, component: Component) -> Block {
        let table = component.table();
        let mut out = [0.0f32; 64];
        for i in 0..64 {
            out[i] = quantized[i] * table[i] * self.factor;
        }
        out
    }

    /// Gradient of the rounding variables from the gradient of the
    /// dequantized coefficients: `d/dv = g · table · factor · λ / 2`.
    pub fn backward_rounding(&self, grad: &Block, component: Component, lambda: f32) -> Block {
        let table = component.table();
        let mut out = [0.0f32; 64];
        for i in 0..64 {
            out[i] = grad[i] * table[i] * self.factor * 0.5 * lambda;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_mapping() {
        assert!((quality_to_factor(25.0).unwrap() - 2.0).abs() < 1e-6);
        assert!((quality_to_factor(50.0).unwrap() - 1.0).abs() < 1e-6);
        assert!((quality_to_factor(90.0).unwrap() - 0.2).abs() < 1e-6);
        assert!(quality_to_factor(0.0).is_err());
        assert!(quality_to_factor(100.0).is_err());
    }

    #[test]
    fn zero_amplitude_dequantizes_exactly() {
        let quantizer = Quantizer::default();
        let mut coeffs = [0.0f32; 64];
        for (i, c) in coeffs.iter_mut().enumerate() {
            *c = LUMA_TABLE[i] * (i as f32 - 30.0);
        }
        let q = quantizer.quantize(&coeffs, Component::Luma, 0.0, &[0.7; 64]);
        let back = quantizer.dequantize(&q, Component::Luma);
        for (a, b) in back.iter().zip(&coeffs) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn straight_through_snaps_to_steps() {
        let quantizer = Quantizer {
            factor: 1.0,
            rounding: RoundingMode::StraightThrough,
        };
        let mut coeffs = [0.0f32; 64];
        coeffs[0] = 16.0 * 3.3;
        coeffs[9] = 12.0 * -1.6;
        coeffs[63] = 99.0 * 0.4;
        let q = quantizer.quantize(&coeffs, Component::Luma, 0.0, &[0.0; 64]);
        let back = quantizer.dequantize(&q, Component::Luma);
        assert!((back[0] - 48.0).abs() < 1e-4);
        assert!((back[9] + 24.0).abs() < 1e-4);
        assert_eq!(back[63], 0.0);
    }

    #[test]
    fn relaxed_term_is_half_lambda_var() {
        let quantizer = Quantizer::default();
        let coeffs = [0.0f32; 64];
        let q = quantizer.quantize(&coeffs, Component::Chroma, 2.0, &[0.25; 64]);
        assert!(q.iter().all(|v| (v - 0.25).abs() < 1e-6));
    }

    #[test]
    fn chroma_table_layout() {
        assert_eq!(CHROMA_TABLE[3], 47.0);
        assert_eq!(CHROMA_TABLE[3 * 8], 47.0);
        assert_eq!(CHROMA_TABLE[4], 99.0);
        assert_eq!(LUMA_TABLE[1], 11.0);
        assert_eq!(LUMA_TABLE[8], 12.0);
    }
}

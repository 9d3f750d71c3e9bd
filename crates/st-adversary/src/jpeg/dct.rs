// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! 8x8 type-II DCT as a contraction against a precomputed cosine basis.

use super::planes::Block;
use std::f64::consts::{FRAC_1_SQRT_2, PI};

fn alpha(k: usize) -> f64 {
    if k == 0 {
        FRAC_1_SQRT_2
    } else {
        1.0
    }
}

fn cosine(spatial: usize, freq: usize) -> f64 {
    ((2 * spatial + 1) as f64 * freq as f64 * PI / 16.0).cos()
}

/// Cosine basis `basis[(x*8 + y)*64 + u*8 + v] = cos((2x+1)uπ/16)·cos((2y+1)vπ/16)`
/// and the `0.25·α(u)·α(v)` normalization.
#[derive(Clone, Debug)]
pub struct DctBasis {
    basis: Vec<f32>,
    scale: Block,
}

impl Default for DctBasis {
    fn default() -> Self {
        Self::new()
    }
}

impl DctBasis {
    pub fn new() -> Self {
        let mut basis = vec![0.0f32; 64 * 64];
        for x in 0..8 {
            for y in 0..8 {
                for u in 0..8 {
                    for v in 0..8 {
                        basis[(x * 8 + y) * 64 + u * 8 + v] =
                            (cosine(x, u) * cosine(y, v)) as f32;
                    }
                }
            }
        }
        let mut scale = [0.0f32; 64];
        for u in 0..8 {
            for v in 0..8 {
                scale[u * 8 + v] = (0.25 * alpha(u) * alpha(v)) as f32;
            }
        }
        Self { basis, scale }
    }

    /// Forward DCT of a block of `[0, 255]` samples (shifted by -128 first).
    pub fn forward(&self, block: &Block) -> Block {
        let mut out = [0.0f32; 64];
        for (xy, &sample) in block.iter().enumerate() {
            let centered = sample - 128.0;
            let row = &self.basis[xy * 64..(xy + 1) * 64];
            for (o, b) in out.iter_mut().zip(row) {
                *o += centered * b;
            }
        }
        for (o, s) in out.iter_mut().zip(&self.scale) {
            *o *= s;
        }
        out
    }

    /// Inverse DCT, shifted back by +128.
    pub fn inverse(&self, coeffs: &Block) -> Block {
        let mut weighted = [0.0f32; 64];
        for ((w, c), s) in weighted.iter_mut().zip(coeffs).zip(&self.scale) {
            *w = c * s;
        }
        let mut out = [0.0f32; 64];
        for (xy, o) in out.iter_mut().enumerate() {
            let row = &self.basis[xy * 64..(xy + 1) * 64];
            *o = row.iter().zip(&weighted).map(|(b, w)| b * w).sum::<f32>() + 128.0;
        }
        out
    }

    /// Transpose of the linear part of [`DctBasis::inverse`].
    pub fn inverse_adjoint(&self, grad: &Block) -> Block {
        let mut out = [0.0f32; 64];
        for (xy, &g) in grad.iter().enumerate() {
            let row = &self.basis[xy * 64..(xy + 1) * 64];
            for (o, b) in out.iter_mut().zip(row) {
                *o += g * b;
            }
        }
        for (o, s) in out.iter_mut().zip(&self.scale) {
            *o *= s;
        }
        out
    }
}

/// Direct double-sum DCT of one block.
pub fn dct_8x8_ref(block: &Block) -> Block {
    let mut out = [0.0f32; 64];
    for u in 0..8 {
        for v in 0..8 {
            let mut value = 0.0f64;
            for x in 0..8 {
                for y in 0..8 {
                    value += (block[x * 8 + y] as f64 - 128.0) * cosine(x, u) * cosine(y, v);
                }
            }
            out[u * 8 + v] = (0.25 * alpha(u) * alpha(v) * value) as f32;
        }
    }
    out
}

/// Direct double-sum inverse DCT of one block.
pub fn idct_8x8_ref(coeffs: &Block) -> Block {
    let mut out = [0.0f32; 64];
    for x in 0..8 {
        for y in 0..8 {
            let mut value = 0.0f64;
            for u in 0..8 {
                for v in 0..8 {
                    value += alpha(u)
                        * alpha(v)
                        * coeffs[u * 8 + v] as f64
                        * cosine(x, u)
                        * cosine(y, v);
                }
            }
            out[x * 8 + y] = (0.25 * value + 128.0) as f32;
        }
    }
    out
}

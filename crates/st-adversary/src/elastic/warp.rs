// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::error::{AttackError, AttackResult};
use crate::smoothing::GaussianSmoothing;
use rayon::prelude::*;
use st_tensor::{ImageShape, Tensor, TensorError};

/// Index of `padded` in a reflect-padded axis of length `len` (edge excluded).
fn reflect(padded: usize, pad: usize, len: usize) -> usize {
    let i = padded as isize - pad as isize;
    let last = len as isize - 1;
    let mirrored = if i < 0 {
        -i
    } else if i > last {
        2 * last - i
    } else {
        i
    };
    mirrored as usize
}

/// Bilinear taps of one sample location along a single axis.
#[derive(Clone, Copy, Debug)]
struct AxisTap {
    lo: usize,
    hi: usize,
    frac: f32,
    /// `d pixel / d grid`, zero where the coordinate was clamped.
    slope: f32,
}

impl AxisTap {
    /// Corner-aligned mapping of a grid coordinate in `[-1, 1]` onto
    /// `[0, size - 1]`, clamped at the border.
    fn new(grid: f32, size: usize) -> Self {
        let max = (size - 1) as f32;
        let raw = (grid + 1.0) * 0.5 * max;
        let inside = raw >= 0.0 && raw <= max;
        let pos = raw.max(0.0).min(max);
        let lo = (pos.floor() as usize).min(size.saturating_sub(2));
        let hi = (lo + 1).min(size - 1);
        Self {
            lo,
            hi,
            frac: pos - lo as f32,
            slope: if inside { 0.5 * max } else { 0.0 },
        }
    }
}

/// Smooth geometric warp driven by a per-pixel flow field.
///
/// The flow has two channels (x then y displacement) in normalized grid
/// units; it is reflect padded, Gaussian smoothed, added to the identity grid
/// and used to bilinearly resample the image.
#[derive(Clone, Debug)]
pub struct ElasticDeformation {
    resolution: usize,
    filter_size: usize,
    smoothing: GaussianSmoothing,
    /// Identity grid `linspace(-1, 1, resolution)`, shared by both axes.
    base: Vec<f32>,
}

impl ElasticDeformation {
    pub fn new(resolution: usize, filter_size: usize, std: f32) -> AttackResult<Self> {
        if resolution < 2 {
            return Err(AttackError::invalid(
                "resolution",
                format!("must be at least 2, got {resolution}"),
            ));
        }
        if filter_size % 2 == 0 {
            return Err(AttackError::invalid(
                "kernel_size",
                format!("must be odd, got {filter_size}"),
            ));
        }
        if (filter_size - 1) / 2 >= resolution {
            return Err(AttackError::invalid(
                "kernel_size",
                format!("reflect padding exceeds resolution {resolution}"),
            ));
        }
        let smoothing = GaussianSmoothing::new(2, filter_size, std, 2)?;
        let step = 2.0 / (resolution - 1) as f32;
        let base = (0..resolution).map(|i| -1.0 + step * i as f32).collect();
        Ok(Self {
            resolution,
            filter_size,
            smoothing,
            base,
        })
    }

    pub fn resolution(&self) -> usize {
        self.resolution
    }

    /// Number of flow values per example (`2 * R * R`).
    pub fn flow_len(&self) -> usize {
        2 * self.resolution * self.resolution
    }

    fn pad(&self) -> usize {
        (self.filter_size - 1) / 2
    }

    fn padded_extent(&self) -> usize {
        self.resolution + 2 * self.pad()
    }

    /// Checks that `shape` is an `R x R` image and `images` / `flow` agree.
    pub fn check(&self, images: &Tensor, shape: ImageShape, flow: &Tensor) -> AttackResult<()> {
        if shape.height != self.resolution || shape.width != self.resolution {
            return Err(AttackError::ResolutionMismatch {
                expected: self.resolution,
                height: shape.height,
                width: shape.width,
            });
        }
        shape.check(images)?;
        let expected = (images.shape().0, self.flow_len());
        if flow.shape() != expected {
            return Err(TensorError::ShapeMismatch {
                left: flow.shape(),
                right: expected,
            }
            .into());
        }
        Ok(())
    }

    /// Reflect pads both flow channels by `(filter_size - 1) / 2`.
    pub fn reflect_pad(&self, flow: &Tensor) -> AttackResult<Tensor> {
        let (r, pad, padded) = (self.resolution, self.pad(), self.padded_extent());
        let plane = padded * padded;
        let (batch, cols) = flow.shape();
        let mut out = vec![0.0f32; batch * 2 * plane];
        out.par_chunks_mut(2 * plane)
            .zip(flow.data().par_chunks(cols))
            .for_each(|(dst, src)| {
                for c in 0..2 {
                    for y in 0..padded {
                        let sy = reflect(y, pad, r);
                        for x in 0..padded {
                            let sx = reflect(x, pad, r);
                            dst[c * plane + y * padded + x] = src[c * r * r + sy * r + sx];
                        }
                    }
                }
            });
        Ok(Tensor::from_vec(batch, 2 * plane, out)?)
    }

    /// Adjoint of [`ElasticDeformation::reflect_pad`].
    fn reflect_pad_backward(&self, grad_padded: &Tensor) -> AttackResult<Tensor> {
        let (r, pad, padded) = (self.resolution, self.pad(), self.padded_extent());
        let plane = padded * padded;
        let (batch, cols) = grad_padded.shape();
        let mut out = vec![0.0f32; batch * 2 * r * r];
        out.par_chunks_mut(2 * r * r)
            .zip(grad_padded.data().par_chunks(cols))
            .for_each(|(dst, src)| {
                for c in 0..2 {
                    for y in 0..padded {
                        let sy = reflect(y, pad, r);
                        for x in 0..padded {
                            let sx = reflect(x, pad, r);
                            dst[c * r * r + sy * r + sx] += src[c * plane + y * padded + x];
                        }
                    }
                }
            });
        Ok(Tensor::from_vec(batch, 2 * r * r, out)?)
    }

    /// Smoothed displacement field, `(batch, 2 * R * R)`.
    pub fn local_flow(&self, flow: &Tensor) -> AttackResult<Tensor> {
        let padded = self.padded_extent();
        self.smoothing
            .forward(&self.reflect_pad(flow)?, &[padded, padded])
    }

    fn taps(&self, local: &[f32], y: usize, x: usize) -> (AxisTap, AxisTap) {
        let plane = self.resolution * self.resolution;
        let idx = y * self.resolution + x;
        let gx = self.base[x] + local[idx];
        let gy = self.base[y] + local[plane + idx];
        (
            AxisTap::new(gx, self.resolution),
            AxisTap::new(gy, self.resolution),
        )
    }

    /// Warps `images` (pixel domain, `shape` per row) with `flow`.
    pub fn forward(&self, images: &Tensor, shape: ImageShape, flow: &Tensor) -> AttackResult<Tensor> {
        self.check(images, shape, flow)?;
        let local = self.local_flow(flow)?;
        let r = self.resolution;
        let plane = r * r;
        let (batch, cols) = images.shape();
        let mut out = vec![0.0f32; batch * cols];
        out.par_chunks_mut(cols)
            .zip(images.data().par_chunks(cols))
            .zip(local.data().par_chunks(2 * plane))
            .for_each(|((dst, src), local_row)| {
                for y in 0..r {
                    for x in 0..r {
                        let (tx, ty) = self.taps(local_row, y, x);
                        for c in 0..shape.channels {
                            let img = &src[c * plane..(c + 1) * plane];
                            let top = img[ty.lo * r + tx.lo] * (1.0 - tx.frac)
                                + img[ty.lo * r + tx.hi] * tx.frac;
                            let bottom = img[ty.hi * r + tx.lo] * (1.0 - tx.frac)
                                + img[ty.hi * r + tx.hi] * tx.frac;
                            dst[c * plane + y * r + x] = top * (1.0 - ty.frac) + bottom * ty.frac;
                        }
                    }
                }
            });
        Ok(Tensor::from_vec(batch, cols, out)?)
    }

    /// Pulls the gradient of the warped image back to the raw flow field.
    pub fn backward_flow(
        &self,
        images: &Tensor,
        shape: ImageShape,
        flow: &Tensor,
        grad_output: &Tensor,
    ) -> AttackResult<Tensor> {
        self.check(images, shape, flow)?;
        shape.check(grad_output)?;
        let local = self.local_flow(flow)?;
        let r = self.resolution;
        let plane = r * r;
        let (batch, cols) = images.shape();
        let mut grad_local = vec![0.0f32; batch * 2 * plane];
        grad_local
            .par_chunks_mut(2 * plane)
            .zip(images.data().par_chunks(cols))
            .zip(local.data().par_chunks(2 * plane))
            .zip(grad_output.data().par_chunks(cols))
            .for_each(|(((dst, src), local_row), go)| {
                for y in 0..r {
                    for x in 0..r {
                        let (tx, ty) = self.taps(local_row, y, x);
                        let mut dx = 0.0f32;
                        let mut dy = 0.0f32;
                        for c in 0..shape.channels {
                            let img = &src[c * plane..(c + 1) * plane];
                            let g = go[c * plane + y * r + x];
                            let (v00, v01) = (img[ty.lo * r + tx.lo], img[ty.lo * r + tx.hi]);
                            let (v10, v11) = (img[ty.hi * r + tx.lo], img[ty.hi * r + tx.hi]);
                            dx += g * ((1.0 - ty.frac) * (v01 - v00) + ty.frac * (v11 - v10));
                            let top = v00 * (1.0 - tx.frac) + v01 * tx.frac;
                            let bottom = v10 * (1.0 - tx.frac) + v11 * tx.frac;
                            dy += g * (bottom - top);
                        }
                        dst[y * r + x] = dx * tx.slope;
                        dst[plane + y * r + x] = dy * ty.slope;
                    }
                }
            });
        let grad_local = Tensor::from_vec(batch, 2 * plane, grad_local)?;
        let padded = self.padded_extent();
        let grad_padded = self.smoothing.backward(&grad_local, &[padded, padded])?;
        self.reflect_pad_backward(&grad_padded)
    }
}

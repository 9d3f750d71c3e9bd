// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Separable Gaussian kernel applied as a depthwise "valid" correlation.
//!
//! Rows of the input tensor hold `channels` planes of `spatial` extent back to
//! back. One to three spatial dimensions are supported; lower ranks are
//! handled by treating the missing leading axes as having extent 1.

use crate::error::{AttackError, AttackResult};
use rayon::prelude::*;
use st_tensor::{Tensor, TensorError};

const MAX_DIM: usize = 3;

#[derive(Clone, Debug)]
pub struct GaussianSmoothing {
    channels: usize,
    kernel_size: Vec<usize>,
    sigma: Vec<f32>,
    weight: Vec<f32>,
}

/// Pads a shape to rank 3 by prepending unit axes.
fn lift(shape: &[usize]) -> [usize; MAX_DIM] {
    let mut out = [1; MAX_DIM];
    out[MAX_DIM - shape.len()..].copy_from_slice(shape);
    out
}

impl GaussianSmoothing {
    /// Isotropic kernel of the same size and std along `dim` axes.
    pub fn new(channels: usize, kernel_size: usize, sigma: f32, dim: usize) -> AttackResult<Self> {
        if !(1..=MAX_DIM).contains(&dim) {
            return Err(AttackError::UnsupportedDimensionality { dim });
        }
        Self::with_shape(channels, &vec![kernel_size; dim], &vec![sigma; dim])
    }

    /// Per-axis kernel sizes and standard deviations.
    pub fn with_shape(channels: usize, kernel_size: &[usize], sigma: &[f32]) -> AttackResult<Self> {
        let dim = kernel_size.len();
        if !(1..=MAX_DIM).contains(&dim) {
            return Err(AttackError::UnsupportedDimensionality { dim });
        }
        if sigma.len() != dim {
            return Err(AttackError::invalid(
                "kernel_std",
                format!("expected {dim} values, got {}", sigma.len()),
            ));
        }
        if channels == 0 {
            return Err(AttackError::invalid("channels", "must be positive"));
        }
        if kernel_size.iter().any(|&k| k == 0) {
            return Err(AttackError::invalid("kernel_size", "must be positive"));
        }
        if sigma.iter().any(|s| *s <= 0.0 || !s.is_finite()) {
            return Err(AttackError::invalid("kernel_std", "must be positive"));
        }

        let sizes = lift(kernel_size);
        let mut stds = [1.0f32; MAX_DIM];
        stds[MAX_DIM - dim..].copy_from_slice(sigma);
        let axis = |size: usize, std: f32| -> Vec<f32> {
            let mean = (size as f32 - 1.0) / 2.0;
            (0..size)
                .map(|i| {
                    let z = (i as f32 - mean) / std;
                    (-z * z / 2.0).exp()
                })
                .collect()
        };
        let profiles: Vec<Vec<f32>> = (0..MAX_DIM).map(|d| axis(sizes[d], stds[d])).collect();
        let mut weight = Vec::with_capacity(sizes.iter().product());
        for a in &profiles[0] {
            for b in &profiles[1] {
                for c in &profiles[2] {
                    weight.push(a * b * c);
                }
            }
        }
        let total: f32 = weight.iter().sum();
        weight.iter_mut().for_each(|w| *w /= total);

        Ok(Self {
            channels,
            kernel_size: kernel_size.to_vec(),
            sigma: sigma.to_vec(),
            weight,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn dim(&self) -> usize {
        self.kernel_size.len()
    }

    pub fn kernel_size(&self) -> &[usize] {
        &self.kernel_size
    }

    pub fn sigma(&self) -> &[f32] {
        &self.sigma
    }

    /// Normalized kernel weights, row-major over the kernel axes.
    pub fn weight(&self) -> &[f32] {
        &self.weight
    }

    /// Spatial extent after a valid correlation over `spatial`.
    pub fn output_extent(&self, spatial: &[usize]) -> AttackResult<Vec<usize>> {
        if spatial.len() != self.dim() {
            return Err(AttackError::UnsupportedDimensionality { dim: spatial.len() });
        }
        spatial
            .iter()
            .zip(&self.kernel_size)
            .map(|(&s, &k)| {
                if s < k {
                    Err(AttackError::invalid(
                        "kernel_size",
                        format!("kernel {k} exceeds input extent {s}"),
                    ))
                } else {
                    Ok(s - k + 1)
                }
            })
            .collect()
    }

    fn check_cols(&self, tensor: &Tensor, per_channel: usize) -> AttackResult<()> {
        let (rows, cols) = tensor.shape();
        let expected = self.channels * per_channel;
        if cols != expected {
            return Err(TensorError::ShapeMismatch {
                left: (rows, cols),
                right: (rows, expected),
            }
            .into());
        }
        Ok(())
    }

    /// Visits every `(output offset, input offset, weight)` triple of one plane.
    fn for_each_tap<F>(&self, input: [usize; MAX_DIM], output: [usize; MAX_DIM], mut f: F)
    where
        F: FnMut(usize, usize, f32),
    {
        let k = lift(&self.kernel_size);
        for o0 in 0..output[0] {
            for o1 in 0..output[1] {
                for o2 in 0..output[2] {
                    let out_idx = (o0 * output[1] + o1) * output[2] + o2;
                    let mut w_idx = 0;
                    for k0 in 0..k[0] {
                        for k1 in 0..k[1] {
                            let base = ((o0 + k0) * input[1] + (o1 + k1)) * input[2] + o2;
                            for k2 in 0..k[2] {
                                f(out_idx, base + k2, self.weight[w_idx]);
                                w_idx += 1;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Depthwise correlation of every channel with the kernel.
    pub fn forward(&self, input: &Tensor, spatial: &[usize]) -> AttackResult<Tensor> {
        let out_extent = self.output_extent(spatial)?;
        let (in_shape, out_shape) = (lift(spatial), lift(&out_extent));
        let in_plane: usize = spatial.iter().product();
        let out_plane: usize = out_extent.iter().product();
        self.check_cols(input, in_plane)?;

        let (batch, cols) = input.shape();
        let out_cols = self.channels * out_plane;
        let mut out = vec![0.0f32; batch * out_cols];
        out.par_chunks_mut(out_cols)
            .zip(input.data().par_chunks(cols))
            .for_each(|(out_row, in_row)| {
                for c in 0..self.channels {
                    let src = &in_row[c * in_plane..(c + 1) * in_plane];
                    let dst = &mut out_row[c * out_plane..(c + 1) * out_plane];
                    self.for_each_tap(in_shape, out_shape, |o, i, w| dst[o] += w * src[i]);
                }
            });
        Ok(Tensor::from_vec(batch, out_cols, out)?)
    }

    /// Adjoint of [`GaussianSmoothing::forward`]: scatters `grad_output`
    /// back onto an input of extent `spatial`.
    pub fn backward(&self, grad_output: &Tensor, spatial: &[usize]) -> AttackResult<Tensor> {
        let out_extent = self.output_extent(spatial)?;
        let (in_shape, out_shape) = (lift(spatial), lift(&out_extent));
        let in_plane: usize = spatial.iter().product();
        let out_plane: usize = out_extent.iter().product();
        self.check_cols(grad_output, out_plane)?;

        let (batch, cols) = grad_output.shape();
        let in_cols = self.channels * in_plane;
        let mut grad = vec![0.0f32; batch * in_cols];
        grad.par_chunks_mut(in_cols)
            .zip(grad_output.data().par_chunks(cols))
            .for_each(|(grad_row, go_row)| {
                for c in 0..self.channels {
                    let src = &go_row[c * out_plane..(c + 1) * out_plane];
                    let dst = &mut grad_row[c * in_plane..(c + 1) * in_plane];
                    self.for_each_tap(in_shape, out_shape, |o, i, w| dst[i] += w * src[o]);
                }
            });
        Ok(Tensor::from_vec(batch, in_cols, grad)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernels_sum_to_one() {
        for (size, std, dim) in [(25, 3.0, 2), (5, 0.7, 1), (3, 1.5, 3), (4, 2.0, 2)] {
            let kernel = GaussianSmoothing::new(2, size, std, dim).unwrap();
            let total: f32 = kernel.weight().iter().sum();
            assert!((total - 1.0).abs() < 1e-5, "size={size} std={std}");
            assert_eq!(kernel.weight().len(), size.pow(dim as u32));
        }
    }

    #[test]
    fn kernel_is_symmetric_and_peaked() {
        let kernel = GaussianSmoothing::new(1, 5, 1.0, 1).unwrap();
        let w = kernel.weight();
        assert!((w[0] - w[4]).abs() < 1e-7);
        assert!((w[1] - w[3]).abs() < 1e-7);
        assert!(w[2] > w[1] && w[1] > w[0]);
    }

    #[test]
    fn rejects_unsupported_dimensionality() {
        assert!(matches!(
            GaussianSmoothing::new(2, 3, 1.0, 4),
            Err(AttackError::UnsupportedDimensionality { dim: 4 })
        ));
        assert!(matches!(
            GaussianSmoothing::new(2, 3, 1.0, 0),
            Err(AttackError::UnsupportedDimensionality { dim: 0 })
        ));
    }

    #[test]
    fn constant_planes_stay_constant() {
        let kernel = GaussianSmoothing::new(2, 3, 1.0, 2).unwrap();
        let input = Tensor::from_fn(1, 2 * 25, |_, c| if c < 25 { 4.0 } else { -1.0 }).unwrap();
        let out = kernel.forward(&input, &[5, 5]).unwrap();
        assert_eq!(out.shape(), (1, 2 * 9));
        for (idx, value) in out.data().iter().enumerate() {
            let expected = if idx < 9 { 4.0 } else { -1.0 };
            assert!((value - expected).abs() < 1e-5);
        }
    }

    #[test]
    fn backward_is_the_adjoint() {
        let kernel = GaussianSmoothing::new(2, 3, 0.8, 2).unwrap();
        let x = Tensor::random_uniform(2, 2 * 36, -1.0, 1.0, Some(11)).unwrap();
        let y = Tensor::random_uniform(2, 2 * 16, -1.0, 1.0, Some(12)).unwrap();
        let ax = kernel.forward(&x, &[6, 6]).unwrap();
        let aty = kernel.backward(&y, &[6, 6]).unwrap();
        let lhs: f32 = ax.data().iter().zip(y.data()).map(|(a, b)| a * b).sum();
        let rhs: f32 = x.data().iter().zip(aty.data()).map(|(a, b)| a * b).sum();
        assert!((lhs - rhs).abs() < 1e-4, "{lhs} vs {rhs}");
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::module::{Module, Parameter};
use crate::{ImageShape, PureResult, Tensor, TensorError};

fn validate_positive(value: usize, label: &'static str) -> PureResult<()> {
    if value == 0 {
        return Err(TensorError::InvalidValue { label });
    }
    Ok(())
}

/// Average pooling over 2D feature maps stored as `(batch, C*H*W)` rows.
#[derive(Debug, Clone)]
pub struct AvgPool2d {
    input: ImageShape,
    kernel: (usize, usize),
    stride: (usize, usize),
}

impl AvgPool2d {
    pub fn new(
        input: ImageShape,
        kernel: (usize, usize),
        stride: (usize, usize),
    ) -> PureResult<Self> {
        validate_positive(kernel.0, "kernel_h")?;
        validate_positive(kernel.1, "kernel_w")?;
        validate_positive(stride.0, "stride_h")?;
        validate_positive(stride.1, "stride_w")?;
        if input.height < kernel.0 || input.width < kernel.1 {
            return Err(TensorError::InvalidDimensions {
                rows: input.height,
                cols: input.width,
            });
        }
        Ok(Self {
            input,
            kernel,
            stride,
        })
    }

    /// Non-overlapping `k x k` pooling.
    pub fn square(input: ImageShape, kernel: usize) -> PureResult<Self> {
        Self::new(input, (kernel, kernel), (kernel, kernel))
    }

    pub fn input_shape(&self) -> ImageShape {
        self.input
    }

    /// Shape of each pooled output row.
    pub fn output_shape(&self) -> ImageShape {
        ImageShape {
            channels: self.input.channels,
            height: (self.input.height - self.kernel.0) / self.stride.0 + 1,
            width: (self.input.width - self.kernel.1) / self.stride.1 + 1,
        }
    }

    fn for_each_window<F>(&self, mut f: F)
    where
        F: FnMut(usize, usize),
    {
        let out = self.output_shape();
        for c in 0..out.channels {
            for oy in 0..out.height {
                for ox in 0..out.width {
                    let out_index = out.offset(c, oy, ox);
                    for ky in 0..self.kernel.0 {
                        for kx in 0..self.kernel.1 {
                            let y = oy * self.stride.0 + ky;
                            let x = ox * self.stride.1 + kx;
                            f(out_index, self.input.offset(c, y, x));
                        }
                    }
                }
            }
        }
    }
}

impl Module for AvgPool2d {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        self.input.check(input)?;
        let (batch, cols) = input.shape();
        let out_cols = self.output_shape().volume();
        let area = (self.kernel.0 * self.kernel.1) as f32;
        let mut out = Tensor::zeros(batch, out_cols)?;
        {
            let out_data = out.data_mut();
            for b in 0..batch {
                let row = &input.data()[b * cols..(b + 1) * cols];
                let out_row = &mut out_data[b * out_cols..(b + 1) * out_cols];
                self.for_each_window(|o, i| out_row[o] += row[i] / area);
            }
        }
        Ok(out)
    }

    fn backward(&mut self, _input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        let out_shape = self.output_shape();
        out_shape.check(grad_output)?;
        let (batch, cols) = grad_output.shape();
        let in_cols = self.input.volume();
        let area = (self.kernel.0 * self.kernel.1) as f32;
        let mut grad_input = Tensor::zeros(batch, in_cols)?;
        {
            let grad_data = grad_input.data_mut();
            for b in 0..batch {
                let grad_row = &grad_output.data()[b * cols..(b + 1) * cols];
                let grad_in_row = &mut grad_data[b * in_cols..(b + 1) * in_cols];
                self.for_each_window(|o, i| grad_in_row[i] += grad_row[o] / area);
            }
        }
        Ok(grad_input)
    }

    fn visit_parameters(
        &self,
        _visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        Ok(())
    }

    fn visit_parameters_mut(
        &mut self,
        _visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avg_pool_forward_backward() {
        let shape = ImageShape::new(1, 2, 4).unwrap();
        let mut pool = AvgPool2d::square(shape, 2).unwrap();
        let input = Tensor::from_vec(1, 8, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]).unwrap();
        let out = pool.forward(&input).unwrap();
        assert_eq!(out.shape(), (1, 2));
        assert_eq!(out.data(), &[3.5, 5.5]);

        let grad = Tensor::from_vec(1, 2, vec![4.0, 8.0]).unwrap();
        let grad_in = pool.backward(&input, &grad).unwrap();
        assert_eq!(grad_in.data(), &[1.0, 1.0, 2.0, 2.0, 1.0, 1.0, 2.0, 2.0]);
    }

    #[test]
    fn rejects_wrong_width() {
        let pool = AvgPool2d::square(ImageShape::new(3, 4, 4).unwrap(), 2).unwrap();
        let input = Tensor::zeros(2, 47).unwrap();
        assert!(pool.forward(&input).is_err());
    }
}

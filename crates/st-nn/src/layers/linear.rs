// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::module::{Module, Parameter};
use crate::{PureResult, Tensor, TensorError};

/// Fully-connected layer computing `input · weight + bias` with a
/// `(input_dim, output_dim)` weight.
#[derive(Debug)]
pub struct Linear {
    weight: Parameter,
    bias: Parameter,
}

impl Linear {
    /// Creates a new linear layer with deterministic small parameters.
    pub fn new(name: impl Into<String>, input_dim: usize, output_dim: usize) -> PureResult<Self> {
        if input_dim == 0 || output_dim == 0 {
            return Err(TensorError::InvalidDimensions {
                rows: input_dim,
                cols: output_dim,
            });
        }
        let mut scale = 0.01f32;
        let weight = Tensor::from_fn(input_dim, output_dim, |_r, _c| {
            let value = scale;
            scale += 0.01;
            value
        })?;
        let bias = Tensor::zeros(1, output_dim)?;
        Self::from_tensors(name, weight, bias)
    }

    /// Builds a layer around explicit weights, e.g. a known classifier.
    pub fn from_tensors(name: impl Into<String>, weight: Tensor, bias: Tensor) -> PureResult<Self> {
        let (_, output_dim) = weight.shape();
        if bias.shape() != (1, output_dim) {
            return Err(TensorError::ShapeMismatch {
                left: bias.shape(),
                right: (1, output_dim),
            });
        }
        let name = name.into();
        Ok(Self {
            weight: Parameter::new(format!("{name}::weight"), weight),
            bias: Parameter::new(format!("{name}::bias"), bias),
        })
    }

    pub fn weight(&self) -> &Parameter {
        &self.weight
    }

    pub fn bias(&self) -> &Parameter {
        &self.bias
    }
}

impl Module for Linear {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        if input.shape().1 != self.weight.value().shape().0 {
            return Err(TensorError::ShapeMismatch {
                left: input.shape(),
                right: self.weight.value().shape(),
            });
        }
        let mut out = input.matmul(self.weight.value())?;
        out.add_row_inplace(self.bias.value().data())?;
        Ok(out)
    }

    fn backward(&mut self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        if input.shape().0 != grad_output.shape().0 {
            return Err(TensorError::ShapeMismatch {
                left: input.shape(),
                right: grad_output.shape(),
            });
        }
        let grad_w = input.transpose().matmul(grad_output)?;
        self.weight.accumulate_euclidean(&grad_w)?;

        let summed = grad_output.sum_axis0();
        let grad_b = Tensor::from_vec(1, summed.len(), summed)?;
        self.bias.accumulate_euclidean(&grad_b)?;

        grad_output.matmul(&self.weight.value().transpose())
    }

    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        visitor(&self.weight)?;
        visitor(&self.bias)
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        visitor(&mut self.weight)?;
        visitor(&mut self.bias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_forward_matches_manual() {
        let layer = Linear::new("fc", 3, 2).unwrap();
        let input = Tensor::from_vec(1, 3, vec![1.0, -2.0, 0.5]).unwrap();
        let output = layer.forward(&input).unwrap();
        let mut expected = input.matmul(layer.weight().value()).unwrap();
        expected.add_row_inplace(layer.bias().value().data()).unwrap();
        assert_eq!(output, expected);
    }

    #[test]
    fn input_gradient_is_weight_transpose_product() {
        let weight = Tensor::from_vec(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let bias = Tensor::from_vec(1, 2, vec![0.5, -0.5]).unwrap();
        let mut layer = Linear::from_tensors("fc", weight, bias).unwrap();
        let input = Tensor::from_vec(1, 2, vec![1.0, 1.0]).unwrap();
        let grad_out = Tensor::from_vec(1, 2, vec![1.0, 0.0]).unwrap();
        let grad_in = layer.backward(&input, &grad_out).unwrap();
        assert_eq!(grad_in.data(), &[1.0, 3.0]);
        assert!(layer.weight().gradient().is_some());
        layer.zero_accumulators().unwrap();
        assert!(layer.weight().gradient().is_none());
    }

    #[test]
    fn from_tensors_rejects_bias_shape() {
        let weight = Tensor::zeros(3, 2).unwrap();
        let bias = Tensor::zeros(1, 3).unwrap();
        assert!(Linear::from_tensors("fc", weight, bias).is_err());
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use super::color::ColorTransform;
use super::dct::DctBasis;
use super::planes::{
    downsample_420, image_to_patches, patches_to_image, upsample_420, upsample_420_adjoint, Block,
    PadWindow, BLOCK,
};
use super::quant::{quality_to_factor, Component, Quantizer, RoundingMode};
use crate::error::{AttackError, AttackResult};
use rayon::prelude::*;
use st_tensor::{ImageShape, Tensor, TensorError};

const COMPONENTS: [Component; 3] = [Component::Luma, Component::Chroma, Component::Chroma];

/// Block grid of each component for one image extent.
///
/// The cat variable concatenates one value per DCT coefficient: every luma
/// block, then every Cb block, then every Cr block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CatLayout {
    pub window: PadWindow,
    pub downsample_chroma: bool,
}

impl CatLayout {
    pub fn new(height: usize, width: usize, downsample_chroma: bool) -> Self {
        Self {
            window: PadWindow::aligned(height, width),
            downsample_chroma,
        }
    }

    pub fn luma_extent(&self) -> (usize, usize) {
        (self.window.padded_height, self.window.padded_width)
    }

    pub fn chroma_extent(&self) -> (usize, usize) {
        let (h, w) = self.luma_extent();
        if self.downsample_chroma {
            (h / 2, w / 2)
        } else {
            (h, w)
        }
    }

    fn extent(&self, index: usize) -> (usize, usize) {
        if index == 0 {
            self.luma_extent()
        } else {
            self.chroma_extent()
        }
    }

    pub fn luma_len(&self) -> usize {
        let (h, w) = self.luma_extent();
        h * w
    }

    pub fn chroma_len(&self) -> usize {
        let (h, w) = self.chroma_extent();
        h * w
    }

    /// Length of the cat variable, `(H/8·W/8 + 2·H/16·W/16)·64` when subsampled.
    pub fn len(&self) -> usize {
        self.luma_len() + 2 * self.chroma_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn component_len(&self, index: usize) -> usize {
        if index == 0 {
            self.luma_len()
        } else {
            self.chroma_len()
        }
    }

    /// Slices a `(batch, len)` cat variable into its three components.
    pub fn split(&self, cat: &Tensor) -> AttackResult<RoundingVars> {
        let (rows, cols) = cat.shape();
        if cols != self.len() {
            return Err(TensorError::ShapeMismatch {
                left: (rows, cols),
                right: (rows, self.len()),
            }
            .into());
        }
        let (y_end, cb_end) = (self.luma_len(), self.luma_len() + self.chroma_len());
        Ok(RoundingVars {
            y: cat.slice_cols(0, y_end)?,
            cb: cat.slice_cols(y_end, cb_end)?,
            cr: cat.slice_cols(cb_end, self.len())?,
        })
    }

    /// Inverse of [`CatLayout::split`].
    pub fn join(&self, vars: &RoundingVars) -> AttackResult<Tensor> {
        Ok(Tensor::cat_cols(&[
            vars.y.clone(),
            vars.cb.clone(),
            vars.cr.clone(),
        ])?)
    }
}

/// Per-coefficient rounding variables of the three components.
#[derive(Clone, Debug, PartialEq)]
pub struct RoundingVars {
    pub y: Tensor,
    pub cb: Tensor,
    pub cr: Tensor,
}

impl RoundingVars {
    pub fn zeros(batch: usize, layout: &CatLayout) -> AttackResult<Self> {
        Ok(Self {
            y: Tensor::zeros(batch, layout.luma_len())?,
            cb: Tensor::zeros(batch, layout.chroma_len())?,
            cr: Tensor::zeros(batch, layout.chroma_len())?,
        })
    }

    fn components(&self) -> [&Tensor; 3] {
        [&self.y, &self.cb, &self.cr]
    }
}

/// Differentiable stand-in for a JPEG encode/decode round trip.
///
/// Works on `(batch, 3 * H * W)` RGB pixels in `[0, 255]`. The rounding
/// variables enter at the quantization step scaled by a per-example
/// amplitude `lambda`.
#[derive(Clone, Debug)]
pub struct JpegCodec {
    basis: DctBasis,
    quantizer: Quantizer,
    downsample_chroma: bool,
}

impl Default for JpegCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl JpegCodec {
    pub fn new() -> Self {
        Self {
            basis: DctBasis::new(),
            quantizer: Quantizer::default(),
            downsample_chroma: true,
        }
    }

    pub fn with_factor(mut self, factor: f32) -> AttackResult<Self> {
        if factor <= 0.0 || !factor.is_finite() {
            return Err(AttackError::invalid(
                "factor",
                format!("must be positive, got {factor}"),
            ));
        }
        self.quantizer.factor = factor;
        Ok(self)
    }

    pub fn with_quality(self, quality: f32) -> AttackResult<Self> {
        self.with_factor(quality_to_factor(quality)?)
    }

    pub fn with_rounding(mut self, rounding: RoundingMode) -> Self {
        self.quantizer.rounding = rounding;
        self
    }

    pub fn with_downsample_chroma(mut self, downsample_chroma: bool) -> Self {
        self.downsample_chroma = downsample_chroma;
        self
    }

    pub fn factor(&self) -> f32 {
        self.quantizer.factor
    }

    pub fn rounding(&self) -> RoundingMode {
        self.quantizer.rounding
    }

    pub fn downsample_chroma(&self) -> bool {
        self.downsample_chroma
    }

    pub fn layout(&self, height: usize, width: usize) -> CatLayout {
        CatLayout::new(height, width, self.downsample_chroma)
    }

    fn check(
        &self,
        pixels: &Tensor,
        shape: ImageShape,
        vars: &RoundingVars,
        lambda: &[f32],
    ) -> AttackResult<CatLayout> {
        if shape.channels != 3 {
            return Err(AttackError::invalid(
                "channels",
                format!("the codec needs RGB input, got {} channels", shape.channels),
            ));
        }
        shape.check(pixels)?;
        let batch = pixels.shape().0;
        if lambda.len() != batch {
            return Err(TensorError::DataLength {
                expected: batch,
                got: lambda.len(),
            }
            .into());
        }
        let layout = self.layout(shape.height, shape.width);
        for (index, var) in vars.components().into_iter().enumerate() {
            let expected = (batch, layout.component_len(index));
            if var.shape() != expected {
                return Err(TensorError::ShapeMismatch {
                    left: var.shape(),
                    right: expected,
                }
                .into());
            }
        }
        Ok(layout)
    }

    /// Compress-decode of one image; returns the unclamped RGB reconstruction.
    fn reconstruct(
        &self,
        row: &[f32],
        shape: ImageShape,
        layout: &CatLayout,
        vars: [&[f32]; 3],
        lambda: f32,
    ) -> AttackResult<Vec<f32>> {
        let window = layout.window;
        let (hp, wp) = layout.luma_extent();
        let (ch, cw) = layout.chroma_extent();
        let padded_plane = hp * wp;
        let plane = shape.plane();

        let mut ycc = Vec::with_capacity(3 * padded_plane);
        for c in 0..3 {
            ycc.extend(window.pad(&row[c * plane..(c + 1) * plane]));
        }
        ColorTransform::RGB_TO_YCBCR_JPEG.apply_planes(&mut ycc, padded_plane);

        let mut decoded = Vec::with_capacity(3 * padded_plane);
        for (index, component) in COMPONENTS.iter().enumerate() {
            let full = &ycc[index * padded_plane..(index + 1) * padded_plane];
            let (eh, ew) = layout.extent(index);
            let source = if index > 0 && self.downsample_chroma {
                downsample_420(full, hp, wp)
            } else {
                full.to_vec()
            };
            let blocks = image_to_patches(&source, eh, ew)?;
            let var = vars[index];
            let rebuilt: Vec<Block> = blocks
                .iter()
                .enumerate()
                .map(|(b, block)| {
                    let coeffs = self.basis.forward(block);
                    let slice = &var[b * 64..(b + 1) * 64];
                    let quantized = self.quantizer.quantize(&coeffs, *component, lambda, slice);
                    self.basis
                        .inverse(&self.quantizer.dequantize(&quantized, *component))
                })
                .collect();
            let restored = patches_to_image(&rebuilt, eh, ew)?;
            if index > 0 && self.downsample_chroma {
                decoded.extend(upsample_420(&restored, ch, cw));
            } else {
                decoded.extend(restored);
            }
        }
        ColorTransform::YCBCR_TO_RGB_JPEG.apply_planes(&mut decoded, padded_plane);

        let mut out = Vec::with_capacity(shape.volume());
        for c in 0..3 {
            out.extend(window.crop(&decoded[c * padded_plane..(c + 1) * padded_plane]));
        }
        Ok(out)
    }

    /// Pulls an output gradient back to the rounding variables of one image.
    fn pull_back(
        &self,
        pre_clamp: &[f32],
        grad: &[f32],
        shape: ImageShape,
        layout: &CatLayout,
        lambda: f32,
    ) -> AttackResult<[Vec<f32>; 3]> {
        let window = layout.window;
        let (hp, wp) = layout.luma_extent();
        let (ch, cw) = layout.chroma_extent();
        let padded_plane = hp * wp;
        let plane = shape.plane();

        let masked: Vec<f32> = pre_clamp
            .iter()
            .zip(grad)
            .map(|(&v, &g)| if (0.0..=255.0).contains(&v) { g } else { 0.0 })
            .collect();
        let mut padded = Vec::with_capacity(3 * padded_plane);
        for c in 0..3 {
            padded.extend(window.uncrop(&masked[c * plane..(c + 1) * plane]));
        }
        for i in 0..padded_plane {
            let g = [
                padded[i],
                padded[padded_plane + i],
                padded[2 * padded_plane + i],
            ];
            let back = ColorTransform::YCBCR_TO_RGB_JPEG.adjoint(g);
            padded[i] = back[0];
            padded[padded_plane + i] = back[1];
            padded[2 * padded_plane + i] = back[2];
        }

        let mut grads: [Vec<f32>; 3] = Default::default();
        for (index, component) in COMPONENTS.iter().enumerate() {
            let full = &padded[index * padded_plane..(index + 1) * padded_plane];
            let (eh, ew) = layout.extent(index);
            let source = if index > 0 && self.downsample_chroma {
                upsample_420_adjoint(full, ch, cw)
            } else {
                full.to_vec()
            };
            let blocks = image_to_patches(&source, eh, ew)?;
            let mut out = Vec::with_capacity(blocks.len() * BLOCK * BLOCK);
            for block in &blocks {
                let coeff_grad = self.basis.inverse_adjoint(block);
                out.extend(
                    self.quantizer
                        .backward_rounding(&coeff_grad, *component, lambda),
                );
            }
            grads[index] = out;
        }
        Ok(grads)
    }

    fn var_rows<'a>(vars: &'a RoundingVars, b: usize) -> [&'a [f32]; 3] {
        let [y, cb, cr] = vars.components();
        let row = |t: &'a Tensor| {
            let cols = t.shape().1;
            &t.data()[b * cols..(b + 1) * cols]
        };
        [row(y), row(cb), row(cr)]
    }

    /// Runs the codec; the output is clamped to `[0, 255]`.
    pub fn forward(
        &self,
        pixels: &Tensor,
        shape: ImageShape,
        vars: &RoundingVars,
        lambda: &[f32],
    ) -> AttackResult<Tensor> {
        let layout = self.check(pixels, shape, vars, lambda)?;
        let (batch, cols) = pixels.shape();
        let rows: Vec<Vec<f32>> = (0..batch)
            .into_par_iter()
            .map(|b| {
                let row = &pixels.data()[b * cols..(b + 1) * cols];
                self.reconstruct(row, shape, &layout, Self::var_rows(vars, b), lambda[b])
            })
            .collect::<AttackResult<_>>()?;
        let data = rows
            .into_iter()
            .flatten()
            .map(|v| v.max(0.0).min(255.0))
            .collect();
        Ok(Tensor::from_vec(batch, cols, data)?)
    }

    /// Gradient of `<grad_output, forward(pixels, vars, lambda)>` with
    /// respect to the rounding variables.
    pub fn backward_rounding(
        &self,
        pixels: &Tensor,
        shape: ImageShape,
        vars: &RoundingVars,
        lambda: &[f32],
        grad_output: &Tensor,
    ) -> AttackResult<RoundingVars> {
        let layout = self.check(pixels, shape, vars, lambda)?;
        if grad_output.shape() != pixels.shape() {
            return Err(TensorError::ShapeMismatch {
                left: grad_output.shape(),
                right: pixels.shape(),
            }
            .into());
        }
        let (batch, cols) = pixels.shape();
        let per_row: Vec<[Vec<f32>; 3]> = (0..batch)
            .into_par_iter()
            .map(|b| {
                let row = &pixels.data()[b * cols..(b + 1) * cols];
                let pre_clamp =
                    self.reconstruct(row, shape, &layout, Self::var_rows(vars, b), lambda[b])?;
                let grad = &grad_output.data()[b * cols..(b + 1) * cols];
                self.pull_back(&pre_clamp, grad, shape, &layout, lambda[b])
            })
            .collect::<AttackResult<_>>()?;

        let mut parts: [Vec<f32>; 3] = Default::default();
        for row in per_row {
            for (part, grad) in parts.iter_mut().zip(row) {
                part.extend(grad);
            }
        }
        let [y, cb, cr] = parts;
        Ok(RoundingVars {
            y: Tensor::from_vec(batch, layout.luma_len(), y)?,
            cb: Tensor::from_vec(batch, layout.chroma_len(), cb)?,
            cr: Tensor::from_vec(batch, layout.chroma_len(), cr)?,
        })
    }
}

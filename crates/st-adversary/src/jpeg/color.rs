// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! RGB / YCbCr conversions on `[0, 255]` pixels.
//!
//! Two pairs exist: the studio-swing ITU-R BT.601 pair and the full-range
//! pair used by JPEG. The codec runs on the JPEG pair.

use crate::error::{AttackError, AttackResult};
use st_tensor::{ImageShape, Tensor};

/// Affine colour map `out = scale * M · (px + pre) + post`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColorTransform {
    matrix: [[f32; 3]; 3],
    scale: f32,
    pre: [f32; 3],
    post: [f32; 3],
}

impl ColorTransform {
    pub const RGB_TO_YCBCR_JPEG: Self = Self {
        matrix: [
            [0.299, 0.587, 0.114],
            [-0.168736, -0.331264, 0.5],
            [0.5, -0.418688, -0.081312],
        ],
        scale: 1.0,
        pre: [0.0; 3],
        post: [0.0, 128.0, 128.0],
    };

    pub const YCBCR_TO_RGB_JPEG: Self = Self {
        matrix: [
            [1.0, 0.0, 1.402],
            [1.0, -0.344136, -0.714136],
            [1.0, 1.772, 0.0],
        ],
        scale: 1.0,
        pre: [0.0, -128.0, -128.0],
        post: [0.0; 3],
    };

    pub const RGB_TO_YCBCR: Self = Self {
        matrix: [
            [65.481, 128.553, 24.966],
            [-37.797, -74.203, 112.0],
            [112.0, -93.786, -18.214],
        ],
        scale: 1.0 / 255.0,
        pre: [0.0; 3],
        post: [16.0, 128.0, 128.0],
    };

    pub const YCBCR_TO_RGB: Self = Self {
        matrix: [
            [298.082, 0.0, 408.583],
            [298.082, -100.291, -208.120],
            [298.082, 516.412, 0.0],
        ],
        scale: 1.0 / 256.0,
        pre: [0.0; 3],
        post: [-222.921, 135.576, -276.836],
    };

    #[inline]
    pub fn apply(&self, px: [f32; 3]) -> [f32; 3] {
        let shifted = [px[0] + self.pre[0], px[1] + self.pre[1], px[2] + self.pre[2]];
        let mut out = self.post;
        for (o, row) in out.iter_mut().zip(&self.matrix) {
            *o += self.scale * (row[0] * shifted[0] + row[1] * shifted[1] + row[2] * shifted[2]);
        }
        out
    }

    /// Transpose of the linear part, for pulling gradients back.
    #[inline]
    pub fn adjoint(&self, grad: [f32; 3]) -> [f32; 3] {
        let mut out = [0.0f32; 3];
        for (g, row) in grad.iter().zip(&self.matrix) {
            for (o, m) in out.iter_mut().zip(row) {
                *o += self.scale * m * g;
            }
        }
        out
    }

    /// Converts three channel-major planes of `plane` pixels in place.
    pub fn apply_planes(&self, planes: &mut [f32], plane: usize) {
        for i in 0..plane {
            let px = [planes[i], planes[plane + i], planes[2 * plane + i]];
            let out = self.apply(px);
            planes[i] = out[0];
            planes[plane + i] = out[1];
            planes[2 * plane + i] = out[2];
        }
    }

    /// Converts a `(batch, 3 * H * W)` tensor.
    pub fn apply_tensor(&self, images: &Tensor, shape: ImageShape) -> AttackResult<Tensor> {
        if shape.channels != 3 {
            return Err(AttackError::invalid(
                "channels",
                format!("colour conversion needs 3 channels, got {}", shape.channels),
            ));
        }
        shape.check(images)?;
        let mut out = images.clone();
        let plane = shape.plane();
        for row in out.data_mut().chunks_mut(shape.volume()) {
            self.apply_planes(row, plane);
        }
        Ok(out)
    }
}

pub fn rgb_to_ycbcr(images: &Tensor, shape: ImageShape) -> AttackResult<Tensor> {
    ColorTransform::RGB_TO_YCBCR.apply_tensor(images, shape)
}

pub fn ycbcr_to_rgb(images: &Tensor, shape: ImageShape) -> AttackResult<Tensor> {
    ColorTransform::YCBCR_TO_RGB.apply_tensor(images, shape)
}

pub fn rgb_to_ycbcr_jpeg(images: &Tensor, shape: ImageShape) -> AttackResult<Tensor> {
    ColorTransform::RGB_TO_YCBCR_JPEG.apply_tensor(images, shape)
}

pub fn ycbcr_to_rgb_jpeg(images: &Tensor, shape: ImageShape) -> AttackResult<Tensor> {
    ColorTransform::YCBCR_TO_RGB_JPEG.apply_tensor(images, shape)
}

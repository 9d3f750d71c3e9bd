// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use super::{PureResult, Tensor, TensorError};
use serde::{Deserialize, Serialize};

/// Channel-major layout of one image stored in a tensor row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageShape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl ImageShape {
    pub fn new(channels: usize, height: usize, width: usize) -> PureResult<Self> {
        if channels == 0 {
            return Err(TensorError::InvalidValue {
                label: "image_channels",
            });
        }
        if height == 0 || width == 0 {
            return Err(TensorError::InvalidDimensions {
                rows: height,
                cols: width,
            });
        }
        Ok(Self {
            channels,
            height,
            width,
        })
    }

    /// Pixels per channel.
    #[inline]
    pub fn plane(&self) -> usize {
        self.height * self.width
    }

    /// Values per image (`channels * height * width`).
    #[inline]
    pub fn volume(&self) -> usize {
        self.channels * self.plane()
    }

    /// Offset of `(channel, y, x)` within one row.
    #[inline]
    pub fn offset(&self, channel: usize, y: usize, x: usize) -> usize {
        (channel * self.height + y) * self.width + x
    }

    /// Checks that every row of `tensor` holds exactly one image of this shape.
    pub fn check(&self, tensor: &Tensor) -> PureResult<()> {
        let (rows, cols) = tensor.shape();
        if cols != self.volume() {
            return Err(TensorError::ShapeMismatch {
                left: (rows, cols),
                right: (rows, self.volume()),
            });
        }
        Ok(())
    }
}

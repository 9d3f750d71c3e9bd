// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Single-plane layout helpers: padding, 4:2:0 resampling and 8x8 blocking.

use crate::error::{AttackError, AttackResult};

/// One 8x8 block, row-major.
pub type Block = [f32; 64];

pub const BLOCK: usize = 8;

/// Rounds `extent` up to the next multiple of 16.
pub fn aligned_extent(extent: usize) -> usize {
    extent.div_ceil(16) * 16
}

/// Window of the original image inside its padded copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PadWindow {
    pub height: usize,
    pub width: usize,
    pub padded_height: usize,
    pub padded_width: usize,
    pub top: usize,
    pub left: usize,
}

impl PadWindow {
    /// Symmetric padding to 16-aligned extents; the extra row or column of an
    /// odd pad goes to the bottom / right.
    pub fn aligned(height: usize, width: usize) -> Self {
        let padded_height = aligned_extent(height);
        let padded_width = aligned_extent(width);
        Self {
            height,
            width,
            padded_height,
            padded_width,
            top: (padded_height - height) / 2,
            left: (padded_width - width) / 2,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.height == self.padded_height && self.width == self.padded_width
    }

    /// Replicate pads one plane.
    pub fn pad(&self, plane: &[f32]) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.padded_height * self.padded_width);
        for y in 0..self.padded_height {
            let sy = y.saturating_sub(self.top).min(self.height - 1);
            for x in 0..self.padded_width {
                let sx = x.saturating_sub(self.left).min(self.width - 1);
                out.push(plane[sy * self.width + sx]);
            }
        }
        out
    }

    /// Copies the original window back out of a padded plane.
    pub fn crop(&self, padded: &[f32]) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.height * self.width);
        for y in 0..self.height {
            let start = (y + self.top) * self.padded_width + self.left;
            out.extend_from_slice(&padded[start..start + self.width]);
        }
        out
    }

    /// Adjoint of [`PadWindow::crop`]: zero plane with `plane` in the window.
    pub fn uncrop(&self, plane: &[f32]) -> Vec<f32> {
        let mut out = vec![0.0f32; self.padded_height * self.padded_width];
        for y in 0..self.height {
            let start = (y + self.top) * self.padded_width + self.left;
            out[start..start + self.width]
                .copy_from_slice(&plane[y * self.width..(y + 1) * self.width]);
        }
        out
    }
}

/// 2x2 average pooling of a plane with even extents.
pub fn downsample_420(plane: &[f32], height: usize, width: usize) -> Vec<f32> {
    let (h, w) = (height / 2, width / 2);
    let mut out = Vec::with_capacity(h * w);
    for y in 0..h {
        for x in 0..w {
            let top = 2 * y * width + 2 * x;
            let bottom = top + width;
            out.push(0.25 * (plane[top] + plane[top + 1] + plane[bottom] + plane[bottom + 1]));
        }
    }
    out
}

/// Nearest-neighbour 2x replication of a `height x width` plane.
pub fn upsample_420(plane: &[f32], height: usize, width: usize) -> Vec<f32> {
    let out_w = 2 * width;
    let mut out = vec![0.0f32; 4 * height * width];
    for y in 0..2 * height {
        for x in 0..out_w {
            out[y * out_w + x] = plane[(y / 2) * width + x / 2];
        }
    }
    out
}

/// Adjoint of [`upsample_420`]: sums each 2x2 cell back into one value.
pub fn upsample_420_adjoint(grad: &[f32], height: usize, width: usize) -> Vec<f32> {
    let out_w = 2 * width;
    let mut out = vec![0.0f32; height * width];
    for y in 0..2 * height {
        for x in 0..out_w {
            out[(y / 2) * width + x / 2] += grad[y * out_w + x];
        }
    }
    out
}

fn check_blocked(height: usize, width: usize) -> AttackResult<()> {
    if height == 0 || width == 0 || height % BLOCK != 0 || width % BLOCK != 0 {
        return Err(AttackError::invalid(
            "extent",
            format!("{height}x{width} is not a multiple of {BLOCK}"),
        ));
    }
    Ok(())
}

/// Splits a plane into 8x8 blocks, enumerated row-major over the block grid.
pub fn image_to_patches(plane: &[f32], height: usize, width: usize) -> AttackResult<Vec<Block>> {
    check_blocked(height, width)?;
    let (rows, cols) = (height / BLOCK, width / BLOCK);
    let mut blocks = Vec::with_capacity(rows * cols);
    for by in 0..rows {
        for bx in 0..cols {
            let mut block = [0.0f32; 64];
            for (y, dst) in block.chunks_mut(BLOCK).enumerate() {
                let start = (by * BLOCK + y) * width + bx * BLOCK;
                dst.copy_from_slice(&plane[start..start + BLOCK]);
            }
            blocks.push(block);
        }
    }
    Ok(blocks)
}

/// Inverse of [`image_to_patches`].
pub fn patches_to_image(blocks: &[Block], height: usize, width: usize) -> AttackResult<Vec<f32>> {
    check_blocked(height, width)?;
    let (rows, cols) = (height / BLOCK, width / BLOCK);
    if blocks.len() != rows * cols {
        return Err(AttackError::invalid(
            "blocks",
            format!("expected {} blocks, got {}", rows * cols, blocks.len()),
        ));
    }
    let mut plane = vec![0.0f32; height * width];
    for (index, block) in blocks.iter().enumerate() {
        let (by, bx) = (index / cols, index % cols);
        for (y, src) in block.chunks(BLOCK).enumerate() {
            let start = (by * BLOCK + y) * width + bx * BLOCK;
            plane[start..start + BLOCK].copy_from_slice(src);
        }
    }
    Ok(plane)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patches_round_trip_exactly() {
        let (h, w) = (16, 24);
        let plane: Vec<f32> = (0..h * w).map(|i| i as f32 * 0.37).collect();
        let blocks = image_to_patches(&plane, h, w).unwrap();
        assert_eq!(blocks.len(), 6);
        // second block starts at column 8 of the first row
        assert_eq!(blocks[1][0], plane[8]);
        assert_eq!(blocks[3][0], plane[8 * w]);
        assert_eq!(patches_to_image(&blocks, h, w).unwrap(), plane);
        assert!(image_to_patches(&plane[..12 * 24], 12, 24).is_err());
    }

    #[test]
    fn chroma_resampling() {
        let plane = vec![1.0, 3.0, 5.0, 7.0, 1.0, 3.0, 5.0, 7.0];
        let down = downsample_420(&plane, 2, 4);
        assert_eq!(down, vec![2.0, 6.0]);
        let up = upsample_420(&down, 1, 2);
        assert_eq!(up, vec![2.0, 2.0, 6.0, 6.0, 2.0, 2.0, 6.0, 6.0]);
        assert_eq!(upsample_420_adjoint(&up, 1, 2), vec![8.0, 24.0]);
    }

    #[test]
    fn padding_replicates_and_crops_back() {
        let window = PadWindow::aligned(13, 16);
        assert_eq!((window.padded_height, window.padded_width), (16, 16));
        assert_eq!((window.top, window.left), (1, 0));
        let plane: Vec<f32> = (0..13 * 16).map(|i| i as f32).collect();
        let padded = window.pad(&plane);
        assert_eq!(padded[0], plane[0]);
        assert_eq!(padded[16], plane[0]);
        assert_eq!(padded[15 * 16], plane[12 * 16]);
        assert_eq!(window.crop(&padded), plane);
        assert!(PadWindow::aligned(32, 32).is_identity());
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Differentiable JPEG round trip and the coefficient-space search built on it.

pub mod codec;
pub mod color;
pub mod dct;
pub mod init;
pub mod optimizer;
pub mod planes;
pub mod quant;

pub use codec::{CatLayout, JpegCodec, RoundingVars};
pub use optimizer::{frank_wolfe_vertex, l2_ascent_step, project_l2, JpegAttackBase, JpegOutcome};
pub use quant::{quality_to_factor, RoundingMode};

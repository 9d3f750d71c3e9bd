// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

mod optimizer;
mod warp;

pub use optimizer::{ElasticAttackBase, ElasticOutcome};
pub use warp::ElasticDeformation;

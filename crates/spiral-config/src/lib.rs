// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Process-wide knobs shared by the perturbation crates: seeded RNG
//! derivation and the tracing subscriber.

pub mod determinism;
pub mod tracing;

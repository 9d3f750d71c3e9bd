// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Gradient-guided perturbation search against fixed `st-nn` classifiers.
//!
//! Two families are provided: a smooth elastic warp of the sampling grid and
//! an offset injected into the quantization step of a differentiable JPEG
//! round trip. Both run fixed-length constrained ascent on the classifier's
//! cross-entropy, with every gradient supplied by hand-written adjoints.

pub mod attack;
pub mod budget;
pub mod config;
pub mod elastic;
pub mod error;
pub mod jpeg;
pub mod list;
pub mod pixel;
pub mod smoothing;

pub use attack::{ElasticAttack, JpegAttack};
pub use budget::Budget;
pub use config::{AttackOptions, ConstraintGeometry, ElasticAttackConfig, JpegAttackConfig};
pub use elastic::{ElasticAttackBase, ElasticDeformation, ElasticOutcome};
pub use error::{AttackError, AttackResult, ConfigError};
pub use jpeg::{CatLayout, JpegAttackBase, JpegCodec, JpegOutcome, RoundingMode, RoundingVars};
pub use list::SeparatedList;
pub use pixel::{to_normalized, to_pixel, LossGradient, PixelModel};
pub use smoothing::GaussianSmoothing;

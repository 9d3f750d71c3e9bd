// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Lightweight `nn.Module` style surface over the pure tensor substrate.
//!
//! Modules expose explicit `forward` / `backward` passes so callers can pull
//! input gradients out of a fixed classifier without an autograd tape.

pub mod layers;
pub mod loss;
pub mod module;

pub use layers::conv::AvgPool2d;
pub use layers::linear::Linear;
pub use layers::sequential::Sequential;
pub use loss::{one_hot, Loss, SoftmaxCrossEntropy};
pub use module::{Module, Parameter};

pub use st_tensor::{ImageShape, PureResult, Tensor, TensorError};

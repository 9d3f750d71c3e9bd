// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use st_tensor::TensorError;
use std::path::PathBuf;
use thiserror::Error;

pub type AttackResult<T> = Result<T, AttackError>;

/// Failures raised while building or running a perturbation search.
#[derive(Debug, Error)]
pub enum AttackError {
    #[error("only 1, 2 and 3 dimensional smoothing is supported, received {dim}")]
    UnsupportedDimensionality { dim: usize },
    #[error("unknown constraint geometry {name:?}; expected one of linf, l1, l2")]
    UnknownConstraint { name: String },
    #[error("image extent {height}x{width} is not a multiple of 16")]
    BlockAlignment { height: usize, width: usize },
    #[error("expected {expected}x{expected} images, received {height}x{width}")]
    ResolutionMismatch {
        expected: usize,
        height: usize,
        width: usize,
    },
    #[error("invalid {field}: {reason}")]
    InvalidConfig { field: &'static str, reason: String },
    #[error(transparent)]
    Tensor(#[from] TensorError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl AttackError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        AttackError::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors produced while loading attack configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse TOML: {source}")]
    Toml {
        #[source]
        source: toml::de::Error,
    },
}

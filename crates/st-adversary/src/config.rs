// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Construction-time hyperparameters for the elastic and JPEG searches.
//!
//! Both configs deserialize from TOML with the same defaults the attack
//! constructors use, and must pass [`ElasticAttackConfig::validate`] /
//! [`JpegAttackConfig::validate`] before an attack is built from them.

use crate::error::{AttackError, AttackResult, ConfigError};
use crate::jpeg::quant::{quality_to_factor, RoundingMode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Norm ball the JPEG perturbation variable is confined to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConstraintGeometry {
    Linf,
    L1,
    L2,
}

impl ConstraintGeometry {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConstraintGeometry::Linf => "linf",
            ConstraintGeometry::L1 => "l1",
            ConstraintGeometry::L2 => "l2",
        }
    }
}

impl FromStr for ConstraintGeometry {
    type Err = AttackError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "linf" => Ok(ConstraintGeometry::Linf),
            "l1" => Ok(ConstraintGeometry::L1),
            "l2" => Ok(ConstraintGeometry::L2),
            other => Err(AttackError::UnknownConstraint {
                name: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for ConstraintGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-call switches of a perturbation search.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackOptions {
    /// Multiply eps and step by a uniform draw in `[0, 1)`.
    #[serde(default)]
    pub scale_eps: bool,
    /// Ascend the loss of the given label; `false` descends towards it.
    #[serde(default = "default_true")]
    pub avoid_target: bool,
}

impl Default for AttackOptions {
    fn default() -> Self {
        Self {
            scale_eps: false,
            avoid_target: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_kernel_size() -> usize {
    25
}

fn default_kernel_std() -> f32 {
    3.0
}

fn default_opt() -> String {
    ConstraintGeometry::Linf.as_str().to_string()
}

fn default_l1_max() -> f32 {
    2.0
}

fn parse_toml<T: DeserializeOwned>(text: &str) -> Result<T, ConfigError> {
    toml::from_str(text).map_err(|source| ConfigError::Toml { source })
}

fn read_toml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_toml(&text)
}

fn check_budget(eps_max: f32, step_size: f32) -> AttackResult<()> {
    if !eps_max.is_finite() || eps_max < 0.0 {
        return Err(AttackError::invalid(
            "eps_max",
            format!("must be finite and non-negative, got {eps_max}"),
        ));
    }
    if !step_size.is_finite() || step_size < 0.0 {
        return Err(AttackError::invalid(
            "step_size",
            format!("must be finite and non-negative, got {step_size}"),
        ));
    }
    Ok(())
}

/// Hyperparameters of the elastic flow-field search. Magnitudes are in pixels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ElasticAttackConfig {
    pub nb_iters: usize,
    pub eps_max: f32,
    pub step_size: f32,
    pub resolution: usize,
    #[serde(default = "default_true")]
    pub rand_init: bool,
    #[serde(default)]
    pub scale_each: bool,
    #[serde(default = "default_kernel_size")]
    pub kernel_size: usize,
    #[serde(default = "default_kernel_std")]
    pub kernel_std: f32,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl ElasticAttackConfig {
    pub fn new(nb_iters: usize, eps_max: f32, step_size: f32, resolution: usize) -> Self {
        Self {
            nb_iters,
            eps_max,
            step_size,
            resolution,
            rand_init: true,
            scale_each: false,
            kernel_size: default_kernel_size(),
            kernel_std: default_kernel_std(),
            seed: None,
        }
    }

    pub fn from_toml_str(text: &str) -> AttackResult<Self> {
        Ok(parse_toml(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> AttackResult<Self> {
        Ok(read_toml(path.as_ref())?)
    }

    pub fn validate(&self) -> AttackResult<()> {
        check_budget(self.eps_max, self.step_size)?;
        if self.resolution == 0 {
            return Err(AttackError::invalid("resolution", "must be positive"));
        }
        if self.kernel_size == 0 || self.kernel_size % 2 == 0 {
            return Err(AttackError::invalid(
                "kernel_size",
                format!("must be odd, got {}", self.kernel_size),
            ));
        }
        let pad = (self.kernel_size - 1) / 2;
        if pad >= self.resolution {
            return Err(AttackError::invalid(
                "kernel_size",
                format!(
                    "reflect padding {pad} must be smaller than the resolution {}",
                    self.resolution
                ),
            ));
        }
        if !(self.kernel_std > 0.0) || !self.kernel_std.is_finite() {
            return Err(AttackError::invalid(
                "kernel_std",
                format!("must be positive, got {}", self.kernel_std),
            ));
        }
        Ok(())
    }
}

/// Hyperparameters of the JPEG coefficient search.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JpegAttackConfig {
    pub nb_iters: usize,
    pub eps_max: f32,
    pub step_size: f32,
    pub resolution: usize,
    #[serde(default = "default_opt")]
    pub opt: String,
    #[serde(default = "default_true")]
    pub rand_init: bool,
    #[serde(default)]
    pub scale_each: bool,
    /// Absolute per-coordinate bound used by the L2 and L1 updates.
    #[serde(default = "default_l1_max")]
    pub l1_max: f32,
    #[serde(default = "default_true")]
    pub downsample_chroma: bool,
    /// JPEG quality in `(0, 100)`; `None` keeps the unscaled tables.
    #[serde(default)]
    pub quality: Option<f32>,
    #[serde(default)]
    pub rounding: RoundingMode,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl JpegAttackConfig {
    pub fn new(
        nb_iters: usize,
        eps_max: f32,
        step_size: f32,
        opt: impl Into<String>,
        resolution: usize,
    ) -> Self {
        Self {
            nb_iters,
            eps_max,
            step_size,
            resolution,
            opt: opt.into(),
            rand_init: true,
            scale_each: false,
            l1_max: default_l1_max(),
            downsample_chroma: true,
            quality: None,
            rounding: RoundingMode::default(),
            seed: None,
        }
    }

    pub fn from_toml_str(text: &str) -> AttackResult<Self> {
        Ok(parse_toml(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> AttackResult<Self> {
        Ok(read_toml(path.as_ref())?)
    }

    pub fn geometry(&self) -> AttackResult<ConstraintGeometry> {
        self.opt.parse()
    }

    /// Quantization table multiplier derived from `quality`.
    pub fn factor(&self) -> AttackResult<f32> {
        match self.quality {
            Some(quality) => quality_to_factor(quality),
            None => Ok(1.0),
        }
    }

    pub fn validate(&self) -> AttackResult<()> {
        check_budget(self.eps_max, self.step_size)?;
        self.geometry()?;
        self.factor()?;
        if self.resolution == 0 {
            return Err(AttackError::invalid("resolution", "must be positive"));
        }
        if !self.l1_max.is_finite() || self.l1_max <= 0.0 {
            return Err(AttackError::invalid(
                "l1_max",
                format!("must be positive, got {}", self.l1_max),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_parses_known_names() {
        assert_eq!(
            "linf".parse::<ConstraintGeometry>().unwrap(),
            ConstraintGeometry::Linf
        );
        assert_eq!("l1".parse::<ConstraintGeometry>().unwrap().to_string(), "l1");
        assert!(matches!(
            "l3".parse::<ConstraintGeometry>(),
            Err(AttackError::UnknownConstraint { name }) if name == "l3"
        ));
    }

    #[test]
    fn elastic_defaults_fill_in() {
        let cfg = ElasticAttackConfig::from_toml_str(
            "nb_iters = 5\neps_max = 2.0\nstep_size = 0.5\nresolution = 32\n",
        )
        .unwrap();
        assert_eq!(cfg, ElasticAttackConfig::new(5, 2.0, 0.5, 32));
        assert!(cfg.rand_init);
        assert_eq!(cfg.kernel_size, 25);
        cfg.validate().unwrap();
    }

    #[test]
    fn elastic_validation_rejects_bad_kernels() {
        let mut cfg = ElasticAttackConfig::new(1, 1.0, 1.0, 32);
        cfg.kernel_size = 4;
        assert!(matches!(
            cfg.validate(),
            Err(AttackError::InvalidConfig { field: "kernel_size", .. })
        ));
        let mut cfg = ElasticAttackConfig::new(1, 1.0, 1.0, 8);
        cfg.kernel_size = 25;
        assert!(cfg.validate().is_err());
        let cfg = ElasticAttackConfig::new(1, -1.0, 1.0, 32);
        assert!(matches!(
            cfg.validate(),
            Err(AttackError::InvalidConfig { field: "eps_max", .. })
        ));
    }

    #[test]
    fn jpeg_config_parses_optional_fields() {
        let cfg = JpegAttackConfig::from_toml_str(
            r#"
nb_iters = 3
eps_max = 0.25
step_size = 0.05
resolution = 32
opt = "l2"
quality = 75.0
rounding = "straight_through"
seed = 7
"#,
        )
        .unwrap();
        assert_eq!(cfg.geometry().unwrap(), ConstraintGeometry::L2);
        assert!((cfg.factor().unwrap() - 0.5).abs() < 1e-6);
        assert_eq!(cfg.rounding, RoundingMode::StraightThrough);
        assert_eq!(cfg.seed, Some(7));
        assert!(cfg.downsample_chroma);
        cfg.validate().unwrap();
    }

    #[test]
    fn jpeg_validation_surfaces_unknown_geometry() {
        let cfg = JpegAttackConfig::new(1, 1.0, 1.0, "l0", 32);
        assert!(matches!(
            cfg.validate(),
            Err(AttackError::UnknownConstraint { .. })
        ));
        let mut cfg = JpegAttackConfig::new(1, 1.0, 1.0, "linf", 32);
        cfg.quality = Some(100.0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let err = JpegAttackConfig::from_toml_str("nb_iters = \"three\"").unwrap_err();
        assert!(matches!(err, AttackError::Config(ConfigError::Toml { .. })));
    }

    #[test]
    fn options_default_to_avoiding_the_label() {
        let options = AttackOptions::default();
        assert!(!options.scale_eps);
        assert!(options.avoid_target);
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use rand::{rngs::StdRng, SeedableRng};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

const ENABLED_VAR: &str = "SPIRAL_DETERMINISTIC";
const SEED_VAR: &str = "SPIRAL_DETERMINISTIC_SEED";
const DEFAULT_SEED: u64 = 42;

/// Snapshot of the deterministic sampling switches.
///
/// When enabled, every component that asks for an RNG without an explicit
/// seed receives one derived from `base_seed` and its label, so two runs of
/// the same attack draw identical initial perturbations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeterminismConfig {
    pub enabled: bool,
    pub base_seed: u64,
}

impl Default for DeterminismConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_seed: DEFAULT_SEED,
        }
    }
}

impl DeterminismConfig {
    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let enabled = lookup(ENABLED_VAR)
            .map(|raw| !matches!(raw.trim(), "" | "0" | "false" | "False" | "off" | "OFF"))
            .unwrap_or(false);
        let base_seed = lookup(SEED_VAR)
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_SEED);
        Self { enabled, base_seed }
    }

    fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Derives the seed assigned to `label`.
    pub fn seed_for<L: Hash>(&self, label: L) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.base_seed.hash(&mut hasher);
        label.hash(&mut hasher);
        hasher.finish()
    }

    /// RNG for `label`: derived from the base seed when enabled, otherwise
    /// drawn from OS entropy.
    pub fn rng_for(&self, label: &str) -> StdRng {
        if self.enabled {
            StdRng::seed_from_u64(self.seed_for(label))
        } else {
            StdRng::from_entropy()
        }
    }
}

static CONFIG: OnceLock<DeterminismConfig> = OnceLock::new();

/// Returns the lazily captured configuration.
pub fn config() -> &'static DeterminismConfig {
    CONFIG.get_or_init(DeterminismConfig::from_env)
}

/// Installs an explicit configuration. Only the first call (or the first
/// [`config`] lookup) wins.
pub fn configure(cfg: DeterminismConfig) -> &'static DeterminismConfig {
    CONFIG.get_or_init(|| cfg)
}

/// RNG seeded from `seed` when given, otherwise from the process policy.
pub fn rng_from_optional(seed: Option<u64>, label: &str) -> StdRng {
    match seed {
        Some(value) => StdRng::seed_from_u64(value),
        None => config().rng_for(label),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_leave_sampling_random() {
        let cfg = DeterminismConfig::from_lookup(lookup(&[]));
        assert_eq!(cfg, DeterminismConfig::default());
    }

    #[test]
    fn env_values_enable_and_seed() {
        let cfg = DeterminismConfig::from_lookup(lookup(&[
            (ENABLED_VAR, "1"),
            (SEED_VAR, "1337"),
        ]));
        assert!(cfg.enabled);
        assert_eq!(cfg.base_seed, 1337);

        let off = DeterminismConfig::from_lookup(lookup(&[(ENABLED_VAR, "off")]));
        assert!(!off.enabled);
    }

    #[test]
    fn enabled_rngs_repeat_per_label() {
        let cfg = DeterminismConfig {
            enabled: true,
            base_seed: 7,
        };
        let a: u64 = cfg.rng_for("elastic").gen();
        let b: u64 = cfg.rng_for("elastic").gen();
        let c: u64 = cfg.rng_for("jpeg").gen();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn explicit_seed_wins() {
        let a: f32 = rng_from_optional(Some(9), "x").gen();
        let b: f32 = rng_from_optional(Some(9), "y").gen();
        assert_eq!(a, b);
    }
}

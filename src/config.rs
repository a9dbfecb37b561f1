//! Engine configuration
//!
//! Loaded from JSON by the binary; every field has a default so a partial file works.

use crate::selector::SelectionBasis;
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantConfig {
    pub variant: Variant,
    pub max_supply: u64,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub pool_id: PoolId,
    pub tier: Tier,
    #[serde(default)]
    pub default_variant: Option<Variant>,
    pub variants: Vec<VariantConfig>,
}

impl PoolConfig {
    pub fn key(&self) -> TierKey {
        TierKey::new(self.pool_id, self.tier)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub roll_ttl_secs: u64,
    pub grace_period_secs: u64,
    pub max_rerolls_per_user: u8,
    pub max_rolls_per_coupon: u32,
    pub free_rolls_per_coupon: u32,
    /// 0 disables per-coupon rate limiting
    pub min_roll_interval_secs: u64,
    pub sweep_interval_secs: u64,
    pub sweep_batch: usize,
    pub sweep_every_n_rolls: u64,
    pub selection_basis: SelectionBasis,
    pub event_buffer: usize,
    pub pools: Vec<PoolConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            roll_ttl_secs: DEFAULT_ROLL_TTL_SECS,
            grace_period_secs: DEFAULT_GRACE_PERIOD_SECS,
            max_rerolls_per_user: DEFAULT_MAX_REROLLS,
            max_rolls_per_coupon: DEFAULT_MAX_ROLLS_PER_COUPON,
            free_rolls_per_coupon: DEFAULT_FREE_ROLLS_PER_COUPON,
            min_roll_interval_secs: 0,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            sweep_batch: DEFAULT_SWEEP_BATCH,
            sweep_every_n_rolls: DEFAULT_SWEEP_EVERY_N_ROLLS,
            selection_basis: SelectionBasis::default(),
            event_buffer: DEFAULT_EVENT_BUFFER,
            pools: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.roll_ttl_secs == 0 {
            return Err(ConfigError::Invalid("roll_ttl_secs must be positive".into()));
        }
        if self.sweep_batch == 0 {
            return Err(ConfigError::Invalid("sweep_batch must be positive".into()));
        }
        if self.sweep_every_n_rolls == 0 {
            return Err(ConfigError::Invalid("sweep_every_n_rolls must be positive".into()));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid("sweep_interval_secs must be positive".into()));
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::Invalid("event_buffer must be positive".into()));
        }
        if self.max_rolls_per_coupon == 0 {
            return Err(ConfigError::Invalid("max_rolls_per_coupon must be positive".into()));
        }

        let mut tiers = HashSet::new();
        for pool in &self.pools {
            if !tiers.insert(pool.key()) {
                return Err(ConfigError::Invalid(format!("duplicate {}", pool.key())));
            }

            let mut variants = HashSet::new();
            for v in &pool.variants {
                if !variants.insert(v.variant) {
                    return Err(ConfigError::Invalid(format!(
                        "duplicate variant {} in {}",
                        v.variant,
                        pool.key()
                    )));
                }
                if v.active && v.max_supply == 0 {
                    return Err(ConfigError::Invalid(format!(
                        "active variant {} in {} has zero supply",
                        v.variant,
                        pool.key()
                    )));
                }
            }

            if let Some(default) = pool.default_variant
                && !variants.contains(&default)
            {
                return Err(ConfigError::Invalid(format!(
                    "default variant {} not configured in {}",
                    default,
                    pool.key()
                )));
            }
        }

        Ok(())
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.roll_ttl_secs, 600);
        assert_eq!(config.selection_basis, SelectionBasis::Available);
    }

    #[test]
    fn test_partial_json() {
        let raw = r#"{
            "max_rerolls_per_user": 2,
            "pools": [
                { "pool_id": 1, "tier": 1, "variants": [
                    { "variant": 1, "max_supply": 10 },
                    { "variant": 2, "max_supply": 5, "active": false }
                ]}
            ]
        }"#;
        let config: EngineConfig = serde_json::from_str(raw).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_rerolls_per_user, 2);
        assert_eq!(config.roll_ttl_secs, DEFAULT_ROLL_TTL_SECS);
        assert!(config.pools[0].variants[0].active);
        assert!(!config.pools[0].variants[1].active);
    }

    #[test]
    fn test_rejects_duplicate_variant() {
        let mut config = EngineConfig::default();
        config.pools.push(PoolConfig {
            pool_id: 1,
            tier: 1,
            default_variant: None,
            variants: vec![
                VariantConfig { variant: 1, max_supply: 1, active: true },
                VariantConfig { variant: 1, max_supply: 2, active: true },
            ],
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unknown_default() {
        let mut config = EngineConfig::default();
        config.pools.push(PoolConfig {
            pool_id: 1,
            tier: 1,
            default_variant: Some(9),
            variants: vec![VariantConfig { variant: 1, max_supply: 1, active: true }],
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_ttl() {
        let config = EngineConfig { roll_ttl_secs: 0, ..Default::default() };
        assert!(config.validate().is_err());
    }
}

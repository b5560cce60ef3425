//! Engine configuration.
//!
//! Parameters are divided into:
//! - Protection: remediation cooldowns enforced per subscription
//! - Dispatch: monitor-domain rate limits and the stale-cycle escape hatch
//! - Identity: the trusted cross-domain sender, the operator and protocol custody
//!
//! Configuration loads from JSON, with `LIQSHIELD_*` environment overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::utils::constants::*;
use crate::utils::ids::Address;

// ═══════════════════════════════════════════════════════════════════════════════
// PROTECTION PARAMETERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Cooldowns applied by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionParams {
    /// Minimum seconds between routine remediation attempts
    pub routine_cooldown_secs: u64,
    /// Minimum seconds between emergency remediation attempts
    pub emergency_cooldown_secs: u64,
}

impl Default for ProtectionParams {
    fn default() -> Self {
        Self {
            routine_cooldown_secs: ROUTINE_COOLDOWN_SECS,
            emergency_cooldown_secs: EMERGENCY_COOLDOWN_SECS,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DISPATCH PARAMETERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Rate limits applied by the event dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchParams {
    /// Minimum seconds between periodic cycles
    pub periodic_interval_secs: u64,
    /// Rate limit for liquidation and risk-increasing events
    pub emergency_cooldown_secs: u64,
    /// Rate limit for risk-decreasing events
    pub risk_decreasing_cooldown_secs: u64,
    /// In-flight cycles older than this multiple of the interval may be force-cleared
    pub stale_multiplier: u64,
}

impl Default for DispatchParams {
    fn default() -> Self {
        Self {
            periodic_interval_secs: PERIODIC_INTERVAL_SECS,
            emergency_cooldown_secs: EMERGENCY_DISPATCH_COOLDOWN_SECS,
            risk_decreasing_cooldown_secs: RISK_DECREASING_COOLDOWN_SECS,
            stale_multiplier: STALE_CYCLE_MULTIPLIER,
        }
    }
}

impl DispatchParams {
    /// Seconds after which an in-flight cycle counts as stale
    pub fn stale_after_secs(&self) -> u64 {
        self.periodic_interval_secs.saturating_mul(self.stale_multiplier)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENGINE CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShieldConfig {
    /// Protection cooldowns
    pub protection: ProtectionParams,
    /// Dispatcher rate limits
    pub dispatch: DispatchParams,
    /// Only commands from this sender are executed
    pub trusted_sender: Address,
    /// Account allowed to administer the dispatcher
    pub operator: Address,
    /// Execution-domain account users grant spending authorization to
    pub engine: Address,
    /// Protocol custody account that receives protection funds
    pub custody: Address,
    /// Directory for persisted state
    pub data_dir: PathBuf,
    /// Monitor timer period in milliseconds
    pub tick_interval_ms: u64,
}

impl Default for ShieldConfig {
    fn default() -> Self {
        Self {
            protection: ProtectionParams::default(),
            dispatch: DispatchParams::default(),
            trusted_sender: Address::derive("liqshield.monitor"),
            operator: Address::derive("liqshield.operator"),
            engine: Address::derive("liqshield.engine"),
            custody: Address::derive("liqshield.custody"),
            data_dir: default_data_dir(),
            tick_interval_ms: 1_000,
        }
    }
}

impl ShieldConfig {
    /// Short windows for test deployments
    pub fn testnet() -> Self {
        Self {
            protection: ProtectionParams {
                routine_cooldown_secs: 60,
                emergency_cooldown_secs: 10,
            },
            dispatch: DispatchParams {
                periodic_interval_secs: 60,
                emergency_cooldown_secs: 5,
                risk_decreasing_cooldown_secs: 10,
                ..Default::default()
            },
            tick_interval_ms: 250,
            ..Default::default()
        }
    }

    /// Load from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let config: Self =
            serde_json::from_str(&content).map_err(|e| Error::Deserialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save to a JSON file, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::Config(e.to_string()))?;
        }

        std::fs::write(path, content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Defaults overridden by environment variables
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Apply `LIQSHIELD_*` environment overrides
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(dir) = std::env::var("LIQSHIELD_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(sender) = std::env::var("LIQSHIELD_TRUSTED_SENDER") {
            self.trusted_sender = sender.parse()?;
        }
        if let Ok(operator) = std::env::var("LIQSHIELD_OPERATOR") {
            self.operator = operator.parse()?;
        }
        if let Ok(engine) = std::env::var("LIQSHIELD_ENGINE") {
            self.engine = engine.parse()?;
        }
        if let Ok(custody) = std::env::var("LIQSHIELD_CUSTODY") {
            self.custody = custody.parse()?;
        }
        if let Ok(interval) = std::env::var("LIQSHIELD_PERIODIC_INTERVAL") {
            self.dispatch.periodic_interval_secs = parse_env("LIQSHIELD_PERIODIC_INTERVAL", &interval)?;
        }
        if let Ok(tick) = std::env::var("LIQSHIELD_TICK_MS") {
            self.tick_interval_ms = parse_env("LIQSHIELD_TICK_MS", &tick)?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Default config file path
    pub fn default_path() -> PathBuf {
        default_data_dir().join("config.json")
    }

    /// Validate parameters are consistent
    pub fn validate(&self) -> Result<()> {
        if self.protection.emergency_cooldown_secs > self.protection.routine_cooldown_secs {
            return Err(Error::Config(
                "emergency cooldown cannot exceed routine cooldown".into(),
            ));
        }
        if self.dispatch.periodic_interval_secs == 0 {
            return Err(Error::Config("periodic interval must be greater than 0".into()));
        }
        if self.dispatch.emergency_cooldown_secs > self.dispatch.risk_decreasing_cooldown_secs {
            return Err(Error::Config(
                "risk-decreasing window must not be shorter than the emergency window".into(),
            ));
        }
        if self.dispatch.stale_multiplier == 0 {
            return Err(Error::Config("stale multiplier must be greater than 0".into()));
        }
        if self.tick_interval_ms == 0 {
            return Err(Error::Config("tick interval must be greater than 0".into()));
        }
        if self.trusted_sender.is_zero() {
            return Err(Error::Config("trusted sender must be set".into()));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HELPER FUNCTIONS
// ═══════════════════════════════════════════════════════════════════════════════

fn parse_env(name: &str, value: &str) -> Result<u64> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("{} must be an integer, got {:?}", name, value)))
}

fn default_data_dir() -> PathBuf {
    match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home).join(".liqshield"),
        Err(_) => PathBuf::from(".liqshield"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = ShieldConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.protection.routine_cooldown_secs, 300);
        assert_eq!(config.protection.emergency_cooldown_secs, 60);
        assert_eq!(config.dispatch.periodic_interval_secs, 300);
        assert_eq!(config.dispatch.emergency_cooldown_secs, 30);
        assert_eq!(config.dispatch.risk_decreasing_cooldown_secs, 60);
        assert_eq!(config.dispatch.stale_after_secs(), 900);
    }

    #[test]
    fn test_testnet_preset_is_valid() {
        let config = ShieldConfig::testnet();
        assert!(config.validate().is_ok());
        assert!(config.dispatch.periodic_interval_secs < PERIODIC_INTERVAL_SECS);
    }

    #[test]
    fn test_config_validation() {
        let mut config = ShieldConfig::default();
        config.dispatch.periodic_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = ShieldConfig::default();
        config.protection.emergency_cooldown_secs = 600;
        assert!(config.validate().is_err());

        let mut config = ShieldConfig::default();
        config.trusted_sender = Address::zero();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = ShieldConfig::testnet();
        config.data_dir = dir.path().to_path_buf();
        config.save(&path).unwrap();

        let loaded = ShieldConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file() {
        let result = ShieldConfig::load(Path::new("/nonexistent/liqshield.json"));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}

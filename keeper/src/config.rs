//! Keeper configuration

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use trove_model::math::{BPS_DENOMINATOR, DECIMAL_PRECISION};
use trove_model::Params;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Scenario file (positions, deposits, price path); `~` is expanded
    pub scenario_path: String,

    /// Polling interval in milliseconds
    pub poll_interval_ms: u64,

    /// Status report interval in milliseconds
    pub report_interval_ms: u64,

    /// Maximum liquidations per batch
    pub max_liquidations_per_batch: usize,

    /// Positions within this many bps above the threshold are logged as at risk
    pub warning_buffer_bps: u64,

    /// Protocol parameters
    pub params: ParamsConfig,
}

/// Protocol parameters in whole units and bps
///
/// TOML integers are 64-bit, so 1e18-scaled values are expanded on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamsConfig {
    pub minimum_ratio_bps: u64,
    pub defensive_ratio_bps: u64,
    pub protection_reserve: u64,
    pub liquidation_fee_bps: u16,
    pub min_net_debt: u64,
    pub scale_factor: u64,
    pub max_scale_shifts: u8,
}

impl Default for ParamsConfig {
    fn default() -> Self {
        Self {
            minimum_ratio_bps: 11_000,
            defensive_ratio_bps: 15_000,
            protection_reserve: 200,
            liquidation_fee_bps: 50,
            min_net_debt: 1_800,
            scale_factor: 1_000_000_000,
            max_scale_shifts: 2,
        }
    }
}

impl ParamsConfig {
    pub fn to_params(&self) -> Result<Params> {
        let ratio = |bps: u64| bps as u128 * DECIMAL_PRECISION / BPS_DENOMINATOR;
        let params = Params {
            minimum_ratio: ratio(self.minimum_ratio_bps),
            defensive_ratio: ratio(self.defensive_ratio_bps),
            protection_reserve: self.protection_reserve as u128 * DECIMAL_PRECISION,
            liquidation_fee_bps: self.liquidation_fee_bps,
            min_net_debt: self.min_net_debt as u128 * DECIMAL_PRECISION,
            scale_factor: self.scale_factor as u128,
            max_scale_shifts: self.max_scale_shifts,
        };
        params
            .validate()
            .map_err(anyhow::Error::from)
            .context("Invalid protocol parameters")?;
        Ok(params)
    }
}

impl Config {
    /// Config file location: `KEEPER_CONFIG`, else `keeper-config.toml`
    pub fn path() -> String {
        std::env::var("KEEPER_CONFIG").unwrap_or_else(|_| "keeper-config.toml".to_string())
    }

    /// Load configuration from TOML file
    pub fn load() -> Result<Self> {
        let config_path = Self::path();

        let config_str = std::fs::read_to_string(&config_path)
            .context(format!("Failed to read config file: {}", config_path))?;

        let config: Config = toml::from_str(&config_str)
            .context("Failed to parse config TOML")?;

        Ok(config)
    }

    /// Create default configuration
    pub fn default_local() -> Self {
        Self {
            scenario_path: "keeper/scenarios/cascade.json".to_string(),
            poll_interval_ms: 500,
            report_interval_ms: 2_000,
            max_liquidations_per_batch: 10,
            warning_buffer_bps: 1_000, // 10 points above the threshold
            params: ParamsConfig::default(),
        }
    }

    /// Write default config to file
    pub fn write_default(path: &str) -> Result<()> {
        let config = Self::default_local();
        let toml_str = toml::to_string_pretty(&config)
            .context("Failed to serialize config")?;

        std::fs::write(path, toml_str)
            .context(format!("Failed to write config to {}", path))?;

        log::info!("Created default config at {}", path);
        Ok(())
    }

    /// Warning margin as a 1e18-scaled ratio
    pub fn warning_buffer(&self) -> u128 {
        self.warning_buffer_bps as u128 * DECIMAL_PRECISION / BPS_DENOMINATOR
    }
}

//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (the Telegram bot token) are referenced by env-var name in the
//! config and resolved at runtime via `std::env::var`.
//!
//! The `[[followed]]` tables are the externally maintained trader records,
//! append-only input for run creation. Removing a table does not delete
//! its run.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs;

use crate::types::MimicError;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub app: EngineConfig,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub followed: Vec<FollowedTrader>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    pub name: String,
    /// Fixed scheduling interval between full check passes.
    pub check_interval_secs: u64,
    /// Path of the persisted run collection.
    pub state_file: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    /// Provider page-size limit for one activity fetch.
    #[serde(default = "default_activity_limit")]
    pub activity_limit: u32,
    /// Rate-limit policy: minimum spacing between upstream HTTP calls.
    #[serde(default = "default_min_call_interval_ms")]
    pub min_call_interval_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_activity_limit() -> u32 {
    100
}

fn default_min_call_interval_ms() -> u64 {
    1_000
}

fn default_request_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AlertsConfig {
    pub telegram_bot_token_env: Option<String>,
    pub telegram_chat_id_env: Option<String>,
}

/// One externally maintained followed-trader record.
///
/// The first time a record's id is seen, a run is created from it; after
/// that the persisted run is authoritative and the record is ignored.
#[derive(Debug, Deserialize, Clone)]
pub struct FollowedTrader {
    pub id: String,
    pub name: String,
    pub trader_address: String,
    pub min_trigger_amount: Decimal,
    pub min_price: Decimal,
    pub max_price: Decimal,
    pub initial_budget: Decimal,
    pub fixed_bet_amount: Decimal,
}

impl FollowedTrader {
    /// Reject records that would make admission or settlement arithmetic
    /// meaningless. A bad record fails its own run's cycle only.
    pub fn validate(&self) -> Result<(), MimicError> {
        let fail = |message: &str| MimicError::Config {
            run_id: self.id.clone(),
            message: message.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(fail("id must not be empty"));
        }
        if self.trader_address.trim().is_empty() {
            return Err(fail("trader_address must not be empty"));
        }
        if self.fixed_bet_amount <= Decimal::ZERO {
            return Err(fail("fixed_bet_amount must be > 0"));
        }
        if self.initial_budget < Decimal::ZERO {
            return Err(fail("initial_budget must be >= 0"));
        }
        if self.min_trigger_amount < Decimal::ZERO {
            return Err(fail("min_trigger_amount must be >= 0"));
        }
        let unit = Decimal::ZERO..=Decimal::ONE;
        if !unit.contains(&self.min_price) || !unit.contains(&self.max_price) {
            return Err(fail("min_price and max_price must be within [0, 1]"));
        }
        if self.min_price > self.max_price {
            return Err(fail("min_price must be <= max_price"));
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}

use std::env;
use std::fs;
use std::path::Path;
use serde::{Deserialize, Serialize};
use crate::{Error, Result};

/// Longest accepted round, one week.
pub const MAX_ROUND_SECS: u64 = 7 * 24 * 60 * 60;

/// Game rules. Every field has a default, so a partial JSON file is enough.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct GameConfig {
    /// CTT granted on registration.
    pub starting_points: i64,
    /// Payout of a winning bet as a percentage of the stake (200 = double).
    pub payout_multiplier_pct: i64,
    /// Score added for a correct free prediction.
    pub prediction_reward: i64,
    pub min_bet: i64,
    pub max_bet: Option<i64>,
    pub round_duration_secs: u64,
    pub symbol: String,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            starting_points: 1000,
            payout_multiplier_pct: 200,
            prediction_reward: 10,
            min_bet: 1,
            max_bet: None,
            round_duration_secs: 60,
            symbol: "BTC".to_string(),
        }
    }
}

impl GameConfig {
    /// Loads the config from an optional JSON file, then applies `CTT_*`
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => serde_json::from_slice(&fs::read(path)?)?,
            Some(path) => {
                log::warn!("Config file {:?} not found, using defaults", path);
                GameConfig::default()
            }
            None => GameConfig::default(),
        };
        config.apply_env(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) -> Result<()> {
        if let Some(v) = lookup("CTT_STARTING_POINTS") {
            self.starting_points = parse_env("CTT_STARTING_POINTS", &v)?;
        }
        if let Some(v) = lookup("CTT_PAYOUT_PCT") {
            self.payout_multiplier_pct = parse_env("CTT_PAYOUT_PCT", &v)?;
        }
        if let Some(v) = lookup("CTT_PREDICTION_REWARD") {
            self.prediction_reward = parse_env("CTT_PREDICTION_REWARD", &v)?;
        }
        if let Some(v) = lookup("CTT_MIN_BET") {
            self.min_bet = parse_env("CTT_MIN_BET", &v)?;
        }
        if let Some(v) = lookup("CTT_MAX_BET") {
            self.max_bet = Some(parse_env("CTT_MAX_BET", &v)?);
        }
        if let Some(v) = lookup("CTT_ROUND_SECS") {
            self.round_duration_secs = parse_env("CTT_ROUND_SECS", &v)?;
        }
        if let Some(v) = lookup("CTT_SYMBOL") {
            if !v.is_empty() {
                self.symbol = v.to_uppercase();
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.starting_points < 0 {
            return Err(Error::InvalidRequest("starting_points must not be negative".to_string()));
        }
        if self.payout_multiplier_pct < 100 {
            return Err(Error::InvalidRequest("payout_multiplier_pct must be at least 100".to_string()));
        }
        if self.min_bet < 1 {
            return Err(Error::InvalidRequest("min_bet must be at least 1".to_string()));
        }
        if self.max_bet.is_some_and(|max| max < self.min_bet) {
            return Err(Error::InvalidRequest("max_bet must not be below min_bet".to_string()));
        }
        if !(1..=MAX_ROUND_SECS).contains(&self.round_duration_secs) {
            return Err(Error::InvalidRequest(format!("round_duration_secs must be between 1 and {}", MAX_ROUND_SECS)));
        }
        Ok(())
    }

    /// Points credited for a winning stake, stake included.
    pub fn payout_for(&self, amount: i64) -> i64 {
        amount.saturating_mul(self.payout_multiplier_pct) / 100
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse()
        .map_err(|_| Error::InvalidRequest(format!("{} has an invalid value '{}'", key, value)))
}

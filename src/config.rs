use crate::engine::{parse_multiplier_entries, InstrumentMultipliers};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    /// Built-in table extended by `INSTRUMENT_MULTIPLIERS_FILE`, then by
    /// `INSTRUMENT_MULTIPLIERS`.
    pub multipliers: InstrumentMultipliers,
    pub ordering_tolerance_ms: i64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = env_map
            .get("PORT")
            .map(|s| s.as_str())
            .unwrap_or("8080")
            .parse::<u16>()
            .map_err(|_| {
                ConfigError::InvalidValue("PORT".to_string(), "must be a valid u16".to_string())
            })?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let ordering_tolerance_ms = env_map
            .get("ORDERING_TOLERANCE_MS")
            .map(|s| s.as_str())
            .unwrap_or("1000")
            .parse::<i64>()
            .ok()
            .filter(|ms| *ms >= 0)
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "ORDERING_TOLERANCE_MS".to_string(),
                    "must be a non-negative integer".to_string(),
                )
            })?;

        let multipliers = parse_multipliers_from_map(&env_map)?;

        Ok(Config {
            port,
            database_path,
            multipliers,
            ordering_tolerance_ms,
        })
    }
}

fn parse_multipliers_from_map(
    env_map: &HashMap<String, String>,
) -> Result<InstrumentMultipliers, ConfigError> {
    let mut multipliers = InstrumentMultipliers::with_defaults();

    if let Some(file_path) = env_map.get("INSTRUMENT_MULTIPLIERS_FILE") {
        let content = std::fs::read_to_string(file_path).map_err(|_| {
            ConfigError::InvalidValue(
                "INSTRUMENT_MULTIPLIERS_FILE".to_string(),
                "file not found or unreadable".to_string(),
            )
        })?;
        let entries = parse_multiplier_entries(&content).map_err(|e| {
            ConfigError::InvalidValue("INSTRUMENT_MULTIPLIERS_FILE".to_string(), e)
        })?;
        multipliers.extend(entries);
    }

    if let Some(inline) = env_map.get("INSTRUMENT_MULTIPLIERS") {
        let entries = parse_multiplier_entries(inline)
            .map_err(|e| ConfigError::InvalidValue("INSTRUMENT_MULTIPLIERS".to_string(), e))?;
        multipliers.extend(entries);
    }

    Ok(multipliers)
}

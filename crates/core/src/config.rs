use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::escalation::EscalationConfig;
use crate::fall::FallConfig;
use crate::gate::{SeniorGate, DEFAULT_ALLOWED_INTENTS};
use crate::models::IntentCategory;

pub const ENV_PREFIX: &str = "SANAD_";

/// Longest accepted value for any `*_ms` setting: one day.
pub const MAX_WINDOW_MS: i64 = 86_400_000;

pub const KNOWN_KEYS: [&str; 14] = [
    "intent.min_confidence",
    "intent.execution_threshold",
    "model.timeout_ms",
    "model.max_tokens",
    "senior.enabled",
    "senior.allowed_intents",
    "fall.threshold",
    "fall.post_fall_threshold",
    "fall.confirmation_window_ms",
    "escalation.wellness_check_ms",
    "escalation.confirmation_timeout_ms",
    "escalation.location_timeout_ms",
    "escalation.capability_timeout_ms",
    "guardian.contacts",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Engine tuning read from plain key/value settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub min_confidence: f32,
    pub execution_threshold: f32,
    pub model_timeout_ms: u64,
    pub model_max_tokens: u32,
    pub senior_enabled: bool,
    pub senior_allowed_intents: Vec<IntentCategory>,
    pub fall: FallConfig,
    pub escalation: EscalationConfig,
    pub capability_timeout_ms: u64,
    pub guardian_contacts: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.85,
            execution_threshold: 0.5,
            model_timeout_ms: 30_000,
            model_max_tokens: 128,
            senior_enabled: false,
            senior_allowed_intents: DEFAULT_ALLOWED_INTENTS.to_vec(),
            fall: FallConfig::default(),
            escalation: EscalationConfig::default(),
            capability_timeout_ms: 10_000,
            guardian_contacts: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in pairs {
            config.apply(key.as_ref(), value.as_ref())?;
        }
        Ok(config)
    }

    /// Reads `SANAD_<KEY>` for every known key, e.g. `SANAD_FALL_THRESHOLD`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_pairs(env_pairs())
    }

    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let key = key.trim();
        let value = value.trim();
        match key {
            "intent.min_confidence" => self.min_confidence = parse_unit(key, value)?,
            "intent.execution_threshold" => self.execution_threshold = parse_unit(key, value)?,
            "model.timeout_ms" => self.model_timeout_ms = parse_millis(key, value)? as u64,
            "model.max_tokens" => self.model_max_tokens = parse_number(key, value)?,
            "senior.enabled" => self.senior_enabled = parse_bool(key, value)?,
            "senior.allowed_intents" => self.senior_allowed_intents = parse_intents(key, value)?,
            "fall.threshold" => self.fall.threshold = parse_positive(key, value)?,
            "fall.post_fall_threshold" => self.fall.post_fall_threshold = parse_positive(key, value)?,
            "fall.confirmation_window_ms" => {
                self.fall.confirmation_window_ms = parse_millis(key, value)?
            }
            "escalation.wellness_check_ms" => {
                self.escalation.wellness_check_ms = parse_millis(key, value)?
            }
            "escalation.confirmation_timeout_ms" => {
                self.escalation.confirmation_timeout_ms = parse_millis(key, value)?
            }
            "escalation.location_timeout_ms" => {
                self.escalation.location_timeout_ms = parse_millis(key, value)?
            }
            "escalation.capability_timeout_ms" => {
                self.capability_timeout_ms = parse_millis(key, value)? as u64
            }
            "guardian.contacts" => {
                self.guardian_contacts = value
                    .split(',')
                    .map(str::trim)
                    .filter(|contact| !contact.is_empty())
                    .map(str::to_string)
                    .collect()
            }
            other => warn!(key = other, "ignoring unknown setting"),
        }
        Ok(())
    }

    pub fn senior_gate(&self) -> SeniorGate {
        SeniorGate::new(self.senior_allowed_intents.iter().copied())
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_millis(self.model_timeout_ms)
    }

    pub fn capability_timeout(&self) -> Duration {
        Duration::from_millis(self.capability_timeout_ms)
    }
}

/// Known keys that are set in the environment, as `(key, value)` pairs.
pub fn env_pairs() -> Vec<(&'static str, String)> {
    KNOWN_KEYS
        .iter()
        .filter_map(|key| env::var(env_var_name(key)).ok().map(|value| (*key, value)))
        .collect()
}

pub fn env_var_name(key: &str) -> String {
    format!("{ENV_PREFIX}{}", key.replace('.', "_").to_uppercase())
}

fn invalid(key: &str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse_number<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let parsed = value
        .parse::<T>()
        .map_err(|err| invalid(key, value, err.to_string()))?;
    if parsed < T::default() {
        return Err(invalid(key, value, "must not be negative"));
    }
    Ok(parsed)
}

fn parse_millis(key: &str, value: &str) -> Result<i64, ConfigError> {
    let parsed: i64 = parse_number(key, value)?;
    if parsed > MAX_WINDOW_MS {
        return Err(invalid(key, value, format!("must be at most {MAX_WINDOW_MS} ms")));
    }
    Ok(parsed)
}

fn parse_positive(key: &str, value: &str) -> Result<f32, ConfigError> {
    let parsed: f32 = parse_number(key, value)?;
    if !parsed.is_finite() || parsed == 0.0 {
        return Err(invalid(key, value, "must be a positive number"));
    }
    Ok(parsed)
}

fn parse_unit(key: &str, value: &str) -> Result<f32, ConfigError> {
    let parsed: f32 = parse_number(key, value)?;
    if !(0.0..=1.0).contains(&parsed) {
        return Err(invalid(key, value, "must be between 0 and 1"));
    }
    Ok(parsed)
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value, "expected true or false")),
    }
}

fn parse_intents(key: &str, value: &str) -> Result<Vec<IntentCategory>, ConfigError> {
    let mut intents = value
        .split(',')
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .map(|label| {
            IntentCategory::parse_label(label)
                .ok_or_else(|| invalid(key, value, format!("unknown intent {label}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if !intents.contains(&IntentCategory::Emergency) {
        intents.push(IntentCategory::Emergency);
    }
    Ok(intents)
}

//! Application-level configuration loading, including the default game rules.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "PRICE_GUESS_BACK_CONFIG_PATH";

#[derive(Debug, Clone, PartialEq, Eq)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Rules copied into every newly created game unless the request overrides them.
    pub rules: GameRules,
    /// Lowest guess accepted for a round created without bounds.
    pub default_min_guess: i64,
    /// Highest guess accepted for a round created without bounds.
    pub default_max_guess: i64,
    /// Fewest players a game may be created with.
    pub min_players: usize,
    /// Most players a game may be created with.
    pub max_players: usize,
    /// Shortest accepted GM PIN.
    pub min_pin_length: usize,
    /// Upper bound for one transition, storage round trips included.
    pub transition_timeout: Duration,
}

/// Scoring and pacing rules stored on each game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameRules {
    pub starting_deposit: i64,
    pub guessing_duration_seconds: u32,
    pub break_after_rounds: Vec<u32>,
    pub exact_bonus_amount: i64,
    pub default_missing_guess_value: i64,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            starting_deposit: 20,
            guessing_duration_seconds: 10,
            break_after_rounds: vec![5, 10, 15, 20],
            exact_bonus_amount: 5,
            default_missing_guess_value: 1,
        }
    }
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to the built-in rules.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(app_config) => {
                    info!(
                        path = %path.display(),
                        starting_deposit = app_config.rules.starting_deposit,
                        guessing_duration_seconds = app_config.rules.guessing_duration_seconds,
                        "loaded game rules from config"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a configuration document; absent keys keep their default value.
    pub fn from_json(contents: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<RawConfig>(contents).map(Into::into)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            rules: GameRules::default(),
            default_min_guess: 1,
            default_max_guess: 10,
            min_players: 2,
            max_players: 10,
            min_pin_length: 4,
            transition_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    starting_deposit: Option<i64>,
    guessing_duration_seconds: Option<u32>,
    break_after_rounds: Option<Vec<u32>>,
    exact_bonus_amount: Option<i64>,
    default_missing_guess_value: Option<i64>,
    default_min_guess: Option<i64>,
    default_max_guess: Option<i64>,
    min_players: Option<usize>,
    max_players: Option<usize>,
    min_pin_length: Option<usize>,
    transition_timeout_ms: Option<u64>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = AppConfig::default();
        let rules = GameRules {
            starting_deposit: value
                .starting_deposit
                .unwrap_or(defaults.rules.starting_deposit),
            guessing_duration_seconds: value
                .guessing_duration_seconds
                .filter(|seconds| *seconds > 0)
                .unwrap_or(defaults.rules.guessing_duration_seconds),
            break_after_rounds: value
                .break_after_rounds
                .unwrap_or(defaults.rules.break_after_rounds),
            exact_bonus_amount: value
                .exact_bonus_amount
                .filter(|amount| *amount >= 0)
                .unwrap_or(defaults.rules.exact_bonus_amount),
            default_missing_guess_value: value
                .default_missing_guess_value
                .filter(|guess| *guess >= 1)
                .unwrap_or(defaults.rules.default_missing_guess_value),
        };

        Self {
            rules,
            default_min_guess: value.default_min_guess.unwrap_or(defaults.default_min_guess),
            default_max_guess: value.default_max_guess.unwrap_or(defaults.default_max_guess),
            min_players: value.min_players.unwrap_or(defaults.min_players),
            max_players: value.max_players.unwrap_or(defaults.max_players),
            min_pin_length: value.min_pin_length.unwrap_or(defaults.min_pin_length),
            transition_timeout: value
                .transition_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.transition_timeout),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        assert_eq!(AppConfig::from_json("{}").unwrap(), AppConfig::default());
    }

    #[test]
    fn partial_document_overrides_only_given_keys() {
        let config =
            AppConfig::from_json(r#"{"starting_deposit": 50, "break_after_rounds": [3]}"#)
                .unwrap();
        assert_eq!(config.rules.starting_deposit, 50);
        assert_eq!(config.rules.break_after_rounds, vec![3]);
        assert_eq!(config.rules.exact_bonus_amount, 5);
        assert_eq!(config.max_players, 10);
    }

    #[test]
    fn out_of_range_rules_fall_back() {
        let config = AppConfig::from_json(
            r#"{"exact_bonus_amount": -1, "default_missing_guess_value": 0, "guessing_duration_seconds": 0}"#,
        )
        .unwrap();
        assert_eq!(config.rules, GameRules::default());
    }

    #[test]
    fn malformed_document_is_an_error() {
        assert!(AppConfig::from_json("[1, 2").is_err());
    }
}

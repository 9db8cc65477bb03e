use std::env;
use std::str::FromStr;

use anyhow::Context;

use crate::clustering::DEFAULT_MAX_ITERATIONS;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_max_connections: u32,
    pub grouping: GroupingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupingConfig {
    pub max_iterations: usize,
    pub default_k: usize,
    pub seed: u64,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            default_k: 3,
            seed: 42,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = GroupingConfig::default();
        Ok(Self {
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 5)?.max(1),
            grouping: GroupingConfig {
                max_iterations: parse_or(&lookup, "GROUPING_MAX_ITERATIONS", defaults.max_iterations)?
                    .clamp(1, 500),
                default_k: parse_or(&lookup, "GROUPING_DEFAULT_K", defaults.default_k)?,
                seed: parse_or(&lookup, "GROUPING_SEED", defaults.seed)?,
            },
        })
    }
}

pub fn database_url() -> anyhow::Result<String> {
    env::var("DATABASE_URL").context("DATABASE_URL must be set to a production Postgres instance")
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.db_max_connections, 5);
        assert_eq!(config.grouping, GroupingConfig::default());
    }

    #[test]
    fn overrides_are_parsed_and_clamped() {
        let config = Config::from_lookup(lookup_from(&[
            ("GROUPING_MAX_ITERATIONS", "10000"),
            ("GROUPING_DEFAULT_K", "4"),
            ("GROUPING_SEED", " 7 "),
            ("LOG_LEVEL", "debug"),
        ]))
        .unwrap();
        assert_eq!(config.grouping.max_iterations, 500);
        assert_eq!(config.grouping.default_k, 4);
        assert_eq!(config.grouping.seed, 7);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn zero_pool_size_is_raised_to_one() {
        let config = Config::from_lookup(lookup_from(&[("DB_MAX_CONNECTIONS", "0")])).unwrap();
        assert_eq!(config.db_max_connections, 1);
    }

    #[test]
    fn garbage_values_are_reported() {
        let err = Config::from_lookup(lookup_from(&[("GROUPING_SEED", "abc")])).unwrap_err();
        assert!(err.to_string().contains("GROUPING_SEED"));
    }
}

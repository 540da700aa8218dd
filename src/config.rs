//! # Configuration Module
//!
//! Tunables for matching, recommendations and planning, with defaults and
//! environment overrides.

use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;

// Defaults
pub const DEFAULT_EXPIRY_WINDOW_DAYS: i64 = 5;
pub const DEFAULT_RECOMMENDATION_LIMIT: usize = 10;
pub const DEFAULT_CANDIDATE_LIMIT: usize = 50;
pub const DEFAULT_WEEKLY_PLAN_LIMIT: usize = 7;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Configuration for the pantry core
#[derive(Debug, Clone, PartialEq)]
pub struct CoreConfig {
    /// Items expiring within this many days count as "expiring soon"
    pub expiry_window_days: i64,
    /// Number of recipes shown on the home view
    pub recommendation_limit: usize,
    /// Number of most recent recipes considered for recommendations and plans
    pub candidate_limit: usize,
    /// Default size of a weekly plan
    pub weekly_plan_limit: usize,
    /// Size of the database connection pool
    pub max_connections: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            expiry_window_days: DEFAULT_EXPIRY_WINDOW_DAYS,
            recommendation_limit: DEFAULT_RECOMMENDATION_LIMIT,
            candidate_limit: DEFAULT_CANDIDATE_LIMIT,
            weekly_plan_limit: DEFAULT_WEEKLY_PLAN_LIMIT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl CoreConfig {
    /// Build a configuration from `PANTRYWISE_*` environment variables,
    /// falling back to the defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            expiry_window_days: parse_var(
                &lookup,
                "PANTRYWISE_EXPIRY_WINDOW_DAYS",
                defaults.expiry_window_days,
            )?,
            recommendation_limit: parse_var(
                &lookup,
                "PANTRYWISE_RECOMMENDATION_LIMIT",
                defaults.recommendation_limit,
            )?,
            candidate_limit: parse_var(&lookup, "PANTRYWISE_CANDIDATE_LIMIT", defaults.candidate_limit)?,
            weekly_plan_limit: parse_var(
                &lookup,
                "PANTRYWISE_WEEKLY_PLAN_LIMIT",
                defaults.weekly_plan_limit,
            )?,
            max_connections: parse_var(&lookup, "PANTRYWISE_MAX_CONNECTIONS", defaults.max_connections)?,
        };

        if config.expiry_window_days < 0 {
            anyhow::bail!("PANTRYWISE_EXPIRY_WINDOW_DAYS must not be negative");
        }
        if config.max_connections == 0 {
            anyhow::bail!("PANTRYWISE_MAX_CONNECTIONS must be at least 1");
        }

        Ok(config)
    }
}

fn parse_var<F, T>(lookup: &F, name: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Invalid value for {name}: '{raw}'")),
        _ => Ok(default),
    }
}

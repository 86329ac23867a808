//! Engine configuration read from the environment.

use procura_observability::LogFormat;

pub const TAX_RATE_BPS_VAR: &str = "PROCURA_TAX_RATE_BPS";
pub const LOG_FORMAT_VAR: &str = "PROCURA_LOG_FORMAT";
pub const ALLOW_DEGRADED_IDS_VAR: &str = "PROCURA_ALLOW_DEGRADED_IDS";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Fixed tax-rate estimate in basis points (`825` = 8.25%).
    pub tax_rate_bps: u32,
    pub log_format: LogFormat,
    /// Fall back to timestamp-derived cart ids when the sequence store fails.
    pub allow_degraded_ids: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tax_rate_bps: 0,
            log_format: LogFormat::Json,
            allow_degraded_ids: true,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable values keep their
    /// default and are logged.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            tax_rate_bps: parse_or(&lookup, TAX_RATE_BPS_VAR, defaults.tax_rate_bps),
            log_format: parse_or(&lookup, LOG_FORMAT_VAR, defaults.log_format),
            allow_degraded_ids: parse_or(
                &lookup,
                ALLOW_DEGRADED_IDS_VAR,
                defaults.allow_degraded_ids,
            ),
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: core::str::FromStr + core::fmt::Debug,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!(%key, value = %raw, ?default, "invalid configuration value; using default");
            default
        }
    }
}

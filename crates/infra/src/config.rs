//! Runtime configuration loaded from the environment.

use std::str::FromStr;

use rust_decimal::Decimal;
use thiserror::Error;

use pharmastock_inventory::DEFAULT_EXPIRY_WINDOW_DAYS;
use pharmastock_purchasing::DEFAULT_PURCHASE_TAX_PERCENT;

pub const EXPIRY_WINDOW_DAYS_VAR: &str = "PHARMASTOCK_EXPIRY_WINDOW_DAYS";
pub const REORDER_TAX_RATE_VAR: &str = "PHARMASTOCK_REORDER_TAX_RATE";
pub const AUTO_SEND_REORDERS_VAR: &str = "PHARMASTOCK_AUTO_SEND_REORDERS";
pub const REORDER_ON_CHANGE_VAR: &str = "PHARMASTOCK_REORDER_ON_CHANGE";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockConfig {
    /// Days ahead the expiry report looks.
    pub expiry_window_days: i64,
    /// Flat tax on reorder subtotals, as a fraction.
    pub reorder_tax_rate: Decimal,
    /// Promote reorder-generated orders straight to `sent`.
    pub auto_send_reorders: bool,
    /// Evaluate the reorder rule of a medicine whenever its stock drops.
    pub reorder_on_change: bool,
}

impl Default for StockConfig {
    fn default() -> Self {
        Self {
            expiry_window_days: DEFAULT_EXPIRY_WINDOW_DAYS,
            reorder_tax_rate: Decimal::new(DEFAULT_PURCHASE_TAX_PERCENT, 2),
            auto_send_reorders: false,
            reorder_on_change: true,
        }
    }
}

impl StockConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let expiry_window_days: i64 =
            parse_or(&lookup, EXPIRY_WINDOW_DAYS_VAR, defaults.expiry_window_days)?;
        if expiry_window_days < 0 {
            return Err(invalid(
                EXPIRY_WINDOW_DAYS_VAR,
                expiry_window_days.to_string(),
                "must not be negative",
            ));
        }

        let reorder_tax_rate: Decimal =
            parse_or(&lookup, REORDER_TAX_RATE_VAR, defaults.reorder_tax_rate)?;
        if reorder_tax_rate < Decimal::ZERO || reorder_tax_rate > Decimal::ONE {
            return Err(invalid(
                REORDER_TAX_RATE_VAR,
                reorder_tax_rate.to_string(),
                "must be a fraction between 0 and 1",
            ));
        }

        Ok(Self {
            expiry_window_days,
            reorder_tax_rate,
            auto_send_reorders: parse_or(
                &lookup,
                AUTO_SEND_REORDERS_VAR,
                defaults.auto_send_reorders,
            )?,
            reorder_on_change: parse_or(&lookup, REORDER_ON_CHANGE_VAR, defaults.reorder_on_change)?,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: core::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(key, raw.clone(), e.to_string())),
    }
}

fn invalid(key: &'static str, value: String, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        value,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn unset_keys_fall_back_to_defaults() {
        let config = StockConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, StockConfig::default());
        assert_eq!(config.expiry_window_days, 30);
        assert_eq!(config.reorder_tax_rate, dec!(0.17));
    }

    #[test]
    fn values_are_parsed() {
        let config = StockConfig::from_lookup(lookup(&[
            (EXPIRY_WINDOW_DAYS_VAR, "60"),
            (REORDER_TAX_RATE_VAR, "0.05"),
            (AUTO_SEND_REORDERS_VAR, "true"),
            (REORDER_ON_CHANGE_VAR, " false "),
        ]))
        .unwrap();

        assert_eq!(config.expiry_window_days, 60);
        assert_eq!(config.reorder_tax_rate, dec!(0.05));
        assert!(config.auto_send_reorders);
        assert!(!config.reorder_on_change);
    }

    #[test]
    fn malformed_values_are_errors() {
        let err = StockConfig::from_lookup(lookup(&[(EXPIRY_WINDOW_DAYS_VAR, "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: EXPIRY_WINDOW_DAYS_VAR, .. }));

        assert!(StockConfig::from_lookup(lookup(&[(REORDER_TAX_RATE_VAR, "1.5")])).is_err());
        assert!(StockConfig::from_lookup(lookup(&[(AUTO_SEND_REORDERS_VAR, "yes")])).is_err());
    }
}

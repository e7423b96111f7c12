//! Batch configuration.
//!
//! Every knob is fixed at scheduler construction. Values can be set in code
//! with the `with_*` builders, deserialized from JSON, or read from the
//! environment:
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `RATEHTTP_RATE` | `rate` (requests/second) | unbounded |
//! | `RATEHTTP_CONNECTIONS` | `connections` | 5 |
//! | `RATEHTTP_RETRIES` | `retries` | 3 |
//! | `RATEHTTP_SSL` | `ssl` | true |
//! | `RATEHTTP_TIMEOUT_SECS` | `timeout` | 30 |

use crate::session::{Backoff, RetryPolicy};
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_CONNECTIONS: usize = 5;
pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Retry delay used when no rate is configured.
pub const UNBOUNDED_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum launches per second. `None` launches back to back.
    pub rate: Option<f64>,
    /// Maximum number of units of work in flight at once.
    pub connections: usize,
    /// Attempts per call, including the first.
    pub retries: u32,
    /// Verify TLS certificates.
    pub ssl: bool,
    /// Per-attempt transport timeout.
    pub timeout: Option<Duration>,
    /// Overrides the backoff derived from `rate` and `connections`.
    pub backoff: Option<Backoff>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            rate: None,
            connections: DEFAULT_CONNECTIONS,
            retries: DEFAULT_RETRIES,
            ssl: true,
            timeout: Some(DEFAULT_TIMEOUT),
            backoff: None,
        }
    }
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = Some(rate);
        self
    }

    pub fn with_connections(mut self, connections: usize) -> Self {
        self.connections = connections;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_ssl(mut self, ssl: bool) -> Self {
        self.ssl = ssl;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Read configuration from `RATEHTTP_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup, starting from defaults.
    ///
    /// Unset keys keep their default; keys that are set but unparsable are an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let cfg = Self::default().overlay_lookup(lookup)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply `RATEHTTP_*` keys found by `lookup` on top of this configuration.
    ///
    /// Unset keys leave the current value alone. The result is not validated.
    pub fn overlay_lookup<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("RATEHTTP_RATE") {
            self.rate = Some(parse_var("RATEHTTP_RATE", &raw)?);
        }
        if let Some(raw) = lookup("RATEHTTP_CONNECTIONS") {
            self.connections = parse_var("RATEHTTP_CONNECTIONS", &raw)?;
        }
        if let Some(raw) = lookup("RATEHTTP_RETRIES") {
            self.retries = parse_var("RATEHTTP_RETRIES", &raw)?;
        }
        if let Some(raw) = lookup("RATEHTTP_SSL") {
            self.ssl = parse_flag("RATEHTTP_SSL", &raw)?;
        }
        if let Some(raw) = lookup("RATEHTTP_TIMEOUT_SECS") {
            let secs: u64 = parse_var("RATEHTTP_TIMEOUT_SECS", &raw)?;
            self.timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.connections == 0 {
            return Err(invalid("connections", "connections must be at least 1", "0"));
        }
        if let Some(rate) = self.rate {
            if !rate.is_finite() || rate <= 0.0 {
                return Err(invalid(
                    "rate",
                    "rate must be a positive, finite number of requests per second",
                    rate.to_string(),
                ));
            }
            if self.checked_spacing().is_none() || self.checked_retry_delay().is_none() {
                return Err(invalid(
                    "rate",
                    "rate is too low: launch spacing or retry delay does not fit in a Duration",
                    rate.to_string(),
                ));
            }
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(invalid("timeout", "timeout must be non-zero", "0s"));
        }
        Ok(())
    }

    /// Minimum delay between two launches.
    pub fn spacing(&self) -> Duration {
        self.checked_spacing().unwrap_or(Duration::MAX)
    }

    /// Delay between attempts of one call.
    ///
    /// With a rate cap, a retry waits as long as it takes every connection slot
    /// to launch twice, so retries cannot push the batch over its rate.
    pub fn retry_delay(&self) -> Duration {
        self.checked_retry_delay().unwrap_or(Duration::MAX)
    }

    /// `None` when `1 / rate` seconds cannot be represented.
    fn checked_spacing(&self) -> Option<Duration> {
        match self.rate {
            Some(rate) if rate.is_finite() && rate > 0.0 => Duration::try_from_secs_f64(1.0 / rate).ok(),
            _ => Some(Duration::ZERO),
        }
    }

    fn checked_retry_delay(&self) -> Option<Duration> {
        let spacing = self.checked_spacing()?;
        if spacing.is_zero() {
            return Some(UNBOUNDED_RETRY_DELAY);
        }
        let slots = u32::try_from(self.connections.max(1)).ok()?.checked_mul(2)?;
        spacing.checked_mul(slots)
    }

    /// Retry policy handed to the batch's session.
    pub fn retry_policy(&self) -> RetryPolicy {
        let backoff = self
            .backoff
            .clone()
            .unwrap_or(Backoff::Fixed(self.retry_delay()));
        RetryPolicy::new(self.retries, backoff)
    }
}

fn invalid(field: &str, message: &str, actual: impl Into<String>) -> Error {
    Error::configuration_with_context(
        message,
        ErrorContext::new()
            .with_field_path(format!("config.{}", field))
            .with_details(format!("got {}", actual.into()))
            .with_source("config"),
    )
}

fn parse_var<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim().parse::<T>().map_err(|_| {
        Error::configuration_with_context(
            format!("cannot parse {}", key),
            ErrorContext::new()
                .with_field_path(key)
                .with_details(format!("got {:?}", raw))
                .with_source("env"),
        )
    })
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => parse_var::<bool>(key, raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.rate, None);
        assert_eq!(cfg.connections, 5);
        assert_eq!(cfg.retries, 3);
        assert!(cfg.ssl);
        assert_eq!(cfg.timeout, Some(Duration::from_secs(30)));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_spacing_and_retry_delay_without_rate() {
        let cfg = SchedulerConfig::new();
        assert_eq!(cfg.spacing(), Duration::ZERO);
        assert_eq!(cfg.retry_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_spacing_and_retry_delay_with_rate() {
        let cfg = SchedulerConfig::new().with_rate(10.0).with_connections(5);
        assert!((cfg.spacing().as_secs_f64() - 0.1).abs() < 1e-6);
        // 0.1s * 5 connections * 2.0
        assert!((cfg.retry_delay().as_secs_f64() - 1.0).abs() < 1e-6);

        let cfg = SchedulerConfig::new().with_rate(4.0).with_connections(2);
        assert_eq!(cfg.retry_delay(), Duration::from_secs(1));

        let cfg = SchedulerConfig::new().with_rate(2.0).with_connections(1);
        assert_eq!(cfg.retry_delay(), Duration::from_secs(1));

        let cfg = SchedulerConfig::new().with_rate(1.0).with_connections(3);
        assert_eq!(cfg.retry_delay(), Duration::from_secs(6));
    }

    #[test]
    fn test_retry_policy_uses_override() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(10),
            max: Duration::from_millis(80),
        };
        let cfg = SchedulerConfig::new()
            .with_rate(10.0)
            .with_retries(4)
            .with_backoff(backoff.clone());
        let policy = cfg.retry_policy();
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.backoff(), &backoff);
    }

    #[test]
    fn test_retry_policy_derived() {
        let policy = SchedulerConfig::new().retry_policy();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.backoff(), &Backoff::Fixed(Duration::from_secs(1)));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let err = SchedulerConfig::new().with_connections(0).validate().unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("config.connections")
        );

        for rate in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let err = SchedulerConfig::new().with_rate(rate).validate().unwrap_err();
            assert!(matches!(err, Error::Configuration { .. }), "rate {}", rate);
        }

        assert!(SchedulerConfig::new()
            .with_timeout(Some(Duration::ZERO))
            .validate()
            .is_err());
    }

    #[test]
    fn test_validate_rejects_unrepresentable_rate() {
        // spacing itself overflows
        let err = SchedulerConfig::new().with_rate(1e-20).validate().unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("config.rate")
        );

        // spacing fits, spacing * connections * 2 does not
        let cfg = SchedulerConfig::new().with_rate(1e-19).with_connections(5);
        assert!(Duration::try_from_secs_f64(1e19).is_ok());
        let err = cfg.validate().unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("config.rate")
        );

        // slow but representable rates stay valid
        let cfg = SchedulerConfig::new().with_rate(1e-6).with_connections(3);
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.retry_delay(), Duration::from_secs(6_000_000));
    }

    #[test]
    fn test_from_lookup() {
        let cfg = SchedulerConfig::from_lookup(lookup(&[
            ("RATEHTTP_RATE", "2.5"),
            ("RATEHTTP_CONNECTIONS", "8"),
            ("RATEHTTP_RETRIES", "1"),
            ("RATEHTTP_SSL", "false"),
            ("RATEHTTP_TIMEOUT_SECS", "0"),
        ]))
        .unwrap();
        assert_eq!(cfg.rate, Some(2.5));
        assert_eq!(cfg.connections, 8);
        assert_eq!(cfg.retries, 1);
        assert!(!cfg.ssl);
        assert_eq!(cfg.timeout, None);
    }

    #[test]
    fn test_overlay_lookup_keeps_unset_fields() {
        let base = SchedulerConfig::new().with_connections(2).with_retries(7);
        let cfg = base
            .overlay_lookup(lookup(&[("RATEHTTP_RETRIES", "4")]))
            .unwrap();
        assert_eq!(cfg.connections, 2);
        assert_eq!(cfg.retries, 4);
    }

    #[test]
    fn test_from_lookup_empty_is_default() {
        let cfg = SchedulerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(cfg, SchedulerConfig::default());
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = SchedulerConfig::from_lookup(lookup(&[("RATEHTTP_CONNECTIONS", "many")]))
            .unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("RATEHTTP_CONNECTIONS")
        );

        assert!(SchedulerConfig::from_lookup(lookup(&[("RATEHTTP_SSL", "maybe")])).is_err());
        assert!(SchedulerConfig::from_lookup(lookup(&[("RATEHTTP_RATE", "-3")])).is_err());
    }

    #[test]
    fn test_deserialize_partial_json() {
        let cfg: SchedulerConfig =
            serde_json::from_str(r#"{"rate": 20.0, "connections": 2}"#).unwrap();
        assert_eq!(cfg.rate, Some(20.0));
        assert_eq!(cfg.connections, 2);
        assert_eq!(cfg.retries, 3);
        assert!(cfg.ssl);
    }
}

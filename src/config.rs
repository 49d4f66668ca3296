use std::path::PathBuf;
use std::str::FromStr;

use crate::engine::{DEFAULT_MIN_HOURS, OverlapPolicy, SchedulingPolicy};

/// Process configuration, read from `CAREBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub min_booking_hours: f64,
    pub overlap_on_bad_token: OverlapPolicy,
    pub manual_honors_blocked_dates: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "carebook".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            min_booking_hours: DEFAULT_MIN_HOURS,
            overlap_on_bad_token: OverlapPolicy::FailOpen,
            manual_honors_blocked_dates: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset keys keep their defaults; set but
    /// malformed keys are an error rather than a silent fallback.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let d = Self::default();
        let min_booking_hours = parsed(&lookup, "CAREBOOK_MIN_BOOKING_HOURS")?
            .unwrap_or(d.min_booking_hours);
        if !min_booking_hours.is_finite() || min_booking_hours < 0.0 {
            return Err(format!(
                "CAREBOOK_MIN_BOOKING_HOURS must be a non-negative number, got {min_booking_hours}"
            ));
        }
        Ok(Self {
            port: parsed(&lookup, "CAREBOOK_PORT")?.unwrap_or(d.port),
            bind: lookup("CAREBOOK_BIND").unwrap_or(d.bind),
            data_dir: lookup("CAREBOOK_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            password: lookup("CAREBOOK_PASSWORD").unwrap_or(d.password),
            max_connections: parsed(&lookup, "CAREBOOK_MAX_CONNECTIONS")?
                .unwrap_or(d.max_connections),
            compact_threshold: parsed(&lookup, "CAREBOOK_COMPACT_THRESHOLD")?
                .unwrap_or(d.compact_threshold),
            metrics_port: parsed(&lookup, "CAREBOOK_METRICS_PORT")?,
            min_booking_hours,
            overlap_on_bad_token: match lookup("CAREBOOK_OVERLAP_ON_BAD_TOKEN") {
                Some(v) => parse_overlap(&v)?,
                None => d.overlap_on_bad_token,
            },
            manual_honors_blocked_dates: match lookup("CAREBOOK_MANUAL_HONORS_BLOCKED") {
                Some(v) => parse_flag("CAREBOOK_MANUAL_HONORS_BLOCKED", &v)?,
                None => d.manual_honors_blocked_dates,
            },
        })
    }

    pub fn scheduling_policy(&self) -> SchedulingPolicy {
        SchedulingPolicy {
            min_booking_hours: self.min_booking_hours,
            overlap_on_bad_token: self.overlap_on_bad_token,
            manual_honors_blocked_dates: self.manual_honors_blocked_dates,
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("carebook.wal")
    }
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, String>
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| format!("{key}={raw:?}: {e}")),
        None => Ok(None),
    }
}

fn parse_overlap(raw: &str) -> Result<OverlapPolicy, String> {
    match raw.trim().to_lowercase().as_str() {
        "open" => Ok(OverlapPolicy::FailOpen),
        "closed" => Ok(OverlapPolicy::FailClosed),
        other => Err(format!(
            "CAREBOOK_OVERLAP_ON_BAD_TOKEN must be open or closed, got {other:?}"
        )),
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, String> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(format!("{key} must be a boolean, got {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from(pairs: &[(&str, &str)]) -> Result<Config, String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(from(&[]).unwrap(), Config::default());
        assert_eq!(
            Config::default().scheduling_policy(),
            SchedulingPolicy::default()
        );
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = from(&[
            ("CAREBOOK_PORT", "6000"),
            ("CAREBOOK_DATA_DIR", "/var/lib/carebook"),
            ("CAREBOOK_METRICS_PORT", "9100"),
            ("CAREBOOK_MIN_BOOKING_HOURS", "2.5"),
            ("CAREBOOK_OVERLAP_ON_BAD_TOKEN", "Closed"),
            ("CAREBOOK_MANUAL_HONORS_BLOCKED", "yes"),
        ])
        .unwrap();
        assert_eq!(cfg.port, 6000);
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.wal_path(), PathBuf::from("/var/lib/carebook/carebook.wal"));
        let policy = cfg.scheduling_policy();
        assert_eq!(policy.min_booking_hours, 2.5);
        assert_eq!(policy.overlap_on_bad_token, OverlapPolicy::FailClosed);
        assert!(policy.manual_honors_blocked_dates);
    }

    #[test]
    fn malformed_values_are_errors() {
        assert!(from(&[("CAREBOOK_PORT", "fifty")]).is_err());
        assert!(from(&[("CAREBOOK_OVERLAP_ON_BAD_TOKEN", "maybe")]).is_err());
        assert!(from(&[("CAREBOOK_MANUAL_HONORS_BLOCKED", "2")]).is_err());
        assert!(from(&[("CAREBOOK_MIN_BOOKING_HOURS", "-1")]).is_err());
    }
}

// SPDX-License-Identifier: GPL-3.0-only

use anyhow::{Context, Result};
use framepace::FaultPlan;
use std::{env, str::FromStr, time::Duration};

/// Settings for the pacing demo, read from `FRAMEPACE_*` variables
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub refresh_hz: u32,
    /// Frames to present before exiting
    pub frames: u64,
    /// How long before the end of a vblank the display sends its notice
    pub early: Duration,
    pub faults: FaultPlan,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh_hz: 60,
            frames: 120,
            early: Duration::from_micros(2000),
            faults: FaultPlan::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let refresh_hz = parse_var(&lookup, "FRAMEPACE_REFRESH_HZ", defaults.refresh_hz)?;
        if refresh_hz == 0 {
            anyhow::bail!("FRAMEPACE_REFRESH_HZ must be greater than zero");
        }

        Ok(Self {
            refresh_hz,
            frames: parse_var(&lookup, "FRAMEPACE_FRAMES", defaults.frames)?,
            early: Duration::from_micros(parse_var(
                &lookup,
                "FRAMEPACE_EARLY_US",
                defaults.early.as_micros() as u64,
            )?),
            faults: FaultPlan {
                duplicate_every: parse_var(&lookup, "FRAMEPACE_DUPLICATE_EVERY", 0)?,
                zero_ust_every: parse_var(&lookup, "FRAMEPACE_ZERO_UST_EVERY", 0)?,
            },
        })
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(1) / self.refresh_hz
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", key, value)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn defaults_without_variables() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.refresh_interval(), Duration::from_nanos(16_666_666));
    }

    #[test]
    fn variables_override_defaults() {
        let config = Config::from_lookup(lookup(&[
            ("FRAMEPACE_REFRESH_HZ", "144"),
            ("FRAMEPACE_FRAMES", "10"),
            ("FRAMEPACE_EARLY_US", " 500 "),
            ("FRAMEPACE_DUPLICATE_EVERY", "3"),
            ("FRAMEPACE_ZERO_UST_EVERY", "7"),
        ]))
        .unwrap();

        assert_eq!(config.refresh_hz, 144);
        assert_eq!(config.frames, 10);
        assert_eq!(config.early, Duration::from_micros(500));
        assert_eq!(config.faults.duplicate_every, 3);
        assert_eq!(config.faults.zero_ust_every, 7);
    }

    #[test]
    fn bad_values_name_the_variable() {
        let err = Config::from_lookup(lookup(&[("FRAMEPACE_FRAMES", "lots")])).unwrap_err();
        assert!(err.to_string().contains("FRAMEPACE_FRAMES"));

        let err = Config::from_lookup(lookup(&[("FRAMEPACE_REFRESH_HZ", "0")])).unwrap_err();
        assert!(err.to_string().contains("greater than zero"));
    }
}

use std::{str::FromStr, time::Duration};

use crate::{
    notify::AlertThresholds,
    speed::{SpeedParams, SpeedProfile},
};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {name}")]
    InvalidValue { name: String, value: String },
    #[error("tick interval must be positive")]
    ZeroTick,
    #[error("steps per segment must be at least 1")]
    ZeroSteps,
    #[error("the ten-minute threshold ({ten}s) must not be below the five-minute one ({five}s)")]
    ThresholdOrder { ten: f64, five: f64 },
    #[error("{name} must be a probability, got {value}")]
    Probability { name: &'static str, value: f64 },
    #[error("dwell range is inverted")]
    DwellRange,
    #[error("ETA speed floor must be positive")]
    EtaFloor,
    #[error("position jitter must be a finite, non-negative distance, got {0}")]
    PositionJitter(f64),
    #[error("{name} threshold must be a finite, non-negative number of seconds, got {value}")]
    Threshold { name: &'static str, value: f64 },
}

/// Chance and length of a stop dwell at the start of each segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DwellPolicy {
    pub probability: f64,
    pub min: Duration,
    pub max: Duration,
}

impl DwellPolicy {
    pub fn disabled() -> Self {
        Self {
            probability: 0.0,
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }
}

impl Default for DwellPolicy {
    fn default() -> Self {
        Self {
            probability: 1.0,
            min: Duration::from_secs(5),
            max: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub tick_interval: Duration,
    pub steps_per_segment: u32,
    pub thresholds: AlertThresholds,
    pub density_window: Duration,
    pub dwell: DwellPolicy,
    /// Upper bound of the random delay before a bus's first tick.
    pub start_jitter: Duration,
    pub random_start_segment: bool,
    /// Speed used for ETA when the bus is slower than this, in m/s.
    pub eta_speed_floor: f64,
    /// Amplitude of the noise added to published positions, in meters.
    pub position_jitter_m: f64,
    /// Append a stationary update at each bus's first stop before it moves.
    pub seed_initial_locations: bool,
    pub speed: SpeedParams,
    /// Fixed seed for reproducible runs; each bus derives its own stream.
    pub rng_seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            steps_per_segment: 15,
            thresholds: AlertThresholds::default(),
            density_window: Duration::from_secs(120),
            dwell: DwellPolicy::default(),
            start_jitter: Duration::from_secs(20),
            random_start_segment: false,
            eta_speed_floor: 1.0,
            position_jitter_m: 2.5,
            seed_initial_locations: true,
            speed: SpeedParams::default(),
            rng_seed: None,
        }
    }
}

impl SimulationConfig {
    /// Defaults overridden by `BUS_SPY_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(ms) = parse::<u64>(&lookup, "BUS_SPY_TICK_MS")? {
            config.tick_interval = Duration::from_millis(ms);
        }
        if let Some(steps) = parse(&lookup, "BUS_SPY_STEPS_PER_SEGMENT")? {
            config.steps_per_segment = steps;
        }
        if let Some(secs) = parse(&lookup, "BUS_SPY_ALERT_10_SECS")? {
            config.thresholds.ten_minutes_secs = secs;
        }
        if let Some(secs) = parse(&lookup, "BUS_SPY_ALERT_5_SECS")? {
            config.thresholds.five_minutes_secs = secs;
        }
        if let Some(secs) = parse::<u64>(&lookup, "BUS_SPY_DENSITY_WINDOW_SECS")? {
            config.density_window = Duration::from_secs(secs);
        }
        if let Some(probability) = parse(&lookup, "BUS_SPY_DWELL_PROBABILITY")? {
            config.dwell.probability = probability;
        }
        if let Some(ms) = parse::<u64>(&lookup, "BUS_SPY_START_JITTER_MS")? {
            config.start_jitter = Duration::from_millis(ms);
        }
        if let Some(random) = parse(&lookup, "BUS_SPY_RANDOM_START_SEGMENT")? {
            config.random_start_segment = random;
        }
        if let Some(meters) = parse(&lookup, "BUS_SPY_POSITION_JITTER_M")? {
            config.position_jitter_m = meters;
        }
        if let Some(probability) = parse(&lookup, "BUS_SPY_RAIN_PROBABILITY")? {
            config.speed.rain_probability = probability;
        }
        if let Some(profile) = lookup("BUS_SPY_SPEED_PROFILE") {
            config.speed.profile = parse_profile(&profile)?;
        }
        if let Some(seed) = parse(&lookup, "BUS_SPY_RNG_SEED")? {
            config.rng_seed = Some(seed);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval.is_zero() {
            return Err(ConfigError::ZeroTick);
        }
        if self.steps_per_segment == 0 {
            return Err(ConfigError::ZeroSteps);
        }
        let AlertThresholds {
            ten_minutes_secs: ten,
            five_minutes_secs: five,
        } = self.thresholds;
        for (name, value) in [("ten-minute", ten), ("five-minute", five)] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Threshold { name, value });
            }
        }
        if ten < five {
            return Err(ConfigError::ThresholdOrder { ten, five });
        }
        for (name, value) in [
            ("dwell probability", self.dwell.probability),
            ("rain probability", self.speed.rain_probability),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Probability { name, value });
            }
        }
        if self.dwell.min > self.dwell.max {
            return Err(ConfigError::DwellRange);
        }
        if self.eta_speed_floor <= 0.0 || !self.eta_speed_floor.is_finite() {
            return Err(ConfigError::EtaFloor);
        }
        if !self.position_jitter_m.is_finite() || self.position_jitter_m < 0.0 {
            return Err(ConfigError::PositionJitter(self.position_jitter_m));
        }
        Ok(())
    }
}

/// `dynamic`, `paced` or `constant:<m/s>`.
pub fn parse_profile(value: &str) -> Result<SpeedProfile, ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        name: "speed profile".to_string(),
        value: value.to_string(),
    };
    match value.trim() {
        "dynamic" => Ok(SpeedProfile::Dynamic),
        "paced" => Ok(SpeedProfile::Paced),
        other => {
            let speed = other
                .strip_prefix("constant:")
                .ok_or_else(invalid)?
                .parse::<f64>()
                .map_err(|_| invalid())?;
            if speed > 0.0 && speed.is_finite() {
                Ok(SpeedProfile::Constant(speed))
            } else {
                Err(invalid())
            }
        }
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    lookup(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
                name: key.to_string(),
                value: raw,
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = SimulationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.thresholds.ten_minutes_secs, 600.0);
        assert_eq!(config.thresholds.five_minutes_secs, 300.0);
        assert_eq!(config.density_window, Duration::from_secs(120));
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = SimulationConfig::from_lookup(lookup(&[
            ("BUS_SPY_TICK_MS", "100"),
            ("BUS_SPY_STEPS_PER_SEGMENT", "10"),
            ("BUS_SPY_ALERT_10_SECS", "60"),
            ("BUS_SPY_ALERT_5_SECS", "30"),
            ("BUS_SPY_SPEED_PROFILE", "constant:5"),
            ("BUS_SPY_RNG_SEED", "99"),
        ]))
        .expect("valid config");

        assert_eq!(config.tick_interval, Duration::from_millis(100));
        assert_eq!(config.steps_per_segment, 10);
        assert_eq!(config.thresholds.ten_minutes_secs, 60.0);
        assert_eq!(config.speed.profile, SpeedProfile::Constant(5.0));
        assert_eq!(config.rng_seed, Some(99));
    }

    #[test]
    fn garbage_is_reported_with_its_key() {
        let err = SimulationConfig::from_lookup(lookup(&[("BUS_SPY_TICK_MS", "soon")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                name: "BUS_SPY_TICK_MS".to_string(),
                value: "soon".to_string()
            }
        );
    }

    #[test]
    fn zero_steps_rejected() {
        let err = SimulationConfig::from_lookup(lookup(&[("BUS_SPY_STEPS_PER_SEGMENT", "0")])).unwrap_err();
        assert_eq!(err, ConfigError::ZeroSteps);
    }

    #[test]
    fn inverted_thresholds_rejected() {
        let err = SimulationConfig::from_lookup(lookup(&[("BUS_SPY_ALERT_10_SECS", "200")])).unwrap_err();
        assert!(matches!(err, ConfigError::ThresholdOrder { .. }));
    }

    #[test]
    fn non_finite_position_jitter_rejected() {
        for raw in ["NaN", "inf", "-2"] {
            let err = SimulationConfig::from_lookup(lookup(&[("BUS_SPY_POSITION_JITTER_M", raw)])).unwrap_err();
            assert!(matches!(err, ConfigError::PositionJitter(_)), "{raw}: {err}");
        }
    }

    #[test]
    fn non_finite_thresholds_rejected() {
        let err = SimulationConfig::from_lookup(lookup(&[("BUS_SPY_ALERT_10_SECS", "nan")])).unwrap_err();
        assert!(matches!(err, ConfigError::Threshold { name: "ten-minute", .. }));

        let err = SimulationConfig::from_lookup(lookup(&[
            ("BUS_SPY_ALERT_10_SECS", "inf"),
            ("BUS_SPY_ALERT_5_SECS", "inf"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Threshold { .. }));
    }

    #[test]
    fn profile_parsing() {
        assert_eq!(parse_profile("paced"), Ok(SpeedProfile::Paced));
        assert_eq!(parse_profile("dynamic"), Ok(SpeedProfile::Dynamic));
        assert!(parse_profile("constant:-1").is_err());
        assert!(parse_profile("warp").is_err());
    }
}

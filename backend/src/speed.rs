use chrono::Weekday;
use rand::Rng;

use crate::models::Weather;

/// A stretch of the day with its own speed multiplier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrafficWindow {
    /// Inclusive start hour, 0-23.
    pub start_hour: u32,
    /// Exclusive end hour, 1-24.
    pub end_hour: u32,
    pub factor: f64,
    pub weekdays_only: bool,
}

impl TrafficWindow {
    pub const fn new(start_hour: u32, end_hour: u32, factor: f64) -> Self {
        Self {
            start_hour,
            end_hour,
            factor,
            weekdays_only: false,
        }
    }

    pub const fn weekdays(start_hour: u32, end_hour: u32, factor: f64) -> Self {
        Self {
            start_hour,
            end_hour,
            factor,
            weekdays_only: true,
        }
    }

    fn covers(&self, hour: u32, weekday: Weekday) -> bool {
        if self.weekdays_only && matches!(weekday, Weekday::Sat | Weekday::Sun) {
            return false;
        }
        hour >= self.start_hour && hour < self.end_hour
    }
}

/// Time-of-day traffic lookup. The first window covering the hour wins;
/// uncovered hours run at free flow.
#[derive(Debug, Clone, PartialEq)]
pub struct TrafficTable {
    windows: Vec<TrafficWindow>,
}

impl TrafficTable {
    pub fn new(windows: Vec<TrafficWindow>) -> Self {
        Self { windows }
    }

    pub fn free_flow() -> Self {
        Self::new(Vec::new())
    }

    pub fn windows(&self) -> &[TrafficWindow] {
        &self.windows
    }

    pub fn factor_at(&self, hour: u32, weekday: Weekday) -> f64 {
        self.windows
            .iter()
            .find(|w| w.covers(hour, weekday))
            .map_or(1.0, |w| w.factor)
    }
}

impl Default for TrafficTable {
    /// Weekday rush hours halve speeds, nights are nearly clear, the rest of
    /// the day runs at 80%.
    fn default() -> Self {
        Self::new(vec![
            TrafficWindow::weekdays(7, 10, 0.5),
            TrafficWindow::weekdays(17, 20, 0.5),
            TrafficWindow::new(0, 6, 0.9),
            TrafficWindow::new(6, 24, 0.8),
        ])
    }
}

/// How a bus picks its speed each tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpeedProfile {
    /// Step-distance physics with traffic, weather, fluctuation and bounded
    /// acceleration.
    Dynamic,
    /// Covers whatever distance is left in the segment in the ticks left.
    Paced,
    /// Always the same speed, in m/s.
    Constant(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpeedParams {
    pub profile: SpeedProfile,
    /// Lowest top speed a bus can be given, in m/s.
    pub max_speed: f64,
    /// Random extra top speed, drawn once per bus.
    pub max_speed_spread: f64,
    /// Lowest speed change per tick, in m/s.
    pub acceleration: f64,
    pub acceleration_spread: f64,
    /// Floor applied away from stops so buses do not crawl mid-segment.
    pub min_speed: f64,
    /// Multiplicative noise, as a fraction either side of 1.
    pub fluctuation: f64,
    pub rain_probability: f64,
    pub rain_factor: f64,
    pub traffic: TrafficTable,
}

impl Default for SpeedParams {
    fn default() -> Self {
        Self {
            profile: SpeedProfile::Dynamic,
            max_speed: 10.0,
            max_speed_spread: 2.0,
            acceleration: 0.5,
            acceleration_spread: 0.3,
            min_speed: 5.0,
            fluctuation: 0.15,
            rain_probability: 0.1,
            rain_factor: 0.7,
            traffic: TrafficTable::default(),
        }
    }
}

impl SpeedParams {
    pub fn constant(speed: f64) -> Self {
        Self {
            profile: SpeedProfile::Constant(speed),
            ..Self::default()
        }
    }
}

/// What the speed model sees of the current tick.
#[derive(Debug, Clone, Copy)]
pub struct SpeedContext {
    /// Meters between the previous tick's position and this one.
    pub step_distance_m: f64,
    pub tick_secs: f64,
    pub distance_remaining_m: f64,
    /// Seconds of ticks left before the bus reaches the next stop.
    pub time_left_secs: f64,
    pub at_segment_start: bool,
    pub hour: u32,
    pub weekday: Weekday,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedSample {
    pub speed: f64,
    pub weather: Weather,
}

/// Per-bus speed state. Top speed and acceleration are drawn once so that
/// buses sharing a route do not behave identically.
#[derive(Debug, Clone)]
pub struct SpeedModel {
    params: SpeedParams,
    max_speed: f64,
    acceleration: f64,
    current_speed: f64,
}

impl SpeedModel {
    pub fn new<R: Rng + ?Sized>(params: SpeedParams, rng: &mut R) -> Self {
        let max_speed = params.max_speed + rng.gen::<f64>() * params.max_speed_spread;
        let acceleration = params.acceleration + rng.gen::<f64>() * params.acceleration_spread;
        Self {
            params,
            max_speed,
            acceleration,
            current_speed: 0.0,
        }
    }

    pub fn max_speed(&self) -> f64 {
        self.max_speed
    }

    pub fn acceleration(&self) -> f64 {
        self.acceleration
    }

    pub fn current_speed(&self) -> f64 {
        self.current_speed
    }

    pub fn update<R: Rng + ?Sized>(&mut self, ctx: &SpeedContext, rng: &mut R) -> SpeedSample {
        let sample = match self.params.profile {
            SpeedProfile::Constant(speed) => SpeedSample {
                speed,
                weather: Weather::Clear,
            },
            SpeedProfile::Paced => SpeedSample {
                speed: ctx.distance_remaining_m / ctx.time_left_secs.max(ctx.tick_secs),
                weather: Weather::Clear,
            },
            SpeedProfile::Dynamic => self.dynamic(ctx, rng),
        };
        self.current_speed = sample.speed;
        sample
    }

    fn dynamic<R: Rng + ?Sized>(&self, ctx: &SpeedContext, rng: &mut R) -> SpeedSample {
        let params = &self.params;
        let mut target = (ctx.step_distance_m / ctx.tick_secs).min(self.max_speed);
        target *= params.traffic.factor_at(ctx.hour, ctx.weekday);

        let weather = if rng.gen_bool(params.rain_probability) {
            Weather::Rain
        } else {
            Weather::Clear
        };
        if weather == Weather::Rain {
            target *= params.rain_factor;
        }
        if params.fluctuation > 0.0 {
            target *= 1.0 + rng.gen_range(-params.fluctuation..=params.fluctuation);
        }

        let mut speed = approach(self.current_speed, target, self.acceleration);
        if speed < params.min_speed && !ctx.at_segment_start {
            speed = params.min_speed;
        }

        SpeedSample { speed, weather }
    }
}

/// Moves `current` toward `target` by at most `step`.
fn approach(current: f64, target: f64, step: f64) -> f64 {
    if current < target {
        (current + step).min(target)
    } else {
        (current - step).max(target)
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn ctx(step_distance_m: f64, at_segment_start: bool) -> SpeedContext {
        SpeedContext {
            step_distance_m,
            tick_secs: 1.0,
            distance_remaining_m: 100.0,
            time_left_secs: 10.0,
            at_segment_start,
            hour: 12,
            weekday: Weekday::Wed,
        }
    }

    fn calm() -> SpeedParams {
        SpeedParams {
            max_speed: 10.0,
            max_speed_spread: 0.0,
            acceleration: 1.0,
            acceleration_spread: 0.0,
            min_speed: 0.0,
            fluctuation: 0.0,
            rain_probability: 0.0,
            traffic: TrafficTable::free_flow(),
            ..SpeedParams::default()
        }
    }

    #[test]
    fn default_traffic_table_slows_weekday_rush() {
        let table = TrafficTable::default();
        assert_eq!(table.factor_at(8, Weekday::Tue), 0.5);
        assert_eq!(table.factor_at(18, Weekday::Fri), 0.5);
        assert_eq!(table.factor_at(8, Weekday::Sun), 0.8);
        assert_eq!(table.factor_at(3, Weekday::Mon), 0.9);
        assert_eq!(table.factor_at(13, Weekday::Mon), 0.8);
    }

    #[test]
    fn empty_table_is_free_flow() {
        assert_eq!(TrafficTable::free_flow().factor_at(8, Weekday::Mon), 1.0);
    }

    #[test]
    fn acceleration_is_bounded_per_tick() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut model = SpeedModel::new(calm(), &mut rng);
        let speeds: Vec<f64> = (0..4)
            .map(|_| model.update(&ctx(8.0, false), &mut rng).speed)
            .collect();
        assert_eq!(speeds, [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn deceleration_uses_the_same_bound() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut model = SpeedModel::new(calm(), &mut rng);
        model.current_speed = 6.0;
        let speed = model.update(&ctx(0.0, false), &mut rng).speed;
        assert_eq!(speed, 5.0);
    }

    #[test]
    fn target_is_capped_by_max_speed() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut model = SpeedModel::new(
            SpeedParams {
                acceleration: 100.0,
                ..calm()
            },
            &mut rng,
        );
        assert_eq!(model.update(&ctx(50.0, false), &mut rng).speed, 10.0);
    }

    #[test]
    fn floor_applies_mid_segment_only() {
        let mut rng = StdRng::seed_from_u64(3);
        let params = SpeedParams {
            min_speed: 5.0,
            ..calm()
        };
        let mut model = SpeedModel::new(params, &mut rng);
        assert_eq!(model.update(&ctx(0.0, true), &mut rng).speed, 0.0);
        assert_eq!(model.update(&ctx(0.0, false), &mut rng).speed, 5.0);
    }

    #[test]
    fn rain_slows_the_bus() {
        let mut rng = StdRng::seed_from_u64(9);
        let params = SpeedParams {
            rain_probability: 1.0,
            rain_factor: 0.7,
            acceleration: 100.0,
            ..calm()
        };
        let mut model = SpeedModel::new(params, &mut rng);
        let sample = model.update(&ctx(10.0, false), &mut rng);
        assert_eq!(sample.weather, Weather::Rain);
        assert!((sample.speed - 7.0).abs() < 1e-9);
    }

    #[test]
    fn fluctuation_stays_within_bounds() {
        let mut rng = StdRng::seed_from_u64(11);
        let params = SpeedParams {
            fluctuation: 0.15,
            acceleration: 100.0,
            ..calm()
        };
        let mut model = SpeedModel::new(params, &mut rng);
        for _ in 0..500 {
            let speed = model.update(&ctx(8.0, false), &mut rng).speed;
            assert!((8.0 * 0.85 - 1e-9..=8.0 * 1.15 + 1e-9).contains(&speed), "{speed}");
        }
    }

    #[test]
    fn paced_profile_finishes_segment_on_time() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut model = SpeedModel::new(
            SpeedParams {
                profile: SpeedProfile::Paced,
                ..calm()
            },
            &mut rng,
        );
        assert_eq!(model.update(&ctx(0.0, true), &mut rng).speed, 10.0);
    }

    #[test]
    fn per_bus_parameters_are_randomized_within_spread() {
        let mut rng = StdRng::seed_from_u64(21);
        let params = SpeedParams::default();
        for _ in 0..50 {
            let model = SpeedModel::new(params.clone(), &mut rng);
            assert!((10.0..=12.0).contains(&model.max_speed()));
            assert!((0.5..=0.8).contains(&model.acceleration()));
        }
    }
}

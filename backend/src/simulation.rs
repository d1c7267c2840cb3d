use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Datelike, Local, Timelike, Utc};
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{
    config::SimulationConfig,
    geo::{haversine_m, interpolate, jitter},
    models::{Bus, Coordinate, LocationUpdate, Weather},
    route::RouteView,
    speed::{SpeedContext, SpeedModel},
};

/// Where a bus is along its route.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionState {
    /// Index of the stop the current segment starts from.
    pub segment: usize,
    /// Progress through the segment, `0..=steps_per_segment`.
    pub step: u32,
    /// Meters per second.
    pub speed: f64,
    /// Unjittered position of the previous tick.
    pub last_position: Option<Coordinate>,
}

impl MotionState {
    pub fn at_segment(segment: usize) -> Self {
        Self {
            segment,
            step: 0,
            speed: 0.0,
            last_position: None,
        }
    }
}

/// One bus moving along its route. Owned by exactly one task.
#[derive(Debug, Clone)]
pub struct BusSimulation {
    bus: Bus,
    route: RouteView,
    state: MotionState,
    speed: SpeedModel,
    rng: StdRng,
    config: Arc<SimulationConfig>,
}

impl BusSimulation {
    pub fn new(bus: Bus, route: RouteView, config: Arc<SimulationConfig>) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ stream_id(&bus.id)),
            None => StdRng::from_entropy(),
        };
        Self::with_rng(bus, route, config, rng)
    }

    pub fn with_rng(bus: Bus, route: RouteView, config: Arc<SimulationConfig>, mut rng: StdRng) -> Self {
        let segment = if config.random_start_segment {
            rng.gen_range(0..route.len())
        } else {
            0
        };
        let speed = SpeedModel::new(config.speed.clone(), &mut rng);
        Self {
            bus,
            route,
            state: MotionState::at_segment(segment),
            speed,
            rng,
            config,
        }
    }

    pub fn bus_id(&self) -> &str {
        &self.bus.id
    }

    pub fn route_id(&self) -> &str {
        self.route.id()
    }

    pub fn route(&self) -> &RouteView {
        &self.route
    }

    pub fn state(&self) -> &MotionState {
        &self.state
    }

    pub fn speed_model(&self) -> &SpeedModel {
        &self.speed
    }

    pub fn at_segment_start(&self) -> bool {
        self.state.step == 0
    }

    /// Random delay before the first tick, so buses on a route are not in lockstep.
    pub fn draw_start_delay(&mut self) -> Duration {
        let jitter = self.config.start_jitter;
        if jitter.is_zero() {
            return Duration::ZERO;
        }
        jitter.mul_f64(self.rng.gen::<f64>())
    }

    /// How long to wait at the stop before this tick, if at all.
    pub fn draw_dwell(&mut self) -> Option<Duration> {
        let dwell = self.config.dwell;
        if !self.at_segment_start() || dwell.probability <= 0.0 {
            return None;
        }
        if !self.rng.gen_bool(dwell.probability) {
            return None;
        }
        let span = dwell.max.saturating_sub(dwell.min);
        Some(dwell.min + span.mul_f64(self.rng.gen::<f64>()))
    }

    /// Stationary update at the current segment's first stop.
    pub fn initial_update(&self, now: DateTime<Utc>, active_buses_on_route: u32) -> LocationUpdate {
        let (from, to) = self.route.segment(self.state.segment);
        LocationUpdate {
            bus_id: self.bus.id.clone(),
            route_id: self.route.id().to_string(),
            next_stop: to.name.clone(),
            timestamp: now,
            latitude: from.latitude,
            longitude: from.longitude,
            speed: 0.0,
            distance_remaining: 0.0,
            eta_seconds: 0.0,
            active_buses_on_route,
            weather: Weather::Clear,
        }
    }

    /// Advances the bus by one step and reports where it is.
    pub fn tick(&mut self, now: DateTime<Utc>, active_buses_on_route: u32) -> LocationUpdate {
        let steps = self.config.steps_per_segment;
        let tick_secs = self.config.tick_interval.as_secs_f64();
        let (from, to) = self.route.segment(self.state.segment);
        let (from, to) = (from.coordinate(), to.coordinate());
        let next_stop = self.route.next_stop(self.state.segment).name.clone();

        let progress = f64::from(self.state.step) / f64::from(steps);
        let position = interpolate(from, to, progress);
        let distance_remaining = haversine_m(position, to);
        let step_distance = self
            .state
            .last_position
            .map_or(0.0, |previous| haversine_m(previous, position));

        let local = now.with_timezone(&Local);
        let ctx = SpeedContext {
            step_distance_m: step_distance,
            tick_secs,
            distance_remaining_m: distance_remaining,
            time_left_secs: f64::from(steps.saturating_sub(self.state.step).max(1)) * tick_secs,
            at_segment_start: self.at_segment_start(),
            hour: local.hour(),
            weekday: local.weekday(),
        };
        let sample = self.speed.update(&ctx, &mut self.rng);
        let eta_seconds = distance_remaining / sample.speed.max(self.config.eta_speed_floor);
        let published = jitter(position, self.config.position_jitter_m, &mut self.rng);

        let update = LocationUpdate {
            bus_id: self.bus.id.clone(),
            route_id: self.route.id().to_string(),
            next_stop,
            timestamp: now,
            latitude: published.lat,
            longitude: published.lon,
            speed: sample.speed,
            distance_remaining,
            eta_seconds,
            active_buses_on_route,
            weather: sample.weather,
        };

        self.state.speed = sample.speed;
        self.state.last_position = Some(position);
        self.advance();
        update
    }

    fn advance(&mut self) {
        self.state.step += 1;
        if self.state.step > self.config.steps_per_segment {
            self.state.step = 0;
            self.state.segment = (self.state.segment + 1) % self.route.len();
        }
    }
}

/// 64-bit FNV-1a of the bus id, so a fixed seed gives the same per-bus
/// streams on every toolchain.
fn stream_id(bus_id: &str) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bus_id
        .bytes()
        .fold(OFFSET_BASIS, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(PRIME))
}

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn interpolate(self, other: Self, t: f64) -> Self {
        Self {
            lat: self.lat + (other.lat - self.lat) * t,
            lon: self.lon + (other.lon - self.lon) * t,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Position of the stop along its route, contiguous within a route.
    pub order: u32,
}

impl Stop {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate {
            lat: self.latitude,
            lon: self.longitude,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub id: String,
    pub route_no: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    pub stops: Vec<Stop>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bus {
    pub id: String,
    pub route_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_name: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weather {
    #[default]
    Clear,
    Rain,
}

impl Weather {
    pub fn as_str(self) -> &'static str {
        match self {
            Weather::Clear => "clear",
            Weather::Rain => "rain",
        }
    }
}

impl fmt::Display for Weather {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownWeather(pub String);

impl fmt::Display for UnknownWeather {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown weather state `{}`", self.0)
    }
}

impl std::error::Error for UnknownWeather {}

impl FromStr for Weather {
    type Err = UnknownWeather;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clear" => Ok(Weather::Clear),
            "rain" => Ok(Weather::Rain),
            other => Err(UnknownWeather(other.to_string())),
        }
    }
}

/// One sample of a bus's simulated motion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdate {
    pub bus_id: String,
    pub route_id: String,
    /// Name of the stop the bus is heading to.
    pub next_stop: String,
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    /// Meters per second.
    pub speed: f64,
    /// Meters to `next_stop`.
    pub distance_remaining: f64,
    pub eta_seconds: f64,
    pub active_buses_on_route: u32,
    #[serde(default)]
    pub weather: Weather,
}

impl LocationUpdate {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate {
            lat: self.latitude,
            lon: self.longitude,
        }
    }
}

/// A request to be texted when a bus gets close to a stop.
///
/// The two notification flags only ever go from `false` to `true`; there is
/// no way to clear them once set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: i64,
    pub phone: String,
    pub bus_id: String,
    pub stop_name: String,
    notified10: bool,
    notified5: bool,
}

impl Subscription {
    pub fn new(
        id: i64,
        phone: impl Into<String>,
        bus_id: impl Into<String>,
        stop_name: impl Into<String>,
    ) -> Self {
        Self::restore(id, phone, bus_id, stop_name, false, false)
    }

    /// Rebuilds a subscription from persisted state.
    pub fn restore(
        id: i64,
        phone: impl Into<String>,
        bus_id: impl Into<String>,
        stop_name: impl Into<String>,
        notified10: bool,
        notified5: bool,
    ) -> Self {
        Self {
            id,
            phone: phone.into(),
            bus_id: bus_id.into(),
            stop_name: stop_name.into(),
            notified10,
            notified5,
        }
    }

    pub fn notified10(&self) -> bool {
        self.notified10
    }

    pub fn notified5(&self) -> bool {
        self.notified5
    }

    pub fn mark_notified10(&mut self) {
        self.notified10 = true;
    }

    pub fn mark_notified5(&mut self) {
        self.notified5 = true;
    }

    /// Both alerts have gone out; nothing more will ever be sent.
    pub fn is_exhausted(&self) -> bool {
        self.notified10 && self.notified5
    }

    /// Keeps every flag already set on either side.
    pub fn merge_flags(&mut self, other: &Subscription) {
        self.notified10 |= other.notified10;
        self.notified5 |= other.notified5;
    }
}

/// Body of `POST /api/subscribe`. Fields are optional so that a missing one
/// can be reported as a client error instead of a deserialization failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    pub phone: Option<String>,
    pub bus_id: Option<String>,
    pub stop_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeResponse {
    pub success: bool,
    pub sub: Subscription,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolate_hits_both_endpoints() {
        let a = Coordinate::new(16.521, 80.611);
        let b = Coordinate::new(16.524, 80.619);
        assert_eq!(a.interpolate(b, 0.0), a);
        assert_eq!(a.interpolate(b, 1.0), b);
    }

    #[test]
    fn weather_round_trips_through_text() {
        assert_eq!("rain".parse::<Weather>(), Ok(Weather::Rain));
        assert_eq!(Weather::Clear.to_string(), "clear");
        assert!("snow".parse::<Weather>().is_err());
    }

    #[test]
    fn subscription_flags_only_accumulate() {
        let mut sub = Subscription::new(1, "+911234567890", "BUS201", "SWATHI");
        sub.mark_notified10();
        sub.merge_flags(&Subscription::new(1, "+911234567890", "BUS201", "SWATHI"));
        assert!(sub.notified10());
        assert!(!sub.notified5());
        assert!(!sub.is_exhausted());
        sub.mark_notified5();
        assert!(sub.is_exhausted());
    }

    #[test]
    fn update_uses_camel_case_on_the_wire() {
        let json = r#"{
            "busId": "BUS201",
            "routeId": "15A",
            "nextStop": "SWATHI",
            "timestamp": "2025-01-01T08:00:00Z",
            "latitude": 16.521,
            "longitude": 80.611,
            "speed": 0.0,
            "distanceRemaining": 0.0,
            "etaSeconds": 0.0,
            "activeBusesOnRoute": 2
        }"#;
        let update: LocationUpdate = serde_json::from_str(json).expect("valid update");
        assert_eq!(update.weather, Weather::Clear);
        assert_eq!(update.active_buses_on_route, 2);
    }
}

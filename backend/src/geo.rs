use rand::Rng;

use crate::models::Coordinate;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Length of one degree of latitude, close enough for meter-scale offsets.
const METERS_PER_DEGREE_LAT: f64 = 111_320.0;

/// Great-circle distance in meters.
pub fn haversine_m(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let sin_dlat = (dlat / 2.0).sin();
    let sin_dlon = (dlon / 2.0).sin();

    let h = (sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon).clamp(0.0, 1.0);
    2.0 * EARTH_RADIUS_M * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Point at `progress` along the straight line from `a` to `b`.
pub fn interpolate(a: Coordinate, b: Coordinate, progress: f64) -> Coordinate {
    a.interpolate(b, progress)
}

pub fn meters_to_lat_degrees(meters: f64) -> f64 {
    meters / METERS_PER_DEGREE_LAT
}

pub fn meters_to_lon_degrees(meters: f64, at_lat: f64) -> f64 {
    let scale = at_lat.to_radians().cos().abs().max(1e-6);
    meters / (METERS_PER_DEGREE_LAT * scale)
}

/// Displaces `coord` by a uniform offset of at most `amplitude_m` meters on
/// each axis. Only meant for published positions, never for distances.
pub fn jitter<R: Rng + ?Sized>(coord: Coordinate, amplitude_m: f64, rng: &mut R) -> Coordinate {
    if !amplitude_m.is_finite() || amplitude_m <= 0.0 {
        return coord;
    }
    let north = rng.gen_range(-amplitude_m..=amplitude_m);
    let east = rng.gen_range(-amplitude_m..=amplitude_m);
    Coordinate {
        lat: coord.lat + meters_to_lat_degrees(north),
        lon: coord.lon + meters_to_lon_degrees(east, coord.lat),
    }
}

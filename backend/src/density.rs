use std::{collections::HashSet, time::Duration};

use chrono::{DateTime, Utc};

use crate::{models::LocationUpdate, store::UpdateSink};

/// Counts distinct buses that reported on a route within a trailing window.
#[derive(Debug, Clone, Copy)]
pub struct DensityCounter {
    window: Duration,
}

impl DensityCounter {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match chrono::Duration::from_std(self.window) {
            Ok(window) => now - window,
            Err(_) => DateTime::<Utc>::MIN_UTC,
        }
    }

    /// Active buses on `route_id`, counting `bus_id` itself since it is
    /// reporting right now. A failed lookup degrades to that single bus.
    pub async fn active_buses_on_route<U: UpdateSink>(
        &self,
        sink: &U,
        route_id: &str,
        bus_id: &str,
        now: DateTime<Utc>,
    ) -> u32 {
        match sink
            .recent_distinct_bus_ids(route_id, self.window_start(now))
            .await
        {
            Ok(mut ids) => {
                ids.insert(bus_id.to_string());
                u32::try_from(ids.len()).unwrap_or(u32::MAX)
            }
            Err(err) => {
                tracing::warn!("density lookup for route {} failed: {}", route_id, err);
                1
            }
        }
    }
}

/// Bus ids with an update on `route_id` in `[since, now]`.
pub fn distinct_buses_in_window<'a>(
    updates: impl IntoIterator<Item = &'a LocationUpdate>,
    route_id: &str,
    since: DateTime<Utc>,
    now: DateTime<Utc>,
) -> HashSet<String> {
    updates
        .into_iter()
        .filter(|u| u.route_id == route_id && u.timestamp >= since && u.timestamp <= now)
        .map(|u| u.bus_id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::{memory::MemoryStore, models::Weather};

    fn at(bus_id: &str, route_id: &str, timestamp: DateTime<Utc>) -> LocationUpdate {
        LocationUpdate {
            bus_id: bus_id.to_string(),
            route_id: route_id.to_string(),
            next_stop: "BENZ CIRCLE".to_string(),
            timestamp,
            latitude: 16.544,
            longitude: 80.648,
            speed: 0.0,
            distance_remaining: 0.0,
            eta_seconds: 0.0,
            active_buses_on_route: 1,
            weather: Weather::Clear,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 4, 8, 30, 0).unwrap()
    }

    #[test]
    fn same_bus_twice_counts_once() {
        let now = now();
        let updates = [
            at("BUS201", "15A", now - chrono::Duration::seconds(30)),
            at("BUS201", "15A", now - chrono::Duration::seconds(10)),
        ];
        let counter = DensityCounter::new(Duration::from_secs(120));
        let ids = distinct_buses_in_window(&updates, "15A", counter.window_start(now), now);
        assert_eq!(ids.len(), 1);
    }

    #[test]
    fn window_edges_and_routes_are_respected() {
        let now = now();
        let updates = [
            at("BUS201", "15A", now - chrono::Duration::seconds(120)),
            at("BUS202", "15A", now - chrono::Duration::seconds(121)),
            at("BUS203", "15B", now - chrono::Duration::seconds(5)),
            at("BUS204", "15A", now + chrono::Duration::seconds(1)),
        ];
        let counter = DensityCounter::new(Duration::from_secs(120));
        let ids = distinct_buses_in_window(&updates, "15A", counter.window_start(now), now);
        assert_eq!(ids, HashSet::from(["BUS201".to_string()]));
    }

    #[tokio::test]
    async fn reporting_bus_counts_itself() {
        let store = MemoryStore::new();
        let counter = DensityCounter::new(Duration::from_secs(120));
        let count = counter
            .active_buses_on_route(&store, "15A", "BUS201", Utc::now())
            .await;
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn counts_other_recent_buses_on_the_route() {
        let store = MemoryStore::new();
        let now = Utc::now();
        for (bus, route) in [("BUS201", "15A"), ("BUS202", "15A"), ("BUS202", "15A"), ("BUS203", "15B")] {
            store
                .append_location_update(&at(bus, route, now - chrono::Duration::seconds(3)))
                .await
                .unwrap();
        }
        let counter = DensityCounter::new(Duration::from_secs(120));
        let count = counter
            .active_buses_on_route(&store, "15A", "BUS201", now)
            .await;
        assert_eq!(count, 2);
    }
}

use std::sync::Arc;

use crate::{
    geo::haversine_m,
    models::{Route, Stop},
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("route {0} needs at least two stops")]
    TooFewStops(String),
    #[error("route {route} skips or repeats a stop order before {stop}")]
    NonContiguousOrder { route: String, stop: String },
}

/// Read-only, cyclic view of a route's stops.
///
/// Buses never finish a trip: the stop after the last one is the first one.
#[derive(Debug, Clone)]
pub struct RouteView {
    id: String,
    stops: Arc<[Stop]>,
}

impl RouteView {
    pub fn new(route: &Route) -> Result<Self, RouteError> {
        if route.stops.len() < 2 {
            return Err(RouteError::TooFewStops(route.id.clone()));
        }

        let mut stops = route.stops.clone();
        stops.sort_by_key(|s| s.order);
        for pair in stops.windows(2) {
            if pair[1].order != pair[0].order + 1 {
                return Err(RouteError::NonContiguousOrder {
                    route: route.id.clone(),
                    stop: pair[1].name.clone(),
                });
            }
        }

        Ok(Self {
            id: route.id.clone(),
            stops: stops.into(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn len(&self) -> usize {
        self.stops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }

    pub fn stops_in_order(&self) -> &[Stop] {
        &self.stops
    }

    pub fn stop(&self, index: usize) -> &Stop {
        &self.stops[index % self.stops.len()]
    }

    pub fn next_stop(&self, index: usize) -> &Stop {
        self.stop(index + 1)
    }

    /// The stops bounding segment `index`.
    pub fn segment(&self, index: usize) -> (&Stop, &Stop) {
        (self.stop(index), self.next_stop(index))
    }

    pub fn segment_length_m(&self, index: usize) -> f64 {
        let (from, to) = self.segment(index);
        haversine_m(from.coordinate(), to.coordinate())
    }

    /// Length of one full lap, including the closing segment back to the first stop.
    pub fn loop_length_m(&self) -> f64 {
        (0..self.len()).map(|i| self.segment_length_m(i)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stop(name: &str, lat: f64, lon: f64, order: u32) -> Stop {
        Stop {
            name: name.to_string(),
            latitude: lat,
            longitude: lon,
            order,
        }
    }

    fn route(stops: Vec<Stop>) -> Route {
        Route {
            id: "5A".to_string(),
            route_no: 5,
            variant: Some("A".to_string()),
            stops,
        }
    }

    #[test]
    fn stops_come_back_sorted() {
        let view = RouteView::new(&route(vec![
            stop("PORANKI", 16.563, 80.675, 2),
            stop("AUTONAGAR", 16.553, 80.662, 1),
            stop("PATAMATA", 16.547, 80.655, 3),
        ]))
        .expect("valid route");

        let names: Vec<_> = view.stops_in_order().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["AUTONAGAR", "PORANKI", "PATAMATA"]);
    }

    #[test]
    fn next_stop_wraps_to_first() {
        let view = RouteView::new(&route(vec![
            stop("AUTONAGAR", 16.553, 80.662, 1),
            stop("PORANKI", 16.563, 80.675, 2),
            stop("PATAMATA", 16.547, 80.655, 3),
            stop("PENAMALURU", 16.497, 80.697, 4),
        ]))
        .expect("valid route");

        let last = view.len() - 1;
        assert_eq!(view.next_stop(last), &view.stops_in_order()[0]);
        assert_eq!(view.next_stop(0).name, "PORANKI");
        assert_eq!(view.segment(last).0.name, "PENAMALURU");
    }

    #[test]
    fn single_stop_route_is_rejected() {
        let err = RouteView::new(&route(vec![stop("AUTONAGAR", 16.553, 80.662, 1)])).unwrap_err();
        assert_eq!(err, RouteError::TooFewStops("5A".to_string()));
    }

    #[test]
    fn gap_in_order_is_rejected() {
        let err = RouteView::new(&route(vec![
            stop("AUTONAGAR", 16.553, 80.662, 1),
            stop("PATAMATA", 16.547, 80.655, 3),
        ]))
        .unwrap_err();
        assert!(matches!(err, RouteError::NonContiguousOrder { ref stop, .. } if stop == "PATAMATA"));
    }

    #[test]
    fn duplicate_order_is_rejected() {
        let err = RouteView::new(&route(vec![
            stop("AUTONAGAR", 16.553, 80.662, 1),
            stop("PORANKI", 16.563, 80.675, 1),
        ]))
        .unwrap_err();
        assert!(matches!(err, RouteError::NonContiguousOrder { .. }));
    }

    #[test]
    fn loop_length_includes_closing_segment() {
        let view = RouteView::new(&route(vec![
            stop("A", 0.0, 0.0, 1),
            stop("B", 0.0, 0.001, 2),
        ]))
        .expect("valid route");
        assert!((view.loop_length_m() - 2.0 * view.segment_length_m(0)).abs() < 1e-9);
    }
}

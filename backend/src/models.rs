pub use shared::{
    ApiError, Bus, Coordinate, LocationUpdate, Route, Stop, SubscribeRequest, SubscribeResponse,
    Subscription, Weather,
};

use std::{fs::File, io::Read, path::Path};

use serde::{Deserialize, Serialize};

/// Routes and buses to load into an empty store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedData {
    pub routes: Vec<Route>,
    pub buses: Vec<Bus>,
}

const BUNDLED_SEED: &str = include_str!("../data/seed.json");

impl SeedData {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SeedError> {
        let file = File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader(reader: impl Read) -> Result<Self, SeedError> {
        let seed: SeedData = serde_json::from_reader(reader)?;
        seed.check_references()?;
        Ok(seed)
    }

    /// The Vijayawada network the simulator ships with.
    pub fn bundled() -> Result<Self, SeedError> {
        Self::from_reader(BUNDLED_SEED.as_bytes())
    }

    fn check_references(&self) -> Result<(), SeedError> {
        for bus in &self.buses {
            if !self.routes.iter().any(|r| r.id == bus.route_id) {
                return Err(SeedError::UnknownRoute {
                    bus: bus.id.clone(),
                    route: bus.route_id.clone(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("failed to read seed file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid seed definition: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("bus {bus} references unknown route {route}")]
    UnknownRoute { bus: String, route: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_seed_loads() {
        let seed = SeedData::bundled().expect("bundled seed");
        assert_eq!(seed.routes.len(), 4);
        assert_eq!(seed.buses.len(), 8);
        assert!(seed.routes.iter().all(|r| r.stops.len() >= 2));
    }

    #[test]
    fn dangling_bus_is_rejected() {
        let json = r#"{"routes": [], "buses": [{"id": "BUS1", "routeId": "nope"}]}"#;
        let err = SeedData::from_reader(json.as_bytes()).unwrap_err();
        assert!(matches!(err, SeedError::UnknownRoute { .. }));
    }
}

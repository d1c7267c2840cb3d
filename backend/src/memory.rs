use std::{
    collections::{BTreeMap, HashMap, HashSet},
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    density::distinct_buses_in_window,
    error::StoreError,
    models::{Bus, LocationUpdate, Route, SeedData, Subscription},
    store::{RouteSource, SubscriptionStore, UpdateSink},
};

/// Process-local store used by tests and the `--demo` mode.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    /// Updates older than this, relative to the newest one, are dropped.
    retention: Option<Duration>,
}

#[derive(Debug, Default)]
struct Inner {
    routes: HashMap<String, Route>,
    buses: BTreeMap<String, Bus>,
    updates: Vec<LocationUpdate>,
    subscriptions: BTreeMap<i64, Subscription>,
    next_subscription_id: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            retention: Some(retention),
            ..Self::default()
        }
    }

    pub fn from_seed(seed: SeedData) -> Self {
        let store = Self::new();
        store.load_seed(seed);
        store
    }

    /// Loads routes and buses, replacing any with the same id.
    ///
    /// Only valid before the store is shared; it uses a non-blocking lock.
    pub fn load_seed(&self, seed: SeedData) {
        match self.inner.try_write() {
            Ok(mut inner) => {
                for route in seed.routes {
                    inner.routes.insert(route.id.clone(), route);
                }
                for bus in seed.buses {
                    inner.buses.insert(bus.id.clone(), bus);
                }
            }
            Err(_) => tracing::warn!("memory store is busy; seed data ignored"),
        }
    }

    pub async fn insert_route(&self, route: Route) {
        self.inner.write().await.routes.insert(route.id.clone(), route);
    }

    pub async fn insert_bus(&self, bus: Bus) {
        self.inner.write().await.buses.insert(bus.id.clone(), bus);
    }

    pub async fn updates(&self) -> Vec<LocationUpdate> {
        self.inner.read().await.updates.clone()
    }

    pub async fn updates_for(&self, bus_id: &str) -> Vec<LocationUpdate> {
        self.inner
            .read()
            .await
            .updates
            .iter()
            .filter(|u| u.bus_id == bus_id)
            .cloned()
            .collect()
    }

    pub async fn subscription(&self, id: i64) -> Option<Subscription> {
        self.inner.read().await.subscriptions.get(&id).cloned()
    }
}

impl RouteSource for MemoryStore {
    async fn list_buses(&self) -> Result<Vec<Bus>, StoreError> {
        Ok(self.inner.read().await.buses.values().cloned().collect())
    }

    async fn route_for_bus(&self, bus_id: &str) -> Result<Route, StoreError> {
        let inner = self.inner.read().await;
        let bus = inner
            .buses
            .get(bus_id)
            .ok_or_else(|| StoreError::BusNotFound(bus_id.to_string()))?;
        inner
            .routes
            .get(&bus.route_id)
            .cloned()
            .ok_or_else(|| StoreError::RouteNotFound(bus_id.to_string()))
    }
}

impl UpdateSink for MemoryStore {
    async fn append_location_update(&self, update: &LocationUpdate) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.updates.push(update.clone());

        if let Some(retention) = self.retention.and_then(|r| chrono::Duration::from_std(r).ok()) {
            let cutoff = update.timestamp - retention;
            inner.updates.retain(|u| u.timestamp >= cutoff);
        }
        Ok(())
    }

    async fn recent_distinct_bus_ids(
        &self,
        route_id: &str,
        since: DateTime<Utc>,
    ) -> Result<HashSet<String>, StoreError> {
        let inner = self.inner.read().await;
        Ok(distinct_buses_in_window(
            &inner.updates,
            route_id,
            since,
            DateTime::<Utc>::MAX_UTC,
        ))
    }

    async fn latest_location(&self, bus_id: &str) -> Result<Option<LocationUpdate>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .updates
            .iter()
            .filter(|u| u.bus_id == bus_id)
            .max_by_key(|u| u.timestamp)
            .cloned())
    }

    async fn location_history(&self) -> Result<Vec<LocationUpdate>, StoreError> {
        let mut history = self.inner.read().await.updates.clone();
        history.sort_by_key(|u| u.timestamp);
        Ok(history)
    }
}

impl SubscriptionStore for MemoryStore {
    async fn create_subscription(
        &self,
        phone: &str,
        bus_id: &str,
        stop_name: &str,
    ) -> Result<Subscription, StoreError> {
        let mut inner = self.inner.write().await;
        inner.next_subscription_id += 1;
        let subscription = Subscription::new(inner.next_subscription_id, phone, bus_id, stop_name);
        inner
            .subscriptions
            .insert(subscription.id, subscription.clone());
        Ok(subscription)
    }

    async fn find_subscriptions(
        &self,
        bus_id: &str,
        stop_name: &str,
    ) -> Result<Vec<Subscription>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .subscriptions
            .values()
            .filter(|s| s.bus_id == bus_id && s.stop_name == stop_name)
            .cloned()
            .collect())
    }

    async fn save_subscription(&self, subscription: &Subscription) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .subscriptions
            .get_mut(&subscription.id)
            .ok_or(StoreError::SubscriptionNotFound(subscription.id))?;
        stored.merge_flags(subscription);
        Ok(())
    }
}

use std::{collections::HashSet, future::Future};

use chrono::{DateTime, Utc};

use crate::{
    error::{AlertError, StoreError},
    models::{Bus, LocationUpdate, Route, Subscription},
};

/// Where buses and their routes come from. Read-only to the simulator.
pub trait RouteSource: Send + Sync {
    fn list_buses(&self) -> impl Future<Output = Result<Vec<Bus>, StoreError>> + Send;

    fn route_for_bus(&self, bus_id: &str) -> impl Future<Output = Result<Route, StoreError>> + Send;
}

/// Append-only history of simulated positions.
pub trait UpdateSink: Send + Sync {
    fn append_location_update(
        &self,
        update: &LocationUpdate,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Buses that reported on `route_id` at or after `since`.
    fn recent_distinct_bus_ids(
        &self,
        route_id: &str,
        since: DateTime<Utc>,
    ) -> impl Future<Output = Result<HashSet<String>, StoreError>> + Send;

    fn latest_location(
        &self,
        bus_id: &str,
    ) -> impl Future<Output = Result<Option<LocationUpdate>, StoreError>> + Send;

    /// Every stored update, oldest first.
    fn location_history(&self) -> impl Future<Output = Result<Vec<LocationUpdate>, StoreError>> + Send;
}

pub trait SubscriptionStore: Send + Sync {
    fn create_subscription(
        &self,
        phone: &str,
        bus_id: &str,
        stop_name: &str,
    ) -> impl Future<Output = Result<Subscription, StoreError>> + Send;

    fn find_subscriptions(
        &self,
        bus_id: &str,
        stop_name: &str,
    ) -> impl Future<Output = Result<Vec<Subscription>, StoreError>> + Send;

    /// Persists the notification flags. Flags already set in the store stay set.
    fn save_subscription(
        &self,
        subscription: &Subscription,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Outbound text messages. Fire and forget: callers log failures and move on.
pub trait AlertSink: Send + Sync {
    fn send_alert(
        &self,
        phone: &str,
        message: &str,
    ) -> impl Future<Output = Result<(), AlertError>> + Send;
}

/// Everything the simulator and the HTTP API read from and write to.
pub trait Store: RouteSource + UpdateSink + SubscriptionStore + 'static {}

impl<T> Store for T where T: RouteSource + UpdateSink + SubscriptionStore + 'static {}

pub mod config;
pub mod database;
pub mod density;
pub mod error;
pub mod export;
pub mod geo;
pub mod handlers;
pub mod memory;
pub mod models;
pub mod notify;
pub mod route;
pub mod scheduler;
pub mod simulation;
pub mod sms;
pub mod speed;
pub mod store;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use crate::store::Store;

pub struct AppState<S> {
    pub store: Arc<S>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

pub fn create_router<S: Store>(state: AppState<S>) -> Router {
    Router::new()
        .route("/api/subscribe", post(handlers::subscribe::<S>))
        .route("/api/locations/:bus_id", get(handlers::latest_location::<S>))
        .route("/api/buses", get(handlers::list_buses::<S>))
        .with_state(state)
}

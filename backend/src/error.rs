use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("bus {0} not found")]
    BusNotFound(String),
    #[error("no route found for bus {0}")]
    RouteNotFound(String),
    #[error("subscription {0} not found")]
    SubscriptionNotFound(i64),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid stored data: {0}")]
    InvalidData(String),
}

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("sms request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("sms provider rejected the message ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("alert sink unavailable: {0}")]
    Unavailable(String),
}

/// Why a bus could not be put on the road.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Route(#[from] crate::route::RouteError),
}

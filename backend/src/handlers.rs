// Handlers for the bus tracking API

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use crate::{
    AppState,
    error::StoreError,
    models::{ApiError, Bus, LocationUpdate, SubscribeRequest, SubscribeResponse},
    store::Store,
};

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

/// POST /api/subscribe - Ask for SMS alerts as a bus approaches a stop
pub async fn subscribe<S: Store>(
    State(state): State<AppState<S>>,
    Json(req): Json<SubscribeRequest>,
) -> ApiResult<SubscribeResponse> {
    let (Some(phone), Some(bus_id), Some(stop_name)) = (
        required(req.phone),
        required(req.bus_id),
        required(req.stop_name),
    ) else {
        return Err(bad_request("phone, busId and stopName are required"));
    };

    let sub = state
        .store
        .create_subscription(&phone, &bus_id, &stop_name)
        .await
        .map_err(store_error_to_api_error)?;

    tracing::info!("subscription {} for bus {} at {}", sub.id, bus_id, stop_name);
    Ok(Json(SubscribeResponse { success: true, sub }))
}

/// GET /api/locations/:bus_id - Latest simulated location of a bus
pub async fn latest_location<S: Store>(
    State(state): State<AppState<S>>,
    Path(bus_id): Path<String>,
) -> ApiResult<LocationUpdate> {
    state
        .store
        .latest_location(&bus_id)
        .await
        .map_err(store_error_to_api_error)?
        .map(Json)
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ApiError {
                    message: format!("No location found for bus {bus_id}"),
                }),
            )
        })
}

/// GET /api/buses - All buses the simulator knows about
pub async fn list_buses<S: Store>(State(state): State<AppState<S>>) -> ApiResult<Vec<Bus>> {
    state
        .store
        .list_buses()
        .await
        .map(Json)
        .map_err(store_error_to_api_error)
}

fn required(field: Option<String>) -> Option<String> {
    field.filter(|value| !value.trim().is_empty())
}

fn bad_request(message: &str) -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiError {
            message: message.to_string(),
        }),
    )
}

/// Convert StoreError to API error response
fn store_error_to_api_error(err: StoreError) -> (StatusCode, Json<ApiError>) {
    let status = match &err {
        StoreError::BusNotFound(_)
        | StoreError::RouteNotFound(_)
        | StoreError::SubscriptionNotFound(_) => StatusCode::NOT_FOUND,
        StoreError::InvalidData(_) => StatusCode::INTERNAL_SERVER_ERROR,
        StoreError::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    tracing::error!("request failed: {}", err);

    (
        status,
        Json(ApiError {
            message: err.to_string(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_fields_count_as_missing() {
        assert_eq!(required(Some("  ".to_string())), None);
        assert_eq!(required(None), None);
        assert_eq!(required(Some("BUS201".to_string())), Some("BUS201".to_string()));
    }

    #[test]
    fn unknown_entities_map_to_not_found() {
        let (status, body) = store_error_to_api_error(StoreError::BusNotFound("BUS9".to_string()));
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.message.contains("BUS9"));
    }
}

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::extractors::CurrentUser,
    error::{AppError, AppResult},
    rides::{
        dto::{
            AcceptRideRequest, BookRideRequest, EstimateRequest, EstimateResponse, Pagination,
            RateRideRequest, SearchQuery,
        },
        fare::estimate_fare,
        query::RideView,
        repo_types::Ride,
    },
    state::AppState,
};

pub fn ride_routes() -> Router<AppState> {
    Router::new()
        .route("/rides", post(book_ride).get(list_rides))
        .route("/rides/estimate", post(estimate))
        .route("/rides/available", get(available_rides))
        .route("/rides/search", get(search_rides))
        .route("/rides/history/:role/:user_id", get(history))
        .route("/rides/active/:role/:user_id", get(active_ride))
        .route("/rides/:id", get(get_ride).delete(delete_ride))
        .route("/rides/:id/accept", post(accept_ride))
        .route("/rides/:id/start", post(start_ride))
        .route("/rides/:id/complete", post(complete_ride))
        .route("/rides/:id/cancel", post(cancel_ride))
        .route("/rides/:id/rate", post(rate_ride))
}

#[instrument(skip(state, _caller, payload))]
pub async fn book_ride(
    State(state): State<AppState>,
    _caller: CurrentUser,
    Json(payload): Json<BookRideRequest>,
) -> AppResult<(StatusCode, Json<Ride>)> {
    let ride = state.rides.book(payload.into()).await?;
    Ok((StatusCode::CREATED, Json(ride)))
}

#[instrument(skip(state, caller, payload))]
pub async fn accept_ride(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path(id): Path<i64>,
    payload: Option<Json<AcceptRideRequest>>,
) -> AppResult<Json<Ride>> {
    let driver_id = payload
        .and_then(|Json(p)| p.driver_id)
        .or(caller.driver.map(|d| d.id))
        .ok_or_else(|| AppError::Validation("Driver ID is required".into()))?;
    Ok(Json(state.rides.accept(id, driver_id).await?))
}

#[instrument(skip(state, _caller))]
pub async fn start_ride(
    State(state): State<AppState>,
    _caller: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Json<Ride>> {
    Ok(Json(state.rides.start(id).await?))
}

#[instrument(skip(state, _caller))]
pub async fn complete_ride(
    State(state): State<AppState>,
    _caller: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Json<Ride>> {
    Ok(Json(state.rides.complete(id).await?))
}

#[instrument(skip(state, _caller))]
pub async fn cancel_ride(
    State(state): State<AppState>,
    _caller: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Json<Ride>> {
    Ok(Json(state.rides.cancel(id).await?))
}

#[instrument(skip(state, _caller, payload))]
pub async fn rate_ride(
    State(state): State<AppState>,
    _caller: CurrentUser,
    Path(id): Path<i64>,
    Json(payload): Json<RateRideRequest>,
) -> AppResult<Json<Ride>> {
    let ride = state
        .rides
        .rate(id, payload.rating, payload.comment)
        .await?;
    Ok(Json(ride))
}

pub async fn get_ride(
    State(state): State<AppState>,
    _caller: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Json<RideView>> {
    Ok(Json(state.queries.ride_by_id(id).await?))
}

#[instrument(skip(state, _caller))]
pub async fn history(
    State(state): State<AppState>,
    _caller: CurrentUser,
    Path((role, user_id)): Path<(String, i64)>,
    Query(p): Query<Pagination>,
) -> AppResult<Json<Vec<RideView>>> {
    let rides = state.queries.history(&role, user_id, p.into_page()).await?;
    Ok(Json(rides))
}

#[instrument(skip(state, _caller))]
pub async fn active_ride(
    State(state): State<AppState>,
    _caller: CurrentUser,
    Path((role, user_id)): Path<(String, i64)>,
) -> AppResult<Json<Option<RideView>>> {
    Ok(Json(state.queries.active_ride(&role, user_id).await?))
}

pub async fn available_rides(
    State(state): State<AppState>,
    _caller: CurrentUser,
) -> AppResult<Json<Vec<RideView>>> {
    Ok(Json(state.queries.available_rides().await?))
}

#[instrument(skip(state, _caller))]
pub async fn search_rides(
    State(state): State<AppState>,
    _caller: CurrentUser,
    Query(q): Query<SearchQuery>,
) -> AppResult<Json<Vec<RideView>>> {
    Ok(Json(state.queries.search(&q.q).await?))
}

pub async fn list_rides(
    State(state): State<AppState>,
    caller: CurrentUser,
) -> AppResult<Json<Vec<RideView>>> {
    caller.require_admin()?;
    Ok(Json(state.queries.all_rides().await?))
}

#[instrument(skip(state, caller))]
pub async fn delete_ride(
    State(state): State<AppState>,
    caller: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    caller.require_admin()?;
    state.queries.delete_ride(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn estimate(Json(payload): Json<EstimateRequest>) -> AppResult<Json<EstimateResponse>> {
    let fare = estimate_fare(payload.distance, payload.duration, payload.ride_type)?;
    Ok(Json(EstimateResponse {
        estimated_fare: fare,
        ride_type: payload.ride_type,
    }))
}

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tracing::instrument;

use crate::{
    auth::{extractors::CurrentUser, repo_types::Role},
    drivers::repo_types::Driver,
    error::{AppError, AppResult},
    rides::query::Earnings,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub available: bool,
}

pub fn driver_routes() -> Router<AppState> {
    Router::new()
        .route("/drivers/available", get(available_drivers))
        .route("/drivers/:id", get(get_driver))
        .route("/drivers/:id/availability", post(set_availability))
        .route("/drivers/:id/earnings", get(earnings))
}

pub async fn available_drivers(
    State(state): State<AppState>,
    _caller: CurrentUser,
) -> AppResult<Json<Vec<Driver>>> {
    Ok(Json(state.drivers.available_drivers().await?))
}

pub async fn get_driver(
    State(state): State<AppState>,
    _caller: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Json<Driver>> {
    Ok(Json(state.drivers.get_driver(id).await?))
}

/// Drivers toggle themselves; admins may toggle anyone.
#[instrument(skip(state, caller))]
pub async fn set_availability(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path(id): Path<i64>,
    Query(q): Query<AvailabilityQuery>,
) -> AppResult<Json<Driver>> {
    let own = caller.driver.as_ref().map(|d| d.id) == Some(id);
    if !own && caller.user.role != Role::Admin {
        return Err(AppError::Forbidden);
    }
    Ok(Json(state.rides.set_driver_availability(id, q.available).await?))
}

pub async fn earnings(
    State(state): State<AppState>,
    _caller: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Json<Earnings>> {
    Ok(Json(state.queries.driver_earnings(id).await?))
}

mod dto;
pub mod fare;
pub mod handlers;
pub mod lifecycle;
pub mod query;
pub mod repo_types;

use crate::state::AppState;
use axum::Router;

pub fn router() -> Router<AppState> {
    handlers::ride_routes()
}

pub mod api;
pub mod health;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(api::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

//! Route modules organized by concern.

use axum::Router;

use crate::state::AppState;

pub mod events;
pub mod health;
pub mod reconcile;
pub mod retention;
pub mod rollups;

/// Returns the full application router, without middleware or state.
pub fn router() -> Router<AppState> {
    Router::new().merge(health::router()).nest(
        "/api/v1",
        Router::new()
            .nest("/events", events::router())
            .nest("/rollups", rollups::router())
            .nest("/retention", retention::router())
            .nest("/reconcile", reconcile::router()),
    )
}

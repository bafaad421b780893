use crate::models::AppState;
use axum::Router;

pub mod campaign_routes;
pub mod home_routes;
pub mod patient_routes;
pub mod template_routes;
pub mod wish_routes;

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", patient_routes::router())
        .nest("/api/v1", template_routes::router())
        .nest("/api/v1", wish_routes::router())
        .nest("/api/v1", campaign_routes::router())
        .merge(home_routes::router())
        .with_state(state)
}

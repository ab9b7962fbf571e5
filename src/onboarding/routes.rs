//! Read-only REST endpoints for health and stored profiles.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::store::ProfileStore;

/// Shared state for profile routes.
#[derive(Clone)]
pub struct ProfileRouteState {
    pub profiles: ProfileStore,
}

/// GET /healthz
///
/// 200 with the profile count when the store answers, 503 otherwise.
async fn healthz(State(state): State<ProfileRouteState>) -> impl IntoResponse {
    match state.profiles.count_profiles().await {
        Ok(count) => (
            StatusCode::OK,
            Json(serde_json::json!({"status": "ok", "profiles": count})),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"status": "unavailable", "error": e.to_string()})),
            )
        }
    }
}

/// GET /api/profiles/{user_id}
///
/// Returns the stored profile, or 404 if the user has none.
async fn get_profile(
    State(state): State<ProfileRouteState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    match state.profiles.get_profile(&user_id).await {
        Ok(Some(profile)) => Json(serde_json::to_value(profile).unwrap_or_default()).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "No profile for this user"})),
        )
            .into_response(),
        Err(e) => {
            tracing::warn!(user_id, error = %e, "Profile lookup failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}

/// Build the profile REST routes.
pub fn profile_routes(state: ProfileRouteState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/profiles/{user_id}", get(get_profile))
        .with_state(state)
}

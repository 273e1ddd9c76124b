use axum::{Json, Router, extract::State, routing::get};

use crate::error::ApiError;
use crate::middleware::auth_context::AuthContext;
use crate::models::AppState;

#[derive(serde::Serialize)]
pub struct HomeResponse {
    pub data: HomeData,
}

#[derive(serde::Serialize)]
pub struct HomeData {
    pub view: String,
    pub clinic_name: String,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/home", get(home))
}

/// Tells the frontend which dashboard to render.
/// Roles (vet_user.roles): 0 client, 1 doctor, 2 secretary.
pub async fn home(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<HomeResponse>, ApiError> {
    let view = match auth.role {
        1 => "doctor",
        2 => "secretary",
        0 => "client",
        _ => "unknown",
    };

    Ok(Json(HomeResponse {
        data: HomeData {
            view: view.to_string(),
            clinic_name: state.clinic.name.clone(),
        },
    }))
}

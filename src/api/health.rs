use axum::{extract::State, response::IntoResponse, Json};

use crate::AppState;

pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "chains": state.config.supported_chains(),
        "default_chain": state.config.default_chain,
        "time": chrono::Utc::now().to_rfc3339(),
    }))
}

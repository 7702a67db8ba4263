use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::house;
use crate::state::AppState;

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Uptime ping for external watchdogs.
pub async fn keepalive(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "bot_version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

pub async fn detailed_health(State(state): State<AppState>) -> Json<Value> {
    let db_healthy = sqlx::query("SELECT 1").fetch_one(&state.db).await.is_ok();

    let house_health = if db_healthy {
        match house::health(&state.db).await {
            Ok(h) => format!("{:?}", h).to_ascii_lowercase(),
            Err(_) => "unknown".to_string(),
        }
    } else {
        "unknown".to_string()
    };

    Json(json!({
        "status": if db_healthy { "healthy" } else { "degraded" },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "components": {
            "database": if db_healthy { "healthy" } else { "unhealthy" },
            "house": house_health,
        }
    }))
}

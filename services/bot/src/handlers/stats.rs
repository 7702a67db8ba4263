use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::errors::Result;
use crate::house;
use crate::state::AppState;

/// Public aggregate stats plus the house book.
pub async fn stats(State(state): State<AppState>) -> Result<Json<Value>> {
    let global = state.history.global_stats().await?;
    let house = house::fetch(&state.db).await?;
    let liabilities = state.users.total_player_balance().await?;

    Ok(Json(json!({
        "users": global.total_users,
        "games_played": global.total_games,
        "total_wagered": global.total_wagered,
        "total_won": global.total_won,
        "house": {
            "balance": house.balance,
            "player_liabilities": liabilities,
            "games_today": house.games_played_today,
            "revenue_today": house.revenue_today,
            "profit_today": house.profit_today,
        }
    })))
}

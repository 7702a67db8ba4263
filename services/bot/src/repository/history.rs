//! Read-side queries over the ledger and game history.

use shared::Cents;
use sqlx::SqlitePool;

use crate::domain::{GameSession, LedgerTx, UserId};
use crate::errors::Result;

#[derive(Clone)]
pub struct HistoryRepository {
    db: SqlitePool,
}

/// Aggregates behind the /stats surface.
#[derive(Debug, Clone)]
pub struct GlobalStats {
    pub total_users: i64,
    pub total_games: i64,
    pub total_wagered: Cents,
    pub total_won: Cents,
}

impl HistoryRepository {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn recent_transactions(&self, user_id: UserId, limit: i64) -> Result<Vec<LedgerTx>> {
        let rows = sqlx::query_as::<_, LedgerTx>(
            "SELECT * FROM transactions
             WHERE user_id = ?1
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    pub async fn recent_sessions(&self, user_id: UserId, limit: i64) -> Result<Vec<GameSession>> {
        let rows = sqlx::query_as::<_, GameSession>(
            "SELECT * FROM game_sessions
             WHERE user_id = ?1
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    pub async fn find_session(&self, session_id: &str) -> Result<Option<GameSession>> {
        let row = sqlx::query_as::<_, GameSession>("SELECT * FROM game_sessions WHERE id = ?1")
            .bind(session_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(row)
    }

    pub async fn global_stats(&self) -> Result<GlobalStats> {
        let (total_users,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&self.db)
            .await?;
        let (total_games, wagered, won): (i64, Option<i64>, Option<i64>) = sqlx::query_as(
            "SELECT COUNT(*), SUM(bet_amount), SUM(win_amount) FROM game_sessions",
        )
        .fetch_one(&self.db)
        .await?;

        Ok(GlobalStats {
            total_users,
            total_games,
            total_wagered: Cents::new(wagered.unwrap_or(0)),
            total_won: Cents::new(won.unwrap_or(0)),
        })
    }
}

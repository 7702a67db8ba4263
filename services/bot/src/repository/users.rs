//! User repository: account rows, referral linkage, moderation flags.
//! Balances are never written here; that is the ledger's job.

use chrono::Utc;
use shared::Cents;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::{User, UserId};
use crate::errors::{AppError, Result};

#[derive(Clone)]
pub struct UserRepository {
    db: SqlitePool,
}

impl UserRepository {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Fetch the account, creating it on first contact. New accounts get a
    /// fresh referral code and a zero balance.
    pub async fn get_or_create(&self, user_id: UserId, display_name: &str) -> Result<User> {
        let now = Utc::now();
        let referral_code = Uuid::new_v4().simple().to_string()[..8].to_string();

        sqlx::query(
            "INSERT INTO users (id, display_name, referral_code, created_at, last_active)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(id) DO UPDATE SET
                 display_name = excluded.display_name,
                 last_active = excluded.last_active",
        )
        .bind(user_id)
        .bind(display_name)
        .bind(&referral_code)
        .bind(now)
        .execute(&self.db)
        .await?;

        self.find(user_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("User {} not found after upsert", user_id)))
    }

    pub async fn find(&self, user_id: UserId) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?1")
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    pub async fn find_by_referral_code(&self, code: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE referral_code = ?1")
            .bind(code)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    /// Link a referrer; first link wins, self-referrals are ignored.
    pub async fn set_referrer(&self, user_id: UserId, referrer_id: UserId) -> Result<bool> {
        if user_id == referrer_id {
            return Ok(false);
        }
        let result = sqlx::query(
            "UPDATE users SET referred_by = ?1 WHERE id = ?2 AND referred_by IS NULL",
        )
        .bind(referrer_id)
        .bind(user_id)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_banned(&self, user_id: UserId, banned: bool) -> Result<()> {
        sqlx::query("UPDATE users SET banned = ?1 WHERE id = ?2")
            .bind(banned)
            .bind(user_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// How many accounts this user has referred.
    pub async fn count_referred(&self, user_id: UserId) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE referred_by = ?1")
            .bind(user_id)
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }

    /// Total player liabilities, for solvency reporting.
    pub async fn total_player_balance(&self) -> Result<Cents> {
        let total: Option<i64> = sqlx::query_scalar("SELECT SUM(balance) FROM users")
            .fetch_one(&self.db)
            .await?;
        Ok(Cents::new(total.unwrap_or(0)))
    }
}

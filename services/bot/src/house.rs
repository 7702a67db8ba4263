//! House accountant
//!
//! Maintains the single house bookkeeping row. Every mutation happens
//! inside the ledger transaction that produced the player-side row, so the
//! aggregate can never drift from the sum of ledger rows.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use shared::Cents;
use sqlx::{SqliteConnection, SqlitePool};
use std::time::Duration;

use crate::domain::HouseAggregate;
use crate::errors::Result;

/// House balance below this is a warning ($1,000).
pub const WARNING_THRESHOLD: Cents = Cents::from_dollars(1_000);

/// House balance below this is critical ($100).
pub const CRITICAL_THRESHOLD: Cents = Cents::from_dollars(100);

/// Rolling-window payout ratio above this is a warning.
pub const PAYOUT_RATIO_WARNING: f64 = 0.98;

/// Mirror of a ledger row from the operator's perspective.
#[derive(Debug, Clone, Copy)]
pub enum HouseEffect {
    /// Player bet debited: the stake moves to the house.
    Bet(Cents),
    /// Player win credited: paid out of the house.
    Win(Cents),
    /// Deposit credited to a player: backing funds arrive at the house.
    Deposit(Cents),
    /// Withdrawal debited from a player; the house pays out net of fee.
    Withdrawal { amount: Cents, fee: Cents },
    /// Compensating reversal of a failed withdrawal.
    WithdrawalReversal { amount: Cents, fee: Cents },
    /// Bonus or referral commission credited to a player.
    Bonus(Cents),
    /// Admin adjustment of a player balance; costs the house the delta.
    Adjust(Cents),
    /// Direct house bankroll operation, no player side.
    Operation(Cents),
}

/// Apply one effect inside the caller's transaction.
pub async fn apply(conn: &mut SqliteConnection, effect: HouseEffect) -> sqlx::Result<()> {
    let now = Utc::now();
    match effect {
        HouseEffect::Bet(bet) => {
            sqlx::query(
                "UPDATE house SET balance = balance + ?1,
                     total_player_losses = total_player_losses + ?1,
                     revenue_today = revenue_today + ?1,
                     profit_today = profit_today + ?1,
                     last_updated = ?2
                 WHERE id = 1",
            )
            .bind(bet)
            .bind(now)
            .execute(conn)
            .await?;
        }
        HouseEffect::Win(win) => {
            sqlx::query(
                "UPDATE house SET balance = balance - ?1,
                     total_player_wins = total_player_wins + ?1,
                     profit_today = profit_today - ?1,
                     last_updated = ?2
                 WHERE id = 1",
            )
            .bind(win)
            .bind(now)
            .execute(conn)
            .await?;
        }
        HouseEffect::Deposit(amount) => {
            sqlx::query(
                "UPDATE house SET balance = balance + ?1,
                     total_deposits = total_deposits + ?1,
                     last_updated = ?2
                 WHERE id = 1",
            )
            .bind(amount)
            .bind(now)
            .execute(conn)
            .await?;
        }
        HouseEffect::Withdrawal { amount, fee } => {
            sqlx::query(
                "UPDATE house SET balance = balance - (?1 - ?2),
                     total_withdrawals = total_withdrawals + ?1,
                     total_fees_collected = total_fees_collected + ?2,
                     last_updated = ?3
                 WHERE id = 1",
            )
            .bind(amount)
            .bind(fee)
            .bind(now)
            .execute(conn)
            .await?;
        }
        HouseEffect::WithdrawalReversal { amount, fee } => {
            sqlx::query(
                "UPDATE house SET balance = balance + (?1 - ?2),
                     total_withdrawals = total_withdrawals - ?1,
                     total_fees_collected = total_fees_collected - ?2,
                     last_updated = ?3
                 WHERE id = 1",
            )
            .bind(amount)
            .bind(fee)
            .bind(now)
            .execute(conn)
            .await?;
        }
        HouseEffect::Bonus(amount) => {
            sqlx::query(
                "UPDATE house SET balance = balance - ?1,
                     total_bonuses_paid = total_bonuses_paid + ?1,
                     last_updated = ?2
                 WHERE id = 1",
            )
            .bind(amount)
            .bind(now)
            .execute(conn)
            .await?;
        }
        HouseEffect::Adjust(delta) => {
            sqlx::query(
                "UPDATE house SET balance = balance - ?1, last_updated = ?2 WHERE id = 1",
            )
            .bind(delta)
            .bind(now)
            .execute(conn)
            .await?;
        }
        HouseEffect::Operation(delta) => {
            sqlx::query(
                "UPDATE house SET balance = balance + ?1, last_updated = ?2 WHERE id = 1",
            )
            .bind(delta)
            .bind(now)
            .execute(conn)
            .await?;
        }
    }
    Ok(())
}

/// Bump the per-day game counter; called when a session row is inserted.
pub async fn record_game(conn: &mut SqliteConnection) -> sqlx::Result<()> {
    sqlx::query(
        "UPDATE house SET games_played_today = games_played_today + 1, last_updated = ?1
         WHERE id = 1",
    )
    .bind(Utc::now())
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn fetch(pool: &SqlitePool) -> Result<HouseAggregate> {
    let row = sqlx::query_as::<_, HouseAggregate>("SELECT * FROM house WHERE id = 1")
        .fetch_one(pool)
        .await?;
    Ok(row)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HouseHealth {
    Ok,
    Warning,
    Critical,
}

/// On-demand health check: bankroll thresholds plus a 24h payout ratio.
pub async fn health(pool: &SqlitePool) -> Result<HouseHealth> {
    let house = fetch(pool).await?;
    if house.balance < CRITICAL_THRESHOLD {
        return Ok(HouseHealth::Critical);
    }

    let since = Utc::now() - ChronoDuration::hours(24);
    let (wagered, won): (Option<i64>, Option<i64>) = sqlx::query_as(
        "SELECT SUM(bet_amount), SUM(win_amount) FROM game_sessions WHERE created_at > ?1",
    )
    .bind(since)
    .fetch_one(pool)
    .await?;

    let wagered = wagered.unwrap_or(0);
    let won = won.unwrap_or(0);
    let payout_ratio = if wagered > 0 {
        won as f64 / wagered as f64
    } else {
        0.0
    };

    if house.balance < WARNING_THRESHOLD || payout_ratio > PAYOUT_RATIO_WARNING {
        Ok(HouseHealth::Warning)
    } else {
        Ok(HouseHealth::Ok)
    }
}

/// Idempotent reset of the daily counters at the UTC midnight boundary.
///
/// The `last_daily_reset < boundary` guard makes re-entry harmless.
pub async fn reset_daily_if_due(pool: &SqlitePool) -> Result<bool> {
    let boundary: DateTime<Utc> = Utc::now()
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is a valid time")
        .and_utc();

    let result = sqlx::query(
        "UPDATE house SET games_played_today = 0, revenue_today = 0, profit_today = 0,
             last_daily_reset = ?1, last_updated = ?1
         WHERE id = 1 AND last_daily_reset < ?1",
    )
    .bind(boundary)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Periodic task driving the daily reset.
pub async fn run_daily_reset(pool: SqlitePool) {
    let mut ticker = tokio::time::interval(Duration::from_secs(60));
    loop {
        ticker.tick().await;
        match reset_daily_if_due(&pool).await {
            Ok(true) => tracing::info!("Daily house counters reset"),
            Ok(false) => {}
            Err(e) => tracing::error!(error = %e, "Daily reset failed"),
        }
    }
}

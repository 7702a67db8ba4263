//! Sqlite pool bootstrap and embedded schema
//!
//! The schema is applied idempotently at startup; every statement is
//! `CREATE ... IF NOT EXISTS`, so restarts and tests share one path.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY,
        display_name TEXT NOT NULL DEFAULT '',
        balance INTEGER NOT NULL DEFAULT 0,
        games_played INTEGER NOT NULL DEFAULT 0,
        total_wagered INTEGER NOT NULL DEFAULT 0,
        total_won INTEGER NOT NULL DEFAULT 0,
        total_deposited INTEGER NOT NULL DEFAULT 0,
        total_withdrawn INTEGER NOT NULL DEFAULT 0,
        current_win_streak INTEGER NOT NULL DEFAULT 0,
        max_win_streak INTEGER NOT NULL DEFAULT 0,
        biggest_win INTEGER NOT NULL DEFAULT 0,
        referral_code TEXT,
        referred_by INTEGER,
        last_bonus_claim TEXT,
        banned INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        last_active TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transactions (
        id TEXT PRIMARY KEY,
        user_id INTEGER NOT NULL,
        kind TEXT NOT NULL,
        subkind TEXT NOT NULL DEFAULT '',
        amount INTEGER NOT NULL,
        crypto_asset TEXT,
        crypto_amount REAL,
        exchange_rate REAL,
        fee INTEGER,
        balance_before INTEGER NOT NULL,
        balance_after INTEGER NOT NULL,
        reference_id TEXT,
        game_session_id TEXT,
        status TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL,
        confirmed_at TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_transactions_user_created ON transactions(user_id, created_at)",
    // Partial unique index: external references collapse duplicate inserts.
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_transactions_reference
        ON transactions(reference_id) WHERE reference_id IS NOT NULL",
    r#"
    CREATE TABLE IF NOT EXISTS game_sessions (
        id TEXT PRIMARY KEY,
        user_id INTEGER NOT NULL,
        game_kind TEXT NOT NULL,
        variant TEXT,
        bet_amount INTEGER NOT NULL,
        win_amount INTEGER NOT NULL,
        net_result INTEGER NOT NULL,
        multiplier_bps INTEGER NOT NULL,
        game_data TEXT NOT NULL DEFAULT '{}',
        result_label TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_game_sessions_user_created ON game_sessions(user_id, created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS deposits (
        id TEXT PRIMARY KEY,
        user_id INTEGER NOT NULL,
        asset TEXT NOT NULL,
        crypto_amount REAL NOT NULL,
        fiat_amount INTEGER NOT NULL,
        rate_at_quote REAL NOT NULL,
        invoice_id TEXT NOT NULL UNIQUE,
        pay_url TEXT NOT NULL,
        state TEXT NOT NULL,
        created_at TEXT NOT NULL,
        expires_at TEXT NOT NULL,
        confirmed_at TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_deposits_user ON deposits(user_id, created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS withdrawals (
        id TEXT PRIMARY KEY,
        user_id INTEGER NOT NULL,
        asset TEXT NOT NULL,
        fiat_amount INTEGER NOT NULL,
        fee INTEGER NOT NULL,
        net_fiat INTEGER NOT NULL,
        net_crypto REAL NOT NULL,
        destination_address TEXT NOT NULL,
        rate_at_request REAL NOT NULL,
        spend_id TEXT NOT NULL UNIQUE,
        state TEXT NOT NULL,
        tx_hash TEXT,
        error_reason TEXT,
        created_at TEXT NOT NULL,
        dispatched_at TEXT,
        confirmed_at TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_withdrawals_user_state ON withdrawals(user_id, state)",
    "CREATE INDEX IF NOT EXISTS idx_withdrawals_state ON withdrawals(state, created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS house (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        balance INTEGER NOT NULL DEFAULT 0,
        total_player_losses INTEGER NOT NULL DEFAULT 0,
        total_player_wins INTEGER NOT NULL DEFAULT 0,
        total_deposits INTEGER NOT NULL DEFAULT 0,
        total_withdrawals INTEGER NOT NULL DEFAULT 0,
        total_fees_collected INTEGER NOT NULL DEFAULT 0,
        total_bonuses_paid INTEGER NOT NULL DEFAULT 0,
        games_played_today INTEGER NOT NULL DEFAULT 0,
        revenue_today INTEGER NOT NULL DEFAULT 0,
        profit_today INTEGER NOT NULL DEFAULT 0,
        last_updated TEXT NOT NULL,
        last_daily_reset TEXT NOT NULL
    )
    "#,
    // Seed the single house row so UPDATE-only accounting never misses.
    "INSERT OR IGNORE INTO house (id, last_updated, last_daily_reset)
        VALUES (1, strftime('%Y-%m-%dT%H:%M:%fZ','now'), strftime('%Y-%m-%dT%H:%M:%fZ','now'))",
];

pub async fn connect(db_path: &str, pool_size: u32) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(pool_size)
        .connect_with(options)
        .await?;

    apply_schema(&pool).await?;
    Ok(pool)
}

/// In-memory database for tests; a single connection keeps it alive.
pub async fn connect_memory() -> anyhow::Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;

    apply_schema(&pool).await?;
    Ok(pool)
}

pub async fn apply_schema(pool: &SqlitePool) -> anyhow::Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bot::config::{
    Config, CreditRatePolicy, CryptoPayConfig, DepositConfig, GameConfig, WithdrawalConfig,
};
use bot::cryptopay::DemoProvider;
use bot::db;
use bot::domain::{TxKind, TxMeta, UserId};
use bot::games::{ChanceSource, GameEngine};
use bot::state::AppState;
use shared::Cents;

pub const ADMIN_ID: UserId = 1000;

pub fn base_config() -> Config {
    Config {
        bot_token: "test-token".into(),
        db_path: ":memory:".into(),
        demo_mode: true,
        port: 0,
        metrics_port: 0,
        owner_user_id: ADMIN_ID,
        admin_user_ids: vec![ADMIN_ID],
        cryptopay: CryptoPayConfig {
            base_url: "http://provider.invalid".into(),
            api_token: "test".into(),
            webhook_secret: "test-webhook-secret".into(),
        },
        deposits: DepositConfig {
            min: Cents::new(shared::DEPOSIT_MIN_CENTS),
            max: Cents::new(shared::DEPOSIT_MAX_CENTS),
            credit_rate: CreditRatePolicy::Quote,
        },
        withdrawals: WithdrawalConfig {
            min: Cents::from_dollars(1),
            max: Cents::from_dollars(10_000),
            daily_max: Cents::from_dollars(10_000),
            fee_bps: 200,
            cooldown_secs: 0,
        },
        games: GameConfig {
            max_bet: Cents::from_dollars(1_000),
        },
    }
}

pub async fn test_state() -> AppState {
    test_state_with(|_| {}).await
}

pub async fn test_state_with(customize: impl FnOnce(&mut Config)) -> AppState {
    let pool = db::connect_memory().await.expect("in-memory pool");
    db::apply_schema(&pool).await.expect("schema");

    let mut config = base_config();
    customize(&mut config);
    AppState::new(Arc::new(config), pool, Arc::new(DemoProvider::new()))
}

/// Create the user and fund them through the ledger so the house books
/// stay consistent.
pub async fn seed_user(state: &AppState, user_id: UserId, dollars: i64) -> Cents {
    state
        .users
        .get_or_create(user_id, &format!("player-{}", user_id))
        .await
        .expect("create user");

    if dollars > 0 {
        state
            .ledger
            .credit(
                user_id,
                Cents::from_dollars(dollars),
                TxKind::Deposit,
                "LTC",
                TxMeta::described("test funding"),
            )
            .await
            .expect("seed credit");
    }
    state
        .users
        .find(user_id)
        .await
        .expect("query user")
        .expect("user exists")
        .balance
}

/// Replays a fixed value sequence; wraps around when exhausted.
pub struct ScriptedChance {
    values: Vec<u8>,
    at: AtomicUsize,
}

impl ScriptedChance {
    pub fn new(values: Vec<u8>) -> Self {
        Self {
            values,
            at: AtomicUsize::new(0),
        }
    }
}

impl ChanceSource for ScriptedChance {
    fn roll(&self, _max: u8) -> u8 {
        let i = self.at.fetch_add(1, Ordering::Relaxed);
        self.values[i % self.values.len()]
    }
}

/// Engine over the state's ledger with deterministic rolls.
pub fn scripted_engine(state: &AppState, values: Vec<u8>) -> GameEngine {
    GameEngine::new(
        state.ledger.clone(),
        Arc::new(ScriptedChance::new(values)),
        state.config.games.max_bet,
    )
}

pub const LTC_ADDR: &str = "LaMNbEKQ3mPw7zT4sVxY2rG8hJcD5fBq";
pub const TON_ADDR: &str = "UQabcdefghij0123456789_-ABCDEFGHIJKLMNOPQRSTuvwx";
pub const SOL_ADDR: &str = "4Nd1mYQFsZa2PqkCkJ1fUGvXz8tR6wE9jHbTuW3xKvDp";

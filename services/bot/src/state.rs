//! Shared application state threaded through handlers and the command
//! layer.

use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::cryptopay::PayProvider;
use crate::deposits::DepositCoordinator;
use crate::games::{GameEngine, ThreadRngChance};
use crate::ledger::Ledger;
use crate::rates::RateOracle;
use crate::repository::{HistoryRepository, UserRepository};
use crate::sessions::SessionStore;
use crate::withdrawals::WithdrawalCoordinator;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: SqlitePool,
    pub ledger: Ledger,
    pub users: UserRepository,
    pub history: HistoryRepository,
    pub engine: GameEngine,
    pub deposits: DepositCoordinator,
    pub withdrawals: WithdrawalCoordinator,
    pub sessions: SessionStore,
    pub rates: RateOracle,
    pub provider: Arc<dyn PayProvider>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: Arc<Config>, db: SqlitePool, provider: Arc<dyn PayProvider>) -> Self {
        let mut admins = config.admin_user_ids.clone();
        if config.owner_user_id != 0 && !admins.contains(&config.owner_user_id) {
            admins.push(config.owner_user_id);
        }
        let ledger = Ledger::new(db.clone(), admins);
        let rates = RateOracle::new(provider.clone());
        let engine = GameEngine::new(
            ledger.clone(),
            Arc::new(ThreadRngChance),
            config.games.max_bet,
        );
        let deposits = DepositCoordinator::new(
            db.clone(),
            ledger.clone(),
            rates.clone(),
            provider.clone(),
            config.deposits.clone(),
        );
        let withdrawals = WithdrawalCoordinator::new(
            db.clone(),
            ledger.clone(),
            rates.clone(),
            provider.clone(),
            config.withdrawals.clone(),
        );

        Self {
            config,
            users: UserRepository::new(db.clone()),
            history: HistoryRepository::new(db.clone()),
            db,
            ledger,
            engine,
            deposits,
            withdrawals,
            sessions: SessionStore::new(),
            rates,
            provider,
            started_at: Instant::now(),
        }
    }
}

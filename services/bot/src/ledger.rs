//! The ledger: sole mutator of user balances
//!
//! Every monetary effect flows through exactly one operation here. Each
//! operation is one sqlite transaction under a per-user async lock, so
//! concurrent operations on a user serialise and `balance_before` always
//! equals the balance immediately prior to the row. Ledger events are
//! emitted only after commit; the house aggregate is updated inside the
//! same transaction.

use chrono::Utc;
use shared::constants::{WEEKLY_BONUS_CENTS, WEEKLY_BONUS_INTERVAL_DAYS};
use shared::Cents;
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::domain::{
    LedgerEvent, LedgerTx, NewGameSession, ResultLabel, TxKind, TxMeta, TxStatus, User, UserId,
};
use crate::errors::{AppError, Result};
use crate::house::{self, HouseEffect};

#[derive(Clone)]
pub struct Ledger {
    db: SqlitePool,
    admins: Arc<Vec<UserId>>,
    locks: Arc<StdMutex<HashMap<UserId, Arc<Mutex<()>>>>>,
    events: broadcast::Sender<LedgerEvent>,
}

/// An open ledger transaction for one user: balance updates, row inserts,
/// and house mirroring all land in `tx`; dropping it rolls everything back
/// and discards the queued events.
pub struct LedgerTxn {
    user_id: UserId,
    balance: Cents,
    tx: Transaction<'static, Sqlite>,
    pending_events: Vec<LedgerEvent>,
    _guard: OwnedMutexGuard<()>,
}

impl LedgerTxn {
    pub fn balance(&self) -> Cents {
        self.balance
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Raw access for coordinators that persist their own rows (deposit /
    /// withdrawal state) atomically with a balance change. Balance math
    /// itself stays inside the ledger.
    pub fn conn(&mut self) -> &mut sqlx::SqliteConnection {
        &mut self.tx
    }
}

#[derive(Debug, Clone)]
pub struct LedgerApplied {
    pub tx: LedgerTx,
    /// True when a duplicate `reference_id` collapsed onto an earlier row.
    pub duplicate: bool,
}

#[derive(Debug, Clone)]
pub enum BonusClaim {
    Granted(LedgerTx),
    NotDue { next_at: chrono::DateTime<Utc> },
}

#[derive(Debug, Clone)]
pub struct Settlement {
    pub session_id: String,
    pub bet_tx_id: String,
    pub win_tx_id: Option<String>,
    pub new_balance: Cents,
}

impl Ledger {
    pub fn new(db: SqlitePool, admins: Vec<UserId>) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            db,
            admins: Arc::new(admins),
            locks: Arc::new(StdMutex::new(HashMap::new())),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }

    fn user_lock(&self, user_id: UserId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("ledger lock map poisoned");
        locks.entry(user_id).or_default().clone()
    }

    /// Drop lock entries no open transaction holds. Strong count 1 means
    /// the map owns the only reference.
    pub fn evict_idle_locks(&self) -> usize {
        let mut locks = self.locks.lock().expect("ledger lock map poisoned");
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - locks.len()
    }

    /// Periodic sweep keeping the per-user lock map bounded by the number
    /// of in-flight transactions, not the number of users ever seen.
    pub async fn run_lock_sweep(self) {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            tick.tick().await;
            let evicted = self.evict_idle_locks();
            if evicted > 0 {
                tracing::debug!(evicted, "Evicted idle user locks");
            }
        }
    }

    /// Open a serialised transaction for one user. Fails if the user does
    /// not exist or is banned.
    pub async fn begin(&self, user_id: UserId) -> Result<LedgerTxn> {
        let guard = self.user_lock(user_id).lock_owned().await;
        let mut tx = self.db.begin().await?;

        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?1")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::not_found(format!("User {} not found", user_id)))?;

        if user.banned {
            return Err(AppError::UserBanned);
        }

        Ok(LedgerTxn {
            user_id,
            balance: user.balance,
            tx,
            pending_events: Vec::new(),
            _guard: guard,
        })
    }

    pub async fn commit(&self, txn: LedgerTxn) -> Result<Cents> {
        let LedgerTxn {
            balance,
            tx,
            pending_events,
            ..
        } = txn;
        tx.commit().await?;

        for event in pending_events {
            metrics::counter!("ledger_tx_total", "kind" => kind_label(event.kind)).increment(1);
            // Nobody listening is fine; events are observational.
            let _ = self.events.send(event);
        }
        Ok(balance)
    }

    /// Add to a user's balance. `amount` must be positive.
    pub async fn credit(
        &self,
        user_id: UserId,
        amount: Cents,
        kind: TxKind,
        subkind: &str,
        meta: TxMeta,
    ) -> Result<LedgerApplied> {
        // Cheap duplicate check before taking the user lock; the unique
        // index below closes the race.
        if let Some(reference_id) = &meta.reference_id {
            if let Some(existing) = self.find_by_reference(reference_id).await? {
                return Ok(LedgerApplied {
                    tx: existing,
                    duplicate: true,
                });
            }
        }

        let reference_id = meta.reference_id.clone();
        let mut txn = self.begin(user_id).await?;
        match self.credit_in(&mut txn, amount, kind, subkind, meta).await {
            Ok(tx) => {
                self.commit(txn).await?;
                Ok(LedgerApplied {
                    tx,
                    duplicate: false,
                })
            }
            Err(AppError::Storage(e)) if is_unique_violation(&e) => {
                drop(txn); // rollback
                let reference_id = reference_id.ok_or(AppError::Storage(e))?;
                let existing = self
                    .find_by_reference(&reference_id)
                    .await?
                    .ok_or_else(|| {
                        AppError::AccountingInvariant(format!(
                            "duplicate reference {} without original row",
                            reference_id
                        ))
                    })?;
                Ok(LedgerApplied {
                    tx: existing,
                    duplicate: true,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Subtract from a user's balance if sufficient. `amount` must be
    /// positive.
    pub async fn debit(
        &self,
        user_id: UserId,
        amount: Cents,
        kind: TxKind,
        subkind: &str,
        meta: TxMeta,
    ) -> Result<LedgerTx> {
        let mut txn = self.begin(user_id).await?;
        let tx = self.debit_in(&mut txn, amount, kind, subkind, meta).await?;
        self.commit(txn).await?;
        Ok(tx)
    }

    /// Signed admin adjustment; requires a configured admin identity.
    pub async fn adjust(
        &self,
        user_id: UserId,
        delta: Cents,
        reason: &str,
        admin_id: UserId,
    ) -> Result<LedgerTx> {
        if !self.admins.contains(&admin_id) {
            return Err(AppError::Unauthorized(format!(
                "User {} is not an admin",
                admin_id
            )));
        }

        let meta = TxMeta::described(format!("admin {} adjustment: {}", admin_id, reason));
        let subkind = format!("admin:{}", admin_id);
        let mut txn = self.begin(user_id).await?;
        let tx = if delta.is_negative() {
            self.debit_in(&mut txn, delta.abs(), TxKind::AdminAdjust, &subkind, meta)
                .await?
        } else {
            self.credit_in(&mut txn, delta, TxKind::AdminAdjust, &subkind, meta)
                .await?
        };
        self.commit(txn).await?;
        Ok(tx)
    }

    /// Weekly loyalty bonus: one credit per user per interval. The claim
    /// timestamp and the credit commit together, so a claim can never be
    /// recorded without paying or paid without being recorded.
    pub async fn claim_weekly_bonus(&self, user_id: UserId) -> Result<BonusClaim> {
        let mut txn = self.begin(user_id).await?;
        let now = Utc::now();

        let last: Option<chrono::DateTime<Utc>> =
            sqlx::query_scalar("SELECT last_bonus_claim FROM users WHERE id = ?1")
                .bind(user_id)
                .fetch_one(&mut *txn.tx)
                .await?;

        if let Some(last) = last {
            let next_at = last + chrono::Duration::days(WEEKLY_BONUS_INTERVAL_DAYS);
            if now < next_at {
                return Ok(BonusClaim::NotDue { next_at });
            }
        }

        let tx = self
            .credit_in(
                &mut txn,
                Cents::new(WEEKLY_BONUS_CENTS),
                TxKind::Bonus,
                "weekly",
                TxMeta::described("Weekly bonus"),
            )
            .await?;

        sqlx::query("UPDATE users SET last_bonus_claim = ?1 WHERE id = ?2")
            .bind(now)
            .bind(user_id)
            .execute(&mut *txn.tx)
            .await?;

        self.commit(txn).await?;
        Ok(BonusClaim::Granted(tx))
    }

    /// Credit inside an already-open transaction.
    pub async fn credit_in(
        &self,
        txn: &mut LedgerTxn,
        amount: Cents,
        kind: TxKind,
        subkind: &str,
        meta: TxMeta,
    ) -> Result<LedgerTx> {
        if !amount.is_positive() {
            return Err(AppError::AmountOutOfBounds {
                min: Cents::new(1),
                max: Cents::new(i64::MAX),
            });
        }

        let effect = match kind {
            TxKind::Deposit => HouseEffect::Deposit(amount),
            TxKind::Win => HouseEffect::Win(amount),
            TxKind::Bonus | TxKind::ReferralCommission => HouseEffect::Bonus(amount),
            TxKind::Refund => HouseEffect::WithdrawalReversal {
                amount,
                fee: meta.fee.unwrap_or(Cents::ZERO),
            },
            TxKind::AdminAdjust => HouseEffect::Adjust(amount),
            TxKind::Withdrawal | TxKind::Bet | TxKind::HouseOperation => {
                return Err(AppError::AccountingInvariant(format!(
                    "{:?} cannot be applied as a credit",
                    kind
                )))
            }
        };

        let row = self.insert_row(txn, amount, kind, subkind, &meta).await?;
        house::apply(&mut txn.tx, effect).await?;
        self.apply_user_counters(txn, kind, amount).await?;
        Ok(row)
    }

    /// Debit inside an already-open transaction. Checks funds first.
    pub async fn debit_in(
        &self,
        txn: &mut LedgerTxn,
        amount: Cents,
        kind: TxKind,
        subkind: &str,
        meta: TxMeta,
    ) -> Result<LedgerTx> {
        if !amount.is_positive() {
            return Err(AppError::AmountOutOfBounds {
                min: Cents::new(1),
                max: Cents::new(i64::MAX),
            });
        }
        if txn.balance < amount {
            return Err(AppError::InsufficientFunds);
        }

        let effect = match kind {
            TxKind::Bet => HouseEffect::Bet(amount),
            TxKind::Withdrawal => HouseEffect::Withdrawal {
                amount,
                fee: meta.fee.unwrap_or(Cents::ZERO),
            },
            TxKind::AdminAdjust => HouseEffect::Adjust(amount.neg()),
            _ => {
                return Err(AppError::AccountingInvariant(format!(
                    "{:?} cannot be applied as a debit",
                    kind
                )))
            }
        };

        let row = self
            .insert_row(txn, amount.neg(), kind, subkind, &meta)
            .await?;
        house::apply(&mut txn.tx, effect).await?;
        self.apply_user_counters(txn, kind, amount.neg()).await?;
        Ok(row)
    }

    /// Debit the bet, insert the session, credit any win, and update streak
    /// counters, all in one transaction.
    pub async fn atomic_bet_settlement(
        &self,
        user_id: UserId,
        session: NewGameSession,
    ) -> Result<Settlement> {
        let mut txn = self.begin(user_id).await?;
        let subkind = format!("game/{}", session.game_kind);

        let bet_tx = self
            .debit_in(
                &mut txn,
                session.bet_amount,
                TxKind::Bet,
                &subkind,
                TxMeta::described(format!("{} bet", session.game_kind)),
            )
            .await?;

        let settlement = self
            .settle_in(&mut txn, &bet_tx.id, session, &subkind)
            .await?;
        self.commit(txn).await?;
        Ok(settlement)
    }

    /// Settle a game whose bet was already debited (external-randomness
    /// flow: debit, await the platform roll, then settle).
    pub async fn settle_after_bet(
        &self,
        user_id: UserId,
        bet_tx_id: &str,
        session: NewGameSession,
    ) -> Result<Settlement> {
        let mut txn = self.begin(user_id).await?;
        let subkind = format!("game/{}", session.game_kind);
        let settlement = self.settle_in(&mut txn, bet_tx_id, session, &subkind).await?;
        self.commit(txn).await?;
        Ok(settlement)
    }

    async fn settle_in(
        &self,
        txn: &mut LedgerTxn,
        bet_tx_id: &str,
        session: NewGameSession,
        subkind: &str,
    ) -> Result<Settlement> {
        let session_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let net = session.win_amount - session.bet_amount;

        sqlx::query(
            "INSERT INTO game_sessions (
                id, user_id, game_kind, variant, bet_amount, win_amount,
                net_result, multiplier_bps, game_data, result_label, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(&session_id)
        .bind(txn.user_id)
        .bind(session.game_kind)
        .bind(&session.variant)
        .bind(session.bet_amount)
        .bind(session.win_amount)
        .bind(net)
        .bind(session.multiplier_bps)
        .bind(session.game_data.to_string())
        .bind(session.result_label)
        .bind(now)
        .execute(&mut *txn.tx)
        .await?;

        house::record_game(&mut txn.tx).await?;

        // Link the bet row to its session.
        sqlx::query("UPDATE transactions SET game_session_id = ?1 WHERE id = ?2")
            .bind(&session_id)
            .bind(bet_tx_id)
            .execute(&mut *txn.tx)
            .await?;

        let win_tx_id = if session.win_amount.is_positive() {
            let meta = TxMeta {
                game_session_id: Some(session_id.clone()),
                description: format!("{} win", session.game_kind),
                ..TxMeta::default()
            };
            let win_tx = self
                .credit_in(txn, session.win_amount, TxKind::Win, subkind, meta)
                .await?;
            Some(win_tx.id)
        } else {
            None
        };

        self.apply_game_counters(txn, &session).await?;

        Ok(Settlement {
            session_id,
            bet_tx_id: bet_tx_id.to_string(),
            win_tx_id,
            new_balance: txn.balance,
        })
    }

    async fn apply_game_counters(
        &self,
        txn: &mut LedgerTxn,
        session: &NewGameSession,
    ) -> Result<()> {
        match session.result_label {
            ResultLabel::Win | ResultLabel::Partial => {
                sqlx::query(
                    "UPDATE users SET
                         games_played = games_played + 1,
                         total_wagered = total_wagered + ?1,
                         total_won = total_won + ?2,
                         current_win_streak = current_win_streak + 1,
                         max_win_streak = MAX(max_win_streak, current_win_streak + 1),
                         biggest_win = MAX(biggest_win, ?2)
                     WHERE id = ?3",
                )
                .bind(session.bet_amount)
                .bind(session.win_amount)
                .bind(txn.user_id)
                .execute(&mut *txn.tx)
                .await?;
            }
            ResultLabel::Loss => {
                sqlx::query(
                    "UPDATE users SET
                         games_played = games_played + 1,
                         total_wagered = total_wagered + ?1,
                         current_win_streak = 0
                     WHERE id = ?2",
                )
                .bind(session.bet_amount)
                .bind(txn.user_id)
                .execute(&mut *txn.tx)
                .await?;
            }
            // A tie returns the stake, which is not winnings; the streak
            // is untouched.
            ResultLabel::Tie => {
                sqlx::query(
                    "UPDATE users SET
                         games_played = games_played + 1,
                         total_wagered = total_wagered + ?1
                     WHERE id = ?2",
                )
                .bind(session.bet_amount)
                .bind(txn.user_id)
                .execute(&mut *txn.tx)
                .await?;
            }
        }
        Ok(())
    }

    async fn apply_user_counters(
        &self,
        txn: &mut LedgerTxn,
        kind: TxKind,
        signed_amount: Cents,
    ) -> Result<()> {
        match kind {
            TxKind::Deposit => {
                sqlx::query("UPDATE users SET total_deposited = total_deposited + ?1 WHERE id = ?2")
                    .bind(signed_amount)
                    .bind(txn.user_id)
                    .execute(&mut *txn.tx)
                    .await?;
            }
            TxKind::Withdrawal => {
                sqlx::query("UPDATE users SET total_withdrawn = total_withdrawn + ?1 WHERE id = ?2")
                    .bind(signed_amount.abs())
                    .bind(txn.user_id)
                    .execute(&mut *txn.tx)
                    .await?;
            }
            TxKind::Refund => {
                sqlx::query("UPDATE users SET total_withdrawn = total_withdrawn - ?1 WHERE id = ?2")
                    .bind(signed_amount)
                    .bind(txn.user_id)
                    .execute(&mut *txn.tx)
                    .await?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Append the row and move the in-transaction balance. `signed_amount`
    /// is positive for credits, negative for debits.
    async fn insert_row(
        &self,
        txn: &mut LedgerTxn,
        signed_amount: Cents,
        kind: TxKind,
        subkind: &str,
        meta: &TxMeta,
    ) -> Result<LedgerTx> {
        let balance_before = txn.balance;
        let balance_after = balance_before
            .checked_add(signed_amount)
            .map_err(|e| AppError::AccountingInvariant(e.to_string()))?;
        if balance_after.is_negative() {
            return Err(AppError::InsufficientFunds);
        }

        let now = Utc::now();
        let row = LedgerTx {
            id: Uuid::new_v4().to_string(),
            user_id: txn.user_id,
            kind,
            subkind: subkind.to_string(),
            amount: signed_amount,
            crypto_asset: meta.crypto_asset,
            crypto_amount: meta.crypto_amount,
            exchange_rate: meta.exchange_rate,
            fee: meta.fee,
            balance_before,
            balance_after,
            reference_id: meta.reference_id.clone(),
            game_session_id: meta.game_session_id.clone(),
            status: TxStatus::Completed,
            description: meta.description.clone(),
            created_at: now,
            confirmed_at: Some(now),
        };

        sqlx::query(
            "INSERT INTO transactions (
                id, user_id, kind, subkind, amount, crypto_asset, crypto_amount,
                exchange_rate, fee, balance_before, balance_after, reference_id,
                game_session_id, status, description, created_at, confirmed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        )
        .bind(&row.id)
        .bind(row.user_id)
        .bind(row.kind)
        .bind(&row.subkind)
        .bind(row.amount)
        .bind(row.crypto_asset)
        .bind(row.crypto_amount)
        .bind(row.exchange_rate)
        .bind(row.fee)
        .bind(row.balance_before)
        .bind(row.balance_after)
        .bind(&row.reference_id)
        .bind(&row.game_session_id)
        .bind(row.status)
        .bind(&row.description)
        .bind(row.created_at)
        .bind(row.confirmed_at)
        .execute(&mut *txn.tx)
        .await?;

        sqlx::query("UPDATE users SET balance = ?1, last_active = ?2 WHERE id = ?3")
            .bind(balance_after)
            .bind(now)
            .bind(txn.user_id)
            .execute(&mut *txn.tx)
            .await?;

        txn.balance = balance_after;
        txn.pending_events.push(LedgerEvent {
            tx_id: row.id.clone(),
            user_id: row.user_id,
            kind,
            amount: signed_amount,
            fee: meta.fee,
            balance_after,
        });

        Ok(row)
    }

    pub async fn find_by_reference(&self, reference_id: &str) -> Result<Option<LedgerTx>> {
        let row = sqlx::query_as::<_, LedgerTx>(
            "SELECT * FROM transactions WHERE reference_id = ?1",
        )
        .bind(reference_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn kind_label(kind: TxKind) -> &'static str {
    match kind {
        TxKind::Deposit => "deposit",
        TxKind::Withdrawal => "withdrawal",
        TxKind::Bet => "bet",
        TxKind::Win => "win",
        TxKind::Bonus => "bonus",
        TxKind::ReferralCommission => "referral_commission",
        TxKind::AdminAdjust => "admin_adjust",
        TxKind::HouseOperation => "house_operation",
        TxKind::Refund => "refund",
    }
}

//! Withdrawal coordinator.
//!
//! A request debits the full fiat amount and persists a pending row in the
//! same ledger transaction. A background dispatcher claims pending rows one
//! at a time and pushes them to the provider behind a circuit breaker;
//! terminal failures refund the debit. A second loop polls dispatched
//! transfers until they reach the confirmation depth.

use chrono::{Duration as ChronoDuration, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

use shared::constants::{
    BPS_DENOMINATOR, REQUIRED_CONFIRMATIONS, WITHDRAWAL_MIN_FEE_CENTS,
};
use shared::{format_crypto_amount, Asset, Cents};

use crate::circuit_breaker::CircuitBreaker;
use crate::config::WithdrawalConfig;
use crate::cryptopay::{CreateTransfer, PayProvider, ProviderError, TransferStatus};
use crate::domain::{TxKind, TxMeta, UserId, Withdrawal, WithdrawalState};
use crate::errors::{AppError, Result};
use crate::ledger::Ledger;
use crate::rates::RateOracle;

const DISPATCH_INTERVAL_SECS: u64 = 10;
const CONFIRM_INTERVAL_SECS: u64 = 60;
const BREAKER_FAILURE_THRESHOLD: u64 = 5;
const BREAKER_RESET_SECS: u64 = 120;

#[derive(Clone)]
pub struct WithdrawalCoordinator {
    db: SqlitePool,
    ledger: Ledger,
    rates: RateOracle,
    provider: Arc<dyn PayProvider>,
    config: WithdrawalConfig,
    breaker: CircuitBreaker,
}

impl WithdrawalCoordinator {
    pub fn new(
        db: SqlitePool,
        ledger: Ledger,
        rates: RateOracle,
        provider: Arc<dyn PayProvider>,
        config: WithdrawalConfig,
    ) -> Self {
        Self {
            db,
            ledger,
            rates,
            provider,
            config,
            breaker: CircuitBreaker::new(BREAKER_FAILURE_THRESHOLD, BREAKER_RESET_SECS),
        }
    }

    /// Validate and accept a withdrawal: the fiat amount leaves the balance
    /// immediately, the crypto dispatch happens asynchronously.
    pub async fn request(
        &self,
        user_id: UserId,
        asset: Asset,
        fiat: Cents,
        address: &str,
    ) -> Result<Withdrawal> {
        if !asset.validate_address(address) {
            return Err(AppError::InvalidAddress { asset });
        }
        if fiat < self.config.min || fiat > self.config.max {
            return Err(AppError::AmountOutOfBounds {
                min: self.config.min,
                max: self.config.max,
            });
        }
        let fee = self.fee_for(fiat)?;
        let net_fiat = fiat - fee;
        if !net_fiat.is_positive() {
            return Err(AppError::AmountOutOfBounds {
                min: fee.checked_add(Cents::new(1)).unwrap_or(fee),
                max: self.config.max,
            });
        }

        let rate = self.rates.usd_rate(asset).await?;
        let net_crypto = net_fiat.to_f64_dollars() / rate;

        let now = Utc::now();
        let withdrawal = Withdrawal {
            id: Uuid::new_v4().to_string(),
            user_id,
            asset,
            fiat_amount: fiat,
            fee,
            net_fiat,
            net_crypto,
            destination_address: address.to_string(),
            rate_at_request: rate,
            spend_id: Uuid::new_v4().to_string(),
            state: WithdrawalState::Pending,
            tx_hash: None,
            error_reason: None,
            created_at: now,
            dispatched_at: None,
            confirmed_at: None,
        };

        // Limit checks, debit, and row insert all happen under the user's
        // ledger lock; concurrent requests see each other's rows.
        let mut txn = self.ledger.begin(user_id).await?;
        self.check_cooldown(txn.conn(), user_id).await?;
        self.check_daily_cap(txn.conn(), user_id, fiat).await?;

        let meta = TxMeta {
            crypto_asset: Some(asset),
            crypto_amount: Some(net_crypto),
            exchange_rate: Some(rate),
            fee: Some(fee),
            reference_id: Some(format!("wd:{}", withdrawal.id)),
            description: format!("Withdrawal to {}", asset.ticker()),
            ..TxMeta::default()
        };
        self.ledger
            .debit_in(&mut txn, fiat, TxKind::Withdrawal, asset.ticker(), meta)
            .await?;

        sqlx::query(
            "INSERT INTO withdrawals (
                id, user_id, asset, fiat_amount, fee, net_fiat, net_crypto,
                destination_address, rate_at_request, spend_id, state, tx_hash,
                error_reason, created_at, dispatched_at, confirmed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        )
        .bind(&withdrawal.id)
        .bind(withdrawal.user_id)
        .bind(withdrawal.asset)
        .bind(withdrawal.fiat_amount)
        .bind(withdrawal.fee)
        .bind(withdrawal.net_fiat)
        .bind(withdrawal.net_crypto)
        .bind(&withdrawal.destination_address)
        .bind(withdrawal.rate_at_request)
        .bind(&withdrawal.spend_id)
        .bind(withdrawal.state)
        .bind(&withdrawal.tx_hash)
        .bind(&withdrawal.error_reason)
        .bind(withdrawal.created_at)
        .bind(withdrawal.dispatched_at)
        .bind(withdrawal.confirmed_at)
        .execute(txn.conn())
        .await?;

        self.ledger.commit(txn).await?;

        tracing::info!(
            user_id,
            withdrawal_id = %withdrawal.id,
            asset = %asset,
            amount = %fiat,
            fee = %fee,
            "Withdrawal accepted"
        );
        metrics::counter!("withdrawals_requested_total", "asset" => asset.ticker()).increment(1);
        Ok(withdrawal)
    }

    fn fee_for(&self, fiat: Cents) -> Result<Cents> {
        let fee = fiat
            .mul_ratio(self.config.fee_bps, BPS_DENOMINATOR)
            .map_err(|e| AppError::AccountingInvariant(e.to_string()))?;
        Ok(fee.max(Cents::new(WITHDRAWAL_MIN_FEE_CENTS)))
    }

    async fn check_cooldown(
        &self,
        conn: &mut sqlx::SqliteConnection,
        user_id: UserId,
    ) -> Result<()> {
        let last: Option<chrono::DateTime<Utc>> = sqlx::query_scalar(
            "SELECT MAX(created_at) FROM withdrawals WHERE user_id = ?1 AND state != ?2",
        )
        .bind(user_id)
        .bind(WithdrawalState::Failed)
        .fetch_one(conn)
        .await?;

        if let Some(last) = last {
            let elapsed = Utc::now().signed_duration_since(last).num_seconds();
            if elapsed < self.config.cooldown_secs {
                return Err(AppError::CooldownActive {
                    remaining_secs: self.config.cooldown_secs - elapsed,
                });
            }
        }
        Ok(())
    }

    /// Rolling 24h cap over non-failed withdrawals.
    async fn check_daily_cap(
        &self,
        conn: &mut sqlx::SqliteConnection,
        user_id: UserId,
        fiat: Cents,
    ) -> Result<()> {
        let since = Utc::now() - ChronoDuration::hours(24);
        let spent: Option<i64> = sqlx::query_scalar(
            "SELECT SUM(fiat_amount) FROM withdrawals
             WHERE user_id = ?1 AND state != ?2 AND created_at >= ?3",
        )
        .bind(user_id)
        .bind(WithdrawalState::Failed)
        .bind(since)
        .fetch_one(conn)
        .await?;

        let total = Cents::new(spent.unwrap_or(0))
            .checked_add(fiat)
            .map_err(|e| AppError::AccountingInvariant(e.to_string()))?;
        if total > self.config.daily_max {
            return Err(AppError::LimitExceeded(format!(
                "daily withdrawal cap {} reached",
                self.config.daily_max
            )));
        }
        Ok(())
    }

    /// Claim and dispatch one pending withdrawal. Returns false when the
    /// queue is empty or the circuit is open.
    pub async fn dispatch_next(&self) -> Result<bool> {
        if !self.breaker.allow_request().await {
            return Ok(false);
        }

        let claimed = sqlx::query_as::<_, Withdrawal>(
            "UPDATE withdrawals SET state = ?1, dispatched_at = ?2
             WHERE id = (
                 SELECT id FROM withdrawals WHERE state = ?3
                 ORDER BY created_at LIMIT 1
             )
             RETURNING *",
        )
        .bind(WithdrawalState::Dispatching)
        .bind(Utc::now())
        .bind(WithdrawalState::Pending)
        .fetch_optional(&self.db)
        .await?;

        let Some(withdrawal) = claimed else {
            return Ok(false);
        };

        let transfer = self
            .provider
            .transfer(CreateTransfer {
                asset: withdrawal.asset,
                amount: format_crypto_amount(withdrawal.net_crypto),
                destination_address: withdrawal.destination_address.clone(),
                spend_id: withdrawal.spend_id.clone(),
                comment: Some(format!("withdrawal {}", withdrawal.id)),
            })
            .await;

        match transfer {
            Ok(transfer) => {
                self.breaker.record_success().await;
                self.mark_dispatched(&withdrawal, transfer.tx_hash).await?;
            }
            Err(e) if e.is_transient() => {
                // Retries exhausted inside the client. The transfer may
                // still have landed, so consult the idempotency key before
                // refunding.
                self.breaker.record_failure().await;
                match self.provider.get_transfer(&withdrawal.spend_id).await {
                    Ok(transfer) if transfer.status != TransferStatus::Failed => {
                        self.mark_dispatched(&withdrawal, transfer.tx_hash).await?;
                    }
                    Ok(_) | Err(ProviderError::NotFound) => {
                        self.fail_and_refund(&withdrawal, &e.to_string()).await?;
                    }
                    Err(_) => {
                        // Provider unreachable for the lookup too; put the
                        // row back for the next cycle.
                        self.requeue(&withdrawal.id).await?;
                    }
                }
            }
            Err(e) => {
                self.breaker.record_success().await;
                self.fail_and_refund(&withdrawal, &e.to_string()).await?;
            }
        }
        Ok(true)
    }

    async fn mark_dispatched(&self, withdrawal: &Withdrawal, tx_hash: Option<String>) -> Result<()> {
        sqlx::query(
            "UPDATE withdrawals SET state = ?1, tx_hash = ?2 WHERE id = ?3 AND state = ?4",
        )
        .bind(WithdrawalState::Dispatched)
        .bind(&tx_hash)
        .bind(&withdrawal.id)
        .bind(WithdrawalState::Dispatching)
        .execute(&self.db)
        .await?;

        tracing::info!(
            withdrawal_id = %withdrawal.id,
            user_id = withdrawal.user_id,
            tx_hash = tx_hash.as_deref().unwrap_or("-"),
            "Withdrawal dispatched"
        );
        metrics::counter!("withdrawals_dispatched_total", "asset" => withdrawal.asset.ticker())
            .increment(1);
        Ok(())
    }

    async fn requeue(&self, withdrawal_id: &str) -> Result<()> {
        sqlx::query("UPDATE withdrawals SET state = ?1, dispatched_at = NULL WHERE id = ?2")
            .bind(WithdrawalState::Pending)
            .bind(withdrawal_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// Terminal dispatch failure: refund the debit (fee included) and mark
    /// the row failed, in one ledger transaction.
    pub async fn fail_and_refund(&self, withdrawal: &Withdrawal, reason: &str) -> Result<()> {
        let mut txn = self.ledger.begin(withdrawal.user_id).await?;
        let meta = TxMeta {
            fee: Some(withdrawal.fee),
            reference_id: Some(format!("wd-refund:{}", withdrawal.id)),
            description: format!("Refund for failed withdrawal {}", withdrawal.id),
            ..TxMeta::default()
        };
        let credited = self
            .ledger
            .credit_in(
                &mut txn,
                withdrawal.fiat_amount,
                TxKind::Refund,
                withdrawal.asset.ticker(),
                meta,
            )
            .await;

        match credited {
            Ok(_) => {
                sqlx::query(
                    "UPDATE withdrawals SET state = ?1, error_reason = ?2 WHERE id = ?3",
                )
                .bind(WithdrawalState::Failed)
                .bind(reason)
                .bind(&withdrawal.id)
                .execute(txn.conn())
                .await?;
                self.ledger.commit(txn).await?;
            }
            Err(AppError::Storage(e))
                if matches!(&e, sqlx::Error::Database(db) if db.is_unique_violation()) =>
            {
                // Already refunded by an earlier attempt; just settle the
                // row state.
                drop(txn);
                sqlx::query(
                    "UPDATE withdrawals SET state = ?1, error_reason = ?2 WHERE id = ?3",
                )
                .bind(WithdrawalState::Failed)
                .bind(reason)
                .bind(&withdrawal.id)
                .execute(&self.db)
                .await?;
            }
            Err(e) => return Err(e),
        }

        tracing::warn!(
            withdrawal_id = %withdrawal.id,
            user_id = withdrawal.user_id,
            reason,
            "Withdrawal failed and refunded"
        );
        metrics::counter!("withdrawals_failed_total", "asset" => withdrawal.asset.ticker())
            .increment(1);
        Ok(())
    }

    /// Promote dispatched withdrawals to confirmed once the transfer is
    /// final at the provider.
    pub async fn poll_confirmations(&self) -> Result<()> {
        let dispatched = sqlx::query_as::<_, Withdrawal>(
            "SELECT * FROM withdrawals WHERE state = ?1",
        )
        .bind(WithdrawalState::Dispatched)
        .fetch_all(&self.db)
        .await?;

        for withdrawal in dispatched {
            match self.provider.get_transfer(&withdrawal.spend_id).await {
                Ok(transfer)
                    if transfer.status == TransferStatus::Completed
                        && transfer.confirmations >= REQUIRED_CONFIRMATIONS as i64 =>
                {
                    sqlx::query(
                        "UPDATE withdrawals SET state = ?1, confirmed_at = ?2, tx_hash = COALESCE(?3, tx_hash)
                         WHERE id = ?4 AND state = ?5",
                    )
                    .bind(WithdrawalState::Confirmed)
                    .bind(Utc::now())
                    .bind(&transfer.tx_hash)
                    .bind(&withdrawal.id)
                    .bind(WithdrawalState::Dispatched)
                    .execute(&self.db)
                    .await?;
                    tracing::info!(withdrawal_id = %withdrawal.id, "Withdrawal confirmed");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        withdrawal_id = %withdrawal.id,
                        error = %e,
                        "Confirmation check failed"
                    );
                }
            }
        }
        Ok(())
    }

    pub async fn find(&self, withdrawal_id: &str) -> Result<Option<Withdrawal>> {
        let row = sqlx::query_as::<_, Withdrawal>("SELECT * FROM withdrawals WHERE id = ?1")
            .bind(withdrawal_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(row)
    }

    /// Dispatcher loop; one claim per tick keeps provider pressure low.
    pub async fn run_dispatcher(self) {
        let mut tick =
            tokio::time::interval(std::time::Duration::from_secs(DISPATCH_INTERVAL_SECS));
        loop {
            tick.tick().await;
            match self.dispatch_next().await {
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Withdrawal dispatch cycle failed"),
            }
        }
    }

    /// Confirmation polling loop.
    pub async fn run_confirmation_poll(self) {
        let mut tick =
            tokio::time::interval(std::time::Duration::from_secs(CONFIRM_INTERVAL_SECS));
        loop {
            tick.tick().await;
            if let Err(e) = self.poll_confirmations().await {
                tracing::error!(error = %e, "Withdrawal confirmation cycle failed");
            }
        }
    }
}

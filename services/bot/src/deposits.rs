//! Deposit coordinator: quotes a crypto amount for a fiat deposit, opens a
//! provider invoice, and credits the ledger exactly once when the invoice
//! pays, whether the signal arrives by webhook or by polling.

use chrono::{Duration as ChronoDuration, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

use shared::constants::{BPS_DENOMINATOR, INVOICE_TTL_SECS, REFERRAL_COMMISSION_BPS};
use shared::{format_crypto_amount, Asset, Cents};

use crate::config::{CreditRatePolicy, DepositConfig};
use crate::cryptopay::{CreateInvoice, InvoiceStatus, PayProvider};
use crate::domain::{Deposit, DepositState, TxKind, TxMeta, UserId};
use crate::errors::{AppError, Result};
use crate::ledger::Ledger;
use crate::rates::RateOracle;

#[derive(Clone)]
pub struct DepositCoordinator {
    db: SqlitePool,
    ledger: Ledger,
    rates: RateOracle,
    provider: Arc<dyn PayProvider>,
    config: DepositConfig,
}

#[derive(Debug, Clone)]
pub struct DepositCredited {
    pub deposit: Deposit,
    pub credited: Cents,
    pub duplicate: bool,
}

impl DepositCoordinator {
    pub fn new(
        db: SqlitePool,
        ledger: Ledger,
        rates: RateOracle,
        provider: Arc<dyn PayProvider>,
        config: DepositConfig,
    ) -> Self {
        Self {
            db,
            ledger,
            rates,
            provider,
            config,
        }
    }

    /// Quote the crypto amount at the current rate and open an invoice.
    pub async fn quote_and_create(
        &self,
        user_id: UserId,
        asset: Asset,
        fiat: Cents,
    ) -> Result<Deposit> {
        if fiat < self.config.min || fiat > self.config.max {
            return Err(AppError::AmountOutOfBounds {
                min: self.config.min,
                max: self.config.max,
            });
        }

        let rate = self.rates.usd_rate(asset).await?;
        let crypto_amount = fiat.to_f64_dollars() / rate;
        let amount_str = format_crypto_amount(crypto_amount);

        let invoice = self
            .provider
            .create_invoice(CreateInvoice {
                asset,
                amount: amount_str,
                description: format!("Deposit {}", fiat),
                expires_in_secs: INVOICE_TTL_SECS as u64,
            })
            .await?;

        let now = Utc::now();
        let deposit = Deposit {
            id: Uuid::new_v4().to_string(),
            user_id,
            asset,
            crypto_amount,
            fiat_amount: fiat,
            rate_at_quote: rate,
            invoice_id: invoice.invoice_id.to_string(),
            pay_url: invoice.pay_url,
            state: DepositState::AwaitingPayment,
            created_at: now,
            expires_at: now + ChronoDuration::seconds(INVOICE_TTL_SECS),
            confirmed_at: None,
        };

        sqlx::query(
            "INSERT INTO deposits (
                id, user_id, asset, crypto_amount, fiat_amount, rate_at_quote,
                invoice_id, pay_url, state, created_at, expires_at, confirmed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )
        .bind(&deposit.id)
        .bind(deposit.user_id)
        .bind(deposit.asset)
        .bind(deposit.crypto_amount)
        .bind(deposit.fiat_amount)
        .bind(deposit.rate_at_quote)
        .bind(&deposit.invoice_id)
        .bind(&deposit.pay_url)
        .bind(deposit.state)
        .bind(deposit.created_at)
        .bind(deposit.expires_at)
        .bind(deposit.confirmed_at)
        .execute(&self.db)
        .await?;

        tracing::info!(
            user_id,
            asset = %asset,
            amount = %fiat,
            invoice_id = %deposit.invoice_id,
            "Deposit invoice created"
        );
        metrics::counter!("deposits_created_total", "asset" => asset.ticker()).increment(1);
        Ok(deposit)
    }

    /// Credit a paid invoice. Idempotent: the ledger's reference index
    /// collapses replays onto the original credit.
    pub async fn on_invoice_paid(&self, invoice_id: i64) -> Result<Option<DepositCredited>> {
        let invoice_key = invoice_id.to_string();
        let Some(deposit) = self.find_by_invoice(&invoice_key).await? else {
            tracing::warn!(invoice_id, "Paid invoice with no matching deposit");
            return Ok(None);
        };

        let credited = self.credit_amount(&deposit).await?;
        let rate_used = credited.to_f64_dollars() / deposit.crypto_amount;
        let reference = format!("invoice:{}", invoice_key);

        // Credit and state update commit together; a replay that finds the
        // reference already taken only heals the row state.
        let duplicate = if self.ledger.find_by_reference(&reference).await?.is_some() {
            self.mark_paid(&invoice_key).await?;
            true
        } else {
            let meta = TxMeta {
                crypto_asset: Some(deposit.asset),
                crypto_amount: Some(deposit.crypto_amount),
                exchange_rate: Some(rate_used),
                description: format!("Deposit via invoice {}", invoice_key),
                ..TxMeta::default()
            }
            .with_reference(reference.clone());

            let mut txn = self.ledger.begin(deposit.user_id).await?;
            match self
                .ledger
                .credit_in(
                    &mut txn,
                    credited,
                    TxKind::Deposit,
                    deposit.asset.ticker(),
                    meta,
                )
                .await
            {
                Ok(_) => {
                    sqlx::query(
                        "UPDATE deposits SET state = ?1, confirmed_at = ?2
                         WHERE invoice_id = ?3 AND state != ?1",
                    )
                    .bind(DepositState::Paid)
                    .bind(Utc::now())
                    .bind(&invoice_key)
                    .execute(txn.conn())
                    .await?;
                    self.ledger.commit(txn).await?;
                    false
                }
                Err(AppError::Storage(e))
                    if matches!(&e, sqlx::Error::Database(db) if db.is_unique_violation()) =>
                {
                    // A concurrent webhook won the reference; settle state.
                    drop(txn);
                    self.mark_paid(&invoice_key).await?;
                    true
                }
                Err(e) => return Err(e),
            }
        };

        if !duplicate {
            tracing::info!(
                user_id = deposit.user_id,
                invoice_id = %invoice_key,
                credited = %credited,
                "Deposit credited"
            );
            metrics::counter!("deposits_paid_total", "asset" => deposit.asset.ticker())
                .increment(1);
        }

        // The commission carries its own reference id, so replays that
        // never reached it the first time still pay it exactly once.
        self.pay_referral_commission(&deposit, credited, &invoice_key)
            .await?;

        Ok(Some(DepositCredited {
            deposit,
            credited,
            duplicate,
        }))
    }

    async fn mark_paid(&self, invoice_key: &str) -> Result<()> {
        sqlx::query(
            "UPDATE deposits SET state = ?1, confirmed_at = ?2
             WHERE invoice_id = ?3 AND state != ?1",
        )
        .bind(DepositState::Paid)
        .bind(Utc::now())
        .bind(invoice_key)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// 1% of a confirmed deposit goes to the referrer, if any. Idempotent
    /// through its own reference id, so callers replay it freely.
    async fn pay_referral_commission(
        &self,
        deposit: &Deposit,
        credited: Cents,
        invoice_key: &str,
    ) -> Result<()> {
        let referrer: Option<i64> =
            sqlx::query_scalar("SELECT referred_by FROM users WHERE id = ?1")
                .bind(deposit.user_id)
                .fetch_optional(&self.db)
                .await?
                .flatten();
        let Some(referrer_id) = referrer else {
            return Ok(());
        };

        let commission = credited
            .mul_ratio(REFERRAL_COMMISSION_BPS, BPS_DENOMINATOR)
            .map_err(|e| AppError::AccountingInvariant(e.to_string()))?;
        if !commission.is_positive() {
            return Ok(());
        }

        let meta = TxMeta::described(format!("Referral commission from user {}", deposit.user_id))
            .with_reference(format!("ref:invoice:{}", invoice_key));
        match self
            .ledger
            .credit(
                referrer_id,
                commission,
                TxKind::ReferralCommission,
                "referral",
                meta,
            )
            .await
        {
            Ok(_) => Ok(()),
            // A vanished referrer must not block the deposit.
            Err(AppError::NotFound(_)) | Err(AppError::UserBanned) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Poll a user's open deposits against the provider: credit paid ones,
    /// expire dead ones.
    pub async fn check_open_deposits(&self, user_id: UserId) -> Result<Vec<DepositCredited>> {
        let open = sqlx::query_as::<_, Deposit>(
            "SELECT * FROM deposits WHERE user_id = ?1 AND state = ?2",
        )
        .bind(user_id)
        .bind(DepositState::AwaitingPayment)
        .fetch_all(&self.db)
        .await?;

        let mut credited = Vec::new();
        for deposit in open {
            let invoice_id: i64 = deposit
                .invoice_id
                .parse()
                .map_err(|_| AppError::AccountingInvariant("bad invoice id".into()))?;
            match self.provider.get_invoice(invoice_id).await {
                Ok(invoice) => match invoice.status {
                    InvoiceStatus::Paid => {
                        if let Some(result) = self.on_invoice_paid(invoice_id).await? {
                            credited.push(result);
                        }
                    }
                    InvoiceStatus::Expired => {
                        self.mark_expired(&deposit.invoice_id).await?;
                    }
                    InvoiceStatus::Active => {}
                },
                Err(e) => {
                    tracing::warn!(invoice_id, error = %e, "Invoice status check failed");
                }
            }
        }
        Ok(credited)
    }

    async fn mark_expired(&self, invoice_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE deposits SET state = ?1 WHERE invoice_id = ?2 AND state = ?3",
        )
        .bind(DepositState::Expired)
        .bind(invoice_id)
        .bind(DepositState::AwaitingPayment)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn find_by_invoice(&self, invoice_id: &str) -> Result<Option<Deposit>> {
        let deposit = sqlx::query_as::<_, Deposit>("SELECT * FROM deposits WHERE invoice_id = ?1")
            .bind(invoice_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(deposit)
    }

    /// Cents to credit for a paid deposit, per the configured rate policy.
    async fn credit_amount(&self, deposit: &Deposit) -> Result<Cents> {
        match self.config.credit_rate {
            CreditRatePolicy::Quote => Ok(deposit.fiat_amount),
            CreditRatePolicy::Confirmation => match self.rates.usd_rate(deposit.asset).await {
                Ok(rate) => Cents::from_f64_dollars(deposit.crypto_amount * rate)
                    .map_err(|e| AppError::AccountingInvariant(e.to_string())),
                // Rate outage at confirmation falls back to the quote.
                Err(AppError::RateUnavailable) => Ok(deposit.fiat_amount),
                Err(e) => Err(e),
            },
        }
    }
}

/// Expire invoices the provider never resolved. Runs forever.
pub async fn run_expiry_sweep(db: SqlitePool) {
    let mut tick = tokio::time::interval(std::time::Duration::from_secs(60));
    loop {
        tick.tick().await;
        let result = sqlx::query(
            "UPDATE deposits SET state = ?1 WHERE state = ?2 AND expires_at < ?3",
        )
        .bind(DepositState::Expired)
        .bind(DepositState::AwaitingPayment)
        .bind(Utc::now())
        .execute(&db)
        .await;

        match result {
            Ok(done) if done.rows_affected() > 0 => {
                tracing::info!(count = done.rows_affected(), "Expired stale deposits");
                metrics::counter!("deposits_expired_total").increment(done.rows_affected());
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "Deposit expiry sweep failed"),
        }
    }
}

//! Withdrawal lifecycle: validation, atomic debit, dispatch, refund on
//! terminal failure, and confirmation polling.

mod common;

use async_trait::async_trait;
use std::sync::Arc;

use bot::cryptopay::{
    CreateInvoice, CreateTransfer, ExchangeRate, Invoice, PayProvider, ProviderError, Transfer,
};
use bot::domain::WithdrawalState;
use bot::errors::AppError;
use bot::withdrawals::WithdrawalCoordinator;
use shared::{Asset, Cents};

use common::{seed_user, test_state, test_state_with, LTC_ADDR, SOL_ADDR, TON_ADDR};

#[tokio::test]
async fn test_request_debits_full_amount_with_fee() {
    let state = test_state().await;
    seed_user(&state, 1, 100).await;

    let withdrawal = state
        .withdrawals
        .request(1, Asset::Ltc, Cents::from_dollars(50), LTC_ADDR)
        .await
        .unwrap();

    // 2% fee on $50.
    assert_eq!(withdrawal.fee, Cents::from_dollars(1));
    assert_eq!(withdrawal.net_fiat, Cents::from_dollars(49));
    assert_eq!(withdrawal.state, WithdrawalState::Pending);
    // Demo LTC rate $70: $49 net buys 0.7 LTC.
    assert!((withdrawal.net_crypto - 0.7).abs() < 1e-9);

    let user = state.users.find(1).await.unwrap().unwrap();
    assert_eq!(user.balance, Cents::from_dollars(50));
    assert_eq!(user.total_withdrawn, Cents::from_dollars(50));
}

#[tokio::test]
async fn test_invalid_address_rejected_without_debit() {
    let state = test_state().await;
    seed_user(&state, 1, 100).await;

    for (asset, bad) in [
        (Asset::Ltc, "not-an-address"),
        (Asset::Ltc, TON_ADDR),
        (Asset::Ton, SOL_ADDR),
        (Asset::Sol, "0OIl0OIl0OIl0OIl0OIl0OIl0OIl0OIl"),
    ] {
        let result = state
            .withdrawals
            .request(1, asset, Cents::from_dollars(10), bad)
            .await;
        assert!(matches!(
            result.unwrap_err(),
            AppError::InvalidAddress { .. }
        ));
    }

    let user = state.users.find(1).await.unwrap().unwrap();
    assert_eq!(user.balance, Cents::from_dollars(100));
}

#[tokio::test]
async fn test_insufficient_funds_rejected() {
    let state = test_state().await;
    seed_user(&state, 1, 5).await;

    let result = state
        .withdrawals
        .request(1, Asset::Ltc, Cents::from_dollars(50), LTC_ADDR)
        .await;
    assert!(matches!(result.unwrap_err(), AppError::InsufficientFunds));
}

#[tokio::test]
async fn test_daily_cap_enforced() {
    let state = test_state_with(|config| {
        config.withdrawals.daily_max = Cents::from_dollars(60);
    })
    .await;
    seed_user(&state, 1, 200).await;

    state
        .withdrawals
        .request(1, Asset::Ltc, Cents::from_dollars(40), LTC_ADDR)
        .await
        .unwrap();

    let over = state
        .withdrawals
        .request(1, Asset::Ltc, Cents::from_dollars(40), LTC_ADDR)
        .await;
    assert!(matches!(over.unwrap_err(), AppError::LimitExceeded(_)));
}

#[tokio::test]
async fn test_concurrent_requests_cannot_exceed_daily_cap() {
    let state = test_state_with(|config| {
        config.withdrawals.daily_max = Cents::from_dollars(60);
    })
    .await;
    seed_user(&state, 1, 200).await;

    // Both requests pass the stateless validation before either inserts a
    // row; the cap check under the user lock must still admit only one.
    let (a, b) = tokio::join!(
        state
            .withdrawals
            .request(1, Asset::Ltc, Cents::from_dollars(40), LTC_ADDR),
        state
            .withdrawals
            .request(1, Asset::Ltc, Cents::from_dollars(40), LTC_ADDR),
    );
    assert_eq!(a.is_ok() as u32 + b.is_ok() as u32, 1);

    let user = state.users.find(1).await.unwrap().unwrap();
    assert_eq!(user.balance, Cents::from_dollars(160));
    assert_eq!(user.total_withdrawn, Cents::from_dollars(40));
}

#[tokio::test]
async fn test_concurrent_requests_respect_cooldown() {
    let state = test_state_with(|config| {
        config.withdrawals.cooldown_secs = 300;
    })
    .await;
    seed_user(&state, 1, 100).await;

    let (a, b) = tokio::join!(
        state
            .withdrawals
            .request(1, Asset::Ton, Cents::from_dollars(10), TON_ADDR),
        state
            .withdrawals
            .request(1, Asset::Ton, Cents::from_dollars(10), TON_ADDR),
    );
    assert_eq!(a.is_ok() as u32 + b.is_ok() as u32, 1);

    let user = state.users.find(1).await.unwrap().unwrap();
    assert_eq!(user.balance, Cents::from_dollars(90));
}

#[tokio::test]
async fn test_cooldown_enforced() {
    let state = test_state_with(|config| {
        config.withdrawals.cooldown_secs = 300;
    })
    .await;
    seed_user(&state, 1, 100).await;

    state
        .withdrawals
        .request(1, Asset::Ton, Cents::from_dollars(10), TON_ADDR)
        .await
        .unwrap();

    let again = state
        .withdrawals
        .request(1, Asset::Ton, Cents::from_dollars(10), TON_ADDR)
        .await;
    assert!(matches!(
        again.unwrap_err(),
        AppError::CooldownActive { .. }
    ));
}

#[tokio::test]
async fn test_dispatch_and_confirmation() {
    let state = test_state().await;
    seed_user(&state, 1, 100).await;

    let withdrawal = state
        .withdrawals
        .request(1, Asset::Sol, Cents::from_dollars(30), SOL_ADDR)
        .await
        .unwrap();

    assert!(state.withdrawals.dispatch_next().await.unwrap());
    let dispatched = state
        .withdrawals
        .find(&withdrawal.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(dispatched.state, WithdrawalState::Dispatched);
    assert!(dispatched.tx_hash.is_some());

    // Demo transfers report 6 confirmations immediately.
    state.withdrawals.poll_confirmations().await.unwrap();
    let confirmed = state
        .withdrawals
        .find(&withdrawal.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(confirmed.state, WithdrawalState::Confirmed);
    assert!(confirmed.confirmed_at.is_some());

    // Queue is empty now.
    assert!(!state.withdrawals.dispatch_next().await.unwrap());
}

/// Rates resolve, transfers time out, and the transfer lookup confirms
/// nothing ever landed.
struct TimingOutProvider;

#[async_trait]
impl PayProvider for TimingOutProvider {
    async fn create_invoice(&self, _req: CreateInvoice) -> Result<Invoice, ProviderError> {
        Err(ProviderError::Timeout)
    }

    async fn get_invoice(&self, _invoice_id: i64) -> Result<Invoice, ProviderError> {
        Err(ProviderError::Timeout)
    }

    async fn transfer(&self, _req: CreateTransfer) -> Result<Transfer, ProviderError> {
        Err(ProviderError::Timeout)
    }

    async fn get_transfer(&self, _spend_id: &str) -> Result<Transfer, ProviderError> {
        Err(ProviderError::NotFound)
    }

    async fn get_rates(&self) -> Result<Vec<ExchangeRate>, ProviderError> {
        Ok(vec![ExchangeRate {
            source: "LTC".into(),
            target: "USD".into(),
            rate: 70.0,
        }])
    }
}

#[tokio::test]
async fn test_timeout_dispatch_refunds_in_full() {
    let state = test_state().await;
    seed_user(&state, 1, 100).await;

    let withdrawals = WithdrawalCoordinator::new(
        state.db.clone(),
        state.ledger.clone(),
        state.rates.clone(),
        Arc::new(TimingOutProvider),
        state.config.withdrawals.clone(),
    );

    let withdrawal = withdrawals
        .request(1, Asset::Ltc, Cents::from_dollars(40), LTC_ADDR)
        .await
        .unwrap();
    let user = state.users.find(1).await.unwrap().unwrap();
    assert_eq!(user.balance, Cents::from_dollars(60));

    assert!(withdrawals.dispatch_next().await.unwrap());

    let failed = withdrawals.find(&withdrawal.id).await.unwrap().unwrap();
    assert_eq!(failed.state, WithdrawalState::Failed);
    assert!(failed.error_reason.is_some());

    // Full amount back, fee included.
    let user = state.users.find(1).await.unwrap().unwrap();
    assert_eq!(user.balance, Cents::from_dollars(100));
    assert_eq!(user.total_withdrawn, Cents::ZERO);

    // A second refund attempt must not double-credit.
    withdrawals
        .fail_and_refund(&failed, "retry of a settled failure")
        .await
        .unwrap();
    let user = state.users.find(1).await.unwrap().unwrap();
    assert_eq!(user.balance, Cents::from_dollars(100));
}

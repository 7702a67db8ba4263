//! Deposit lifecycle: quote, invoice, idempotent crediting, referral
//! commission, and webhook signature enforcement.

mod common;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use bot::domain::DepositState;
use bot::errors::AppError;
use bot::handlers::webhook::cryptopay_webhook;
use shared::{Asset, Cents};

use common::{seed_user, test_state};

#[tokio::test]
async fn test_quote_converts_at_current_rate() {
    let state = test_state().await;
    seed_user(&state, 1, 0).await;

    // Demo LTC rate is $70: $50 buys 0.71428571 LTC.
    let deposit = state
        .deposits
        .quote_and_create(1, Asset::Ltc, Cents::from_dollars(50))
        .await
        .unwrap();

    assert_eq!(deposit.state, DepositState::AwaitingPayment);
    assert_eq!(deposit.fiat_amount, Cents::from_dollars(50));
    assert_eq!(
        shared::format_crypto_amount(deposit.crypto_amount),
        "0.71428571"
    );
    assert!(deposit.expires_at > deposit.created_at);
}

#[tokio::test]
async fn test_paid_invoice_credits_exactly_once() {
    let state = test_state().await;
    seed_user(&state, 1, 0).await;

    let deposit = state
        .deposits
        .quote_and_create(1, Asset::Ltc, Cents::from_dollars(50))
        .await
        .unwrap();
    let invoice_id: i64 = deposit.invoice_id.parse().unwrap();

    let first = state
        .deposits
        .on_invoice_paid(invoice_id)
        .await
        .unwrap()
        .unwrap();
    assert!(!first.duplicate);
    assert_eq!(first.credited, Cents::from_dollars(50));

    // Webhook replay and a status poll both collapse onto the first credit.
    let replay = state
        .deposits
        .on_invoice_paid(invoice_id)
        .await
        .unwrap()
        .unwrap();
    assert!(replay.duplicate);

    let user = state.users.find(1).await.unwrap().unwrap();
    assert_eq!(user.balance, Cents::from_dollars(50));
    assert_eq!(user.total_deposited, Cents::from_dollars(50));

    let rows = sqlx::query_as::<_, bot::domain::Deposit>(
        "SELECT * FROM deposits WHERE invoice_id = ?1",
    )
    .bind(&deposit.invoice_id)
    .fetch_one(&state.db)
    .await
    .unwrap();
    assert_eq!(rows.state, DepositState::Paid);
    assert!(rows.confirmed_at.is_some());
}

#[tokio::test]
async fn test_bounds_rejected_before_invoice() {
    let state = test_state().await;
    seed_user(&state, 1, 0).await;

    let too_small = state
        .deposits
        .quote_and_create(1, Asset::Ton, Cents::new(50))
        .await;
    assert!(matches!(
        too_small.unwrap_err(),
        AppError::AmountOutOfBounds { .. }
    ));

    let too_big = state
        .deposits
        .quote_and_create(1, Asset::Ton, Cents::from_dollars(20_000))
        .await;
    assert!(matches!(
        too_big.unwrap_err(),
        AppError::AmountOutOfBounds { .. }
    ));
}

#[tokio::test]
async fn test_referrer_earns_commission_once() {
    let state = test_state().await;
    seed_user(&state, 10, 0).await; // referrer
    seed_user(&state, 11, 0).await;
    state.users.set_referrer(11, 10).await.unwrap();

    let deposit = state
        .deposits
        .quote_and_create(11, Asset::Sol, Cents::from_dollars(50))
        .await
        .unwrap();
    let invoice_id: i64 = deposit.invoice_id.parse().unwrap();

    state.deposits.on_invoice_paid(invoice_id).await.unwrap();
    state.deposits.on_invoice_paid(invoice_id).await.unwrap();

    let referrer = state.users.find(10).await.unwrap().unwrap();
    // 1% of $50, paid once despite the replay.
    assert_eq!(referrer.balance, Cents::new(50));
}

#[tokio::test]
async fn test_replay_heals_unpaid_row_without_double_credit() {
    let state = test_state().await;
    seed_user(&state, 1, 0).await;

    let deposit = state
        .deposits
        .quote_and_create(1, Asset::Ltc, Cents::from_dollars(50))
        .await
        .unwrap();
    let invoice_id: i64 = deposit.invoice_id.parse().unwrap();
    state.deposits.on_invoice_paid(invoice_id).await.unwrap();

    // Force the row back to awaiting, as if the state write never landed.
    sqlx::query("UPDATE deposits SET state = 'awaiting_payment', confirmed_at = NULL WHERE invoice_id = ?1")
        .bind(&deposit.invoice_id)
        .execute(&state.db)
        .await
        .unwrap();

    let replay = state
        .deposits
        .on_invoice_paid(invoice_id)
        .await
        .unwrap()
        .unwrap();
    assert!(replay.duplicate);

    let row = sqlx::query_as::<_, bot::domain::Deposit>(
        "SELECT * FROM deposits WHERE invoice_id = ?1",
    )
    .bind(&deposit.invoice_id)
    .fetch_one(&state.db)
    .await
    .unwrap();
    assert_eq!(row.state, DepositState::Paid);

    let user = state.users.find(1).await.unwrap().unwrap();
    assert_eq!(user.balance, Cents::from_dollars(50));
}

#[tokio::test]
async fn test_commission_recovered_on_replay() {
    let state = test_state().await;
    seed_user(&state, 10, 0).await; // referrer
    seed_user(&state, 11, 0).await;
    state.users.set_referrer(11, 10).await.unwrap();

    let deposit = state
        .deposits
        .quote_and_create(11, Asset::Sol, Cents::from_dollars(50))
        .await
        .unwrap();
    let invoice_id: i64 = deposit.invoice_id.parse().unwrap();

    // Credit landed but the commission never ran (interrupted handler).
    state
        .ledger
        .credit(
            11,
            Cents::from_dollars(50),
            bot::domain::TxKind::Deposit,
            "SOL",
            bot::domain::TxMeta::described("deposit")
                .with_reference(format!("invoice:{}", deposit.invoice_id)),
        )
        .await
        .unwrap();

    let replay = state
        .deposits
        .on_invoice_paid(invoice_id)
        .await
        .unwrap()
        .unwrap();
    assert!(replay.duplicate);

    let referrer = state.users.find(10).await.unwrap().unwrap();
    assert_eq!(referrer.balance, Cents::new(50));
}

#[tokio::test]
async fn test_unknown_invoice_is_ignored() {
    let state = test_state().await;
    let result = state.deposits.on_invoice_paid(99_999).await.unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn test_poll_credits_open_deposit() {
    let state = test_state().await;
    seed_user(&state, 1, 0).await;

    state
        .deposits
        .quote_and_create(1, Asset::Ltc, Cents::from_dollars(25))
        .await
        .unwrap();

    // The demo provider reports invoices paid on first poll.
    let credited = state.deposits.check_open_deposits(1).await.unwrap();
    assert_eq!(credited.len(), 1);

    let user = state.users.find(1).await.unwrap().unwrap();
    assert_eq!(user.balance, Cents::from_dollars(25));
}

fn sign_body(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

#[tokio::test]
async fn test_webhook_signature_enforced() {
    let state = test_state().await;
    seed_user(&state, 1, 0).await;

    let deposit = state
        .deposits
        .quote_and_create(1, Asset::Ltc, Cents::from_dollars(50))
        .await
        .unwrap();

    let body = serde_json::json!({
        "update_id": 1,
        "update_type": "invoice_paid",
        "payload": {
            "invoice_id": deposit.invoice_id.parse::<i64>().unwrap(),
            "status": "paid",
            "asset": "LTC",
            "amount": "0.71428571",
            "pay_url": deposit.pay_url,
            "created_at": null,
            "paid_at": null,
        }
    })
    .to_string();

    // Tampered signature: rejected, nothing credited.
    let mut headers = HeaderMap::new();
    headers.insert(
        "Crypto-Pay-API-Signature",
        sign_body("wrong-secret", body.as_bytes()).parse().unwrap(),
    );
    let status = cryptopay_webhook(
        State(state.clone()),
        headers,
        Bytes::from(body.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let user = state.users.find(1).await.unwrap().unwrap();
    assert_eq!(user.balance, Cents::ZERO);

    // Valid signature: 200 and credited.
    let mut headers = HeaderMap::new();
    headers.insert(
        "Crypto-Pay-API-Signature",
        sign_body("test-webhook-secret", body.as_bytes())
            .parse()
            .unwrap(),
    );
    let status = cryptopay_webhook(State(state.clone()), headers, Bytes::from(body)).await;
    assert_eq!(status, StatusCode::OK);
    let user = state.users.find(1).await.unwrap().unwrap();
    assert_eq!(user.balance, Cents::from_dollars(50));
}

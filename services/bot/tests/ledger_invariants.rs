//! Ledger accounting invariants: non-negative balances under concurrency,
//! contiguous balance chains, idempotent references, and house mirroring.

mod common;

use bot::domain::{GameKind, NewGameSession, ResultLabel, TxKind, TxMeta};
use bot::errors::AppError;
use bot::house;
use serde_json::json;
use shared::Cents;

use common::{seed_user, test_state, ADMIN_ID};

#[tokio::test]
async fn test_concurrent_debits_never_overdraw() {
    let state = test_state().await;
    seed_user(&state, 1, 15).await;

    let a = state.ledger.debit(
        1,
        Cents::from_dollars(10),
        TxKind::Bet,
        "game/dice-predict",
        TxMeta::described("bet a"),
    );
    let b = state.ledger.debit(
        1,
        Cents::from_dollars(10),
        TxKind::Bet,
        "game/dice-predict",
        TxMeta::described("bet b"),
    );
    let (ra, rb) = tokio::join!(a, b);

    let succeeded = [&ra, &rb].iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 1, "exactly one of two competing bets may land");
    let rejected = [ra, rb].into_iter().find(|r| r.is_err()).unwrap();
    assert!(matches!(
        rejected.unwrap_err(),
        AppError::InsufficientFunds
    ));

    let user = state.users.find(1).await.unwrap().unwrap();
    assert_eq!(user.balance, Cents::from_dollars(5));
}

#[tokio::test]
async fn test_balance_chain_is_contiguous() {
    let state = test_state().await;
    seed_user(&state, 1, 100).await;

    state
        .ledger
        .debit(
            1,
            Cents::from_dollars(30),
            TxKind::Bet,
            "game/slots",
            TxMeta::described("bet"),
        )
        .await
        .unwrap();
    state
        .ledger
        .credit(
            1,
            Cents::from_dollars(12),
            TxKind::Win,
            "game/slots",
            TxMeta::described("win"),
        )
        .await
        .unwrap();
    state
        .ledger
        .adjust(1, Cents::from_dollars(-2), "test correction", ADMIN_ID)
        .await
        .unwrap();

    let rows = state.history.recent_transactions(1, 50).await.unwrap();
    let mut chronological = rows;
    chronological.reverse();

    assert_eq!(chronological.len(), 4);
    for pair in chronological.windows(2) {
        assert_eq!(
            pair[0].balance_after, pair[1].balance_before,
            "balance chain must be gap-free"
        );
        assert_eq!(
            pair[1].balance_after,
            pair[1].balance_before + pair[1].amount
        );
        assert!(!pair[1].balance_after.is_negative());
    }

    let user = state.users.find(1).await.unwrap().unwrap();
    assert_eq!(
        user.balance,
        chronological.last().unwrap().balance_after,
        "stored balance must equal the last chain entry"
    );
    assert_eq!(user.balance, Cents::from_dollars(80));
}

#[tokio::test]
async fn test_duplicate_reference_credits_once() {
    let state = test_state().await;
    seed_user(&state, 1, 0).await;

    let meta = || TxMeta::described("webhook credit").with_reference("invoice:777");
    let first = state
        .ledger
        .credit(1, Cents::from_dollars(50), TxKind::Deposit, "LTC", meta())
        .await
        .unwrap();
    let replay = state
        .ledger
        .credit(1, Cents::from_dollars(50), TxKind::Deposit, "LTC", meta())
        .await
        .unwrap();

    assert!(!first.duplicate);
    assert!(replay.duplicate);
    assert_eq!(replay.tx.id, first.tx.id);

    let user = state.users.find(1).await.unwrap().unwrap();
    assert_eq!(user.balance, Cents::from_dollars(50));
}

#[tokio::test]
async fn test_insufficient_debit_leaves_no_row() {
    let state = test_state().await;
    seed_user(&state, 1, 5).await;

    let result = state
        .ledger
        .debit(
            1,
            Cents::from_dollars(10),
            TxKind::Bet,
            "game/slots",
            TxMeta::described("too big"),
        )
        .await;
    assert!(matches!(result.unwrap_err(), AppError::InsufficientFunds));

    let rows = state.history.recent_transactions(1, 10).await.unwrap();
    assert_eq!(rows.len(), 1, "only the seed deposit may exist");
    let user = state.users.find(1).await.unwrap().unwrap();
    assert_eq!(user.balance, Cents::from_dollars(5));
}

#[tokio::test]
async fn test_settlement_mirrors_house_books() {
    let state = test_state().await;
    seed_user(&state, 1, 10).await;

    let session = NewGameSession {
        game_kind: GameKind::DicePredict,
        variant: None,
        bet_amount: Cents::from_dollars(5),
        win_amount: Cents::new(1_425),
        multiplier_bps: 28_500,
        game_data: json!({"selections": [0, 2], "value": 1}),
        result_label: ResultLabel::Win,
    };
    let settlement = state.ledger.atomic_bet_settlement(1, session).await.unwrap();
    assert_eq!(settlement.new_balance, Cents::new(1_925));

    let book = house::fetch(&state.db).await.unwrap();
    // Seed deposit $10, stake $5 in, win $14.25 out.
    assert_eq!(book.total_deposits, Cents::from_dollars(10));
    assert_eq!(book.total_player_losses, Cents::from_dollars(5));
    assert_eq!(book.total_player_wins, Cents::new(1_425));
    assert_eq!(book.balance, Cents::new(1_000 + 500 - 1_425));
    assert_eq!(book.games_played_today, 1);
}

#[tokio::test]
async fn test_adjust_requires_admin() {
    let state = test_state().await;
    seed_user(&state, 1, 10).await;

    let denied = state
        .ledger
        .adjust(1, Cents::from_dollars(5), "nice try", 42)
        .await;
    assert!(matches!(denied.unwrap_err(), AppError::Unauthorized(_)));

    let granted = state
        .ledger
        .adjust(1, Cents::from_dollars(5), "goodwill", ADMIN_ID)
        .await
        .unwrap();
    assert_eq!(granted.balance_after, Cents::from_dollars(15));
}

#[tokio::test]
async fn test_banned_user_cannot_transact() {
    let state = test_state().await;
    seed_user(&state, 1, 10).await;
    state.users.set_banned(1, true).await.unwrap();

    let result = state
        .ledger
        .debit(
            1,
            Cents::from_dollars(1),
            TxKind::Bet,
            "game/slots",
            TxMeta::described("bet"),
        )
        .await;
    assert!(matches!(result.unwrap_err(), AppError::UserBanned));
}

#[tokio::test]
async fn test_idle_user_locks_are_evicted() {
    let state = test_state().await;
    for user_id in 1..=5 {
        seed_user(&state, user_id, 1).await;
    }

    // No transaction is open, so every entry is idle.
    assert_eq!(state.ledger.evict_idle_locks(), 5);
    assert_eq!(state.ledger.evict_idle_locks(), 0);

    // Eviction must not break serialization for later operations.
    state
        .ledger
        .debit(
            1,
            Cents::new(50),
            TxKind::Bet,
            "game/slots",
            TxMeta::described("post-sweep bet"),
        )
        .await
        .unwrap();
    let user = state.users.find(1).await.unwrap().unwrap();
    assert_eq!(user.balance, Cents::new(50));
}

#[tokio::test]
async fn test_events_emitted_after_commit() {
    let state = test_state().await;
    seed_user(&state, 1, 0).await;

    let mut events = state.ledger.subscribe();
    state
        .ledger
        .credit(
            1,
            Cents::from_dollars(20),
            TxKind::Deposit,
            "TON",
            TxMeta::described("deposit"),
        )
        .await
        .unwrap();

    let event = events.recv().await.unwrap();
    assert_eq!(event.user_id, 1);
    assert_eq!(event.kind, TxKind::Deposit);
    assert_eq!(event.amount, Cents::from_dollars(20));
    assert_eq!(event.balance_after, Cents::from_dollars(20));
}

//! Chat surface end to end: commands, typed prompts, and animation
//! settlement, without a chat platform attached.

mod common;

use bot::commands::{handle_animation, handle_command, handle_text, parse_command, Reply};
use bot::errors::AppError;
use shared::Cents;

use common::{seed_user, test_state, ADMIN_ID};

async fn run(state: &bot::state::AppState, user_id: i64, text: &str) -> Result<Reply, AppError> {
    match parse_command(text) {
        Some(Ok(command)) => handle_command(state, user_id, "tester", command).await,
        Some(Err(e)) => Err(e),
        None => handle_text(state, user_id, text).await,
    }
}

fn reply_text(reply: &Reply) -> &str {
    match reply {
        Reply::Text(t) => t,
        Reply::Prompt { text, .. } => text,
        Reply::SendAnimation { text, .. } => text,
    }
}

#[tokio::test]
async fn test_start_and_balance() {
    let state = test_state().await;

    let reply = run(&state, 1, "/start").await.unwrap();
    assert!(reply_text(&reply).contains("Welcome"));

    seed_user(&state, 1, 25).await;
    let reply = run(&state, 1, "/balance").await.unwrap();
    assert!(reply_text(&reply).contains("$25.00"));
}

#[tokio::test]
async fn test_referral_linked_on_start() {
    let state = test_state().await;
    run(&state, 1, "/start").await.unwrap();
    let code = state
        .users
        .find(1)
        .await
        .unwrap()
        .unwrap()
        .referral_code
        .unwrap();

    run(&state, 2, &format!("/start {}", code)).await.unwrap();
    let referred = state.users.find(2).await.unwrap().unwrap();
    assert_eq!(referred.referred_by, Some(1));
}

#[tokio::test]
async fn test_referral_command_counts_referred() {
    let state = test_state().await;
    run(&state, 1, "/start").await.unwrap();
    let code = state
        .users
        .find(1)
        .await
        .unwrap()
        .unwrap()
        .referral_code
        .unwrap();
    run(&state, 2, &format!("/start {}", code)).await.unwrap();

    let reply = run(&state, 1, "/referral").await.unwrap();
    let text = reply_text(&reply);
    assert!(text.contains(&code));
    assert!(text.contains("Referred players: 1"));
}

#[tokio::test]
async fn test_deposit_prompt_flow() {
    let state = test_state().await;
    seed_user(&state, 1, 0).await;

    let reply = run(&state, 1, "/deposit LTC").await.unwrap();
    assert!(matches!(reply, Reply::Prompt { .. }));

    let reply = run(&state, 1, "50").await.unwrap();
    let text = reply_text(&reply);
    assert!(text.contains("0.71428571"));
    assert!(text.contains("LTC"));
}

#[tokio::test]
async fn test_animated_bet_flow_settles_on_value() {
    let state = test_state().await;
    seed_user(&state, 1, 20).await;

    run(&state, 1, "/dice 3").await.unwrap();
    let reply = run(&state, 1, "5").await.unwrap();
    assert!(matches!(reply, Reply::SendAnimation { emoji: "\u{1F3B2}", .. }));

    // Stake already gone while the animation plays.
    let user = state.users.find(1).await.unwrap().unwrap();
    assert_eq!(user.balance, Cents::from_dollars(15));

    // Platform reports the die landed on 3: the picked outcome.
    let reply = handle_animation(&state, 1, Some(3)).await.unwrap();
    let text = reply_text(&reply);
    assert!(text.contains("Won $28.50"), "got: {}", text);

    let user = state.users.find(1).await.unwrap().unwrap();
    assert_eq!(user.balance, Cents::new(4_350));
}

#[tokio::test]
async fn test_failed_settlement_keeps_round_claimable() {
    let state = test_state().await;
    seed_user(&state, 1, 20).await;

    run(&state, 1, "/dice 3").await.unwrap();
    run(&state, 1, "5").await.unwrap();

    // Storage down when the value arrives: the error surfaces, but the
    // debited round must stay claimable for a retry.
    state.db.close().await;
    let result = handle_animation(&state, 1, Some(3)).await;
    assert!(result.is_err());
    assert!(matches!(
        state.sessions.peek(1),
        Some(bot::sessions::PromptKind::AwaitRoll { .. })
    ));
}

#[tokio::test]
async fn test_weekly_bonus_claimed_once_per_interval() {
    let state = test_state().await;
    seed_user(&state, 1, 0).await;

    let reply = run(&state, 1, "/bonus").await.unwrap();
    assert!(reply_text(&reply).contains("$10.00"));

    let user = state.users.find(1).await.unwrap().unwrap();
    assert_eq!(user.balance, Cents::from_dollars(10));
    assert!(user.last_bonus_claim.is_some());

    // Second claim inside the window pays nothing.
    let reply = run(&state, 1, "/bonus").await.unwrap();
    assert!(reply_text(&reply).contains("already claimed"));
    let user = state.users.find(1).await.unwrap().unwrap();
    assert_eq!(user.balance, Cents::from_dollars(10));

    // The house books the payout.
    let house = bot::house::fetch(&state.db).await.unwrap();
    assert_eq!(house.total_bonuses_paid, Cents::from_dollars(10));
}

#[tokio::test]
async fn test_weekly_bonus_available_after_interval() {
    let state = test_state().await;
    seed_user(&state, 1, 0).await;

    run(&state, 1, "/bonus").await.unwrap();
    // Backdate the claim past the interval.
    sqlx::query("UPDATE users SET last_bonus_claim = ?1 WHERE id = 1")
        .bind(chrono::Utc::now() - chrono::Duration::days(8))
        .execute(&state.db)
        .await
        .unwrap();

    let reply = run(&state, 1, "/bonus").await.unwrap();
    assert!(reply_text(&reply).contains("credited"));
    let user = state.users.find(1).await.unwrap().unwrap();
    assert_eq!(user.balance, Cents::from_dollars(20));
}

#[tokio::test]
async fn test_stale_amount_reply_rejected() {
    let state = test_state().await;
    seed_user(&state, 1, 20).await;

    run(&state, 1, "/dice 3").await.unwrap();
    // A second command supersedes the bet prompt.
    run(&state, 1, "/deposit TON").await.unwrap();

    // The reply now feeds the deposit flow, not the bet.
    let reply = run(&state, 1, "5").await.unwrap();
    assert!(reply_text(&reply).contains("TON"));
    let user = state.users.find(1).await.unwrap().unwrap();
    assert_eq!(user.balance, Cents::from_dollars(20), "no bet was placed");
}

#[tokio::test]
async fn test_admin_adjust_flow() {
    let state = test_state().await;
    seed_user(&state, 1, 10).await;
    seed_user(&state, ADMIN_ID, 0).await;

    // Non-admin blocked outright.
    let denied = run(&state, 1, "/adjust 1").await;
    assert!(matches!(denied.unwrap_err(), AppError::Unauthorized(_)));

    run(&state, ADMIN_ID, "/adjust 1").await.unwrap();
    let reply = run(&state, ADMIN_ID, "-3").await.unwrap();
    assert!(reply_text(&reply).contains("$7.00"));

    let user = state.users.find(1).await.unwrap().unwrap();
    assert_eq!(user.balance, Cents::from_dollars(7));
}

#[tokio::test]
async fn test_unknown_command_and_plain_text() {
    let state = test_state().await;
    seed_user(&state, 1, 0).await;

    assert!(run(&state, 1, "/abracadabra").await.is_err());

    let reply = run(&state, 1, "hello there").await.unwrap();
    assert!(reply_text(&reply).contains("/help"));
}

//! Chat command surface: parses slash commands and prompt replies, drives
//! the coordinators, and renders plain-text replies. Transport-agnostic so
//! tests can run the whole flow without a chat platform.

use shared::constants::BET_MIN_CENTS;
use shared::{Asset, Cents};

use crate::domain::{GameKind, UserId};
use crate::errors::{AppError, Result};
use crate::games::{descriptor_for, PredictionBet};
use crate::ledger::BonusClaim;
use crate::sessions::{PromptId, PromptKind};
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start { referral: Option<String> },
    Help,
    Balance,
    Stats,
    History,
    Referral,
    Bonus,
    Deposit { asset: Asset },
    Withdraw { asset: Asset },
    Predict { kind: GameKind, selections: Vec<usize> },
    Coinflip { pick: usize },
    Slots,
    Duel { kind: GameKind },
    Adjust { target: UserId },
    Ban { target: UserId },
    Unban { target: UserId },
}

#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    /// Waiting on a typed follow-up from the user.
    Prompt { id: PromptId, text: String },
    /// Caller should send the animated emoji and feed back its value.
    SendAnimation { emoji: &'static str, text: String },
}

impl Reply {
    fn text(s: impl Into<String>) -> Self {
        Reply::Text(s.into())
    }
}

/// Parse a slash command. `None` means the text is not a command and, if a
/// prompt is live, should be treated as a reply to it.
pub fn parse_command(text: &str) -> Option<Result<Command>> {
    let mut parts = text.split_whitespace();
    let head = parts.next()?;
    if !head.starts_with('/') {
        return None;
    }
    let args: Vec<&str> = parts.collect();

    let parsed = match head.trim_start_matches('/').to_ascii_lowercase().as_str() {
        "start" => Ok(Command::Start {
            referral: args.first().map(|s| s.to_string()),
        }),
        "help" => Ok(Command::Help),
        "balance" => Ok(Command::Balance),
        "stats" => Ok(Command::Stats),
        "history" => Ok(Command::History),
        "referral" => Ok(Command::Referral),
        "bonus" => Ok(Command::Bonus),
        "deposit" => parse_asset(&args).map(|asset| Command::Deposit { asset }),
        "withdraw" => parse_asset(&args).map(|asset| Command::Withdraw { asset }),
        "dice" => parse_selections(GameKind::DicePredict, &args),
        "basketball" => parse_selections(GameKind::BasketballPredict, &args),
        "soccer" => parse_selections(GameKind::SoccerPredict, &args),
        "bowling" => parse_selections(GameKind::BowlingPredict, &args),
        "darts" => parse_selections(GameKind::DartsPredict, &args),
        "coinflip" => match args.first().map(|s| s.to_ascii_lowercase()) {
            Some(ref s) if s == "heads" => Ok(Command::Coinflip { pick: 0 }),
            Some(ref s) if s == "tails" => Ok(Command::Coinflip { pick: 1 }),
            _ => Err(AppError::InvalidSelection(
                "usage: /coinflip heads|tails".into(),
            )),
        },
        "slots" => Ok(Command::Slots),
        "duel" => match args.first().map(|s| s.to_ascii_lowercase()) {
            Some(ref s) if s == "dice" => Ok(Command::Duel {
                kind: GameKind::Dice1v1,
            }),
            Some(ref s) if s == "basketball" => Ok(Command::Duel {
                kind: GameKind::Basketball1v1,
            }),
            _ => Err(AppError::InvalidSelection(
                "usage: /duel dice|basketball".into(),
            )),
        },
        "adjust" => parse_user_id(&args).map(|target| Command::Adjust { target }),
        "ban" => parse_user_id(&args).map(|target| Command::Ban { target }),
        "unban" => parse_user_id(&args).map(|target| Command::Unban { target }),
        _ => Err(AppError::InvalidSelection(format!(
            "unknown command {}",
            head
        ))),
    };
    Some(parsed)
}

fn parse_asset(args: &[&str]) -> Result<Asset> {
    args.first()
        .ok_or_else(|| AppError::InvalidSelection("asset required: LTC, TON or SOL".into()))?
        .parse::<Asset>()
        .map_err(|e| AppError::InvalidSelection(e.to_string()))
}

fn parse_user_id(args: &[&str]) -> Result<UserId> {
    args.first()
        .and_then(|s| s.parse::<UserId>().ok())
        .ok_or_else(|| AppError::InvalidSelection("numeric user id required".into()))
}

/// Selections arrive 1-based in chat; stored 0-based.
fn parse_selections(kind: GameKind, args: &[&str]) -> Result<Command> {
    let descriptor = descriptor_for(kind)
        .ok_or_else(|| AppError::InvalidSelection(format!("{} is not playable", kind)))?;
    if args.is_empty() {
        return Err(AppError::InvalidSelection(format!(
            "pick outcomes 1-{}",
            descriptor.options.len()
        )));
    }
    let mut selections = Vec::with_capacity(args.len());
    for arg in args {
        let n: usize = arg.parse().map_err(|_| {
            AppError::InvalidSelection(format!("{} is not an outcome number", arg))
        })?;
        if n < 1 || n > descriptor.options.len() {
            return Err(AppError::InvalidSelection(format!(
                "outcome {} out of range 1-{}",
                n,
                descriptor.options.len()
            )));
        }
        selections.push(n - 1);
    }
    Ok(Command::Predict { kind, selections })
}

/// Parse a dollar amount reply: "5", "5.25", "$5.25".
pub fn parse_usd(text: &str) -> Result<Cents> {
    let cleaned = text.trim().trim_start_matches('$');
    let dollars: f64 = cleaned.parse().map_err(|_| {
        AppError::InvalidSelection(format!("{} is not an amount", text.trim()))
    })?;
    Cents::from_f64_dollars(dollars)
        .map_err(|_| AppError::InvalidSelection(format!("{} is not an amount", text.trim())))
}

pub async fn handle_command(
    state: &AppState,
    user_id: UserId,
    display_name: &str,
    command: Command,
) -> Result<Reply> {
    match command {
        Command::Start { referral } => {
            let user = state.users.get_or_create(user_id, display_name).await?;
            if let Some(code) = referral {
                if let Some(referrer) = state.users.find_by_referral_code(&code).await? {
                    if state.users.set_referrer(user_id, referrer.id).await? {
                        tracing::info!(user_id, referrer = referrer.id, "Referral linked");
                    }
                }
            }
            Ok(Reply::text(format!(
                "Welcome, {}. Balance: {}. Your referral code: {}",
                user.display_name,
                user.balance,
                user.referral_code.as_deref().unwrap_or("-"),
            )))
        }
        Command::Help => Ok(Reply::text(
            "Commands: /balance /deposit /withdraw /dice /basketball /soccer /bowling /darts \
             /coinflip /slots /duel /stats /history /referral /bonus",
        )),
        Command::Balance => {
            let user = state.users.get_or_create(user_id, display_name).await?;
            Ok(Reply::text(format!("Balance: {}", user.balance)))
        }
        Command::Stats => {
            let user = state.users.get_or_create(user_id, display_name).await?;
            let mut lines = vec![format!(
                "Games: {} | Wagered: {} | Won: {} | Best win: {} | Streak: {} (max {})",
                user.games_played,
                user.total_wagered,
                user.total_won,
                user.biggest_win,
                user.current_win_streak,
                user.max_win_streak,
            )];
            for session in state.history.recent_sessions(user_id, 5).await? {
                lines.push(format!(
                    "{} {} bet {} won {}",
                    session.created_at.format("%m-%d %H:%M"),
                    session.game_kind,
                    session.bet_amount,
                    session.win_amount,
                ));
            }
            Ok(Reply::text(lines.join("\n")))
        }
        Command::Referral => {
            let user = state.users.get_or_create(user_id, display_name).await?;
            let referred = state.users.count_referred(user_id).await?;
            Ok(Reply::text(format!(
                "Your referral code: {}. Referred players: {}. You earn 1% of their deposits.",
                user.referral_code.as_deref().unwrap_or("-"),
                referred,
            )))
        }
        Command::Bonus => {
            state.users.get_or_create(user_id, display_name).await?;
            match state.ledger.claim_weekly_bonus(user_id).await? {
                BonusClaim::Granted(tx) => Ok(Reply::text(format!(
                    "Weekly bonus {} credited. Balance: {}",
                    tx.amount, tx.balance_after
                ))),
                BonusClaim::NotDue { next_at } => Ok(Reply::text(format!(
                    "Weekly bonus already claimed. Next one on {}",
                    next_at.format("%Y-%m-%d"),
                ))),
            }
        }
        Command::History => {
            let rows = state.history.recent_transactions(user_id, 10).await?;
            if rows.is_empty() {
                return Ok(Reply::text("No transactions yet"));
            }
            let lines: Vec<String> = rows
                .iter()
                .map(|tx| {
                    format!(
                        "{} {} {} -> {}",
                        tx.created_at.format("%m-%d %H:%M"),
                        tx.subkind,
                        tx.amount,
                        tx.balance_after
                    )
                })
                .collect();
            Ok(Reply::text(lines.join("\n")))
        }
        Command::Deposit { asset } => {
            state.users.get_or_create(user_id, display_name).await?;
            let id = state
                .sessions
                .prompt(user_id, PromptKind::DepositAmount { asset });
            Ok(Reply::Prompt {
                id,
                text: format!("How much USD to deposit via {}?", asset.ticker()),
            })
        }
        Command::Withdraw { asset } => {
            state.users.get_or_create(user_id, display_name).await?;
            let id = state
                .sessions
                .prompt(user_id, PromptKind::WithdrawAmount { asset });
            Ok(Reply::Prompt {
                id,
                text: format!("How much USD to withdraw as {}?", asset.ticker()),
            })
        }
        Command::Predict { kind, selections } => {
            state.users.get_or_create(user_id, display_name).await?;
            let id = state.sessions.prompt(
                user_id,
                PromptKind::BetAmount {
                    game: kind,
                    selections,
                },
            );
            Ok(Reply::Prompt {
                id,
                text: format!("Bet amount in USD (min {})?", Cents::new(BET_MIN_CENTS)),
            })
        }
        Command::Coinflip { pick } => {
            state.users.get_or_create(user_id, display_name).await?;
            let id = state.sessions.prompt(
                user_id,
                PromptKind::BetAmount {
                    game: GameKind::Coinflip,
                    selections: vec![pick],
                },
            );
            Ok(Reply::Prompt {
                id,
                text: "Bet amount in USD?".into(),
            })
        }
        Command::Slots => {
            state.users.get_or_create(user_id, display_name).await?;
            let id = state.sessions.prompt(
                user_id,
                PromptKind::BetAmount {
                    game: GameKind::Slots,
                    selections: Vec::new(),
                },
            );
            Ok(Reply::Prompt {
                id,
                text: "Bet amount in USD?".into(),
            })
        }
        Command::Duel { kind } => {
            state.users.get_or_create(user_id, display_name).await?;
            let id = state.sessions.prompt(
                user_id,
                PromptKind::BetAmount {
                    game: kind,
                    selections: Vec::new(),
                },
            );
            Ok(Reply::Prompt {
                id,
                text: "Bet amount in USD?".into(),
            })
        }
        Command::Adjust { target } => {
            if !state.config.is_admin(user_id) {
                return Err(AppError::Unauthorized("admin command".into()));
            }
            let id = state
                .sessions
                .prompt(user_id, PromptKind::AdminAdjust { target });
            Ok(Reply::Prompt {
                id,
                text: format!("Signed USD adjustment for user {}?", target),
            })
        }
        Command::Ban { target } => {
            if !state.config.is_admin(user_id) {
                return Err(AppError::Unauthorized("admin command".into()));
            }
            state.users.set_banned(target, true).await?;
            Ok(Reply::text(format!("User {} banned", target)))
        }
        Command::Unban { target } => {
            if !state.config.is_admin(user_id) {
                return Err(AppError::Unauthorized("admin command".into()));
            }
            state.users.set_banned(target, false).await?;
            Ok(Reply::text(format!("User {} unbanned", target)))
        }
    }
}

/// Non-command text: treat it as a reply to the live prompt, if any.
pub async fn handle_text(state: &AppState, user_id: UserId, text: &str) -> Result<Reply> {
    let Some(kind) = state.sessions.peek(user_id) else {
        return Ok(Reply::text("Send /help for the command list"));
    };

    match kind {
        PromptKind::DepositAmount { asset } => {
            let fiat = parse_usd(text)?;
            state.sessions.take(user_id, None)?;
            let deposit = state.deposits.quote_and_create(user_id, asset, fiat).await?;
            Ok(Reply::text(format!(
                "Pay {} {} within 1 hour: {}",
                shared::format_crypto_amount(deposit.crypto_amount),
                asset.ticker(),
                deposit.pay_url
            )))
        }
        PromptKind::WithdrawAmount { asset } => {
            let fiat = parse_usd(text)?;
            state.sessions.take(user_id, None)?;
            let id = state
                .sessions
                .prompt(user_id, PromptKind::WithdrawAddress { asset, fiat });
            Ok(Reply::Prompt {
                id,
                text: format!("Destination {} address?", asset.ticker()),
            })
        }
        PromptKind::WithdrawAddress { asset, fiat } => {
            let address = text.trim();
            state.sessions.take(user_id, None)?;
            let withdrawal = state
                .withdrawals
                .request(user_id, asset, fiat, address)
                .await?;
            Ok(Reply::text(format!(
                "Withdrawal accepted: {} ({} fee). Net {} {} to {}",
                withdrawal.fiat_amount,
                withdrawal.fee,
                shared::format_crypto_amount(withdrawal.net_crypto),
                asset.ticker(),
                withdrawal.destination_address
            )))
        }
        PromptKind::BetAmount { game, selections } => {
            let bet = parse_usd(text)?;
            state.sessions.take(user_id, None)?;
            start_round(state, user_id, game, selections, bet).await
        }
        PromptKind::AdminAdjust { target } => {
            let delta = parse_usd(text)?;
            state.sessions.take(user_id, None)?;
            let tx = state
                .ledger
                .adjust(target, delta, "manual adjustment", user_id)
                .await?;
            Ok(Reply::text(format!(
                "Adjusted user {} by {}; balance {}",
                target, tx.amount, tx.balance_after
            )))
        }
        PromptKind::AwaitRoll { .. } => Ok(Reply::text(
            "Round in progress; waiting for the animation result",
        )),
    }
}

async fn start_round(
    state: &AppState,
    user_id: UserId,
    game: GameKind,
    selections: Vec<usize>,
    bet: Cents,
) -> Result<Reply> {
    match game {
        GameKind::Slots => {
            let outcome = state.engine.play_slots(user_id, bet).await?;
            Ok(Reply::text(format!(
                "{} {} {} | {} | Balance: {}",
                outcome.reels[0],
                outcome.reels[1],
                outcome.reels[2],
                if outcome.win.is_positive() {
                    format!("Won {}", outcome.win)
                } else {
                    "No match".to_string()
                },
                outcome.settlement.new_balance
            )))
        }
        GameKind::Dice1v1 | GameKind::Basketball1v1 => {
            let outcome = state.engine.play_duel(user_id, game, bet).await?;
            Ok(Reply::text(format!(
                "Duel {}-{} | {} | Balance: {}",
                outcome.result.player_score,
                outcome.result.opponent_score,
                if outcome.win > bet {
                    format!("Won {}", outcome.win)
                } else if outcome.win == bet {
                    "Tie, stake returned".to_string()
                } else {
                    "Lost".to_string()
                },
                outcome.settlement.new_balance
            )))
        }
        GameKind::Coinflip => {
            let prediction = PredictionBet {
                user_id,
                kind: game,
                bet,
                selections,
            };
            let outcome = state.engine.play(&prediction).await?;
            Ok(Reply::text(format!(
                "Coin landed {} | {} | Balance: {}",
                outcome.outcome_label,
                if outcome.win.is_positive() {
                    format!("Won {}", outcome.win)
                } else {
                    "Lost".to_string()
                },
                outcome.settlement.new_balance
            )))
        }
        kind => {
            let descriptor = descriptor_for(kind)
                .ok_or_else(|| AppError::InvalidSelection(format!("{} is not playable", kind)))?;
            let prediction = PredictionBet {
                user_id,
                kind,
                bet,
                selections: selections.clone(),
            };
            let bet_tx_id = state.engine.begin_round(&prediction).await?;
            state.sessions.prompt(
                user_id,
                PromptKind::AwaitRoll {
                    game: kind,
                    selections,
                    bet,
                    bet_tx_id,
                },
            );
            Ok(Reply::SendAnimation {
                emoji: descriptor.emoji,
                text: "Rolling...".into(),
            })
        }
    }
}

/// Settle a pending round with the platform animation value. `None` or an
/// out-of-range value falls back to one in-process roll.
pub async fn handle_animation(
    state: &AppState,
    user_id: UserId,
    value: Option<u8>,
) -> Result<Reply> {
    let Some(PromptKind::AwaitRoll {
        game,
        selections,
        bet,
        bet_tx_id,
    }) = state.sessions.peek(user_id)
    else {
        return Ok(Reply::text("No round in progress"));
    };
    state.sessions.take(user_id, None)?;

    let prediction = PredictionBet {
        user_id,
        kind: game,
        bet,
        selections: selections.clone(),
    };
    let outcome = match state
        .engine
        .settle_round(&prediction, &bet_tx_id, value)
        .await
    {
        Ok(outcome) => outcome,
        Err(e) if !e.is_user_error() => {
            // The stake is already debited; keep the round claimable so a
            // later value (or fallback roll) can still settle it.
            state.sessions.prompt(
                user_id,
                PromptKind::AwaitRoll {
                    game,
                    selections,
                    bet,
                    bet_tx_id,
                },
            );
            return Err(e);
        }
        Err(e) => return Err(e),
    };

    Ok(Reply::text(format!(
        "Landed on {}{} | {} | Balance: {}",
        outcome.outcome_label,
        if outcome.degraded { " (re-rolled)" } else { "" },
        if outcome.win.is_positive() {
            format!("Won {}", outcome.win)
        } else {
            "Lost".to_string()
        },
        outcome.settlement.new_balance
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_commands() {
        assert_eq!(
            parse_command("/balance").unwrap().unwrap(),
            Command::Balance
        );
        assert_eq!(
            parse_command("/deposit ltc").unwrap().unwrap(),
            Command::Deposit { asset: Asset::Ltc }
        );
        assert_eq!(
            parse_command("/start abc123").unwrap().unwrap(),
            Command::Start {
                referral: Some("abc123".into())
            }
        );
    }

    #[test]
    fn test_parse_predict_selections_one_based() {
        let cmd = parse_command("/dice 1 3 6").unwrap().unwrap();
        assert_eq!(
            cmd,
            Command::Predict {
                kind: GameKind::DicePredict,
                selections: vec![0, 2, 5]
            }
        );
    }

    #[test]
    fn test_parse_predict_out_of_range() {
        assert!(parse_command("/basketball 4").unwrap().is_err());
        assert!(parse_command("/dice 0").unwrap().is_err());
        assert!(parse_command("/dice 7").unwrap().is_err());
    }

    #[test]
    fn test_non_command_text_is_none() {
        assert!(parse_command("5.50").is_none());
        assert!(parse_command("hello").is_none());
    }

    #[test]
    fn test_parse_usd() {
        assert_eq!(parse_usd("5").unwrap(), Cents::new(500));
        assert_eq!(parse_usd("$5.25").unwrap(), Cents::new(525));
        assert_eq!(parse_usd(" 0.50 ").unwrap(), Cents::new(50));
        assert!(parse_usd("five").is_err());
    }

    #[test]
    fn test_parse_duel_variants() {
        assert_eq!(
            parse_command("/duel dice").unwrap().unwrap(),
            Command::Duel {
                kind: GameKind::Dice1v1
            }
        );
        assert!(parse_command("/duel chess").unwrap().is_err());
    }
}

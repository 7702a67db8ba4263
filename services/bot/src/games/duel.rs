//! 1v1 duels against the house: both sides roll each round, first to the
//! target score wins 1.90x. A match that hits the round cap settles as a
//! tie and returns the stake.

use serde::Serialize;
use serde_json::json;

use shared::constants::{
    BET_MIN_CENTS, BPS_DENOMINATOR, DUEL_MAX_ROUNDS, DUEL_TARGET_SCORE, DUEL_WIN_MULTIPLIER_BPS,
};
use shared::Cents;

use crate::domain::{GameKind, NewGameSession, ResultLabel, UserId};
use crate::errors::{AppError, Result};
use crate::games::engine::{ChanceSource, GameEngine};
use crate::ledger::Settlement;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DuelSide {
    Player,
    Opponent,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DuelRound {
    pub player: u8,
    pub opponent: u8,
    pub point_to: Option<DuelSide>,
}

#[derive(Debug, Clone)]
pub struct DuelResult {
    pub rounds: Vec<DuelRound>,
    pub player_score: u32,
    pub opponent_score: u32,
    pub outcome: ResultLabel,
}

#[derive(Debug, Clone)]
pub struct DuelOutcome {
    pub settlement: Settlement,
    pub result: DuelResult,
    pub win: Cents,
}

/// Roll a full match. Rounds where both or neither side scores award no
/// point.
pub fn run_duel(kind: GameKind, chance: &dyn ChanceSource) -> Result<DuelResult> {
    let mut rounds = Vec::new();
    let mut player_score = 0u32;
    let mut opponent_score = 0u32;

    while player_score < DUEL_TARGET_SCORE
        && opponent_score < DUEL_TARGET_SCORE
        && (rounds.len() as u32) < DUEL_MAX_ROUNDS
    {
        let (player, opponent, point_to) = match kind {
            GameKind::Basketball1v1 => {
                let p = chance.roll(5);
                let o = chance.roll(5);
                let p_scores = p >= 4;
                let o_scores = o >= 4;
                let point = match (p_scores, o_scores) {
                    (true, false) => Some(DuelSide::Player),
                    (false, true) => Some(DuelSide::Opponent),
                    _ => None,
                };
                (p, o, point)
            }
            GameKind::Dice1v1 => {
                let p = chance.roll(6);
                let o = chance.roll(6);
                let point = match p.cmp(&o) {
                    std::cmp::Ordering::Greater => Some(DuelSide::Player),
                    std::cmp::Ordering::Less => Some(DuelSide::Opponent),
                    std::cmp::Ordering::Equal => None,
                };
                (p, o, point)
            }
            other => {
                return Err(AppError::InvalidSelection(format!(
                    "{} is not a duel game",
                    other
                )))
            }
        };

        match point_to {
            Some(DuelSide::Player) => player_score += 1,
            Some(DuelSide::Opponent) => opponent_score += 1,
            None => {}
        }
        rounds.push(DuelRound {
            player,
            opponent,
            point_to,
        });
    }

    let outcome = if player_score >= DUEL_TARGET_SCORE {
        ResultLabel::Win
    } else if opponent_score >= DUEL_TARGET_SCORE {
        ResultLabel::Loss
    } else {
        ResultLabel::Tie
    };

    Ok(DuelResult {
        rounds,
        player_score,
        opponent_score,
        outcome,
    })
}

impl GameEngine {
    /// Play a full duel and settle it in one ledger transaction.
    pub async fn play_duel(
        &self,
        user_id: UserId,
        kind: GameKind,
        bet: Cents,
    ) -> Result<DuelOutcome> {
        if bet < Cents::new(BET_MIN_CENTS) || bet > self.max_bet {
            return Err(AppError::AmountOutOfBounds {
                min: Cents::new(BET_MIN_CENTS),
                max: self.max_bet,
            });
        }

        let result = run_duel(kind, self.chance.as_ref())?;
        let win = match result.outcome {
            ResultLabel::Win => bet
                .mul_ratio(DUEL_WIN_MULTIPLIER_BPS, BPS_DENOMINATOR)
                .map_err(|e| AppError::AccountingInvariant(e.to_string()))?,
            // Round-cap tie: the stake comes back untouched.
            ResultLabel::Tie => bet,
            _ => Cents::ZERO,
        };

        let session = NewGameSession {
            game_kind: kind,
            variant: None,
            bet_amount: bet,
            win_amount: win,
            multiplier_bps: DUEL_WIN_MULTIPLIER_BPS,
            game_data: json!({
                "rounds": result.rounds,
                "player_score": result.player_score,
                "opponent_score": result.opponent_score,
            }),
            result_label: result.outcome,
        };

        let settlement = self.ledger.atomic_bet_settlement(user_id, session).await?;
        Ok(DuelOutcome {
            settlement,
            result,
            win,
        })
    }
}

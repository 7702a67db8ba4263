//! Prediction-game engine.
//!
//! A round is: validate the bet and selections, resolve an animation value
//! to an outcome, pay `bet * (|options| / selections) * (1 - edge)` on a
//! hit, and settle through the ledger. Games whose value comes from the
//! platform animation debit first and settle when the value arrives; games
//! rolled in-process settle in a single ledger transaction.

use rand::Rng;
use serde_json::json;
use std::sync::Arc;

use shared::constants::{BET_MIN_CENTS, BPS_DENOMINATOR, HOUSE_EDGE_BPS};
use shared::Cents;

use crate::domain::{GameKind, NewGameSession, ResultLabel, TxKind, TxMeta, UserId};
use crate::errors::{AppError, Result};
use crate::games::descriptors::{descriptor_for, GameDescriptor};
use crate::ledger::{Ledger, Settlement};

/// Uniform roll in `1..=max`. Seams for tests; production uses the thread
/// RNG.
pub trait ChanceSource: Send + Sync {
    fn roll(&self, max: u8) -> u8;
}

pub struct ThreadRngChance;

impl ChanceSource for ThreadRngChance {
    fn roll(&self, max: u8) -> u8 {
        rand::thread_rng().gen_range(1..=max)
    }
}

#[derive(Debug, Clone)]
pub struct PredictionBet {
    pub user_id: UserId,
    pub kind: GameKind,
    pub bet: Cents,
    /// Option indices the player backed; at least one, strictly fewer than
    /// the option count, no duplicates.
    pub selections: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct PredictionOutcome {
    pub settlement: Settlement,
    pub value: u8,
    pub outcome_index: usize,
    pub outcome_label: &'static str,
    pub win: Cents,
    pub multiplier_bps: i64,
    /// True when the platform value was missing or invalid and the round
    /// fell back to one in-process roll.
    pub degraded: bool,
}

#[derive(Clone)]
pub struct GameEngine {
    pub(crate) ledger: Ledger,
    pub(crate) chance: Arc<dyn ChanceSource>,
    pub(crate) max_bet: Cents,
}

impl GameEngine {
    pub fn new(ledger: Ledger, chance: Arc<dyn ChanceSource>, max_bet: Cents) -> Self {
        Self {
            ledger,
            chance,
            max_bet,
        }
    }

    /// Validate and debit the stake for an animation-driven round. The
    /// caller settles with [`GameEngine::settle_round`] once the value is
    /// known.
    pub async fn begin_round(&self, bet: &PredictionBet) -> Result<String> {
        let descriptor = Self::descriptor(bet.kind)?;
        self.validate(descriptor, bet)?;

        let bet_tx = self
            .ledger
            .debit(
                bet.user_id,
                bet.bet,
                TxKind::Bet,
                &format!("game/{}", bet.kind),
                TxMeta::described(format!("{} bet", bet.kind)),
            )
            .await?;
        Ok(bet_tx.id)
    }

    /// Settle an animation-driven round whose stake was already debited.
    /// `external_value` of `None` (or out of range) degrades to one
    /// in-process roll.
    pub async fn settle_round(
        &self,
        bet: &PredictionBet,
        bet_tx_id: &str,
        external_value: Option<u8>,
    ) -> Result<PredictionOutcome> {
        let descriptor = Self::descriptor(bet.kind)?;
        self.validate(descriptor, bet)?;

        let (value, degraded) = self.resolve_value(descriptor, external_value);
        let (session, outcome) = self.score(descriptor, bet, value, degraded)?;

        let settlement = self
            .ledger
            .settle_after_bet(bet.user_id, bet_tx_id, session)
            .await?;
        Ok(outcome.into_outcome(settlement))
    }

    /// One-shot round for in-process games: debit, roll, and settle in a
    /// single ledger transaction.
    pub async fn play(&self, bet: &PredictionBet) -> Result<PredictionOutcome> {
        let descriptor = Self::descriptor(bet.kind)?;
        self.validate(descriptor, bet)?;

        let value = self.chance.roll(descriptor.max_value());
        let (session, outcome) = self.score(descriptor, bet, value, false)?;

        let settlement = self
            .ledger
            .atomic_bet_settlement(bet.user_id, session)
            .await?;
        Ok(outcome.into_outcome(settlement))
    }

    fn descriptor(kind: GameKind) -> Result<&'static GameDescriptor> {
        descriptor_for(kind)
            .ok_or_else(|| AppError::InvalidSelection(format!("{} is not a prediction game", kind)))
    }

    fn validate(&self, descriptor: &GameDescriptor, bet: &PredictionBet) -> Result<()> {
        if bet.bet < Cents::new(BET_MIN_CENTS) || bet.bet > self.max_bet {
            return Err(AppError::AmountOutOfBounds {
                min: Cents::new(BET_MIN_CENTS),
                max: self.max_bet,
            });
        }

        let n = descriptor.options.len();
        if bet.selections.is_empty() || bet.selections.len() >= n {
            return Err(AppError::InvalidSelection(format!(
                "pick between 1 and {} outcomes",
                n - 1
            )));
        }
        for (i, &sel) in bet.selections.iter().enumerate() {
            if sel >= n {
                return Err(AppError::InvalidSelection(format!(
                    "outcome {} does not exist",
                    sel
                )));
            }
            if bet.selections[..i].contains(&sel) {
                return Err(AppError::InvalidSelection("duplicate outcome".into()));
            }
        }
        Ok(())
    }

    fn resolve_value(&self, descriptor: &GameDescriptor, external: Option<u8>) -> (u8, bool) {
        match external {
            Some(v) if v >= 1 && v <= descriptor.max_value() => (v, false),
            other => {
                if other.is_some() {
                    tracing::warn!(
                        game = %descriptor.kind,
                        value = other.unwrap_or(0),
                        "Animation value out of range, rolling in-process"
                    );
                }
                metrics::counter!("game_degraded_rolls_total", "game" => descriptor.kind.as_str())
                    .increment(1);
                (self.chance.roll(descriptor.max_value()), true)
            }
        }
    }

    fn score(
        &self,
        descriptor: &GameDescriptor,
        bet: &PredictionBet,
        value: u8,
        degraded: bool,
    ) -> Result<(NewGameSession, ScoredRound)> {
        let outcome_index = descriptor
            .outcome_index(value)
            .ok_or_else(|| AppError::AccountingInvariant(format!("value {} unmapped", value)))?;
        let outcome_label = descriptor.options[outcome_index];
        let hit = bet.selections.contains(&outcome_index);

        let options = descriptor.options.len() as i64;
        let picked = bet.selections.len() as i64;
        let win = if hit {
            bet.bet
                .mul_ratio(
                    options * (BPS_DENOMINATOR - HOUSE_EDGE_BPS),
                    picked * BPS_DENOMINATOR,
                )
                .map_err(|e| AppError::AccountingInvariant(e.to_string()))?
        } else {
            Cents::ZERO
        };
        let multiplier_bps = multiplier_bps(options, picked);

        let session = NewGameSession {
            game_kind: bet.kind,
            variant: None,
            bet_amount: bet.bet,
            win_amount: win,
            multiplier_bps,
            game_data: json!({
                "selections": bet.selections,
                "value": value,
                "outcome_index": outcome_index,
                "outcome": outcome_label,
                "source": if degraded { "internal" } else { "external" },
            }),
            result_label: if hit {
                ResultLabel::Win
            } else {
                ResultLabel::Loss
            },
        };

        Ok((
            session,
            ScoredRound {
                value,
                outcome_index,
                outcome_label,
                win,
                multiplier_bps,
                degraded,
            },
        ))
    }
}

/// Display multiplier, rounded to the nearest basis point. Payouts use the
/// exact ratio, never this value.
fn multiplier_bps(options: i64, picked: i64) -> i64 {
    let num = options * (BPS_DENOMINATOR - HOUSE_EDGE_BPS);
    (num + picked / 2) / picked
}

struct ScoredRound {
    value: u8,
    outcome_index: usize,
    outcome_label: &'static str,
    win: Cents,
    multiplier_bps: i64,
    degraded: bool,
}

impl ScoredRound {
    fn into_outcome(self, settlement: Settlement) -> PredictionOutcome {
        PredictionOutcome {
            settlement,
            value: self.value,
            outcome_index: self.outcome_index,
            outcome_label: self.outcome_label,
            win: self.win,
            multiplier_bps: self.multiplier_bps,
            degraded: self.degraded,
        }
    }
}

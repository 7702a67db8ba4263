//! Three-reel slots: weighted symbols, three of a kind pays the symbol's
//! multiplier, anything else loses.

use serde_json::json;

use shared::constants::{BET_MIN_CENTS, BPS_DENOMINATOR};
use shared::Cents;

use crate::domain::{GameKind, NewGameSession, ResultLabel, UserId};
use crate::errors::{AppError, Result};
use crate::games::engine::{ChanceSource, GameEngine};
use crate::ledger::Settlement;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbol {
    pub glyph: &'static str,
    /// Draw weight out of 100.
    pub weight: u8,
    /// Payout multiplier for three of a kind.
    pub multiplier: i64,
}

/// Weights sum to exactly 100; a single roll of 1..=100 picks a symbol.
pub const REELS: &[Symbol] = &[
    Symbol {
        glyph: "\u{1F352}",
        weight: 40,
        multiplier: 10,
    },
    Symbol {
        glyph: "\u{1F34B}",
        weight: 30,
        multiplier: 20,
    },
    Symbol {
        glyph: "\u{1F34A}",
        weight: 20,
        multiplier: 30,
    },
    Symbol {
        glyph: "\u{1F514}",
        weight: 8,
        multiplier: 50,
    },
    Symbol {
        glyph: "\u{1F48E}",
        weight: 2,
        multiplier: 100,
    },
];

pub fn symbol_for_roll(roll: u8) -> &'static Symbol {
    debug_assert!((1..=100).contains(&roll));
    let mut cumulative = 0u8;
    for symbol in REELS {
        cumulative += symbol.weight;
        if roll <= cumulative {
            return symbol;
        }
    }
    // Weights sum to 100, so the loop always returns for 1..=100.
    &REELS[REELS.len() - 1]
}

#[derive(Debug, Clone)]
pub struct SpinResult {
    pub reels: [&'static Symbol; 3],
    pub win_multiplier: i64,
}

pub fn spin(chance: &dyn ChanceSource) -> SpinResult {
    let reels = [
        symbol_for_roll(chance.roll(100)),
        symbol_for_roll(chance.roll(100)),
        symbol_for_roll(chance.roll(100)),
    ];
    let win_multiplier = if reels[0].glyph == reels[1].glyph && reels[1].glyph == reels[2].glyph {
        reels[0].multiplier
    } else {
        0
    };
    SpinResult {
        reels,
        win_multiplier,
    }
}

#[derive(Debug, Clone)]
pub struct SlotsOutcome {
    pub settlement: Settlement,
    pub reels: [&'static str; 3],
    pub win: Cents,
}

impl GameEngine {
    pub async fn play_slots(&self, user_id: UserId, bet: Cents) -> Result<SlotsOutcome> {
        if bet < Cents::new(BET_MIN_CENTS) || bet > self.max_bet {
            return Err(AppError::AmountOutOfBounds {
                min: Cents::new(BET_MIN_CENTS),
                max: self.max_bet,
            });
        }

        let result = spin(self.chance.as_ref());
        let win = if result.win_multiplier > 0 {
            bet.mul_ratio(result.win_multiplier, 1)
                .map_err(|e| AppError::AccountingInvariant(e.to_string()))?
        } else {
            Cents::ZERO
        };
        let glyphs = [
            result.reels[0].glyph,
            result.reels[1].glyph,
            result.reels[2].glyph,
        ];

        let session = NewGameSession {
            game_kind: GameKind::Slots,
            variant: None,
            bet_amount: bet,
            win_amount: win,
            multiplier_bps: result.win_multiplier * BPS_DENOMINATOR,
            game_data: json!({
                "reels": glyphs,
                "multiplier": result.win_multiplier,
            }),
            result_label: if win.is_positive() {
                ResultLabel::Win
            } else {
                ResultLabel::Loss
            },
        };

        let settlement = self.ledger.atomic_bet_settlement(user_id, session).await?;
        Ok(SlotsOutcome {
            settlement,
            reels: glyphs,
            win,
        })
    }
}

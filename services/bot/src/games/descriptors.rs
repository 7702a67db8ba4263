//! Prediction-game descriptors: the outcome labels for each game and the
//! mapping from an animated emoji value to an outcome.
//!
//! Basketball and soccer animations land on values 1..=5; the rest use
//! 1..=6. The maps below are fixed by the chat platform's animations and
//! must not be reordered.

use crate::domain::GameKind;

#[derive(Debug, Clone, Copy)]
pub struct GameDescriptor {
    pub kind: GameKind,
    pub emoji: &'static str,
    /// Outcome labels a player can pick from.
    pub options: &'static [&'static str],
    /// `value_map[value - 1]` is the option index the animation landed on.
    pub value_map: &'static [usize],
    /// True when the platform animation supplies the value; false for games
    /// rolled in-process.
    pub external: bool,
}

impl GameDescriptor {
    pub fn max_value(&self) -> u8 {
        self.value_map.len() as u8
    }

    pub fn outcome_index(&self, value: u8) -> Option<usize> {
        let slot = (value as usize).checked_sub(1)?;
        self.value_map.get(slot).copied()
    }
}

pub const DICE: GameDescriptor = GameDescriptor {
    kind: GameKind::DicePredict,
    emoji: "\u{1F3B2}",
    options: &["1", "2", "3", "4", "5", "6"],
    value_map: &[0, 1, 2, 3, 4, 5],
    external: true,
};

pub const BASKETBALL: GameDescriptor = GameDescriptor {
    kind: GameKind::BasketballPredict,
    emoji: "\u{1F3C0}",
    options: &["miss", "stuck", "in"],
    value_map: &[0, 0, 1, 2, 2],
    external: true,
};

pub const SOCCER: GameDescriptor = GameDescriptor {
    kind: GameKind::SoccerPredict,
    emoji: "\u{26BD}",
    options: &["miss", "bar", "goal"],
    value_map: &[0, 0, 1, 2, 2],
    external: true,
};

pub const BOWLING: GameDescriptor = GameDescriptor {
    kind: GameKind::BowlingPredict,
    emoji: "\u{1F3B3}",
    options: &["gutter", "few_pins", "many_pins", "strike"],
    value_map: &[0, 1, 1, 2, 2, 3],
    external: true,
};

pub const DARTS: GameDescriptor = GameDescriptor {
    kind: GameKind::DartsPredict,
    emoji: "\u{1F3AF}",
    options: &["outer", "middle", "inner", "bullseye"],
    value_map: &[0, 0, 1, 1, 2, 3],
    external: true,
};

pub const COINFLIP: GameDescriptor = GameDescriptor {
    kind: GameKind::Coinflip,
    emoji: "\u{1FA99}",
    options: &["heads", "tails"],
    value_map: &[0, 1],
    external: false,
};

pub const ALL: &[GameDescriptor] = &[DICE, BASKETBALL, SOCCER, BOWLING, DARTS, COINFLIP];

pub fn descriptor_for(kind: GameKind) -> Option<&'static GameDescriptor> {
    ALL.iter().find(|d| d.kind == kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_maps_cover_every_value() {
        for d in ALL {
            assert!(!d.value_map.is_empty(), "{} has empty map", d.emoji);
            for &idx in d.value_map {
                assert!(idx < d.options.len(), "{} maps past its options", d.emoji);
            }
            // Every option must be reachable.
            for idx in 0..d.options.len() {
                assert!(
                    d.value_map.contains(&idx),
                    "{} option {} unreachable",
                    d.emoji,
                    idx
                );
            }
        }
    }

    #[test]
    fn test_dice_is_identity() {
        for v in 1..=6u8 {
            assert_eq!(DICE.outcome_index(v), Some(v as usize - 1));
        }
    }

    #[test]
    fn test_basketball_outcomes() {
        assert_eq!(BASKETBALL.outcome_index(1), Some(0));
        assert_eq!(BASKETBALL.outcome_index(2), Some(0));
        assert_eq!(BASKETBALL.outcome_index(3), Some(1));
        assert_eq!(BASKETBALL.outcome_index(4), Some(2));
        assert_eq!(BASKETBALL.outcome_index(5), Some(2));
        assert_eq!(BASKETBALL.outcome_index(6), None);
    }

    #[test]
    fn test_bowling_and_darts_extremes() {
        assert_eq!(BOWLING.outcome_index(1), Some(0));
        assert_eq!(BOWLING.outcome_index(6), Some(3));
        assert_eq!(DARTS.outcome_index(5), Some(2));
        assert_eq!(DARTS.outcome_index(6), Some(3));
    }
}

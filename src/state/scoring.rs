//! Turns the guesses of one round into per-player balance deltas.
//!
//! Everything here is pure: no clock, no storage. The session feeds the result to the ledger
//! and copies the winner fields onto the round in the same batch.

use std::{collections::HashMap, time::SystemTime};

use uuid::Uuid;

use crate::dao::models::{GameEntity, GuessEntity, PlayerEntity};

/// Game rules the scoring depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoringRules {
    pub exact_bonus_amount: i64,
    pub default_missing_guess_value: i64,
}

impl From<&GameEntity> for ScoringRules {
    fn from(game: &GameEntity) -> Self {
        Self {
            exact_bonus_amount: game.exact_bonus_amount,
            default_missing_guess_value: game.default_missing_guess_value,
        }
    }
}

/// Outcome of one player for one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerDelta {
    pub player_id: Uuid,
    /// Submitted value, or the configured default when the player stayed silent.
    pub resolved_guess: i64,
    pub submitted: bool,
    pub submitted_at: Option<SystemTime>,
    /// Absolute error.
    pub diff: i64,
    /// Always `-diff`.
    pub penalty: i64,
    /// Exact-guess bonus, 0 unless `diff == 0`.
    pub bonus: i64,
}

impl PlayerDelta {
    /// Net change to the balance.
    pub fn total(&self) -> i64 {
        self.penalty + self.bonus
    }
}

/// Result of scoring a round, players kept in the order they were given.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RoundScore {
    pub deltas: Vec<PlayerDelta>,
    pub exact_guessers: Vec<Uuid>,
    pub closest_winner_id: Option<Uuid>,
}

impl RoundScore {
    pub fn delta_for(&self, player_id: Uuid) -> Option<&PlayerDelta> {
        self.deltas.iter().find(|delta| delta.player_id == player_id)
    }
}

/// Score a round.
///
/// The closest winner has the smallest `diff`; ties go to the earliest `submitted_at`, a player
/// without a guess loses every tie against one who submitted, and the remaining ties fall back to
/// the order of `players`.
pub fn score_round(
    actual_price: i64,
    players: &[PlayerEntity],
    guesses: &[GuessEntity],
    rules: ScoringRules,
) -> RoundScore {
    let by_player: HashMap<Uuid, &GuessEntity> =
        guesses.iter().map(|guess| (guess.player_id, guess)).collect();

    let deltas: Vec<PlayerDelta> = players
        .iter()
        .map(|player| {
            let guess = by_player.get(&player.id);
            let resolved_guess = guess
                .map(|guess| guess.value)
                .unwrap_or(rules.default_missing_guess_value);
            let diff = i64::try_from(resolved_guess.abs_diff(actual_price)).unwrap_or(i64::MAX);
            let bonus = if diff == 0 && rules.exact_bonus_amount > 0 {
                rules.exact_bonus_amount
            } else {
                0
            };
            PlayerDelta {
                player_id: player.id,
                resolved_guess,
                submitted: guess.is_some(),
                submitted_at: guess.map(|guess| guess.submitted_at),
                diff,
                penalty: -diff,
                bonus,
            }
        })
        .collect();

    let exact_guessers = deltas
        .iter()
        .filter(|delta| delta.bonus > 0)
        .map(|delta| delta.player_id)
        .collect();

    let closest_winner_id = deltas
        .iter()
        .enumerate()
        .min_by_key(|(position, delta)| {
            (
                delta.diff,
                delta.submitted_at.is_none(),
                delta.submitted_at,
                *position,
            )
        })
        .map(|(_, delta)| delta.player_id);

    RoundScore {
        deltas,
        exact_guessers,
        closest_winner_id,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    const RULES: ScoringRules = ScoringRules {
        exact_bonus_amount: 5,
        default_missing_guess_value: 1,
    };

    fn player(order: u32) -> PlayerEntity {
        PlayerEntity {
            id: Uuid::new_v4(),
            game_id: Uuid::nil(),
            name: format!("P{order}"),
            avatar_id: None,
            order,
            balance: 20,
            cumulative_answer_time_ms: 0,
            session_token: None,
            last_seen_at: None,
        }
    }

    fn guess(player: &PlayerEntity, value: i64, at_secs: u64) -> GuessEntity {
        GuessEntity {
            id: Uuid::new_v4(),
            game_id: Uuid::nil(),
            round_id: Uuid::nil(),
            player_id: player.id,
            value,
            submitted_at: SystemTime::UNIX_EPOCH + Duration::from_secs(at_secs),
            revision: 1,
            is_override: false,
        }
    }

    #[test]
    fn exact_guess_earns_only_the_bonus() {
        let (p1, p2) = (player(1), player(2));
        let guesses = [guess(&p1, 10, 1), guess(&p2, 8, 2)];

        let score = score_round(10, &[p1.clone(), p2.clone()], &guesses, RULES);

        assert_eq!(score.delta_for(p1.id).unwrap().total(), 5);
        assert_eq!(score.delta_for(p1.id).unwrap().penalty, 0);
        assert_eq!(score.delta_for(p2.id).unwrap().total(), -2);
        assert_eq!(score.closest_winner_id, Some(p1.id));
        assert_eq!(score.exact_guessers, vec![p1.id]);
    }

    #[test]
    fn missing_guess_uses_default_value() {
        let (p1, p2) = (player(1), player(2));
        let guesses = [guess(&p2, 12, 1)];

        let score = score_round(10, &[p1.clone(), p2.clone()], &guesses, RULES);

        let silent = score.delta_for(p1.id).unwrap();
        assert!(!silent.submitted);
        assert_eq!(silent.resolved_guess, 1);
        assert_eq!(silent.total(), -9);
        assert_eq!(score.delta_for(p2.id).unwrap().total(), -2);
        assert_eq!(score.closest_winner_id, Some(p2.id));
        assert!(score.exact_guessers.is_empty());
    }

    #[test]
    fn tie_goes_to_earlier_submission() {
        let (p1, p2) = (player(1), player(2));
        let guesses = [guess(&p2, 12, 2), guess(&p1, 8, 1)];

        let score = score_round(10, &[p2.clone(), p1.clone()], &guesses, RULES);

        assert_eq!(score.delta_for(p1.id).unwrap().diff, 2);
        assert_eq!(score.delta_for(p2.id).unwrap().diff, 2);
        assert_eq!(score.closest_winner_id, Some(p1.id));
    }

    #[test]
    fn silent_player_loses_ties() {
        let (silent, late) = (player(1), player(2));
        let guesses = [guess(&late, 1, 500)];

        let score = score_round(3, &[silent.clone(), late.clone()], &guesses, RULES);

        assert_eq!(score.closest_winner_id, Some(late.id));
    }

    #[test]
    fn zero_bonus_never_marks_exact_guessers() {
        let p1 = player(1);
        let rules = ScoringRules {
            exact_bonus_amount: 0,
            ..RULES
        };

        let score = score_round(7, &[p1.clone()], &[guess(&p1, 7, 1)], rules);

        assert_eq!(score.delta_for(p1.id).unwrap().total(), 0);
        assert!(score.exact_guessers.is_empty());
        assert_eq!(score.closest_winner_id, Some(p1.id));
    }

    #[test]
    fn extreme_values_saturate_the_difference() {
        let p1 = player(1);
        let guesses = [guess(&p1, i64::MIN, 1)];

        let score = score_round(i64::MAX, &[p1.clone()], &guesses, RULES);

        let delta = score.delta_for(p1.id).unwrap();
        assert_eq!(delta.diff, i64::MAX);
        assert_eq!(delta.penalty, -i64::MAX);
    }

    #[test]
    fn no_players_no_winner() {
        let score = score_round(10, &[], &[], RULES);
        assert_eq!(score, RoundScore::default());
    }

    #[test]
    fn scoring_is_deterministic() {
        let players: Vec<_> = (1..=4).map(player).collect();
        let guesses: Vec<_> = players
            .iter()
            .enumerate()
            .map(|(i, p)| guess(p, 6 + i as i64 * 2, 10))
            .collect();

        let first = score_round(9, &players, &guesses, RULES);
        let second = score_round(9, &players, &guesses, RULES);

        assert_eq!(first, second);
        // 8 and 10 tie on diff and time; the earlier seat wins.
        assert_eq!(first.closest_winner_id, Some(players[1].id));
    }
}

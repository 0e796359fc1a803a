//! Acceptance rules for player guesses and GM overrides.

use std::time::{Duration, SystemTime};

use thiserror::Error;
use uuid::Uuid;

use crate::{
    dao::{
        game_store::Mutation,
        models::{GameEntity, GamePhase, GuessEntity, RoundEntity, RoundStatus},
    },
    state::ledger::MAX_AMOUNT,
};

/// Why a guess was refused. Nothing is written when one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuessRejection {
    #[error("guesses are only accepted while guessing (game is {0:?})")]
    NotGuessing(GamePhase),
    #[error("round {index} is not open for guesses ({status:?})")]
    RoundNotOpen { index: u32, status: RoundStatus },
    #[error("round {index} is not the current round")]
    NotCurrentRound { index: u32 },
    #[error("guess {value} is outside {min}..={max}")]
    OutOfRange { value: i64, min: i64, max: i64 },
    #[error("the guessing deadline has passed")]
    DeadlinePassed,
    #[error("override value must not be negative")]
    NegativeOverride,
}

/// Guess to store and the mutations that store it.
#[derive(Debug, Clone)]
pub struct GuessPlan {
    pub guess: GuessEntity,
    pub mutations: Vec<Mutation>,
}

impl GuessPlan {
    pub fn is_first(&self) -> bool {
        self.guess.revision == 1
    }
}

/// End of the guessing window, if one is open.
pub fn deadline(game: &GameEntity) -> Option<SystemTime> {
    game.guessing_start_time
        .map(|start| start + Duration::from_secs(u64::from(game.guessing_duration_seconds)))
}

/// Whole seconds left before the deadline, rounded up. `None` outside guessing.
pub fn time_remaining_seconds(game: &GameEntity, now: SystemTime) -> Option<u64> {
    if game.current_phase != GamePhase::Guessing {
        return None;
    }
    let remaining = deadline(game)?
        .duration_since(now)
        .unwrap_or(Duration::ZERO);
    Some(remaining.as_millis().div_ceil(1000) as u64)
}

fn ensure_current(game: &GameEntity, round: &RoundEntity) -> Result<(), GuessRejection> {
    if round.index != game.current_round_index {
        return Err(GuessRejection::NotCurrentRound { index: round.index });
    }
    Ok(())
}

/// Plan a player submission.
///
/// The first submission must land before the deadline; a player who already submitted may keep
/// editing until guessing is closed.
pub fn plan_player_guess(
    game: &GameEntity,
    round: &RoundEntity,
    existing: Option<&GuessEntity>,
    player_id: Uuid,
    value: i64,
    now: SystemTime,
) -> Result<GuessPlan, GuessRejection> {
    if game.current_phase != GamePhase::Guessing {
        return Err(GuessRejection::NotGuessing(game.current_phase));
    }
    ensure_current(game, round)?;
    if !round.status.accepts_player_guesses() {
        return Err(GuessRejection::RoundNotOpen {
            index: round.index,
            status: round.status,
        });
    }
    if value < round.min_guess || value > round.max_guess {
        return Err(GuessRejection::OutOfRange {
            value,
            min: round.min_guess,
            max: round.max_guess,
        });
    }
    if existing.is_none() && deadline(game).is_some_and(|deadline| now >= deadline) {
        return Err(GuessRejection::DeadlinePassed);
    }

    let mut mutations = vec![Mutation::AssertGamePhase {
        game_id: game.id,
        phase: GamePhase::Guessing,
        round_index: round.index,
    }];
    let guess = upsert(round, existing, player_id, value, now, false, &mut mutations);

    if existing.is_none() {
        let opened = round.guessing_start_time.or(game.guessing_start_time);
        let millis = opened
            .and_then(|opened| now.duration_since(opened).ok())
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0);
        mutations.push(Mutation::AddAnswerTime { player_id, millis });
    }

    Ok(GuessPlan { guess, mutations })
}

/// Plan a GM override. Bounds and deadline do not apply; the round only has to be unscored.
pub fn plan_override(
    game: &GameEntity,
    round: &RoundEntity,
    existing: Option<&GuessEntity>,
    player_id: Uuid,
    value: i64,
    now: SystemTime,
) -> Result<GuessPlan, GuessRejection> {
    ensure_current(game, round)?;
    if !round.status.accepts_override() {
        return Err(GuessRejection::RoundNotOpen {
            index: round.index,
            status: round.status,
        });
    }
    if value < 0 {
        return Err(GuessRejection::NegativeOverride);
    }
    if value > MAX_AMOUNT {
        return Err(GuessRejection::OutOfRange {
            value,
            min: 0,
            max: MAX_AMOUNT,
        });
    }

    let mut mutations = Vec::new();
    let guess = upsert(round, existing, player_id, value, now, true, &mut mutations);
    Ok(GuessPlan { guess, mutations })
}

fn upsert(
    round: &RoundEntity,
    existing: Option<&GuessEntity>,
    player_id: Uuid,
    value: i64,
    now: SystemTime,
    is_override: bool,
    mutations: &mut Vec<Mutation>,
) -> GuessEntity {
    match existing {
        Some(previous) => {
            let guess = GuessEntity {
                value,
                submitted_at: now,
                revision: previous.revision + 1,
                is_override,
                ..previous.clone()
            };
            mutations.push(Mutation::UpdateGuess {
                guess: guess.clone(),
                expected_revision: previous.revision,
            });
            guess
        }
        None => {
            let guess = GuessEntity {
                id: Uuid::new_v4(),
                game_id: round.game_id,
                round_id: round.id,
                player_id,
                value,
                submitted_at: now,
                revision: 1,
                is_override,
            };
            mutations.push(Mutation::InsertGuess(guess.clone()));
            guess
        }
    }
}

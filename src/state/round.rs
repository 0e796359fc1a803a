//! Per-round lifecycle: `pending → listening → guessing → closed → revealed → scored`.

use thiserror::Error;

use crate::dao::models::{RoundEntity, RoundStatus};

/// Step applied to a single round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundEvent {
    /// The round becomes the current one.
    Activate,
    OpenGuessing,
    CloseGuessing,
    Reveal,
    Score,
    /// Scoring was reversed; the round is played again.
    Undo,
    /// The game went back to the lobby.
    Reset,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("round {index} cannot apply {event:?} while {status:?}")]
pub struct InvalidRoundTransition {
    pub index: u32,
    pub status: RoundStatus,
    pub event: RoundEvent,
}

impl RoundStatus {
    /// Players may create or edit their own guess.
    pub fn accepts_player_guesses(&self) -> bool {
        matches!(self, RoundStatus::Guessing)
    }

    /// The GM may still enter a guess on behalf of a player.
    pub fn accepts_override(&self) -> bool {
        matches!(
            self,
            RoundStatus::Guessing | RoundStatus::Closed | RoundStatus::Revealed
        )
    }

    /// The actual price may be shown to players.
    pub fn price_is_public(&self) -> bool {
        matches!(self, RoundStatus::Revealed | RoundStatus::Scored)
    }

    fn next(self, event: RoundEvent) -> Option<RoundStatus> {
        let next = match (self, event) {
            (_, RoundEvent::Reset) => RoundStatus::Pending,
            (RoundStatus::Pending, RoundEvent::Activate) => RoundStatus::Listening,
            (RoundStatus::Listening, RoundEvent::OpenGuessing) => RoundStatus::Guessing,
            (RoundStatus::Guessing, RoundEvent::CloseGuessing) => RoundStatus::Closed,
            (RoundStatus::Closed, RoundEvent::Reveal) => RoundStatus::Revealed,
            (RoundStatus::Revealed, RoundEvent::Score) => RoundStatus::Scored,
            (RoundStatus::Scored, RoundEvent::Undo) => RoundStatus::Listening,
            _ => return None,
        };
        Some(next)
    }
}

/// Return the round after `event`, clearing scoring fields when the round leaves `scored`.
pub fn advance_round(
    round: &RoundEntity,
    event: RoundEvent,
) -> Result<RoundEntity, InvalidRoundTransition> {
    let status = round.status.next(event).ok_or(InvalidRoundTransition {
        index: round.index,
        status: round.status,
        event,
    })?;

    let mut next = round.clone();
    next.status = status;
    if matches!(event, RoundEvent::Undo | RoundEvent::Reset) {
        next.closest_winner_id = None;
        next.exact_guessers.clear();
        next.guessing_start_time = None;
    }
    Ok(next)
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use uuid::Uuid;

    use super::*;

    fn round(status: RoundStatus) -> RoundEntity {
        RoundEntity {
            id: Uuid::new_v4(),
            game_id: Uuid::new_v4(),
            index: 1,
            item_name: "Toaster".into(),
            actual_price: 25,
            min_guess: 1,
            max_guess: 100,
            hint_text: None,
            item_photo_url: None,
            status,
            closest_winner_id: None,
            exact_guessers: vec![],
            guessing_start_time: None,
        }
    }

    #[test]
    fn walks_the_whole_lifecycle() {
        let mut current = round(RoundStatus::Pending);
        for (event, expected) in [
            (RoundEvent::Activate, RoundStatus::Listening),
            (RoundEvent::OpenGuessing, RoundStatus::Guessing),
            (RoundEvent::CloseGuessing, RoundStatus::Closed),
            (RoundEvent::Reveal, RoundStatus::Revealed),
            (RoundEvent::Score, RoundStatus::Scored),
            (RoundEvent::Undo, RoundStatus::Listening),
        ] {
            current = advance_round(&current, event).unwrap();
            assert_eq!(current.status, expected);
        }
    }

    #[test]
    fn undo_clears_scoring_fields() {
        let mut scored = round(RoundStatus::Scored);
        scored.closest_winner_id = Some(Uuid::new_v4());
        scored.exact_guessers = vec![Uuid::new_v4()];
        scored.guessing_start_time = Some(SystemTime::now());

        let undone = advance_round(&scored, RoundEvent::Undo).unwrap();
        assert_eq!(undone.closest_winner_id, None);
        assert!(undone.exact_guessers.is_empty());
        assert_eq!(undone.guessing_start_time, None);
    }

    #[test]
    fn skipping_steps_is_rejected() {
        assert!(advance_round(&round(RoundStatus::Listening), RoundEvent::Reveal).is_err());
        assert!(advance_round(&round(RoundStatus::Closed), RoundEvent::Score).is_err());
        assert!(advance_round(&round(RoundStatus::Revealed), RoundEvent::Undo).is_err());
        assert!(advance_round(&round(RoundStatus::Scored), RoundEvent::Score).is_err());
    }

    #[test]
    fn reset_works_from_anywhere() {
        for status in [
            RoundStatus::Pending,
            RoundStatus::Guessing,
            RoundStatus::Scored,
        ] {
            let reset = advance_round(&round(status), RoundEvent::Reset).unwrap();
            assert_eq!(reset.status, RoundStatus::Pending);
        }
    }
}

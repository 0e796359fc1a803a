use thiserror::Error;

pub use crate::dao::models::{GamePhase, GameStatus, RoundStatus};

/// Commands the GM can issue against a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameEvent {
    /// Credit deposits and enter round 1.
    StartGame,
    /// Announce the next round once a break is over.
    StartRound,
    /// Open the guessing window of the current round.
    OpenGuessing,
    /// Stop accepting player guesses.
    CloseGuessing,
    /// Show the actual price.
    RevealPrice,
    /// Turn guesses into ledger entries.
    ScoreRound,
    /// Move past the results of the current round.
    EndRound,
    /// Leave a break into the next round.
    ContinueFromBreak,
    /// Flip the advisory pause flag.
    TogglePause,
    /// Reverse the scoring of the current round.
    UndoRound,
    /// Return the whole game to the lobby.
    ResetGame,
}

impl GameEvent {
    /// Stable name used in logs and change notifications.
    pub fn as_str(&self) -> &'static str {
        match self {
            GameEvent::StartGame => "start_game",
            GameEvent::StartRound => "start_round",
            GameEvent::OpenGuessing => "open_guessing",
            GameEvent::CloseGuessing => "close_guessing",
            GameEvent::RevealPrice => "reveal_price",
            GameEvent::ScoreRound => "score_round",
            GameEvent::EndRound => "end_round",
            GameEvent::ContinueFromBreak => "continue_from_break",
            GameEvent::TogglePause => "toggle_pause",
            GameEvent::UndoRound => "undo_round",
            GameEvent::ResetGame => "reset_game",
        }
    }
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the game was in when the invalid event was received.
    pub from: GamePhase,
    /// The event that cannot be applied from this phase.
    pub event: GameEvent,
}

/// Errors that can occur when applying a planned transition to a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    /// Phase changed since the plan was created.
    #[error("phase changed since planning (expected {expected:?}, got {actual:?})")]
    PhaseMismatch {
        /// Phase when plan was created.
        expected: GamePhase,
        /// Current phase.
        actual: GamePhase,
    },
    /// Version changed since the plan was created.
    #[error("version changed since planning (expected {expected}, got {actual})")]
    VersionMismatch {
        /// Version the plan expects to produce.
        expected: u64,
        /// Version the snapshot would produce.
        actual: u64,
    },
}

/// Game-level fields the transition guards look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub status: GameStatus,
    pub phase: GamePhase,
    /// Incremented on each committed transition.
    pub version: u64,
    pub round_index: u32,
    pub total_rounds: u32,
    /// Status of the round at `round_index`, if any.
    pub round_status: Option<RoundStatus>,
    pub break_after_rounds: Vec<u32>,
    pub is_paused: bool,
}

/// A validated transition that has not been committed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Phase the game is currently in.
    pub from: GamePhase,
    /// Phase the game will be in.
    pub to: GamePhase,
    /// Status after the transition.
    pub status: GameStatus,
    /// Current round index after the transition.
    pub round_index: u32,
    /// Pause flag after the transition.
    pub is_paused: bool,
    /// Event that triggered this transition.
    pub event: GameEvent,
    /// Version number after applying this transition.
    pub version_next: u64,
}

/// State machine over one game snapshot.
///
/// It is rebuilt from storage for every command; the version carried by the snapshot is what
/// the storage layer checks when the resulting batch is committed.
#[derive(Debug, Clone)]
pub struct GameStateMachine {
    snapshot: Snapshot,
}

impl GameStateMachine {
    pub fn new(snapshot: Snapshot) -> Self {
        Self { snapshot }
    }

    /// Inspect the current phase.
    pub fn phase(&self) -> GamePhase {
        self.snapshot.phase
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Validate that `event` can be applied and describe the resulting game fields.
    pub fn plan(&self, event: GameEvent) -> Result<Plan, InvalidTransition> {
        let (to, status, round_index, is_paused) = self.compute_transition(event)?;
        Ok(Plan {
            from: self.snapshot.phase,
            to,
            status,
            round_index,
            is_paused,
            event,
            version_next: self.snapshot.version + 1,
        })
    }

    /// Apply a plan produced from this exact snapshot, returning the next phase.
    pub fn apply(&mut self, plan: &Plan) -> Result<GamePhase, ApplyError> {
        if self.snapshot.phase != plan.from {
            return Err(ApplyError::PhaseMismatch {
                expected: plan.from,
                actual: self.snapshot.phase,
            });
        }

        if self.snapshot.version + 1 != plan.version_next {
            return Err(ApplyError::VersionMismatch {
                expected: plan.version_next,
                actual: self.snapshot.version + 1,
            });
        }

        if plan.round_index != self.snapshot.round_index {
            self.snapshot.round_status = Some(RoundStatus::Listening);
        }
        self.snapshot.round_status = match plan.event {
            GameEvent::ResetGame => None,
            GameEvent::OpenGuessing => Some(RoundStatus::Guessing),
            GameEvent::CloseGuessing => Some(RoundStatus::Closed),
            GameEvent::RevealPrice => Some(RoundStatus::Revealed),
            GameEvent::ScoreRound => Some(RoundStatus::Scored),
            GameEvent::UndoRound | GameEvent::StartGame => Some(RoundStatus::Listening),
            _ => self.snapshot.round_status,
        };
        self.snapshot.phase = plan.to;
        self.snapshot.status = plan.status;
        self.snapshot.round_index = plan.round_index;
        self.snapshot.is_paused = plan.is_paused;
        self.snapshot.version = plan.version_next;

        Ok(self.snapshot.phase)
    }

    fn advance(&self) -> (GamePhase, GameStatus, u32, bool) {
        let snapshot = &self.snapshot;
        if snapshot.round_index < snapshot.total_rounds {
            (
                GamePhase::Listening,
                GameStatus::InProgress,
                snapshot.round_index + 1,
                snapshot.is_paused,
            )
        } else {
            (
                GamePhase::Finished,
                GameStatus::Finished,
                snapshot.round_index,
                snapshot.is_paused,
            )
        }
    }

    /// Compute a transition from an event if the transition is valid.
    fn compute_transition(
        &self,
        event: GameEvent,
    ) -> Result<(GamePhase, GameStatus, u32, bool), InvalidTransition> {
        let s = &self.snapshot;
        let stay = |phase: GamePhase| (phase, s.status, s.round_index, s.is_paused);

        let next = match (s.phase, event) {
            (GamePhase::Lobby, GameEvent::StartGame)
                if s.status == GameStatus::Lobby && s.total_rounds > 0 =>
            {
                (GamePhase::Listening, GameStatus::InProgress, 1, false)
            }
            (GamePhase::Listening, GameEvent::OpenGuessing) => stay(GamePhase::Guessing),
            (GamePhase::Guessing, GameEvent::CloseGuessing) => stay(GamePhase::Closed),
            (GamePhase::Closed, GameEvent::RevealPrice) => stay(GamePhase::Revealing),
            (GamePhase::Revealing, GameEvent::ScoreRound)
                if s.round_status == Some(RoundStatus::Revealed) =>
            {
                stay(GamePhase::Results)
            }
            (GamePhase::Results, GameEvent::EndRound) => {
                if s.break_after_rounds.contains(&s.round_index) {
                    stay(GamePhase::Break)
                } else {
                    self.advance()
                }
            }
            (GamePhase::Break, GameEvent::ContinueFromBreak | GameEvent::StartRound) => {
                self.advance()
            }
            (phase, GameEvent::TogglePause) if s.status == GameStatus::InProgress => {
                (phase, s.status, s.round_index, !s.is_paused)
            }
            (_, GameEvent::UndoRound) if s.round_status == Some(RoundStatus::Scored) => (
                GamePhase::Listening,
                GameStatus::InProgress,
                s.round_index,
                s.is_paused,
            ),
            (_, GameEvent::ResetGame) => (GamePhase::Lobby, GameStatus::Lobby, 0, false),
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lobby(total_rounds: u32, break_after_rounds: Vec<u32>) -> GameStateMachine {
        GameStateMachine::new(Snapshot {
            status: GameStatus::Lobby,
            phase: GamePhase::Lobby,
            version: 0,
            round_index: 0,
            total_rounds,
            round_status: None,
            break_after_rounds,
            is_paused: false,
        })
    }

    fn apply(sm: &mut GameStateMachine, event: GameEvent) -> GamePhase {
        let plan = sm.plan(event).unwrap();
        sm.apply(&plan).unwrap()
    }

    fn play_round(sm: &mut GameStateMachine) {
        apply(sm, GameEvent::OpenGuessing);
        apply(sm, GameEvent::CloseGuessing);
        apply(sm, GameEvent::RevealPrice);
        assert_eq!(apply(sm, GameEvent::ScoreRound), GamePhase::Results);
    }

    #[test]
    fn full_happy_path_through_game() {
        let mut sm = lobby(2, vec![]);

        assert_eq!(apply(&mut sm, GameEvent::StartGame), GamePhase::Listening);
        assert_eq!(sm.snapshot().status, GameStatus::InProgress);
        assert_eq!(sm.snapshot().round_index, 1);
        assert_eq!(apply(&mut sm, GameEvent::OpenGuessing), GamePhase::Guessing);
        assert_eq!(apply(&mut sm, GameEvent::CloseGuessing), GamePhase::Closed);
        assert_eq!(apply(&mut sm, GameEvent::RevealPrice), GamePhase::Revealing);
        assert_eq!(apply(&mut sm, GameEvent::ScoreRound), GamePhase::Results);
        assert_eq!(apply(&mut sm, GameEvent::EndRound), GamePhase::Listening);
        assert_eq!(sm.snapshot().round_index, 2);

        play_round(&mut sm);
        assert_eq!(apply(&mut sm, GameEvent::EndRound), GamePhase::Finished);
        assert_eq!(sm.snapshot().status, GameStatus::Finished);
        assert_eq!(sm.snapshot().round_index, 2);
        assert_eq!(sm.snapshot().version, 11);
    }

    #[test]
    fn break_boundary_wins_over_last_round() {
        let mut sm = lobby(2, vec![1, 2]);
        apply(&mut sm, GameEvent::StartGame);
        play_round(&mut sm);
        assert_eq!(apply(&mut sm, GameEvent::EndRound), GamePhase::Break);
        assert_eq!(apply(&mut sm, GameEvent::ContinueFromBreak), GamePhase::Listening);
        assert_eq!(sm.snapshot().round_index, 2);

        play_round(&mut sm);
        assert_eq!(apply(&mut sm, GameEvent::EndRound), GamePhase::Break);
        assert_eq!(apply(&mut sm, GameEvent::StartRound), GamePhase::Finished);
        assert_eq!(sm.snapshot().status, GameStatus::Finished);
    }

    #[test]
    fn scoring_twice_is_rejected() {
        let mut sm = lobby(1, vec![]);
        apply(&mut sm, GameEvent::StartGame);
        play_round(&mut sm);

        match sm.plan(GameEvent::ScoreRound) {
            Err(InvalidTransition { from, event }) => {
                assert_eq!(from, GamePhase::Results);
                assert_eq!(event, GameEvent::ScoreRound);
            }
            other => panic!("unexpected plan: {other:?}"),
        }
    }

    #[test]
    fn undo_requires_a_scored_round() {
        let mut sm = lobby(3, vec![]);
        apply(&mut sm, GameEvent::StartGame);
        assert!(sm.plan(GameEvent::UndoRound).is_err());

        play_round(&mut sm);
        assert_eq!(apply(&mut sm, GameEvent::UndoRound), GamePhase::Listening);
        assert_eq!(sm.snapshot().round_index, 1);
        assert_eq!(sm.snapshot().round_status, Some(RoundStatus::Listening));

        play_round(&mut sm);
        apply(&mut sm, GameEvent::EndRound);
        assert!(sm.plan(GameEvent::UndoRound).is_err());
    }

    #[test]
    fn undo_from_finished_resumes_the_game() {
        let mut sm = lobby(1, vec![]);
        apply(&mut sm, GameEvent::StartGame);
        play_round(&mut sm);
        assert_eq!(apply(&mut sm, GameEvent::EndRound), GamePhase::Finished);

        assert_eq!(apply(&mut sm, GameEvent::UndoRound), GamePhase::Listening);
        assert_eq!(sm.snapshot().status, GameStatus::InProgress);
    }

    #[test]
    fn pause_keeps_phase_and_needs_running_game() {
        let mut sm = lobby(1, vec![]);
        assert!(sm.plan(GameEvent::TogglePause).is_err());

        apply(&mut sm, GameEvent::StartGame);
        apply(&mut sm, GameEvent::OpenGuessing);
        assert_eq!(apply(&mut sm, GameEvent::TogglePause), GamePhase::Guessing);
        assert!(sm.snapshot().is_paused);
        assert_eq!(apply(&mut sm, GameEvent::CloseGuessing), GamePhase::Closed);
        apply(&mut sm, GameEvent::TogglePause);
        assert!(!sm.snapshot().is_paused);
    }

    #[test]
    fn reset_is_always_allowed() {
        let mut sm = lobby(1, vec![]);
        assert_eq!(apply(&mut sm, GameEvent::ResetGame), GamePhase::Lobby);

        apply(&mut sm, GameEvent::StartGame);
        apply(&mut sm, GameEvent::OpenGuessing);
        apply(&mut sm, GameEvent::TogglePause);
        assert_eq!(apply(&mut sm, GameEvent::ResetGame), GamePhase::Lobby);
        let snapshot = sm.snapshot();
        assert_eq!(snapshot.status, GameStatus::Lobby);
        assert_eq!(snapshot.round_index, 0);
        assert!(!snapshot.is_paused);
        assert_eq!(snapshot.round_status, None);
    }

    #[test]
    fn commands_out_of_order_are_rejected() {
        let mut sm = lobby(1, vec![]);
        for event in [
            GameEvent::OpenGuessing,
            GameEvent::CloseGuessing,
            GameEvent::RevealPrice,
            GameEvent::ScoreRound,
            GameEvent::EndRound,
            GameEvent::ContinueFromBreak,
            GameEvent::StartRound,
        ] {
            assert!(sm.plan(event).is_err(), "{event:?} accepted in lobby");
        }

        apply(&mut sm, GameEvent::StartGame);
        assert!(sm.plan(GameEvent::StartGame).is_err());
        assert!(sm.plan(GameEvent::RevealPrice).is_err());
    }

    #[test]
    fn stale_plan_is_not_applied() {
        let mut sm = lobby(1, vec![]);
        let plan = sm.plan(GameEvent::StartGame).unwrap();
        sm.apply(&plan).unwrap();

        assert_eq!(
            sm.apply(&plan),
            Err(ApplyError::PhaseMismatch {
                expected: GamePhase::Lobby,
                actual: GamePhase::Listening,
            })
        );
    }
}

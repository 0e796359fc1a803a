//! Game aggregate: one game with its players, rounds, current guesses and ledger.
//!
//! Every command is turned into a single [`WriteBatch`] whose game update is guarded by the
//! version that was loaded, so a batch planned on stale data never commits.

use std::time::SystemTime;

use serde_json::json;
use uuid::Uuid;

use crate::{
    dao::{
        game_store::{GameStore, Mutation, WriteBatch},
        models::{
            BalanceEventEntity, GameEntity, GamePhase, GuessEntity, PlayerEntity, RoundEntity,
        },
        storage::StorageResult,
    },
    error::ServiceError,
    state::{
        event_log::{self, EventKind},
        guess::{self, GuessPlan},
        ledger::{LedgerWriter, MAX_AMOUNT},
        round::{RoundEvent, advance_round},
        scoring::{RoundScore, ScoringRules, score_round},
        state_machine::{GameEvent, GameStateMachine, Snapshot},
    },
};

/// Everything a command needs to validate and plan its writes.
#[derive(Debug, Clone)]
pub struct GameSession {
    pub game: GameEntity,
    pub players: Vec<PlayerEntity>,
    pub rounds: Vec<RoundEntity>,
    /// Guesses of the current round.
    pub current_guesses: Vec<GuessEntity>,
    pub balance_events: Vec<BalanceEventEntity>,
}

/// Planned, not yet committed, outcome of a command.
#[derive(Debug, Clone)]
pub struct Transition {
    /// Phase before the command.
    pub from: GamePhase,
    /// Game row as it will be stored.
    pub game: GameEntity,
    pub batch: WriteBatch,
    /// Set by `score_round`.
    pub score: Option<RoundScore>,
    /// Short tag forwarded to change notifications.
    pub reason: &'static str,
}

impl GameSession {
    /// Read the dependent rows of `game`.
    pub async fn load(store: &dyn GameStore, game: GameEntity) -> StorageResult<Self> {
        let players = store.list_players(game.id).await?;
        let rounds = store.list_rounds(game.id).await?;
        let balance_events = store.list_balance_events(game.id).await?;
        let current_guesses = match rounds
            .iter()
            .find(|round| round.index == game.current_round_index)
        {
            Some(round) => store.list_guesses(round.id).await?,
            None => Vec::new(),
        };

        Ok(Self {
            game,
            players,
            rounds,
            current_guesses,
            balance_events,
        })
    }

    pub fn current_round(&self) -> Option<&RoundEntity> {
        self.round_at(self.game.current_round_index)
    }

    fn round_at(&self, index: u32) -> Option<&RoundEntity> {
        self.rounds.iter().find(|round| round.index == index)
    }

    pub fn player(&self, player_id: Uuid) -> Option<&PlayerEntity> {
        self.players.iter().find(|player| player.id == player_id)
    }

    pub fn guess_of(&self, player_id: Uuid) -> Option<&GuessEntity> {
        self.current_guesses
            .iter()
            .find(|guess| guess.player_id == player_id)
    }

    /// Fields the state machine guards on.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            status: self.game.status,
            phase: self.game.current_phase,
            version: self.game.version,
            round_index: self.game.current_round_index,
            total_rounds: self.game.total_rounds,
            round_status: self.current_round().map(|round| round.status),
            break_after_rounds: self.game.break_after_rounds.clone(),
            is_paused: self.game.is_paused,
        }
    }

    /// Plan a GM transition.
    pub fn apply(&self, event: GameEvent, now: SystemTime) -> Result<Transition, ServiceError> {
        let mut machine = GameStateMachine::new(self.snapshot());
        let plan = machine.plan(event)?;
        machine.apply(&plan)?;

        let mut game = self.next_game_row(now);
        game.current_phase = plan.to;
        game.status = plan.status;
        game.current_round_index = plan.round_index;
        game.is_paused = plan.is_paused;

        let mut ledger = LedgerWriter::new(game.id, now);
        let mut rounds = Vec::new();
        let mut extra = Vec::new();
        let mut log = Vec::new();
        let mut score = None;

        match event {
            GameEvent::StartGame => {
                game.started_at = Some(now);
                game.guessing_start_time = None;
                for player in &self.players {
                    ledger.starting_deposit(player.id, game.starting_deposit);
                }
                let first = self.require_round(plan.round_index)?;
                rounds.push(advance_round(first, RoundEvent::Activate)?);
                log.push((
                    EventKind::GameStarted,
                    json!({
                        "players": self.players.len(),
                        "startingDeposit": game.starting_deposit,
                    }),
                ));
            }
            GameEvent::OpenGuessing => {
                game.guessing_start_time = Some(now);
                let mut round = advance_round(self.require_current()?, RoundEvent::OpenGuessing)?;
                round.guessing_start_time = Some(now);
                log.push((
                    EventKind::GuessingOpen,
                    json!({
                        "round": round.index,
                        "durationSeconds": game.guessing_duration_seconds,
                    }),
                ));
                rounds.push(round);
            }
            GameEvent::CloseGuessing => {
                let round = advance_round(self.require_current()?, RoundEvent::CloseGuessing)?;
                log.push((
                    EventKind::GuessingClosed,
                    json!({ "round": round.index, "guesses": self.current_guesses.len() }),
                ));
                rounds.push(round);
            }
            GameEvent::RevealPrice => {
                let round = advance_round(self.require_current()?, RoundEvent::Reveal)?;
                log.push((
                    EventKind::PriceRevealed,
                    json!({ "round": round.index, "price": round.actual_price }),
                ));
                rounds.push(round);
            }
            GameEvent::ScoreRound => {
                let current = self.require_current()?;
                let result = score_round(
                    current.actual_price,
                    &self.players,
                    &self.current_guesses,
                    ScoringRules::from(&self.game),
                );
                ledger.record_round(current.id, current.actual_price, &result);

                let mut round = advance_round(current, RoundEvent::Score)?;
                round.closest_winner_id = result.closest_winner_id;
                round.exact_guessers = result.exact_guessers.clone();

                let deltas: serde_json::Map<String, serde_json::Value> = result
                    .deltas
                    .iter()
                    .map(|delta| (delta.player_id.to_string(), json!(delta.total())))
                    .collect();
                log.push((
                    EventKind::RoundScored,
                    json!({
                        "round": round.index,
                        "closestWinner": result.closest_winner_id,
                        "exactGuessers": result.exact_guessers,
                        "deltas": deltas,
                    }),
                ));
                rounds.push(round);
                score = Some(result);
            }
            GameEvent::EndRound | GameEvent::ContinueFromBreak | GameEvent::StartRound => {
                game.guessing_start_time = None;
                match plan.to {
                    GamePhase::Break => log.push((
                        EventKind::BreakStarted,
                        json!({ "afterRound": self.game.current_round_index }),
                    )),
                    GamePhase::Finished => {
                        log.push((
                            EventKind::GameFinished,
                            json!({ "rounds": self.game.total_rounds }),
                        ));
                    }
                    _ => {
                        let next = self.require_round(plan.round_index)?;
                        rounds.push(advance_round(next, RoundEvent::Activate)?);
                        let kind = if event == GameEvent::ContinueFromBreak {
                            EventKind::BreakEnded
                        } else {
                            EventKind::RoundStart
                        };
                        log.push((kind, json!({ "round": plan.round_index })));
                    }
                }
            }
            GameEvent::TogglePause => {
                let kind = if game.is_paused {
                    EventKind::GamePaused
                } else {
                    EventKind::GameResumed
                };
                log.push((kind, json!({ "phase": game.current_phase.as_str() })));
            }
            GameEvent::UndoRound => {
                let current = self.require_current()?;
                game.guessing_start_time = None;
                ledger.reverse_round(current.id, &self.balance_events);
                extra.push(Mutation::DeleteRoundGuesses {
                    round_id: current.id,
                });
                rounds.push(advance_round(current, RoundEvent::Undo)?);
                log.push((EventKind::RoundUndone, json!({ "round": current.index })));
            }
            GameEvent::ResetGame => {
                game.guessing_start_time = None;
                game.started_at = None;
                ledger.clear_game(&self.players);
                extra.push(Mutation::DeleteGameGuesses { game_id: game.id });
                for round in &self.rounds {
                    rounds.push(advance_round(round, RoundEvent::Reset)?);
                }
                log.push((
                    EventKind::GameReset,
                    json!({ "fromPhase": self.game.current_phase.as_str() }),
                ));
            }
        }

        let mut batch = self.begin_batch(&game);
        batch.extend(rounds.into_iter().map(Mutation::UpdateRound));
        batch.extend(ledger.into_mutations());
        batch.extend(extra);
        batch.extend(
            log.into_iter()
                .map(|(kind, payload)| event_log::entry(game.id, kind, payload, now)),
        );

        Ok(Transition {
            from: self.game.current_phase,
            game,
            batch,
            score,
            reason: event.as_str(),
        })
    }

    /// Plan a GM balance correction outside round scoring.
    pub fn manual_adjust(
        &self,
        player_id: Uuid,
        amount: i64,
        note: Option<String>,
        now: SystemTime,
    ) -> Result<Transition, ServiceError> {
        let player = self.require_player(player_id)?;
        if amount == 0 {
            return Err(ServiceError::InvalidInput(
                "adjustment amount must not be zero".into(),
            ));
        }
        if amount.unsigned_abs() > MAX_AMOUNT.unsigned_abs() {
            return Err(ServiceError::InvalidInput(format!(
                "adjustment amount must be within -{MAX_AMOUNT}..={MAX_AMOUNT}"
            )));
        }
        if player.balance.checked_add(amount).is_none() {
            return Err(ServiceError::InvalidInput(format!(
                "adjustment would overflow the balance of {}",
                player.name
            )));
        }

        let game = self.next_game_row(now);
        let mut ledger = LedgerWriter::new(game.id, now);
        ledger.manual_adjust(player_id, amount, note.clone());

        let mut batch = self.begin_batch(&game);
        batch.extend(ledger.into_mutations());
        batch.push(event_log::entry(
            game.id,
            EventKind::ManualBalance,
            json!({ "playerId": player_id, "amount": amount, "note": note }),
            now,
        ));

        Ok(Transition {
            from: self.game.current_phase,
            game,
            batch,
            score: None,
            reason: "manual_adjust",
        })
    }

    /// Plan a GM guess on behalf of a player.
    pub fn override_guess(
        &self,
        player_id: Uuid,
        value: i64,
        now: SystemTime,
    ) -> Result<(Transition, GuessEntity), ServiceError> {
        self.require_player(player_id)?;
        let round = self.require_current()?;
        let GuessPlan {
            guess,
            mutations,
        } = guess::plan_override(&self.game, round, self.guess_of(player_id), player_id, value, now)?;

        let game = self.next_game_row(now);
        let mut batch = self.begin_batch(&game);
        batch.extend(mutations);
        batch.push(event_log::entry(
            game.id,
            EventKind::GuessOverride,
            json!({ "round": round.index, "playerId": player_id, "value": value }),
            now,
        ));

        let transition = Transition {
            from: self.game.current_phase,
            game,
            batch,
            score: None,
            reason: "override_guess",
        };
        Ok((transition, guess))
    }

    /// Plan a player submission for the current round.
    pub fn submit_guess(
        &self,
        player_id: Uuid,
        value: i64,
        now: SystemTime,
    ) -> Result<GuessPlan, ServiceError> {
        self.require_player(player_id)?;
        let round = self.require_current()?;
        let plan = guess::plan_player_guess(
            &self.game,
            round,
            self.guess_of(player_id),
            player_id,
            value,
            now,
        )?;
        Ok(plan)
    }

    fn next_game_row(&self, now: SystemTime) -> GameEntity {
        GameEntity {
            version: self.game.version + 1,
            updated_at: now,
            ..self.game.clone()
        }
    }

    fn begin_batch(&self, game: &GameEntity) -> WriteBatch {
        let mut batch = WriteBatch::new(game.id);
        batch.push(Mutation::UpdateGame {
            game: game.clone(),
            expected_version: self.game.version,
        });
        batch
    }

    fn require_player(&self, player_id: Uuid) -> Result<&PlayerEntity, ServiceError> {
        self.player(player_id)
            .ok_or_else(|| ServiceError::NotFound(format!("player {player_id}")))
    }

    fn require_round(&self, index: u32) -> Result<&RoundEntity, ServiceError> {
        self.round_at(index)
            .ok_or_else(|| ServiceError::NotFound(format!("round {index}")))
    }

    fn require_current(&self) -> Result<&RoundEntity, ServiceError> {
        self.require_round(self.game.current_round_index)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::dao::models::{BalanceEventKind, GameStatus, RoundStatus};

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn session(rounds: u32) -> GameSession {
        let game_id = Uuid::new_v4();
        let game = GameEntity {
            id: game_id,
            code: "BELL001".into(),
            gm_pin: "4321".into(),
            status: GameStatus::Lobby,
            current_phase: GamePhase::Lobby,
            current_round_index: 0,
            total_rounds: rounds,
            exact_bonus_amount: 5,
            default_missing_guess_value: 1,
            guessing_duration_seconds: 10,
            guessing_start_time: None,
            is_paused: false,
            break_after_rounds: vec![],
            starting_deposit: 20,
            version: 0,
            created_at: at(0),
            updated_at: at(0),
            started_at: None,
        };
        let players = (0..2)
            .map(|order| PlayerEntity {
                id: Uuid::new_v4(),
                game_id,
                name: format!("P{order}"),
                avatar_id: None,
                order,
                balance: 0,
                cumulative_answer_time_ms: 0,
                session_token: None,
                last_seen_at: None,
            })
            .collect();
        let rounds = (1..=rounds)
            .map(|index| RoundEntity {
                id: Uuid::new_v4(),
                game_id,
                index,
                item_name: format!("Item {index}"),
                actual_price: 10,
                min_guess: 1,
                max_guess: 20,
                hint_text: None,
                item_photo_url: None,
                status: RoundStatus::Pending,
                closest_winner_id: None,
                exact_guessers: vec![],
                guessing_start_time: None,
            })
            .collect();
        GameSession {
            game,
            players,
            rounds,
            current_guesses: vec![],
            balance_events: vec![],
        }
    }

    fn log_kinds(batch: &WriteBatch) -> Vec<String> {
        batch
            .mutations
            .iter()
            .filter_map(|mutation| match mutation {
                Mutation::AppendEventLog(entry) => Some(entry.kind.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn start_game_credits_deposits_and_activates_round_one() {
        let session = session(2);
        let transition = session.apply(GameEvent::StartGame, at(5)).unwrap();

        assert_eq!(transition.from, GamePhase::Lobby);
        assert_eq!(transition.game.current_phase, GamePhase::Listening);
        assert_eq!(transition.game.version, 1);
        assert!(matches!(
            transition.batch.mutations[0],
            Mutation::UpdateGame { expected_version: 0, .. }
        ));
        let deposits = transition
            .batch
            .mutations
            .iter()
            .filter(|m| {
                matches!(m, Mutation::AppendBalanceEvent(e) if e.kind == BalanceEventKind::Deposit && e.amount == 20)
            })
            .count();
        assert_eq!(deposits, 2);
        assert!(transition.batch.mutations.iter().any(|m| {
            matches!(m, Mutation::UpdateRound(r) if r.index == 1 && r.status == RoundStatus::Listening)
        }));
        assert_eq!(log_kinds(&transition.batch), vec!["game_started"]);
    }

    #[test]
    fn open_guessing_stamps_both_clocks() {
        let mut session = session(1);
        session.game.status = GameStatus::InProgress;
        session.game.current_phase = GamePhase::Listening;
        session.game.current_round_index = 1;
        session.rounds[0].status = RoundStatus::Listening;

        let transition = session.apply(GameEvent::OpenGuessing, at(42)).unwrap();

        assert_eq!(transition.game.guessing_start_time, Some(at(42)));
        let round = transition
            .batch
            .mutations
            .iter()
            .find_map(|m| match m {
                Mutation::UpdateRound(round) => Some(round.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(round.status, RoundStatus::Guessing);
        assert_eq!(round.guessing_start_time, Some(at(42)));
    }

    #[test]
    fn illegal_command_plans_nothing() {
        let session = session(1);
        let err = session.apply(GameEvent::RevealPrice, at(1)).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidTransition(_)));
    }

    #[test]
    fn manual_adjust_requires_known_player_and_amount() {
        let session = session(1);
        assert!(matches!(
            session.manual_adjust(Uuid::new_v4(), 3, None, at(1)),
            Err(ServiceError::NotFound(_))
        ));
        let player = session.players[0].id;
        assert!(matches!(
            session.manual_adjust(player, 0, None, at(1)),
            Err(ServiceError::InvalidInput(_))
        ));

        let transition = session.manual_adjust(player, -4, None, at(1)).unwrap();
        assert_eq!(transition.game.version, 1);
        assert!(transition.batch.mutations.iter().any(|m| matches!(
            m,
            Mutation::IncrementBalance { delta: -4, .. }
        )));
        assert_eq!(log_kinds(&transition.batch), vec!["manual_balance"]);
    }

    #[test]
    fn manual_adjust_refuses_amounts_that_overflow() {
        let mut session = session(1);
        let player = session.players[0].id;
        for amount in [i64::MAX, i64::MIN, MAX_AMOUNT + 1] {
            assert!(matches!(
                session.manual_adjust(player, amount, None, at(1)),
                Err(ServiceError::InvalidInput(_))
            ));
        }

        session.players[0].balance = i64::MAX - 10;
        assert!(matches!(
            session.manual_adjust(player, 11, None, at(1)),
            Err(ServiceError::InvalidInput(_))
        ));
        assert!(session.manual_adjust(player, 10, None, at(1)).is_ok());
    }
}

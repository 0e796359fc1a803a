//! Append-only balance history.
//!
//! Balances are never written directly: every change is a [`BalanceEventEntity`] appended next to
//! an atomic [`Mutation::IncrementBalance`] of the cached value, both in the same batch.

use std::{collections::HashMap, time::SystemTime};

use indexmap::IndexMap;
use uuid::Uuid;

use crate::{
    dao::{
        game_store::Mutation,
        models::{BalanceEventEntity, BalanceEventKind, PlayerEntity},
    },
    state::scoring::RoundScore,
};

pub const STARTING_BALANCE_NOTE: &str = "Starting balance";
pub const EXACT_BONUS_NOTE: &str = "Exact guess bonus";
pub const MANUAL_ADJUST_NOTE: &str = "GM manual adjustment";

/// Largest price, guess or single credit accepted from the GM.
pub const MAX_AMOUNT: i64 = 1_000_000_000;

/// Collects ledger mutations for one game.
#[derive(Debug)]
pub struct LedgerWriter {
    game_id: Uuid,
    now: SystemTime,
    mutations: Vec<Mutation>,
}

impl LedgerWriter {
    pub fn new(game_id: Uuid, now: SystemTime) -> Self {
        Self {
            game_id,
            now,
            mutations: Vec::new(),
        }
    }

    /// Append one event and move the cached balance by the same amount.
    pub fn credit(
        &mut self,
        player_id: Uuid,
        amount: i64,
        kind: BalanceEventKind,
        round_id: Option<Uuid>,
        note: impl Into<String>,
    ) -> &mut Self {
        self.mutations
            .push(Mutation::AppendBalanceEvent(BalanceEventEntity {
                id: Uuid::new_v4(),
                game_id: self.game_id,
                player_id,
                round_id,
                kind,
                amount,
                note: note.into(),
                created_at: self.now,
            }));
        if amount != 0 {
            self.mutations.push(Mutation::IncrementBalance {
                player_id,
                delta: amount,
            });
        }
        self
    }

    pub fn starting_deposit(&mut self, player_id: Uuid, amount: i64) -> &mut Self {
        self.credit(
            player_id,
            amount,
            BalanceEventKind::Deposit,
            None,
            STARTING_BALANCE_NOTE,
        )
    }

    pub fn manual_adjust(
        &mut self,
        player_id: Uuid,
        amount: i64,
        note: Option<String>,
    ) -> &mut Self {
        let note = note
            .filter(|note| !note.trim().is_empty())
            .unwrap_or_else(|| MANUAL_ADJUST_NOTE.to_owned());
        self.credit(
            player_id,
            amount,
            BalanceEventKind::ManualAdjust,
            None,
            note,
        )
    }

    /// One `round_delta` per player, plus an `exact_bonus` for exact guessers.
    pub fn record_round(
        &mut self,
        round_id: Uuid,
        actual_price: i64,
        score: &RoundScore,
    ) -> &mut Self {
        for delta in &score.deltas {
            self.credit(
                delta.player_id,
                delta.penalty,
                BalanceEventKind::RoundDelta,
                Some(round_id),
                format!("Guess: ${}, Actual: ${actual_price}", delta.resolved_guess),
            );
            if delta.bonus > 0 {
                self.credit(
                    delta.player_id,
                    delta.bonus,
                    BalanceEventKind::ExactBonus,
                    Some(round_id),
                    EXACT_BONUS_NOTE,
                );
            }
        }
        self
    }

    /// Negate and delete every event tagged with `round_id`.
    pub fn reverse_round(&mut self, round_id: Uuid, events: &[BalanceEventEntity]) -> &mut Self {
        for event in events
            .iter()
            .filter(|event| event.round_id == Some(round_id))
        {
            if event.amount != 0 {
                self.mutations.push(Mutation::IncrementBalance {
                    player_id: event.player_id,
                    delta: -event.amount,
                });
            }
            self.mutations
                .push(Mutation::DeleteBalanceEvent { event_id: event.id });
        }
        self
    }

    /// Drop the whole history of the game and zero every cached total.
    pub fn clear_game(&mut self, players: &[PlayerEntity]) -> &mut Self {
        self.mutations.push(Mutation::DeleteGameBalanceEvents {
            game_id: self.game_id,
        });
        self.mutations.extend(
            players
                .iter()
                .map(|player| Mutation::ResetPlayerTotals {
                    player_id: player.id,
                }),
        );
        self
    }

    pub fn into_mutations(self) -> Vec<Mutation> {
        self.mutations
    }
}

/// Recompute every balance from the ledger alone.
pub fn replay_balances(events: &[BalanceEventEntity]) -> HashMap<Uuid, i64> {
    events.iter().fold(HashMap::new(), |mut balances, event| {
        *balances.entry(event.player_id).or_default() += event.amount;
        balances
    })
}

/// Sum of the events of one round per player, in first-seen order.
pub fn round_totals(round_id: Uuid, events: &[BalanceEventEntity]) -> IndexMap<Uuid, i64> {
    events
        .iter()
        .filter(|event| event.round_id == Some(round_id))
        .fold(IndexMap::new(), |mut totals, event| {
            *totals.entry(event.player_id).or_default() += event.amount;
            totals
        })
}

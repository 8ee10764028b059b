//! The engine's owned mutable game state.
//!
//! `GameState` is created once, lives for the process lifetime, and is
//! reset in place on an absence timeout, never reallocated. Only engine
//! methods mutate it; collaborators see snapshots and derived values.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::phase::PhaseMachine;
use crate::ports::PlayerSighting;
use crate::tasks::ActiveTask;

/// A tracked player. Ids are assigned at first identification and never
/// reused within a run; the roster keeps join order.
#[derive(Debug, Clone, Serialize)]
pub struct Player {
    pub id: u32,
    pub appearance: String,
    pub activity: String,
    pub held_item: Option<String>,
    pub gender: String,
    pub name: Option<String>,
}

/// One narrated line with its wall-clock timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct NarrationEntry {
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Returned when a task assignment would violate the single-active-task
/// invariant.
#[derive(Debug, thiserror::Error)]
#[error("a task is already active: {title}")]
pub struct TaskAlreadyActive {
    pub title: String,
}

/// All mutable game state, owned exclusively by the engine.
pub struct GameState {
    pub phase: PhaseMachine,
    players: Vec<Player>,
    pub last_human_seen_at: Option<Instant>,
    /// Path of the most recently processed frame, for reasoning calls.
    pub last_frame: Option<PathBuf>,
    active_task: Option<ActiveTask>,
    hint_chance: f64,
    narration_history: VecDeque<NarrationEntry>,
    history_cap: usize,
    /// Consecutive idle ticks with presence, for the start debounce.
    pub idle_presence_streak: u32,
    next_player_id: u32,
}

impl GameState {
    pub fn new(history_cap: usize) -> Self {
        Self {
            phase: PhaseMachine::new(),
            players: Vec::new(),
            last_human_seen_at: None,
            last_frame: None,
            active_task: None,
            hint_chance: 0.0,
            narration_history: VecDeque::new(),
            history_cap,
            idle_presence_streak: 0,
            next_player_id: 1,
        }
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    /// Merge reasoning-backend sightings into the roster by position:
    /// known positions get refreshed descriptions, extra sightings become
    /// new players with fresh ids. There is no re-identification; the
    /// backend is asked to keep a stable ordering.
    pub fn merge_sightings(&mut self, sightings: Vec<PlayerSighting>) {
        for (index, s) in sightings.into_iter().enumerate() {
            if let Some(player) = self.players.get_mut(index) {
                player.appearance = s.appearance;
                player.activity = s.activity;
                player.held_item = s.held_item;
                player.gender = s.gender;
                if player.name.is_none() {
                    player.name = s.name;
                }
            } else {
                let id = self.next_player_id;
                self.next_player_id += 1;
                info!(id, appearance = %s.appearance, "New player joined the roster");
                self.players.push(Player {
                    id,
                    appearance: s.appearance,
                    activity: s.activity,
                    held_item: s.held_item,
                    gender: s.gender,
                    name: s.name,
                });
            }
        }
    }

    pub fn active_task(&self) -> Option<&ActiveTask> {
        self.active_task.as_ref()
    }

    pub fn active_task_mut(&mut self) -> Option<&mut ActiveTask> {
        self.active_task.as_mut()
    }

    /// Assign a new active task. Fails if one is already present, the
    /// caller must clear the previous task first.
    pub fn assign_task(&mut self, task: ActiveTask) -> Result<(), TaskAlreadyActive> {
        if let Some(existing) = &self.active_task {
            return Err(TaskAlreadyActive {
                title: existing.definition.title.clone(),
            });
        }
        self.active_task = Some(task);
        Ok(())
    }

    pub fn clear_active_task(&mut self) -> Option<ActiveTask> {
        self.active_task.take()
    }

    pub fn hint_chance(&self) -> f64 {
        self.hint_chance
    }

    /// Raise the hint chance by `step`, clamped to [0, 1].
    pub fn bump_hint_chance(&mut self, step: f64) {
        self.hint_chance = (self.hint_chance + step).clamp(0.0, 1.0);
    }

    /// Append a narrated line, evicting the oldest past the cap.
    pub fn record_narration(&mut self, text: &str) {
        self.narration_history.push_back(NarrationEntry {
            text: text.to_string(),
            at: Utc::now(),
        });
        while self.narration_history.len() > self.history_cap {
            self.narration_history.pop_front();
        }
    }

    /// Most recent narrated line, if any.
    pub fn last_narration(&self) -> Option<&str> {
        self.narration_history.back().map(|e| e.text.as_str())
    }

    pub fn narration_history(&self) -> impl Iterator<Item = &NarrationEntry> {
        self.narration_history.iter()
    }

    /// Full reset back to `Idle`, performed synchronously and completely:
    /// roster cleared, active task dropped, hint chance zeroed, debounce
    /// streak reset. Narration history is kept only when `keep_history`.
    /// Player ids are not reused across the process lifetime.
    pub fn reset(&mut self, keep_history: bool, reason: &str) {
        info!(reason, players = self.players.len(), "Full game reset");
        self.phase.reset(reason);
        self.players.clear();
        self.active_task = None;
        self.hint_chance = 0.0;
        self.idle_presence_streak = 0;
        self.last_human_seen_at = None;
        if !keep_history {
            self.narration_history.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::GamePhase;
    use crate::tasks::{CompletionCondition, TaskDefinition};
    use std::sync::Arc;

    fn sighting(appearance: &str) -> PlayerSighting {
        PlayerSighting {
            appearance: appearance.into(),
            activity: "standing".into(),
            held_item: None,
            gender: "unknown".into(),
            name: None,
        }
    }

    fn some_task() -> ActiveTask {
        ActiveTask::new(Arc::new(TaskDefinition {
            id: "t".into(),
            title: "Test task".into(),
            description: "do the thing".into(),
            group_task: false,
            max_asks: 3,
            condition: CompletionCondition::Special { key: "k".into() },
            hints: vec![],
        }))
    }

    #[test]
    fn test_player_ids_are_stable_and_never_reused() {
        let mut state = GameState::new(5);
        state.merge_sightings(vec![sighting("red scarf"), sighting("blue hat")]);
        assert_eq!(state.players().len(), 2);
        assert_eq!(state.players()[0].id, 1);
        assert_eq!(state.players()[1].id, 2);

        state.reset(false, "test");
        assert!(state.players().is_empty());

        state.merge_sightings(vec![sighting("green coat")]);
        // Ids continue past the reset; 1 and 2 are never reused.
        assert_eq!(state.players()[0].id, 3);
    }

    #[test]
    fn test_merge_refreshes_existing_positions() {
        let mut state = GameState::new(5);
        state.merge_sightings(vec![sighting("red scarf")]);
        state.merge_sightings(vec![sighting("red scarf, now crouching")]);
        assert_eq!(state.players().len(), 1);
        assert_eq!(state.players()[0].id, 1);
        assert_eq!(state.players()[0].appearance, "red scarf, now crouching");
    }

    #[test]
    fn test_single_active_task_invariant() {
        let mut state = GameState::new(5);
        state.assign_task(some_task()).unwrap();
        let err = state.assign_task(some_task()).unwrap_err();
        assert_eq!(err.title, "Test task");

        state.clear_active_task();
        assert!(state.assign_task(some_task()).is_ok());
    }

    #[test]
    fn test_hint_chance_bounds() {
        let mut state = GameState::new(5);
        state.bump_hint_chance(0.7);
        state.bump_hint_chance(0.7);
        assert_eq!(state.hint_chance(), 1.0);
        state.reset(false, "test");
        assert_eq!(state.hint_chance(), 0.0);
    }

    #[test]
    fn test_narration_history_is_bounded_fifo() {
        let mut state = GameState::new(3);
        for i in 0..5 {
            state.record_narration(&format!("line {i}"));
        }
        let lines: Vec<&str> = state.narration_history().map(|e| e.text.as_str()).collect();
        assert_eq!(lines, vec!["line 2", "line 3", "line 4"]);
        assert_eq!(state.last_narration(), Some("line 4"));
    }

    #[test]
    fn test_reset_completeness() {
        let mut state = GameState::new(5);
        state.phase.advance(GamePhase::Starting, None).unwrap();
        state.phase.advance(GamePhase::Started, None).unwrap();
        state.phase.advance(GamePhase::Playing, None).unwrap();
        state.merge_sightings(vec![sighting("red scarf")]);
        state.assign_task(some_task()).unwrap();
        state.bump_hint_chance(0.4);
        state.record_narration("something");
        state.last_human_seen_at = Some(Instant::now());
        state.idle_presence_streak = 2;

        state.reset(false, "absence timeout");

        assert_eq!(state.phase.current(), GamePhase::Idle);
        assert!(state.players().is_empty());
        assert!(state.active_task().is_none());
        assert_eq!(state.hint_chance(), 0.0);
        assert_eq!(state.idle_presence_streak, 0);
        assert!(state.last_human_seen_at.is_none());
        assert!(state.last_narration().is_none());
    }

    #[test]
    fn test_reset_can_keep_history() {
        let mut state = GameState::new(5);
        state.phase.advance(GamePhase::Starting, None).unwrap();
        state.record_narration("welcome");
        state.reset(true, "absence timeout");
        assert_eq!(state.last_narration(), Some("welcome"));
    }
}

//! Game phase state machine, explicit phases and legal transition guards.
//!
//! The tick loop calls [`PhaseMachine::advance`] to move between phases.
//! Each call validates that the edge exists in the transition table and
//! records it in the transition log, so a run can be reconstructed from
//! the log alone.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// The coarse game state.
///
/// Every run starts at `Idle`. `Escaped` and `Ended` are terminal for the
/// run; the only way out of them is the absence-timeout reset back to
/// `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    /// Nobody inside; waiting for the presence debounce.
    Idle,
    /// People seen on enough consecutive ticks; waiting for the wardrobe
    /// doors to close.
    Starting,
    /// Doors closed; identifying and greeting the players.
    Started,
    /// The task/hint ladder is running.
    Playing,
    /// The escape gesture was performed, terminal for this run.
    Escaped,
    /// The players walked out mid-game, terminal for this run.
    Ended,
}

impl GamePhase {
    /// Whether this phase ends the current run.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Escaped | Self::Ended)
    }
}

impl fmt::Display for GamePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Starting => write!(f, "Starting"),
            Self::Started => write!(f, "Started"),
            Self::Playing => write!(f, "Playing"),
            Self::Escaped => write!(f, "Escaped"),
            Self::Ended => write!(f, "Ended"),
        }
    }
}

/// Legal transitions between phases.
///
/// ```text
/// Idle → Starting            (presence on ≥2 consecutive ticks)
/// Starting → Started         (doors-closed condition satisfied)
/// Started → Playing          (first player identified and narrated)
/// Playing → Escaped          (escape gesture performed)
/// Playing → Ended            (room empty past the abandon grace)
/// any non-Idle → Idle        (absence timeout, full reset)
/// ```
fn is_legal_transition(from: GamePhase, to: GamePhase) -> bool {
    use GamePhase::*;

    // The absence-timeout reset may return from any non-Idle phase.
    if to == Idle && from != Idle {
        return true;
    }

    matches!(
        (from, to),
        (Idle, Starting)
            | (Starting, Started)
            | (Started, Playing)
            | (Playing, Escaped)
            | (Playing, Ended)
    )
}

/// A single recorded phase transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: GamePhase,
    pub to: GamePhase,
    /// Tick number at the time of transition.
    pub tick: u64,
    /// Milliseconds since the machine was created.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone)]
pub struct IllegalTransition {
    pub from: GamePhase,
    pub to: GamePhase,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Illegal phase transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// Most recent transitions kept in the log. The engine runs for months;
/// older records are evicted from the front.
const TRANSITION_LOG_CAP: usize = 64;

/// The phase machine: current phase, tick counter, and a bounded
/// transition log.
pub struct PhaseMachine {
    current: GamePhase,
    tick: u64,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl PhaseMachine {
    /// Create a new machine at `Idle`.
    pub fn new() -> Self {
        Self {
            current: GamePhase::Idle,
            tick: 0,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> GamePhase {
        self.current
    }

    /// Tick counter, monotone for the process lifetime (not reset on a
    /// game reset).
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn set_tick(&mut self, tick: u64) {
        self.tick = tick;
    }

    /// Attempt to advance to the next phase.
    pub fn advance(
        &mut self,
        to: GamePhase,
        reason: Option<&str>,
    ) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        tracing::info!(
            from = %self.current,
            to = %to,
            tick = self.tick,
            reason = reason.unwrap_or(""),
            "Phase transition"
        );

        self.transitions.push(TransitionRecord {
            from: self.current,
            to,
            tick: self.tick,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        });
        if self.transitions.len() > TRANSITION_LOG_CAP {
            self.transitions.remove(0);
        }
        self.current = to;
        Ok(())
    }

    /// Return to `Idle`, recording the transition. No-op when already idle.
    pub fn reset(&mut self, reason: &str) {
        if self.current == GamePhase::Idle {
            return;
        }
        // Always legal: any non-Idle phase may return to Idle.
        let _ = self.advance(GamePhase::Idle, Some(reason));
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    /// The most recent transitions, oldest first.
    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_phase() {
        let pm = PhaseMachine::new();
        assert_eq!(pm.current(), GamePhase::Idle);
        assert!(!pm.is_terminal());
        assert!(pm.transitions().is_empty());
    }

    #[test]
    fn test_full_run_path() {
        let mut pm = PhaseMachine::new();
        pm.advance(GamePhase::Starting, Some("two people seen"))
            .unwrap();
        pm.advance(GamePhase::Started, Some("doors closed")).unwrap();
        pm.advance(GamePhase::Playing, Some("player greeted")).unwrap();
        pm.advance(GamePhase::Escaped, Some("gesture performed"))
            .unwrap();
        assert!(pm.is_terminal());
        assert_eq!(pm.transitions().len(), 4);
    }

    #[test]
    fn test_abandoned_run_path() {
        let mut pm = PhaseMachine::new();
        pm.advance(GamePhase::Starting, None).unwrap();
        pm.advance(GamePhase::Started, None).unwrap();
        pm.advance(GamePhase::Playing, None).unwrap();
        pm.advance(GamePhase::Ended, Some("room empty")).unwrap();
        assert_eq!(pm.current(), GamePhase::Ended);
        assert!(pm.is_terminal());
    }

    #[test]
    fn test_reset_legal_from_every_non_idle_phase() {
        for phase in [
            GamePhase::Starting,
            GamePhase::Started,
            GamePhase::Playing,
            GamePhase::Escaped,
            GamePhase::Ended,
        ] {
            let mut pm = PhaseMachine {
                current: phase,
                tick: 0,
                created_at: Instant::now(),
                transitions: Vec::new(),
            };
            pm.reset("absence timeout");
            assert_eq!(pm.current(), GamePhase::Idle);
        }
    }

    #[test]
    fn test_reset_is_noop_when_idle() {
        let mut pm = PhaseMachine::new();
        pm.reset("nothing to do");
        assert!(pm.transitions().is_empty());
    }

    #[test]
    fn test_cannot_skip_the_doors_gate() {
        let mut pm = PhaseMachine::new();
        pm.advance(GamePhase::Starting, None).unwrap();
        let err = pm.advance(GamePhase::Playing, None).unwrap_err();
        assert_eq!(err.from, GamePhase::Starting);
        assert_eq!(err.to, GamePhase::Playing);
    }

    #[test]
    fn test_terminal_phases_only_exit_via_idle() {
        let mut pm = PhaseMachine::new();
        pm.advance(GamePhase::Starting, None).unwrap();
        pm.advance(GamePhase::Started, None).unwrap();
        pm.advance(GamePhase::Playing, None).unwrap();
        pm.advance(GamePhase::Escaped, None).unwrap();

        assert!(pm.advance(GamePhase::Playing, None).is_err());
        assert!(pm.advance(GamePhase::Starting, None).is_err());
        pm.advance(GamePhase::Idle, Some("absence timeout")).unwrap();
        assert_eq!(pm.current(), GamePhase::Idle);
    }

    #[test]
    fn test_idle_cannot_jump_to_playing() {
        let mut pm = PhaseMachine::new();
        assert!(pm.advance(GamePhase::Playing, None).is_err());
        assert!(pm.advance(GamePhase::Started, None).is_err());
    }

    #[test]
    fn test_transition_record_fields() {
        let mut pm = PhaseMachine::new();
        pm.set_tick(7);
        pm.advance(GamePhase::Starting, Some("debounce satisfied"))
            .unwrap();
        let record = &pm.transitions()[0];
        assert_eq!(record.from, GamePhase::Idle);
        assert_eq!(record.to, GamePhase::Starting);
        assert_eq!(record.tick, 7);
        assert_eq!(record.reason.as_deref(), Some("debounce satisfied"));
    }

    #[test]
    fn test_transition_log_is_bounded() {
        let mut pm = PhaseMachine::new();
        // Many short runs: each cycle records Starting then the reset.
        for _ in 0..100 {
            pm.advance(GamePhase::Starting, None).unwrap();
            pm.reset("absence timeout");
        }
        assert_eq!(pm.transitions().len(), TRANSITION_LOG_CAP);
        // The newest record survives eviction.
        let last = pm.transitions().last().unwrap();
        assert_eq!(last.from, GamePhase::Starting);
        assert_eq!(last.to, GamePhase::Idle);
    }

    #[test]
    fn test_phase_serde_snake_case() {
        let json = serde_json::to_string(&GamePhase::Starting).unwrap();
        assert_eq!(json, "\"starting\"");
        let phase: GamePhase = serde_json::from_str("\"escaped\"").unwrap();
        assert_eq!(phase, GamePhase::Escaped);
    }
}

//! The tick loop: frame → presence → phase dispatch → one narration.
//!
//! Ticks are strictly sequential. Each tick runs to completion (including
//! any suspension on collaborator calls) before the next is scheduled, so
//! no locking is needed anywhere in the game state. Collaborator failures
//! never escape a tick: a failed frame fetch or detection skips the tick,
//! a failed reasoning call degrades to "not satisfied" or a canned line.
//!
//! Narration priority within a Playing tick is a hard contract:
//! final-gesture disclosure > hint > task completion > task progress >
//! new task. At most one line is narrated per tick.

use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures::FutureExt;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use schemars::JsonSchema;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::conditions::{ConditionRegistry, ESCAPE_GESTURE};
use crate::config::EngineConfig;
use crate::phase::GamePhase;
use crate::ports::{
    Frame, FrameSource, Narrator, Presence, PresenceDetector, ReasoningBackend,
};
use crate::state::GameState;
use crate::tasks::{ActiveTask, CompletionCondition, NarrationStyle, TaskCatalog};

const EMPTY_ROOM_LINE: &str = "The wardrobe stands quiet. Nobody is here yet.";
const WELCOME_LINE: &str =
    "Ah, visitors! Welcome. Do come in, and close the wardrobe doors behind you.";
const DOORS_ACK_LINE: &str = "The doors are closed. Good. Let us begin.";
const CLOSE_DOORS_LINES: [&str; 3] = [
    "Nothing can begin while the doors stand open.",
    "The doors, dear guests. Close them.",
    "I will wait. The doors will not close themselves.",
];
const HINT_LINES: [&str; 3] = [
    "The wardrobe rewards the curious. Touch things.",
    "What would a child do in here? Do that.",
    "You are closer than you think. Keep at it.",
];
const FINAL_GESTURE_LINE: &str =
    "Enough riddles. I will say it plainly: stand together and embrace, \
     and the way out will open.";
const ESCAPE_LINE: &str = "The gesture is made! The door swings open, you are free.";
const FAREWELL_LINE: &str = "Gone already? Very well. The wardrobe will wait.";

/// What a single tick did, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Game logic ran (it may or may not have narrated).
    Advanced,
    /// Frame older than the staleness bound; no state was touched.
    SkippedStaleFrame,
    /// Frame fetch failed; no state was touched.
    SkippedFrameError,
    /// Detection failed; no state was touched.
    SkippedDetectorError,
}

/// How the loop decides when to run the next tick.
pub enum TickTrigger {
    /// Fixed cadence: `max(0, interval − processing) + extra_delay`.
    Interval,
    /// Manual single-step mode: each received message advances one tick;
    /// the loop stops when the channel closes.
    Manual(mpsc::Receiver<()>),
}

/// Which narration class wins a Playing tick, given the hint chance and
/// one uniform draw. Higher classes always pre-empt lower ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NarrationPriority {
    FinalGesture,
    Hint,
    Task,
}

fn narration_priority(
    chance: f64,
    draw: f64,
    gesture_floor: f64,
    hint_floor: f64,
) -> NarrationPriority {
    if draw < chance && chance > gesture_floor {
        NarrationPriority::FinalGesture
    } else if draw < chance && chance > hint_floor {
        NarrationPriority::Hint
    } else {
        NarrationPriority::Task
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ConditionResponse {
    satisfied: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RosterResponse {
    players: Vec<crate::ports::PlayerSighting>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct LineResponse {
    line: String,
}

fn schema_of<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::gen::SchemaGenerator::default().into_root_schema_for::<T>();
    serde_json::to_value(schema).unwrap_or(serde_json::Value::Null)
}

/// The game engine: owns all mutable state and the four collaborator
/// ports, and runs the tick loop.
pub struct Engine {
    config: EngineConfig,
    state: GameState,
    catalog: TaskCatalog,
    conditions: ConditionRegistry,
    frames: Box<dyn FrameSource>,
    detector: Box<dyn PresenceDetector>,
    reasoning: Box<dyn ReasoningBackend>,
    narrator: Box<dyn Narrator>,
    rng: StdRng,
    /// One-shot delay requested by the narration step, consumed by the
    /// scheduler after the tick that set it.
    extra_delay: Duration,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        catalog: TaskCatalog,
        conditions: ConditionRegistry,
        frames: Box<dyn FrameSource>,
        detector: Box<dyn PresenceDetector>,
        reasoning: Box<dyn ReasoningBackend>,
        narrator: Box<dyn Narrator>,
    ) -> Self {
        let history_cap = config.history_cap;
        Self {
            config,
            state: GameState::new(history_cap),
            catalog,
            conditions,
            frames,
            detector,
            reasoning,
            narrator,
            rng: StdRng::from_entropy(),
            extra_delay: Duration::ZERO,
        }
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    /// Run one tick: fetch frame, detect presence, update staleness and
    /// reset bookkeeping, dispatch to the current phase.
    pub async fn run_tick(&mut self) -> TickOutcome {
        let tick = self.state.phase.tick() + 1;

        let frame = match self.frames.latest_frame().await {
            Ok(frame) => frame,
            Err(e) => {
                warn!(tick, error = %e, "Frame fetch failed, skipping tick");
                return TickOutcome::SkippedFrameError;
            }
        };
        if frame.age() > self.config.frame_staleness() {
            debug!(
                tick,
                age_ms = frame.age().as_millis() as u64,
                "Frame is stale, skipping tick"
            );
            return TickOutcome::SkippedStaleFrame;
        }

        let presence = match self.detector.detect(&frame).await {
            Ok(presence) => presence,
            Err(e) => {
                warn!(tick, error = %e, "Presence detection failed, skipping tick");
                return TickOutcome::SkippedDetectorError;
            }
        };
        debug!(tick, present = presence.present, count = presence.count, "Tick");
        // Only a tick that passed the skip gates counts: skipped ticks
        // leave the state untouched, the counter included.
        self.state.phase.set_tick(tick);
        self.state.last_frame = Some(frame.path.clone());

        if presence.present {
            self.state.last_human_seen_at = Some(Instant::now());
        } else if self.state.phase.current() != GamePhase::Idle {
            if let Some(seen) = self.state.last_human_seen_at {
                if seen.elapsed() > self.config.absence_timeout() {
                    // Reset applies before any narration this tick.
                    self.state
                        .reset(self.config.keep_history_on_reset, "absence timeout");
                    return TickOutcome::Advanced;
                }
            }
        }

        // The hint chance accrues on every processed tick outside Idle.
        if self.state.phase.current() != GamePhase::Idle {
            self.state.bump_hint_chance(self.config.hint_step);
        }

        match self.state.phase.current() {
            GamePhase::Idle => self.tick_idle(presence).await,
            GamePhase::Starting => self.tick_starting().await,
            GamePhase::Started => self.tick_started(&frame).await,
            GamePhase::Playing => self.tick_playing(&frame, presence).await,
            // Terminal phases just wait for the absence-timeout reset.
            GamePhase::Escaped | GamePhase::Ended => {}
        }
        TickOutcome::Advanced
    }

    /// Run the loop until the manual-step channel closes (never, for the
    /// interval trigger).
    ///
    /// Each tick runs behind a panic guard: a panicking tick is logged
    /// and the loop continues on schedule, it never takes the process
    /// down.
    pub async fn run(&mut self, mut trigger: TickTrigger) {
        loop {
            let started = Instant::now();
            let outcome = AssertUnwindSafe(self.run_tick()).catch_unwind().await;
            let processing = started.elapsed();
            match outcome {
                Ok(outcome) => {
                    debug!(?outcome, processing_ms = processing.as_millis() as u64, "Tick complete")
                }
                Err(payload) => {
                    let reason = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "non-string panic payload".to_string());
                    warn!(reason = %reason, "Tick panicked, continuing with the next tick");
                }
            }

            let extra = std::mem::take(&mut self.extra_delay);
            match &mut trigger {
                TickTrigger::Interval => {
                    let delay = self.config.tick_interval().saturating_sub(processing) + extra;
                    tokio::time::sleep(delay).await;
                }
                TickTrigger::Manual(rx) => {
                    if rx.recv().await.is_none() {
                        info!("Step channel closed, stopping the loop");
                        break;
                    }
                }
            }
        }
    }

    async fn tick_idle(&mut self, presence: Presence) {
        if presence.present {
            self.state.idle_presence_streak += 1;
            if self.state.idle_presence_streak >= self.config.debounce_ticks {
                self.state.idle_presence_streak = 0;
                if self
                    .state
                    .phase
                    .advance(GamePhase::Starting, Some("presence debounce satisfied"))
                    .is_ok()
                {
                    self.narrate(WELCOME_LINE).await;
                }
            } else {
                debug!(
                    streak = self.state.idle_presence_streak,
                    "Presence seen, waiting for the debounce"
                );
            }
        } else {
            self.state.idle_presence_streak = 0;
            // Do not repeat the idle-room line on consecutive ticks.
            if self.state.last_narration() != Some(EMPTY_ROOM_LINE) {
                self.narrate(EMPTY_ROOM_LINE).await;
            }
        }
    }

    async fn tick_starting(&mut self) {
        if self
            .conditions
            .is_satisfied(crate::conditions::DOORS_CLOSED)
        {
            if self
                .state
                .phase
                .advance(GamePhase::Started, Some("doors closed"))
                .is_ok()
            {
                self.narrate(DOORS_ACK_LINE).await;
            }
        } else {
            let last = self.state.last_narration().map(str::to_string);
            let options: Vec<&str> = CLOSE_DOORS_LINES
                .iter()
                .copied()
                .filter(|line| Some(*line) != last.as_deref())
                .collect();
            let line = options
                .choose(&mut self.rng)
                .copied()
                .unwrap_or(CLOSE_DOORS_LINES[0]);
            self.narrate(line).await;
        }
    }

    async fn tick_started(&mut self, frame: &Frame) {
        let sightings = self.describe_players(frame).await;
        if !sightings.is_empty() {
            self.state.merge_sightings(sightings);
        }
        if let Some(first) = self.state.players().first() {
            let greeting = format!(
                "I see you, {}. Make yourselves at home.",
                first.appearance
            );
            if self
                .state
                .phase
                .advance(GamePhase::Playing, Some("player identified"))
                .is_ok()
            {
                self.narrate(&greeting).await;
            }
        } else {
            debug!("No players identified yet, retrying next tick");
        }
    }

    async fn tick_playing(&mut self, frame: &Frame, presence: Presence) {
        // Abandonment: the room has been empty longer than the grace.
        if !presence.present {
            if let Some(seen) = self.state.last_human_seen_at {
                if seen.elapsed() > self.config.abandon_grace() {
                    self.state.clear_active_task();
                    if self
                        .state
                        .phase
                        .advance(GamePhase::Ended, Some("room empty mid-game"))
                        .is_ok()
                    {
                        self.narrate(FAREWELL_LINE).await;
                    }
                    return;
                }
            }
        }

        // The escape gesture ends the run regardless of the ladder.
        if self.conditions.is_satisfied(ESCAPE_GESTURE) {
            if self
                .state
                .phase
                .advance(GamePhase::Escaped, Some("escape gesture performed"))
                .is_ok()
            {
                self.narrate(ESCAPE_LINE).await;
            }
            return;
        }

        let chance = self.state.hint_chance();
        let draw: f64 = self.rng.gen();
        match narration_priority(
            chance,
            draw,
            self.config.gesture_floor,
            self.config.hint_floor,
        ) {
            NarrationPriority::FinalGesture => {
                self.narrate(FINAL_GESTURE_LINE).await;
            }
            NarrationPriority::Hint => {
                let line = self.pick_hint_line();
                self.narrate(&line).await;
            }
            NarrationPriority::Task => {
                if self.state.active_task().is_some() {
                    self.progress_active_task(frame).await;
                } else {
                    self.assign_new_task(frame).await;
                }
            }
        }
    }

    async fn progress_active_task(&mut self, frame: &Frame) {
        if self.evaluate_active_condition(frame).await {
            if let Some(mut task) = self.state.clear_active_task() {
                task.mark_completed();
                self.state.bump_hint_chance(self.config.completion_bonus);
                info!(task = %task.definition.id, asks = task.ask_count, "Task completed");
                let line = format!("Well done! {}, it is done.", task.definition.title);
                self.narrate(&line).await;
            }
        } else {
            self.ask_active_task(frame).await;
        }
    }

    async fn assign_new_task(&mut self, frame: &Frame) {
        let Some(definition) = self.catalog.pick(&mut self.rng) else {
            debug!("Task catalog is empty, nothing to assign");
            return;
        };
        info!(task = %definition.id, "Assigning new task");
        if let Err(e) = self.state.assign_task(ActiveTask::new(definition)) {
            warn!(error = %e, "Refusing to assign over an active task");
            return;
        }
        self.ask_active_task(frame).await;
    }

    /// Narrate the active task once, escalating the style with the ask
    /// count and surfacing hints from the third ask onward.
    async fn ask_active_task(&mut self, frame: &Frame) {
        let (style, hint, description, group) = {
            let Some(task) = self.state.active_task_mut() else {
                return;
            };
            let (style, hint) = task.record_ask();
            (
                style,
                hint,
                task.definition.description.clone(),
                task.definition.group_task,
            )
        };
        let mut line = self.compose_ask_line(frame, &description, style, group).await;
        if let Some(hint) = &hint {
            line.push_str(&format!(" Here is a clue: {hint}"));
        }
        self.narrate(&line).await;
    }

    async fn evaluate_active_condition(&mut self, frame: &Frame) -> bool {
        let condition = match self.state.active_task() {
            Some(task) => task.definition.condition.clone(),
            None => return false,
        };
        match condition {
            CompletionCondition::Special { key } => self.conditions.is_satisfied(&key),
            CompletionCondition::Vision { prompt } => {
                self.check_vision_condition(frame, &prompt).await
            }
        }
    }

    async fn check_vision_condition(&self, frame: &Frame, prompt: &str) -> bool {
        let context = format!("Look at the camera frame and answer strictly. {prompt}");
        let schema = schema_of::<ConditionResponse>();
        match self.reasoning.evaluate(frame, &context, &schema).await {
            Ok(value) => match serde_json::from_value::<ConditionResponse>(value) {
                Ok(response) => response.satisfied,
                Err(e) => {
                    warn!(error = %e, "Condition response failed validation, not satisfied");
                    false
                }
            },
            Err(e) => {
                warn!(error = %e, "Reasoning unavailable for condition check, not satisfied");
                false
            }
        }
    }

    async fn describe_players(&self, frame: &Frame) -> Vec<crate::ports::PlayerSighting> {
        let roster: Vec<String> = self
            .state
            .players()
            .iter()
            .map(|p| p.appearance.clone())
            .collect();
        let context = format!(
            "Describe each person visible in the frame: appearance, current \
             activity, anything held, and apparent gender. Keep the same \
             ordering as the previous roster. Previous roster: {}.",
            if roster.is_empty() {
                "empty".to_string()
            } else {
                roster.join("; ")
            }
        );
        let schema = schema_of::<RosterResponse>();
        match self.reasoning.evaluate(frame, &context, &schema).await {
            Ok(value) => match serde_json::from_value::<RosterResponse>(value) {
                Ok(response) => response.players,
                Err(e) => {
                    warn!(error = %e, "Roster response failed validation, keeping old roster");
                    Vec::new()
                }
            },
            Err(e) => {
                warn!(error = %e, "Reasoning unavailable for player descriptions");
                Vec::new()
            }
        }
    }

    /// Compose the ask line via the reasoning backend, falling back to a
    /// style template when the backend is unavailable.
    async fn compose_ask_line(
        &self,
        frame: &Frame,
        description: &str,
        style: NarrationStyle,
        group: bool,
    ) -> String {
        let audience = if group {
            "the whole group"
        } else {
            "one of the players"
        };
        let mood = match style {
            NarrationStyle::Theatrical => ", openly frustrated that nothing has happened yet",
            _ => "",
        };
        let context = format!(
            "You are the voice of an enchanted wardrobe. Urge {audience} to \
             {description}. Speak a single sentence in a {style} register{mood}."
        );
        let schema = schema_of::<LineResponse>();
        match self.reasoning.evaluate(frame, &context, &schema).await {
            Ok(value) => match serde_json::from_value::<LineResponse>(value) {
                Ok(response) if !response.line.trim().is_empty() => return response.line,
                Ok(_) => debug!("Reasoning returned an empty line, using the template"),
                Err(e) => {
                    warn!(error = %e, "Ask line failed validation, using the template")
                }
            },
            Err(e) => debug!(error = %e, "Reasoning unavailable for ask line, using the template"),
        }
        match style {
            NarrationStyle::Passive => {
                format!("Someone in there looks like they might just {description}.")
            }
            NarrationStyle::Direct => format!("You there, why not {description}?"),
            NarrationStyle::Theatrical => {
                format!("Still nothing?! I beg of you: {description}!")
            }
        }
    }

    fn pick_hint_line(&mut self) -> String {
        if let Some(task) = self.state.active_task() {
            if let Some(hint) = task.definition.hints.choose(&mut self.rng) {
                return hint.clone();
            }
        }
        HINT_LINES
            .choose(&mut self.rng)
            .copied()
            .unwrap_or(HINT_LINES[0])
            .to_string()
    }

    /// Record the line in history, then send it to the narrator. A
    /// narrator failure loses the audio, not the history entry.
    async fn narrate(&mut self, text: &str) {
        self.state.record_narration(text);
        match self.narrator.narrate(text).await {
            Ok(outcome) => {
                if let Some(duration) = outcome.speech_duration {
                    self.extra_delay = duration;
                }
                info!(line = text, "Narrated");
            }
            Err(e) => warn!(error = %e, line = text, "Narration failed"),
        }
    }
}

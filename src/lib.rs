//! Game-tick orchestration engine for the wardrobe escape room.
//!
//! The engine owns all mutable game state and runs a strictly sequential
//! tick loop: pull the latest camera frame, ask the presence detector for
//! a human count, advance the phase state machine, drive the task/hint
//! ladder, and dispatch at most one narration line per tick.
//!
//! Everything outside the tick loop (frame capture, the detection model,
//! the reasoning backend, speech synthesis) is an external collaborator
//! reachable only through the port traits in [`ports`].

pub mod adapters;
pub mod conditions;
pub mod config;
pub mod engine;
pub mod phase;
pub mod ports;
pub mod state;
pub mod tasks;

pub use engine::{Engine, TickOutcome, TickTrigger};
pub use phase::GamePhase;
pub use state::GameState;
pub use tasks::TaskCatalog;

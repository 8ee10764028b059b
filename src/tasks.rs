//! Task definitions, the ask ladder, and the task catalog.
//!
//! A [`TaskDefinition`] is immutable content: a behavior to coax out of
//! the players, a completion condition, and a hint list. The engine wraps
//! the currently pursued definition in an [`ActiveTask`], which tracks how
//! many times it has been narrated and escalates the narration style.
//!
//! The catalog is loaded once from a TOML file (`[[tasks]]` array); a
//! malformed entry is skipped with a warning rather than failing the load.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// How a task is judged complete.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompletionCondition {
    /// Evaluated locally against a keyed condition registry
    /// (e.g. the doors-closed sensor).
    Special { key: String },
    /// Delegated to the reasoning backend with a yes/no prompt about the
    /// current frame.
    Vision { prompt: String },
}

/// Immutable task content, loaded from the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: String,
    pub title: String,
    /// Imperative phrase describing the target behavior
    /// ("hug the bear on the shelf"). Narration templates splice this in.
    pub description: String,
    /// Whether the task addresses the whole group rather than one person.
    #[serde(default)]
    pub group_task: bool,
    /// Authoring guideline for how many asks the content expects.
    /// The engine never abandons a task because of it.
    #[serde(default = "default_max_asks")]
    pub max_asks: u32,
    pub condition: CompletionCondition,
    /// Hints surfaced from the third ask onward, in order.
    #[serde(default)]
    pub hints: Vec<String>,
}

fn default_max_asks() -> u32 {
    3
}

/// Narration register for an ask, escalating with the ask count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrationStyle {
    /// Third-person observation ("The person seems to be considering...").
    Passive,
    /// Second-person address ("You there, why not...").
    Direct,
    /// Frustrated theatrics, with a hint attached.
    Theatrical,
}

impl NarrationStyle {
    /// Style for the given ask number (1-based). Monotone: the ladder
    /// never regresses.
    pub fn for_ask(ask: u32) -> Self {
        match ask {
            0 | 1 => Self::Passive,
            2 => Self::Direct,
            _ => Self::Theatrical,
        }
    }
}

impl std::fmt::Display for NarrationStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passive => write!(f, "passive"),
            Self::Direct => write!(f, "direct"),
            Self::Theatrical => write!(f, "theatrical"),
        }
    }
}

/// The single in-progress task the engine is pursuing.
#[derive(Debug, Clone)]
pub struct ActiveTask {
    pub definition: Arc<TaskDefinition>,
    /// How many times this task has been narrated.
    pub ask_count: u32,
    pub last_ask_at: Option<Instant>,
    pub last_style: Option<NarrationStyle>,
    pub completed: bool,
    pub completed_at: Option<Instant>,
}

impl ActiveTask {
    pub fn new(definition: Arc<TaskDefinition>) -> Self {
        Self {
            definition,
            ask_count: 0,
            last_ask_at: None,
            last_style: None,
            completed: false,
            completed_at: None,
        }
    }

    /// Record one narrated ask. Returns the style to narrate in and, from
    /// the third ask onward, the hint at index `ask_count − 3` (None once
    /// the hint list is exhausted). The ladder cycles indefinitely.
    pub fn record_ask(&mut self) -> (NarrationStyle, Option<String>) {
        self.ask_count += 1;
        self.last_ask_at = Some(Instant::now());
        let style = NarrationStyle::for_ask(self.ask_count);
        self.last_style = Some(style);
        let hint = if self.ask_count >= 3 {
            self.definition
                .hints
                .get((self.ask_count - 3) as usize)
                .cloned()
        } else {
            None
        };
        (style, hint)
    }

    pub fn mark_completed(&mut self) {
        self.completed = true;
        self.completed_at = Some(Instant::now());
    }
}

/// The loaded set of task definitions, read-only for the run.
pub struct TaskCatalog {
    tasks: Vec<Arc<TaskDefinition>>,
}

impl TaskCatalog {
    /// Load a catalog from a TOML file with a `[[tasks]]` array.
    ///
    /// Each entry is deserialized individually: a malformed entry is
    /// skipped with a warning and the rest of the catalog still loads.
    /// An empty catalog is allowed, the engine then assigns no new tasks.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read task catalog {}", path.display()))?;
        let doc: toml::Value = raw
            .parse()
            .with_context(|| format!("Failed to parse task catalog {}", path.display()))?;

        let entries = doc
            .get("tasks")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut tasks = Vec::new();
        for (index, entry) in entries.into_iter().enumerate() {
            match entry.try_into::<TaskDefinition>() {
                Ok(def) => tasks.push(Arc::new(def)),
                Err(e) => warn!(index, error = %e, "Skipping malformed task definition"),
            }
        }
        if tasks.is_empty() {
            warn!(path = %path.display(), "Task catalog is empty, no tasks will be assigned");
        }
        Ok(Self { tasks })
    }

    /// Build a catalog from already-constructed definitions.
    pub fn from_definitions(defs: Vec<TaskDefinition>) -> Self {
        Self {
            tasks: defs.into_iter().map(Arc::new).collect(),
        }
    }

    /// The default wardrobe task set, used when no catalog file is given.
    pub fn builtin() -> Self {
        let defs = vec![
            TaskDefinition {
                id: "hug_bear".into(),
                title: "Hug the bear".into(),
                description: "hug the bear on the shelf".into(),
                group_task: false,
                max_asks: 3,
                condition: CompletionCondition::Vision {
                    prompt: "Is anyone hugging or holding the teddy bear?".into(),
                },
                hints: vec![
                    "The bear sits on the middle shelf, behind the hats.".into(),
                    "A hug means both arms, held for a moment.".into(),
                    "The bear has been waiting for years. Do not be shy.".into(),
                ],
            },
            TaskDefinition {
                id: "wear_coat".into(),
                title: "Put on a coat".into(),
                description: "put on one of the hanging coats".into(),
                group_task: false,
                max_asks: 3,
                condition: CompletionCondition::Vision {
                    prompt: "Is anyone wearing one of the long coats from the rack?".into(),
                },
                hints: vec![
                    "The fur coat on the left fits anyone.".into(),
                    "Sleeves first. Then the collar.".into(),
                ],
            },
            TaskDefinition {
                id: "knock_panel".into(),
                title: "Knock on the back panel".into(),
                description: "knock three times on the back panel".into(),
                group_task: false,
                max_asks: 4,
                condition: CompletionCondition::Vision {
                    prompt: "Is anyone knocking on the wooden back wall?".into(),
                },
                hints: vec![
                    "The back of the wardrobe is not as solid as it looks.".into(),
                    "Three knocks. Slowly.".into(),
                ],
            },
            TaskDefinition {
                id: "stand_together".into(),
                title: "Stand together".into(),
                description: "stand shoulder to shoulder in the middle of the room".into(),
                group_task: true,
                max_asks: 3,
                condition: CompletionCondition::Vision {
                    prompt: "Are all visible people standing close together in the center?".into(),
                },
                hints: vec!["Closer. This is not a dance, it is a huddle.".into()],
            },
        ];
        Self::from_definitions(defs)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Pick a definition uniformly at random. None if the catalog is empty.
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Arc<TaskDefinition>> {
        self.tasks.choose(rng).cloned()
    }
}

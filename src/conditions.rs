//! Keyed special-condition registry.
//!
//! `special` completion conditions and the phase gates (doors closed,
//! escape gesture) are evaluated locally against named boolean evaluators
//! registered here, rather than hardcoded. The binary wires them to
//! whatever signal source the deployment has (a sensor bridge writing
//! marker files, a GPIO poller, a test flag).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::warn;

/// Condition key for the wardrobe-doors-closed sensor.
pub const DOORS_CLOSED: &str = "doors_closed";
/// Condition key for the final escape gesture.
pub const ESCAPE_GESTURE: &str = "escape_gesture";

type Evaluator = Box<dyn Fn() -> bool + Send + Sync>;

/// String key → boolean evaluator map.
#[derive(Default)]
pub struct ConditionRegistry {
    evaluators: HashMap<String, Evaluator>,
}

impl ConditionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: impl Into<String>, eval: Evaluator) {
        self.evaluators.insert(key.into(), eval);
    }

    /// Register an atomic-flag condition and return the flag, so the
    /// caller (or a test) can flip it.
    pub fn flag(&mut self, key: impl Into<String>) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(false));
        let probe = Arc::clone(&flag);
        self.register(key, Box::new(move || probe.load(Ordering::Relaxed)));
        flag
    }

    /// Register a condition satisfied while a marker file exists.
    pub fn file_flag(&mut self, key: impl Into<String>, path: PathBuf) {
        self.register(key, Box::new(move || path.exists()));
    }

    /// Evaluate a condition. An unknown key logs a warning and counts as
    /// not satisfied, never an error.
    pub fn is_satisfied(&self, key: &str) -> bool {
        match self.evaluators.get(key) {
            Some(eval) => eval(),
            None => {
                warn!(key, "Unknown special condition key, treating as not satisfied");
                false
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.evaluators.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_roundtrip() {
        let mut registry = ConditionRegistry::new();
        let doors = registry.flag(DOORS_CLOSED);
        assert!(!registry.is_satisfied(DOORS_CLOSED));
        doors.store(true, Ordering::Relaxed);
        assert!(registry.is_satisfied(DOORS_CLOSED));
    }

    #[test]
    fn test_unknown_key_is_not_satisfied() {
        let registry = ConditionRegistry::new();
        assert!(!registry.is_satisfied("no_such_key"));
        assert!(!registry.contains("no_such_key"));
    }

    #[test]
    fn test_closure_conditions_are_reevaluated() {
        let mut registry = ConditionRegistry::new();
        let counter = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let probe = Arc::clone(&counter);
        registry.register(
            "every_other",
            Box::new(move || probe.fetch_add(1, Ordering::Relaxed) % 2 == 1),
        );
        assert!(!registry.is_satisfied("every_other"));
        assert!(registry.is_satisfied("every_other"));
    }

    #[test]
    fn test_file_flag() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("doors_closed");
        let mut registry = ConditionRegistry::new();
        registry.file_flag(DOORS_CLOSED, marker.clone());

        assert!(!registry.is_satisfied(DOORS_CLOSED));
        std::fs::write(&marker, b"").unwrap();
        assert!(registry.is_satisfied(DOORS_CLOSED));
        std::fs::remove_file(&marker).unwrap();
        assert!(!registry.is_satisfied(DOORS_CLOSED));
    }
}

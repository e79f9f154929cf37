//! Run context — user state plus engine-owned usage and metadata.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::usage::Usage;

/// Carries an opaque user payload through every callback of a run, together
/// with the mutable state the engine owns (accumulated usage, metadata).
///
/// One context belongs to exactly one run. Mutations go through a mutex so
/// parallel tool invocations observe them serialised; the user payload
/// itself is never written by the engine.
pub struct RunContext<C = ()> {
    user: C,
    state: Mutex<ContextState>,
}

#[derive(Default)]
struct ContextState {
    usage: Usage,
    metadata: HashMap<String, serde_json::Value>,
}

impl RunContext<()> {
    pub fn new() -> Self {
        Self::wrap(())
    }
}

impl Default for RunContext<()> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> RunContext<C> {
    pub fn wrap(user: C) -> Self {
        Self {
            user,
            state: Mutex::new(ContextState::default()),
        }
    }

    /// Read-only view of the user payload.
    pub fn user(&self) -> &C {
        &self.user
    }

    pub fn update_usage(&self, incoming: &Usage) {
        self.lock().usage.add(incoming);
    }

    pub fn usage(&self) -> Usage {
        self.lock().usage
    }

    pub fn set_metadata(&self, key: impl Into<String>, value: serde_json::Value) {
        self.lock().metadata.insert(key.into(), value);
    }

    pub fn get_metadata(&self, key: &str) -> Option<serde_json::Value> {
        self.lock().metadata.get(key).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ContextState> {
        // A panicked tool cannot leave the counters half-written, so a
        // poisoned lock is safe to re-enter.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

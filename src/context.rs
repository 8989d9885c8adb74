/*!
Scoped key/value data carried to guards and actions, plus introspection of
the in-flight transition.

Generalizes the teacher's `core::context::Context` (a nested
`FieldValue`/`Object`/`Array` document addressed by `FieldPath`) down to the
flat key/value scope the specification actually calls for (spec.md §4.6),
backed by `serde_json::Value` so a context round-trips through
[`crate::snapshot::Snapshot`] without a bespoke encoding.
*/

use crate::id::StateId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// An ambient cancellation signal a guard or action may observe.
///
/// Modeled on the `context.Done()`-style cancellation token common in this
/// corpus's async-adjacent crates; the engine itself never sets this — it is
/// wired in by the caller via [`Context::with_cancellation`] when
/// constructing an [`crate::instance::Instance`].
#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn done(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn err(&self) -> Option<&'static str> {
        if self.done() {
            Some("context cancelled")
        } else {
            None
        }
    }
}

/// The data scope visible to guards and actions during dispatch.
///
/// The key/value map is internally locked so a `Context` can be shared (by
/// reference) across the guard and action invocations of a single step
/// without requiring `&mut` access through the dispatcher's borrow. The
/// in-flight transition fields are written only by the dispatcher around a
/// step, per spec.md §4.6.
pub struct Context {
    data: RwLock<HashMap<String, serde_json::Value>>,
    current_state: RwLock<Option<StateId>>,
    previous_state: RwLock<Option<StateId>>,
    source_state: RwLock<Option<StateId>>,
    target_state: RwLock<Option<StateId>>,
    current_event: RwLock<Option<String>>,
    cancellation: CancellationToken,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            current_state: RwLock::new(None),
            previous_state: RwLock::new(None),
            source_state: RwLock::new(None),
            target_state: RwLock::new(None),
            current_event: RwLock::new(None),
            cancellation: CancellationToken::new(),
        }
    }
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(cancellation: CancellationToken) -> Self {
        Self {
            cancellation,
            ..Self::default()
        }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    // ---- key/value access -------------------------------------------------

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.data.read().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.data.write().insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) -> Option<serde_json::Value> {
        self.data.write().remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.read().contains_key(key)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.as_bool())
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(str::to_owned))
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.as_i64())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.as_f64())
    }

    /// A plain `HashMap` snapshot of the data map, used by
    /// [`crate::snapshot::Snapshot`].
    pub fn to_map(&self) -> HashMap<String, serde_json::Value> {
        self.data.read().clone()
    }

    pub fn replace_map(&self, map: HashMap<String, serde_json::Value>) {
        *self.data.write() = map;
    }

    // ---- in-flight transition bookkeeping (dispatcher-owned) --------------

    pub fn current_state(&self) -> Option<StateId> {
        self.current_state.read().clone()
    }

    pub fn previous_state(&self) -> Option<StateId> {
        self.previous_state.read().clone()
    }

    pub fn source_state(&self) -> Option<StateId> {
        self.source_state.read().clone()
    }

    pub fn target_state(&self) -> Option<StateId> {
        self.target_state.read().clone()
    }

    pub fn current_event(&self) -> Option<String> {
        self.current_event.read().clone()
    }

    pub(crate) fn begin_transition(&self, source: &StateId, target: &StateId, event: &str) {
        *self.source_state.write() = Some(source.clone());
        *self.target_state.write() = Some(target.clone());
        *self.current_event.write() = Some(event.to_string());
    }

    pub(crate) fn commit_current(&self, new_current: &StateId) {
        let previous = self.current_state.read().clone();
        *self.previous_state.write() = previous;
        *self.current_state.write() = Some(new_current.clone());
    }

    /// Set `current_state` directly from a restored [`crate::snapshot::Snapshot`],
    /// bypassing the previous/source/target bookkeeping a live transition would
    /// update (spec.md §6 `restore`).
    pub(crate) fn restore_current(&self, current: Option<StateId>) {
        *self.current_state.write() = current;
    }

    /// Produce a child context for a forked leg: inherits the data map at
    /// fork time, then diverges independently (spec.md §4.6).
    pub(crate) fn fork_child(&self) -> Self {
        Self {
            data: RwLock::new(self.data.read().clone()),
            current_state: RwLock::new(self.current_state.read().clone()),
            previous_state: RwLock::new(None),
            source_state: RwLock::new(None),
            target_state: RwLock::new(None),
            current_event: RwLock::new(None),
            cancellation: self.cancellation.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get_round_trips() {
        let ctx = Context::new();
        ctx.set("ok", true);
        assert_eq!(ctx.get_bool("ok"), Some(true));
    }

    #[test]
    fn cancellation_is_observable() {
        let token = CancellationToken::new();
        let ctx = Context::with_cancellation(token.clone());
        assert!(!ctx.cancellation().done());
        token.cancel();
        assert!(ctx.cancellation().done());
        assert!(ctx.cancellation().err().is_some());
    }

    #[test]
    fn fork_child_diverges_after_copy() {
        let parent = Context::new();
        parent.set("shared", 1);
        let child = parent.fork_child();
        child.set("shared", 2);
        assert_eq!(parent.get_i64("shared"), Some(1));
        assert_eq!(child.get_i64("shared"), Some(2));
    }
}

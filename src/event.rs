/*!
The event posted to a running instance, and the outcome of dispatching it.

The teacher's `execution::mod::InternalEvent` conflated the public event name
with internally synthesized lifecycle markers (`Init`, `Done`, `Entry`, `Run`,
`Exit`, `Transition`). Here the public surface is a plain event name string;
lifecycle bookkeeping (completion events, history recording) lives entirely
inside [`crate::dispatch`] and never reaches the caller.
*/

use crate::id::StateId;

/// An event name together with an ad hoc set of context fields (merged into
/// the instance [`crate::context::Context`] before transition selection runs,
/// spec.md §4.2).
#[derive(Clone, Debug)]
pub struct Event {
    pub name: String,
    pub fields: Vec<(String, serde_json::Value)>,
}

impl Event {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.push((key.into(), value.into()));
        self
    }
}

impl From<&str> for Event {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// The outcome of a single [`crate::instance::Instance::post`] call —
/// spec.md §7's `{ processed, state-changed, previous-state, current-state,
/// rejection-reason?, error? }` result record. `error?` is not a field here:
/// hard operation failures (action panics, a machine that is not `Started`)
/// come back as `Err(InstanceError)` from the call itself, which is the more
/// idiomatic Rust shape for the same distinction spec.md draws between a
/// soft per-event rejection and a hard failure.
///
/// A rejected or no-match event is not a Rust error (spec.md's error-handling
/// design carries per-event soft failures as data, not `Result::Err`): it is
/// represented here as `matched == false` with `rejection_reason` set.
#[derive(Clone, Debug, Default)]
pub struct EventResult {
    /// `true` if some transition fired in response to this event
    /// (spec.md's `processed`).
    pub matched: bool,
    /// Why no transition fired, set only when `matched` is `false`.
    pub rejection_reason: Option<String>,
    /// The leaf `current_state` was before this call, if any.
    pub previous_state: Option<StateId>,
    /// The leaf `current_state` is now, if any.
    pub current_state: Option<StateId>,
    /// `true` if any state was exited or entered by this call — set even for
    /// a self-transition, which exits and re-enters the same state
    /// (spec.md §8: "exit/entry for a self-transition emits exactly one exit
    /// and one entry").
    pub state_changed: bool,
    /// States exited, in exit order (innermost first).
    pub exited: Vec<StateId>,
    /// States entered, in entry order (outermost first).
    pub entered: Vec<StateId>,
    /// `true` if this call drove the instance into its final configuration
    /// (every top-level region reached a final state, or a `Terminate`
    /// pseudostate was reached).
    pub completed: bool,
}

impl EventResult {
    pub(crate) fn unmatched(reason: impl Into<String>) -> Self {
        Self {
            rejection_reason: Some(reason.into()),
            ..Self::default()
        }
    }
}

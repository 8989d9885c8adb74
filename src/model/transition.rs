/*!
Transitions, guards, and actions.

Generalizes the teacher's `ConditionFn<E, D>` / `ActionFn<D>` closures
(`Rc<dyn Fn(...)>`, single-threaded) to `Arc<dyn Fn(...) + Send + Sync>` so a
[`crate::definition::Definition`] can be shared across the threads spec.md §5
requires it to support.
*/

use crate::context::Context;
use crate::id::StateId;
use std::fmt;
use std::sync::Arc;

/// A pure boolean predicate over the in-flight [`Context`].
///
/// Guards are invoked during transition selection under panic isolation
/// (spec.md §4.3): a panicking guard is treated as "returned false", never
/// propagated.
pub type Guard = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

/// An error returned by an [`Action`]; aborts the in-flight transition and
/// leaves `active` untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionError(pub String);

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ActionError {}

impl From<&str> for ActionError {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ActionError {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A behavior executed for entry, exit, transition effect, or pseudostate
/// entry hook. May mutate the context; an `Err` aborts the in-flight
/// transition (spec.md §4.3).
pub type Action = Arc<dyn Fn(&Context) -> Result<(), ActionError> + Send + Sync>;

/// The reserved event-name prefix for engine-synthesized completion events
/// (spec.md §4.5, §9): `__completion_<parallel-id>`.
pub const COMPLETION_EVENT_PREFIX: &str = "__completion_";

pub fn completion_event_name(parallel_id: &StateId) -> String {
    format!("{COMPLETION_EVENT_PREFIX}{parallel_id}")
}

/// `{ source, target, event-name, optional guard, optional action }`
/// (spec.md §3). An empty `event` name marks a completion transition
/// candidate considered only as the fallback when no
/// `__completion_<id>`-named transition exists.
#[derive(Clone)]
pub struct Transition {
    pub label: Option<String>,
    pub source: StateId,
    pub target: StateId,
    pub event: String,
    pub guard: Option<Guard>,
    pub action: Option<Action>,
}

impl Transition {
    pub fn matches_event(&self, event_name: &str) -> bool {
        self.event == event_name
    }
}

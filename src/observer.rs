/*!
Observer fan-out: external parties watching an [`crate::instance::Instance`]
without being able to influence it (spec.md §4.7).

Generalizes the teacher's ad hoc `debug!`/`trace!` logging calls scattered
through `execution::mod::StateMachineInstance::execute` into a proper
subscriber list. Every hook is dispatched to a snapshot of the observer list
(an `Arc` clone taken under a brief read lock), so a `subscribe` call racing
with an in-flight notification never deadlocks and never delivers a
partially-updated list; a panicking observer is caught and reported via
`on_error`, never allowed to corrupt the instance or silence the remaining
observers. A panic raised from inside that `on_error` call is swallowed
rather than re-dispatched, so one broken observer can't recurse forever.
*/

use crate::id::StateId;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Hooks fired as an instance moves through its lifecycle. All have default
/// no-op bodies; implement only what you need. `on_transition` and
/// `on_state_enter` are the two hooks spec.md §4.7 calls out as the ones
/// most implementors need; the rest cover finer-grained lifecycle detail.
pub trait Observer: Send + Sync {
    fn on_state_enter(&self, _state: &StateId) {}
    fn on_state_exit(&self, _state: &StateId) {}
    fn on_transition(&self, _source: &StateId, _target: &StateId, _event: &str) {}
    fn on_guard_evaluation(&self, _state: &StateId, _event: &str, _passed: bool) {}
    fn on_action_execution(&self, _state: &StateId, _event: &str) {}
    fn on_event_rejected(&self, _event: &str) {}
    fn on_error(&self, _message: &str) {}
    fn on_machine_started(&self) {}
    fn on_machine_stopped(&self) {}
}

pub(crate) fn notify<F>(observers: &[Arc<dyn Observer>], mut f: F)
where
    F: FnMut(&dyn Observer),
{
    for observer in observers {
        let observer_ref = observer.as_ref();
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| f(observer_ref))) {
            let message = panic_message(&payload);
            tracing::warn!(%message, "observer panicked; reporting via on_error and continuing");
            let _ = catch_unwind(AssertUnwindSafe(|| observer_ref.on_error(&message)));
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "observer panicked with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(Arc<AtomicUsize>);
    impl Observer for Counting {
        fn on_state_enter(&self, _state: &StateId) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Panicking;
    impl Observer for Panicking {
        fn on_state_enter(&self, _state: &StateId) {
            panic!("boom");
        }
    }

    #[test]
    fn a_panicking_observer_does_not_stop_the_remaining_observers() {
        let count = Arc::new(AtomicUsize::new(0));
        let observers: Vec<Arc<dyn Observer>> =
            vec![Arc::new(Panicking), Arc::new(Counting(count.clone()))];
        let id = StateId::new("s");
        notify(&observers, |o| o.on_state_enter(&id));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}

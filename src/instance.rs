/*!
A running instance of a [`crate::definition::Definition`] (spec.md §3, §5).

Generalizes the teacher's `execution::mod::StateMachineInstance<E, D>`
(`Rc<StateMachine<E, D>>` + `RefCell<ExecutionState>`, single-threaded) to the
specification's thread-safety model: the `Definition` is shared read-only
behind an `Arc`, and every externally visible operation serializes through a
single `parking_lot::Mutex` guarding the mutable active-configuration state
(spec.md §5). The teacher's five-way `ExecutionState` (`New`, `Active`,
`InAction`, `Done`, `Error`) collapses to the three phases the specification
actually distinguishes: before start, after start, and wedged by a panic.
*/

use crate::context::Context;
use crate::definition::Definition;
use crate::dispatch::{self, MutableState};
use crate::error::{InstanceError, InstanceResult};
use crate::event::{Event, EventResult};
use crate::id::StateId;
use crate::model::StateNode;
use crate::observer::Observer;
use crate::snapshot::Snapshot;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Phase {
    Stopped,
    Started,
    /// A guard or action panicked mid-operation; the instance refuses
    /// further operations until explicitly [`Instance::reset`].
    Error,
}

struct Locked {
    phase: Phase,
    state: MutableState,
}

/// A single running instance. Cheap to clone the `Arc<Definition>` it holds;
/// the instance itself is not `Clone` (its identity and mutable state are
/// exclusive to this handle), but is `Send + Sync` and may be shared behind
/// an `Arc` across threads.
pub struct Instance {
    id: Uuid,
    definition: Arc<Definition>,
    context: Context,
    observers: RwLock<Vec<Arc<dyn Observer>>>,
    locked: Mutex<Locked>,
}

impl Instance {
    pub fn new(definition: Arc<Definition>) -> Self {
        Self {
            id: Uuid::new_v4(),
            definition,
            context: Context::new(),
            observers: RwLock::new(Vec::new()),
            locked: Mutex::new(Locked {
                phase: Phase::Stopped,
                state: MutableState::default(),
            }),
        }
    }

    pub fn with_context(definition: Arc<Definition>, context: Context) -> Self {
        Self {
            id: Uuid::new_v4(),
            definition,
            context,
            observers: RwLock::new(Vec::new()),
            locked: Mutex::new(Locked {
                phase: Phase::Stopped,
                state: MutableState::default(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn definition(&self) -> &Arc<Definition> {
        &self.definition
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn phase(&self) -> Phase {
        self.locked.lock().phase
    }

    pub fn is_started(&self) -> bool {
        self.phase() == Phase::Started
    }

    pub fn is_in_error(&self) -> bool {
        self.phase() == Phase::Error
    }

    pub fn subscribe(&self, observer: Arc<dyn Observer>) {
        self.observers.write().push(observer);
    }

    fn observers_snapshot(&self) -> Vec<Arc<dyn Observer>> {
        self.observers.read().clone()
    }

    /// Enter the machine's initial configuration. Fails if already started.
    pub fn start(&self) -> InstanceResult<EventResult> {
        let observers = self.observers_snapshot();
        let mut locked = self.locked.lock();
        if locked.phase != Phase::Stopped {
            return Err(InstanceError::NotStopped(locked.phase));
        }
        match dispatch::start_instance(&self.definition, &self.context, &observers, &mut locked.state) {
            Ok(result) => {
                locked.phase = if dispatch::has_reached_terminate(&self.definition, &locked.state) {
                    Phase::Stopped
                } else {
                    Phase::Started
                };
                Ok(result)
            }
            Err(e) => {
                locked.phase = Phase::Error;
                Err(e)
            }
        }
    }

    /// Exit every active state and return to the `Stopped` phase.
    pub fn stop(&self) -> InstanceResult<()> {
        let observers = self.observers_snapshot();
        let mut locked = self.locked.lock();
        if locked.phase != Phase::Started {
            return Err(InstanceError::NotStarted(locked.phase));
        }
        match dispatch::stop_instance(&self.definition, &self.context, &observers, &mut locked.state) {
            Ok(()) => {
                locked.phase = Phase::Stopped;
                Ok(())
            }
            Err(e) => {
                locked.phase = Phase::Error;
                Err(e)
            }
        }
    }

    /// Stop (if started) and discard all history and join bookkeeping,
    /// clearing an `Error` phase as well. Leaves the instance `Stopped`.
    pub fn reset(&self) -> InstanceResult<()> {
        let observers = self.observers_snapshot();
        let mut locked = self.locked.lock();
        if locked.phase == Phase::Started {
            // best-effort: a stop from a wedged active set may itself fail;
            // either way we proceed to clear bookkeeping and return to Stopped.
            let _ = dispatch::stop_instance(&self.definition, &self.context, &observers, &mut locked.state);
        }
        locked.state = MutableState::default();
        locked.phase = Phase::Stopped;
        Ok(())
    }

    /// Post a named event with no extra context fields.
    pub fn post(&self, event_name: &str) -> InstanceResult<EventResult> {
        self.post_event(Event::new(event_name))
    }

    pub fn post_event(&self, event: Event) -> InstanceResult<EventResult> {
        if event.name.is_empty() {
            return Err(InstanceError::EmptyEventName);
        }
        let observers = self.observers_snapshot();
        let mut locked = self.locked.lock();
        if locked.phase != Phase::Started {
            return Err(InstanceError::NotStarted(locked.phase));
        }
        for (key, value) in &event.fields {
            self.context.set(key.clone(), value.clone());
        }
        match dispatch::dispatch_event(
            &self.definition,
            &self.context,
            &observers,
            &mut locked.state,
            &event.name,
        ) {
            Ok(result) => {
                if dispatch::has_reached_terminate(&self.definition, &locked.state) {
                    locked.phase = Phase::Stopped;
                }
                Ok(result)
            }
            Err(e) => {
                locked.phase = Phase::Error;
                Err(e)
            }
        }
    }

    pub fn is_active(&self, id: &StateId) -> bool {
        self.locked.lock().state.active.contains(id)
    }

    /// `true` if `id` is part of the current active configuration.
    ///
    /// Coincides with [`Self::is_in_state`] in this engine: composite and
    /// parallel ancestors are always inserted into `active` alongside the
    /// leaf that is actually resting (see [`dispatch::enter_target`]), so
    /// there is no separate "ancestor-only" membership to distinguish.
    pub fn is_state_active(&self, id: &StateId) -> bool {
        self.is_active(id)
    }

    /// `true` if the instance is currently in `id`, matching ancestors the
    /// same way [`Self::is_state_active`] does.
    pub fn is_in_state(&self, id: &StateId) -> bool {
        self.is_active(id)
    }

    /// The leaf the most recent transition committed to (spec.md §4.6's
    /// dispatcher-owned `current_state`); `None` before the first `start`.
    pub fn current_state(&self) -> Option<StateId> {
        self.context.current_state()
    }

    /// Every currently active state id (ancestors included), sorted for
    /// deterministic display.
    pub fn active_states(&self) -> Vec<StateId> {
        let mut ids: Vec<StateId> = self.locked.lock().state.active.iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Root-to-leaf ancestor chain of `id`, including `id` itself.
    pub fn state_hierarchy(&self, id: &StateId) -> Vec<StateId> {
        self.definition.ancestor_chain(id)
    }

    /// The member state currently active in `region_id`, if any. `Ok(None)`
    /// means the region exists but has not been entered (its owning
    /// parallel state is not currently active).
    pub fn region_state(&self, region_id: &StateId) -> InstanceResult<Option<StateId>> {
        let region = self
            .definition
            .get(region_id)
            .and_then(|n| n.as_region())
            .ok_or_else(|| InstanceError::UnknownRegion(region_id.clone()))?;
        let locked = self.locked.lock();
        Ok(region.members.iter().find(|m| locked.state.active.contains(*m)).cloned())
    }

    /// Force `region_id`'s current member to `state_id`, bypassing dispatch
    /// (spec.md §4.2 `SetState`, applied at region granularity for testing
    /// and restoration). `state_id` must be one of the region's declared
    /// members.
    pub fn set_region_state(&self, region_id: &StateId, state_id: &StateId) -> InstanceResult<()> {
        let region = self
            .definition
            .get(region_id)
            .and_then(|n| n.as_region())
            .ok_or_else(|| InstanceError::UnknownRegion(region_id.clone()))?;
        if !region.members.contains(state_id) {
            return Err(InstanceError::UnknownState(state_id.clone()));
        }
        let members = region.members.clone();
        let mut locked = self.locked.lock();
        for member in &members {
            locked.state.active.remove(member);
        }
        locked.state.active.insert(state_id.clone());
        Ok(())
    }

    /// Every active parallel state's regions, mapped to the states currently
    /// active at or below that region (spec.md §6 `parallel-regions`).
    pub fn parallel_regions(&self) -> HashMap<StateId, Vec<StateId>> {
        let locked = self.locked.lock();
        let mut map = HashMap::new();
        for (id, node) in self.definition.states() {
            if matches!(&**node, StateNode::Region(_)) && locked.state.active.contains(id) {
                let mut members: Vec<StateId> = locked
                    .state
                    .active
                    .iter()
                    .filter(|candidate| self.definition.is_ancestor_or_self(id, candidate))
                    .cloned()
                    .collect();
                members.sort();
                map.insert(id.clone(), members);
            }
        }
        map
    }

    /// Force `current` to `id`, discarding whatever is currently active
    /// (spec.md §4.2 `SetState`): used for testing and restoration. History
    /// is recorded for every composite exited along the way, exactly as a
    /// normal exit would record it. Requires the instance to be `Started`.
    pub fn set_state(&self, id: &StateId) -> InstanceResult<()> {
        let observers = self.observers_snapshot();
        let mut locked = self.locked.lock();
        if locked.phase != Phase::Started {
            return Err(InstanceError::NotStarted(locked.phase));
        }
        dispatch::force_state(&self.definition, &self.context, &observers, &mut locked.state, id)
    }

    /// Post an event after merging an externally supplied context's data map
    /// into this instance's context (spec.md §6
    /// `send-event-with-external-context`) — e.g. request-scoped fields a
    /// caller wants visible to guards and actions for just this dispatch.
    pub fn post_event_with_external_context(
        &self,
        event: Event,
        external: &Context,
    ) -> InstanceResult<EventResult> {
        for (key, value) in external.to_map() {
            self.context.set(key, value);
        }
        self.post_event(event)
    }

    pub fn snapshot(&self) -> Snapshot {
        let locked = self.locked.lock();
        Snapshot::capture(
            self.id,
            &locked.phase,
            &locked.state,
            &self.context,
            self.definition.initial_state(),
        )
    }

    pub fn restore(&self, snapshot: &Snapshot) -> InstanceResult<()> {
        let mut locked = self.locked.lock();
        let (phase, state) = snapshot.restore_into(&self.definition)?;
        locked.phase = phase;
        locked.state = state;
        self.context.replace_map(snapshot.context.clone());
        self.context.restore_current(snapshot.current.clone());
        Ok(())
    }
}

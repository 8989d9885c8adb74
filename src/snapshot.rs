/*!
A point-in-time, serde-serializable capture of an instance's configuration
(spec.md §6): "a structured document with four fields: current-state
identifier, initial-state identifier, phase integer, and the context data
map."

Deliberately partial, per spec.md §6/§9: shallow/deep history, in-progress
join arrivals, and multi-leg fork/region configurations are **not**
captured — "sufficient for crash recovery of a single-configuration
machine". `active` is carried alongside the four named fields purely so
`restore` can reconstruct more than the single representative leaf `current`
names (composite/parallel ancestors, other active fork legs); doing so
widens fidelity without narrowing the documented four-field shape. A
restored instance behaves as if it had never recorded history and has no
joins in flight. Grounded on the teacher having no snapshot facility at all;
the shape follows spec.md §6 directly rather than any teacher precedent.
*/

use crate::definition::Definition;
use crate::dispatch::MutableState;
use crate::error::{InstanceError, InstanceResult};
use crate::id::StateId;
use crate::instance::Phase;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub instance_id: Uuid,
    /// spec.md §6 `current-state`: the leaf the instance was last committed
    /// to, `None` before the first `start`.
    pub current: Option<StateId>,
    /// spec.md §6 `initial-state`: the definition's designated initial id at
    /// capture time, carried so a snapshot is self-describing even when the
    /// definition it was captured against is unavailable at restore time.
    pub initial: StateId,
    pub phase: Phase,
    /// Not one of spec.md §6's four named fields; carried in addition to
    /// them so `restore` can recover the full active configuration rather
    /// than just the representative `current` leaf.
    pub active: Vec<StateId>,
    pub context: HashMap<String, serde_json::Value>,
}

impl Snapshot {
    pub(crate) fn capture(
        instance_id: Uuid,
        phase: &Phase,
        state: &MutableState,
        context: &crate::context::Context,
        initial: &StateId,
    ) -> Self {
        let mut active: Vec<StateId> = state.active.iter().cloned().collect();
        active.sort();
        Self {
            instance_id,
            current: context.current_state(),
            initial: initial.clone(),
            phase: *phase,
            active,
            context: context.to_map(),
        }
    }

    /// Rebuild a `(Phase, MutableState)` pair against `definition`, verifying
    /// every active id still exists. History and join bookkeeping start
    /// empty.
    pub(crate) fn restore_into(&self, definition: &Definition) -> InstanceResult<(Phase, MutableState)> {
        let mut active = HashSet::with_capacity(self.active.len());
        for id in &self.active {
            if !definition.has_state(id) {
                return Err(InstanceError::InvalidSnapshot(format!(
                    "snapshot references unknown state `{id}`"
                )));
            }
            active.insert(id.clone());
        }
        Ok((
            self.phase,
            MutableState {
                active,
                history: HashMap::new(),
                join_arrivals: HashMap::new(),
            },
        ))
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{StateBuilder, StateMachineBuilder, TransitionBuilder};
    use crate::instance::Instance;

    #[test]
    fn snapshot_round_trips_through_json() {
        let def = StateMachineBuilder::new()
            .initial("a")
            .state(StateBuilder::atomic("a").transition(TransitionBuilder::new().on_event("go").to("b")))
            .state(&mut StateBuilder::atomic("b"))
            .build()
            .unwrap();
        let instance = Instance::new(def.clone());
        instance.start().unwrap();
        instance.post("go").unwrap();

        let snap = instance.snapshot();
        let json = snap.to_json().unwrap();
        let restored = Snapshot::from_json(&json).unwrap();

        let fresh = Instance::new(def);
        fresh.restore(&restored).unwrap();
        assert!(fresh.is_active(&StateId::new("b")));
        assert_eq!(fresh.phase(), Phase::Started);
    }

    #[test]
    fn restoring_an_unknown_state_is_rejected() {
        let def = StateMachineBuilder::new()
            .initial("a")
            .state(&mut StateBuilder::atomic("a"))
            .build()
            .unwrap();
        let bogus = Snapshot {
            instance_id: Uuid::new_v4(),
            current: Some(StateId::new("nonexistent")),
            initial: StateId::new("a"),
            phase: Phase::Started,
            active: vec![StateId::new("nonexistent")],
            context: HashMap::new(),
        };
        let instance = Instance::new(def);
        assert!(instance.restore(&bogus).is_err());
    }
}

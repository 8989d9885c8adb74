/*!
The immutable artifact a [`crate::builder::StateMachineBuilder`] produces
(spec.md §3, §4.1).

Generalizes the teacher's `definition::types::StateMachine<E, D>` (a
single `HashMap<StateID, Rc<State<E, D>>>` plus an initial id) into the
richer lookup structure the dispatcher needs: transitions indexed by source
so priority-ordered selection (spec.md §4.3) doesn't have to re-walk the
whole state map per candidate, and join combinations indexed by join id.
*/

use crate::id::StateId;
use crate::model::{JoinCombination, StateNode};
use std::collections::HashMap;
use std::sync::Arc;

use crate::model::Transition;

/// A built, immutable state-machine definition. Cheap to clone (wraps an
/// `Arc` internally would be redundant — clients are expected to hold a
/// `Arc<Definition>`, as [`crate::builder::StateMachineBuilder::build`]
/// returns).
pub struct Definition {
    pub(crate) label: Option<String>,
    pub(crate) initial: StateId,
    pub(crate) states: HashMap<StateId, Arc<StateNode>>,
    pub(crate) transitions_by_source: HashMap<StateId, Vec<Arc<Transition>>>,
    pub(crate) join_combinations: HashMap<StateId, Vec<JoinCombination>>,
}

impl Definition {
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn initial_state(&self) -> &StateId {
        &self.initial
    }

    pub fn get(&self, id: &StateId) -> Option<&Arc<StateNode>> {
        self.states.get(id)
    }

    pub fn has_state(&self, id: &StateId) -> bool {
        self.states.contains_key(id)
    }

    /// Every state and pseudostate node in the definition, in no particular
    /// order. Used by [`crate::instance::Instance::parallel_regions`] to
    /// enumerate regions without the caller needing to know their ids.
    pub fn states(&self) -> impl Iterator<Item = (&StateId, &Arc<StateNode>)> {
        self.states.iter()
    }

    pub fn transitions_from(&self, id: &StateId) -> &[Arc<Transition>] {
        self.transitions_by_source
            .get(id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn join_combinations(&self, join_id: &StateId) -> &[JoinCombination] {
        self.join_combinations
            .get(join_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// The ancestor chain of `id`, root-first, including `id` itself.
    pub fn ancestor_chain(&self, id: &StateId) -> Vec<StateId> {
        let mut chain = Vec::new();
        let mut current = Some(id.clone());
        while let Some(cur) = current {
            let parent = self.states.get(&cur).and_then(|n| n.parent().cloned());
            chain.push(cur);
            current = parent;
        }
        chain.reverse();
        chain
    }

    /// The least common ancestor of two state ids, per spec.md §4.4:
    /// construct each ancestor chain root-downward and walk in lockstep; the
    /// last shared prefix element is the LCA. Returns `None` when the states
    /// share no ancestor (they are exited/entered all the way to the root).
    pub fn lca(&self, a: &StateId, b: &StateId) -> Option<StateId> {
        let chain_a = self.ancestor_chain(a);
        let chain_b = self.ancestor_chain(b);
        let mut lca = None;
        for (x, y) in chain_a.iter().zip(chain_b.iter()) {
            if x == y {
                lca = Some(x.clone());
            } else {
                break;
            }
        }
        lca
    }

    /// `true` if `descendant` is `ancestor` or a transitive substate/region
    /// member of it.
    pub fn is_ancestor_or_self(&self, ancestor: &StateId, descendant: &StateId) -> bool {
        self.ancestor_chain(descendant).iter().any(|id| id == ancestor)
    }

    /// The innermost enclosing region of `id`, if any (walks ancestors
    /// looking for a [`StateNode::Region`]).
    pub fn enclosing_region(&self, id: &StateId) -> Option<StateId> {
        let chain = self.ancestor_chain(id);
        chain
            .iter()
            .rev()
            .skip(1)
            .find(|anc| self.states.get(*anc).map(|n| matches!(**n, StateNode::Region(_))).unwrap_or(false))
            .cloned()
    }

    /// The innermost enclosing parallel state of `id` (which may be `id`
    /// itself), walking ancestors for a [`StateNode::Parallel`].
    pub fn enclosing_parallel(&self, id: &StateId) -> Option<StateId> {
        let chain = self.ancestor_chain(id);
        chain
            .iter()
            .rev()
            .find(|anc| self.states.get(*anc).map(|n| n.is_parallel()).unwrap_or(false))
            .cloned()
    }
}

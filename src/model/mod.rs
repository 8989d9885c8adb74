/*!
The state node model: a tagged sum of state-node kinds sharing stable
identifiers, optional parent reference, optional entry/exit actions, and a
final flag (spec.md §3).

Generalizes the teacher's `definition::types::StateKind` (which only
distinguished `Atomic` / `Composite` / `Orthogonal` / `History` / `Initial` /
`Final`) into a variant per UML pseudostate kind, each carrying its own
resolution configuration, and splits `Region` out as its own node so it can
be looked up by id the same way a state can.
*/

pub mod pseudostate;
pub mod transition;

pub use pseudostate::{ChoiceBranch, JoinCombination, JunctionBranch, Pseudostate, PseudostateConfig};
pub use transition::{Action, ActionError, Guard, Transition};

use crate::id::StateId;
use std::sync::Arc;

/// Fields every enterable/exitable node in the hierarchy carries.
#[derive(Clone)]
pub struct NodeMeta {
    pub id: StateId,
    pub label: Option<String>,
    pub parent: Option<StateId>,
    pub entry: Option<Action>,
    pub exit: Option<Action>,
}

impl NodeMeta {
    pub fn new(id: StateId) -> Self {
        Self {
            id,
            label: None,
            parent: None,
            entry: None,
            exit: None,
        }
    }
}

/// A single orthogonal region owned by a [`StateNode::Parallel`] state.
#[derive(Clone)]
pub struct Region {
    pub id: StateId,
    pub owner: StateId,
    pub members: Vec<StateId>,
    pub initial: StateId,
}

/// A state or pseudostate node, keyed by [`StateId`] in a
/// [`crate::definition::Definition`].
#[derive(Clone)]
pub enum StateNode {
    Atomic(AtomicState),
    Composite(CompositeState),
    Parallel(ParallelState),
    Region(Region),
    Pseudo(Pseudostate),
}

#[derive(Clone)]
pub struct AtomicState {
    pub meta: NodeMeta,
    pub is_final: bool,
}

#[derive(Clone)]
pub struct CompositeState {
    pub meta: NodeMeta,
    pub substates: Vec<StateId>,
    pub initial: StateId,
}

#[derive(Clone)]
pub struct ParallelState {
    pub meta: NodeMeta,
    pub regions: Vec<StateId>,
}

impl StateNode {
    pub fn meta(&self) -> Option<&NodeMeta> {
        match self {
            StateNode::Atomic(s) => Some(&s.meta),
            StateNode::Composite(s) => Some(&s.meta),
            StateNode::Parallel(s) => Some(&s.meta),
            StateNode::Pseudo(p) => Some(&p.meta),
            StateNode::Region(_) => None,
        }
    }

    pub fn id(&self) -> &StateId {
        match self {
            StateNode::Region(r) => &r.id,
            other => &other.meta().expect("non-region node has meta").id,
        }
    }

    pub fn parent(&self) -> Option<&StateId> {
        match self {
            StateNode::Region(r) => Some(&r.owner),
            other => other.meta().and_then(|m| m.parent.as_ref()),
        }
    }

    pub fn entry_action(&self) -> Option<&Action> {
        self.meta().and_then(|m| m.entry.as_ref())
    }

    pub fn exit_action(&self) -> Option<&Action> {
        self.meta().and_then(|m| m.exit.as_ref())
    }

    pub fn is_final(&self) -> bool {
        matches!(self, StateNode::Atomic(AtomicState { is_final: true, .. }))
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, StateNode::Composite(_))
    }

    pub fn is_parallel(&self) -> bool {
        matches!(self, StateNode::Parallel(_))
    }

    pub fn is_pseudo(&self) -> bool {
        matches!(self, StateNode::Pseudo(_))
    }

    pub fn as_pseudo(&self) -> Option<&Pseudostate> {
        match self {
            StateNode::Pseudo(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_composite(&self) -> Option<&CompositeState> {
        match self {
            StateNode::Composite(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_parallel(&self) -> Option<&ParallelState> {
        match self {
            StateNode::Parallel(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_region(&self) -> Option<&Region> {
        match self {
            StateNode::Region(r) => Some(r),
            _ => None,
        }
    }
}

pub(crate) type SharedNode = Arc<StateNode>;

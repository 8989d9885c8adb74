/*!
Pseudostate kinds and their resolution configuration (spec.md §3).

Where the teacher's `definition::types::PseudoStateKind` was a bare tag with
no per-kind payload (the teacher never implemented choice/junction/fork/join
resolution), each variant here carries exactly the configuration spec.md §3
assigns it.
*/

use super::{Action, Guard, NodeMeta};
use crate::id::StateId;

/// One branch of a [`PseudostateConfig::Choice`]: `(guard, target, optional
/// action)`.
#[derive(Clone)]
pub struct ChoiceBranch {
    pub guard: Guard,
    pub target: StateId,
    pub action: Option<Action>,
}

/// One guarded outgoing edge of a [`PseudostateConfig::Junction`].
#[derive(Clone)]
pub struct JunctionBranch {
    pub guard: Guard,
    pub target: StateId,
}

/// One acceptable source-state combination for a [`PseudostateConfig::Join`].
pub type JoinCombination = std::collections::BTreeSet<StateId>;

#[derive(Clone)]
pub enum PseudostateConfig {
    Initial,
    Choice {
        branches: Vec<ChoiceBranch>,
        default: Option<StateId>,
    },
    Junction {
        default: Option<StateId>,
        branches: Vec<JunctionBranch>,
    },
    Fork {
        targets: Vec<StateId>,
    },
    Join {
        combinations: Vec<JoinCombination>,
        target: StateId,
    },
    ShallowHistory {
        default: Option<StateId>,
    },
    DeepHistory {
        default: Option<StateId>,
    },
    Terminate,
}

impl PseudostateConfig {
    pub fn kind_name(&self) -> &'static str {
        match self {
            PseudostateConfig::Initial => "Initial",
            PseudostateConfig::Choice { .. } => "Choice",
            PseudostateConfig::Junction { .. } => "Junction",
            PseudostateConfig::Fork { .. } => "Fork",
            PseudostateConfig::Join { .. } => "Join",
            PseudostateConfig::ShallowHistory { .. } => "ShallowHistory",
            PseudostateConfig::DeepHistory { .. } => "DeepHistory",
            PseudostateConfig::Terminate => "Terminate",
        }
    }
}

#[derive(Clone)]
pub struct Pseudostate {
    pub meta: NodeMeta,
    pub config: PseudostateConfig,
}

/*!
The fluent builder that accumulates state declarations and transitions,
resolves hierarchical names, validates the construction-time invariants, and
produces an immutable [`crate::definition::Definition`] (spec.md §4.1).

Generalizes the teacher's `StateMachineBuilder` / `StateBuilder` /
`TransitionBuilder` chaining idiom (`&mut self -> &mut Self`, with the caller
passing `&mut Foo` and the builder cloning it in) from the teacher's flat
`StateKind` (atomic/compound/orthogonal/history/initial/final) to the full
pseudostate set, and replaces the teacher's `StateID::invalid()` sentinel
value for "unset" with `Option<String>`.
*/

use crate::error::{BuildError, BuildResult};
use crate::id::{resolve_name, StateId};
use crate::model::pseudostate::{JoinCombination, PseudostateConfig};
use crate::model::transition::{Action, Guard};
use crate::model::{
    AtomicState, CompositeState, NodeMeta, ParallelState, Pseudostate, Region, StateNode,
    Transition,
};
use crate::definition::Definition;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

// ------------------------------------------------------------------------------------------------
// Raw (unresolved) intermediate representation
// ------------------------------------------------------------------------------------------------

#[derive(Clone)]
struct RawTransition {
    label: Option<String>,
    event: String,
    target_raw: String,
    guard: Option<Guard>,
    action: Option<Action>,
}

#[derive(Clone)]
enum RawKind {
    Atomic {
        is_final: bool,
    },
    Composite {
        children: Vec<StateBuilder>,
        initial_raw: Option<String>,
    },
    Parallel {
        regions: Vec<RegionBuilder>,
    },
    Initial,
    Choice {
        branches: Vec<(Guard, String, Option<Action>)>,
        default_raw: Option<String>,
    },
    Junction {
        default_raw: Option<String>,
        branches: Vec<(Guard, String)>,
    },
    Fork {
        targets_raw: Vec<String>,
    },
    Join {
        combinations_raw: Vec<Vec<String>>,
        target_raw: Option<String>,
    },
    ShallowHistory {
        default_raw: Option<String>,
    },
    DeepHistory {
        default_raw: Option<String>,
    },
    Terminate,
}

/// A single state or pseudostate declaration, possibly nesting further
/// declarations (composite substates, parallel regions).
#[derive(Clone)]
pub struct StateBuilder {
    id: String,
    label: Option<String>,
    entry: Option<Action>,
    exit: Option<Action>,
    kind: RawKind,
    transitions: Vec<RawTransition>,
}

impl StateBuilder {
    fn make(id: &str, kind: RawKind) -> Self {
        Self {
            id: id.to_string(),
            label: None,
            entry: None,
            exit: None,
            kind,
            transitions: Vec::new(),
        }
    }

    pub fn atomic(id: &str) -> Self {
        Self::make(id, RawKind::Atomic { is_final: false })
    }

    pub fn final_state(id: &str) -> Self {
        Self::make(id, RawKind::Atomic { is_final: true })
    }

    pub fn composite(id: &str) -> Self {
        Self::make(
            id,
            RawKind::Composite {
                children: Vec::new(),
                initial_raw: None,
            },
        )
    }

    pub fn parallel(id: &str) -> Self {
        Self::make(id, RawKind::Parallel { regions: Vec::new() })
    }

    pub fn initial_pseudostate(id: &str) -> Self {
        Self::make(id, RawKind::Initial)
    }

    pub fn choice(id: &str) -> Self {
        Self::make(
            id,
            RawKind::Choice {
                branches: Vec::new(),
                default_raw: None,
            },
        )
    }

    pub fn junction(id: &str) -> Self {
        Self::make(
            id,
            RawKind::Junction {
                default_raw: None,
                branches: Vec::new(),
            },
        )
    }

    pub fn fork(id: &str) -> Self {
        Self::make(id, RawKind::Fork { targets_raw: Vec::new() })
    }

    pub fn join(id: &str) -> Self {
        Self::make(
            id,
            RawKind::Join {
                combinations_raw: Vec::new(),
                target_raw: None,
            },
        )
    }

    pub fn shallow_history(id: &str) -> Self {
        Self::make(id, RawKind::ShallowHistory { default_raw: None })
    }

    pub fn deep_history(id: &str) -> Self {
        Self::make(id, RawKind::DeepHistory { default_raw: None })
    }

    pub fn terminate(id: &str) -> Self {
        Self::make(id, RawKind::Terminate)
    }

    pub fn label(&mut self, label: &str) -> &mut Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn on_entry(&mut self, action: Action) -> &mut Self {
        self.entry = Some(action);
        self
    }

    pub fn on_exit(&mut self, action: Action) -> &mut Self {
        self.exit = Some(action);
        self
    }

    pub fn transition(&mut self, transition: &mut TransitionBuilder) -> &mut Self {
        self.transitions.push(transition.clone().into_raw());
        self
    }

    /// Add a substate. Only meaningful for `composite`.
    pub fn child(&mut self, child: &mut StateBuilder) -> &mut Self {
        if let RawKind::Composite { children, .. } = &mut self.kind {
            children.push(child.clone());
        }
        self
    }

    /// Designate the initial substate. Only meaningful for `composite`.
    pub fn initial(&mut self, substate_name: &str) -> &mut Self {
        if let RawKind::Composite { initial_raw, .. } = &mut self.kind {
            *initial_raw = Some(substate_name.to_string());
        }
        self
    }

    /// Add an orthogonal region. Only meaningful for `parallel`.
    pub fn region(&mut self, region: &mut RegionBuilder) -> &mut Self {
        if let RawKind::Parallel { regions } = &mut self.kind {
            regions.push(region.clone());
        }
        self
    }

    /// Add a guarded branch. Only meaningful for `choice`.
    pub fn branch(&mut self, guard: Guard, target: &str, action: Option<Action>) -> &mut Self {
        if let RawKind::Choice { branches, .. } = &mut self.kind {
            branches.push((guard, target.to_string(), action));
        }
        self
    }

    /// Add a guarded outgoing edge. Only meaningful for `junction`.
    pub fn junction_branch(&mut self, guard: Guard, target: &str) -> &mut Self {
        if let RawKind::Junction { branches, .. } = &mut self.kind {
            branches.push((guard, target.to_string()));
        }
        self
    }

    /// Set the default target. Meaningful for `choice`, `junction`,
    /// `shallow_history`, `deep_history`.
    pub fn default_target(&mut self, target: &str) -> &mut Self {
        match &mut self.kind {
            RawKind::Choice { default_raw, .. } => *default_raw = Some(target.to_string()),
            RawKind::Junction { default_raw, .. } => *default_raw = Some(target.to_string()),
            RawKind::ShallowHistory { default_raw } => *default_raw = Some(target.to_string()),
            RawKind::DeepHistory { default_raw } => *default_raw = Some(target.to_string()),
            _ => {}
        }
        self
    }

    /// Add a fork leg target. Only meaningful for `fork`.
    pub fn fork_target(&mut self, target: &str) -> &mut Self {
        if let RawKind::Fork { targets_raw } = &mut self.kind {
            targets_raw.push(target.to_string());
        }
        self
    }

    /// Add an acceptable source combination. Only meaningful for `join`.
    pub fn join_combination(&mut self, sources: &[&str]) -> &mut Self {
        if let RawKind::Join {
            combinations_raw, ..
        } = &mut self.kind
        {
            combinations_raw.push(sources.iter().map(|s| s.to_string()).collect());
        }
        self
    }

    /// Set the join's single target. Only meaningful for `join`.
    pub fn join_target(&mut self, target: &str) -> &mut Self {
        if let RawKind::Join { target_raw, .. } = &mut self.kind {
            *target_raw = Some(target.to_string());
        }
        self
    }
}

#[derive(Clone)]
pub struct RegionBuilder {
    id: String,
    members: Vec<StateBuilder>,
    initial_raw: Option<String>,
}

impl RegionBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            members: Vec::new(),
            initial_raw: None,
        }
    }

    pub fn member(&mut self, member: &mut StateBuilder) -> &mut Self {
        self.members.push(member.clone());
        self
    }

    pub fn initial(&mut self, member_name: &str) -> &mut Self {
        self.initial_raw = Some(member_name.to_string());
        self
    }
}

#[derive(Clone)]
pub struct TransitionBuilder {
    label: Option<String>,
    event: String,
    target: Option<String>,
    guard: Option<Guard>,
    action: Option<Action>,
}

impl Default for TransitionBuilder {
    fn default() -> Self {
        Self {
            label: None,
            event: String::new(),
            target: None,
            guard: None,
            action: None,
        }
    }
}

impl TransitionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn label(&mut self, label: &str) -> &mut Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn on_event(&mut self, event: &str) -> &mut Self {
        self.event = event.to_string();
        self
    }

    pub fn to(&mut self, target: &str) -> &mut Self {
        self.target = Some(target.to_string());
        self
    }

    pub fn guarded_by(&mut self, guard: Guard) -> &mut Self {
        self.guard = Some(guard);
        self
    }

    pub fn with_action(&mut self, action: Action) -> &mut Self {
        self.action = Some(action);
        self
    }

    fn into_raw(self) -> RawTransition {
        RawTransition {
            label: self.label,
            event: self.event,
            target_raw: self.target.expect("transition target must be set"),
            guard: self.guard,
            action: self.action,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Top-level builder
// ------------------------------------------------------------------------------------------------

pub struct StateMachineBuilder {
    label: Option<String>,
    initial_raw: Option<String>,
    top_states: Vec<StateBuilder>,
}

impl Default for StateMachineBuilder {
    fn default() -> Self {
        Self {
            label: None,
            initial_raw: None,
            top_states: Vec::new(),
        }
    }
}

impl StateMachineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn label(&mut self, label: &str) -> &mut Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn initial(&mut self, state_name: &str) -> &mut Self {
        self.initial_raw = Some(state_name.to_string());
        self
    }

    pub fn state(&mut self, state: &mut StateBuilder) -> &mut Self {
        self.top_states.push(state.clone());
        self
    }

    pub fn build(&self) -> BuildResult<Arc<Definition>> {
        let mut flattener = Flattener::default();
        for top_names in &self.top_states {
            flattener.top_level_names.insert(top_names.id.clone());
        }
        for state in &self.top_states {
            flattener.flatten(state, None)?;
        }

        let top_level_names = flattener.top_level_names.clone();
        let mut resolver = Resolver {
            top_level_names: &top_level_names,
        };

        let mut states: HashMap<StateId, Arc<StateNode>> = HashMap::new();
        let mut transitions_by_source: HashMap<StateId, Vec<Arc<Transition>>> = HashMap::new();
        let mut join_combinations: HashMap<StateId, Vec<JoinCombination>> = HashMap::new();

        for raw in flattener.nodes {
            let (node, transitions) = resolver.resolve(raw, &mut join_combinations)?;
            let id = node.id().clone();
            if !transitions.is_empty() {
                transitions_by_source.insert(id.clone(), transitions);
            }
            if states.insert(id.clone(), Arc::new(node)).is_some() {
                return Err(BuildError::DuplicateStateId(id));
            }
        }

        let initial_raw = self
            .initial_raw
            .clone()
            .ok_or(BuildError::MissingInitialState)?;
        let initial = resolve_name(&initial_raw, None, &top_level_names);
        if !states.contains_key(&initial) {
            return Err(BuildError::UnknownInitialState(initial));
        }

        let definition = Definition {
            label: self.label.clone(),
            initial,
            states,
            transitions_by_source,
            join_combinations,
        };

        validate(&definition)?;

        Ok(Arc::new(definition))
    }
}

// ------------------------------------------------------------------------------------------------
// Flattening: assign absolute ids and parents, defer name resolution
// ------------------------------------------------------------------------------------------------

struct RawNode {
    id: StateId,
    parent: Option<StateId>,
    context: Option<StateId>,
    label: Option<String>,
    entry: Option<Action>,
    exit: Option<Action>,
    kind: RawNodeKind,
    transitions: Vec<RawTransition>,
}

enum RawNodeKind {
    Atomic {
        is_final: bool,
    },
    Composite {
        substates: Vec<StateId>,
        initial_raw: Option<String>,
    },
    Parallel {
        regions: Vec<StateId>,
    },
    Region {
        members: Vec<StateId>,
        initial_raw: Option<String>,
    },
    Initial,
    Choice {
        branches: Vec<(Guard, String, Option<Action>)>,
        default_raw: Option<String>,
    },
    Junction {
        default_raw: Option<String>,
        branches: Vec<(Guard, String)>,
    },
    Fork {
        targets_raw: Vec<String>,
    },
    Join {
        combinations_raw: Vec<Vec<String>>,
        target_raw: Option<String>,
    },
    ShallowHistory {
        default_raw: Option<String>,
    },
    DeepHistory {
        default_raw: Option<String>,
    },
    Terminate,
}

#[derive(Default)]
struct Flattener {
    top_level_names: HashSet<String>,
    nodes: Vec<RawNode>,
}

impl Flattener {
    /// `parent` is the absolute id of the directly enclosing state (a
    /// composite or the Parallel state owning the region, if any).
    /// `context` for this node's own transition-target resolution is the id
    /// of the composite/region that directly encloses it — i.e. `parent`.
    fn flatten(&mut self, builder: &StateBuilder, parent: Option<&StateId>) -> BuildResult<StateId> {
        let id = match parent {
            Some(p) => StateId::qualify(p, &builder.id),
            None => StateId::new(builder.id.clone()),
        };
        let context = parent.cloned();

        let kind = match &builder.kind {
            RawKind::Atomic { is_final } => RawNodeKind::Atomic { is_final: *is_final },
            RawKind::Composite { children, initial_raw } => {
                let mut substates = Vec::new();
                for child in children {
                    let child_id = self.flatten(child, Some(&id))?;
                    substates.push(child_id);
                }
                RawNodeKind::Composite {
                    substates,
                    initial_raw: initial_raw.clone(),
                }
            }
            RawKind::Parallel { regions } => {
                let mut region_ids = Vec::new();
                for region in regions {
                    let region_id = self.flatten_region(region, &id)?;
                    region_ids.push(region_id);
                }
                RawNodeKind::Parallel { regions: region_ids }
            }
            RawKind::Initial => RawNodeKind::Initial,
            RawKind::Choice { branches, default_raw } => RawNodeKind::Choice {
                branches: branches.clone(),
                default_raw: default_raw.clone(),
            },
            RawKind::Junction { default_raw, branches } => RawNodeKind::Junction {
                default_raw: default_raw.clone(),
                branches: branches.clone(),
            },
            RawKind::Fork { targets_raw } => RawNodeKind::Fork {
                targets_raw: targets_raw.clone(),
            },
            RawKind::Join {
                combinations_raw,
                target_raw,
            } => RawNodeKind::Join {
                combinations_raw: combinations_raw.clone(),
                target_raw: target_raw.clone(),
            },
            RawKind::ShallowHistory { default_raw } => RawNodeKind::ShallowHistory {
                default_raw: default_raw.clone(),
            },
            RawKind::DeepHistory { default_raw } => RawNodeKind::DeepHistory {
                default_raw: default_raw.clone(),
            },
            RawKind::Terminate => RawNodeKind::Terminate,
        };

        self.nodes.push(RawNode {
            id: id.clone(),
            parent: parent.cloned(),
            context,
            label: builder.label.clone(),
            entry: builder.entry.clone(),
            exit: builder.exit.clone(),
            kind,
            transitions: builder.transitions.clone(),
        });

        Ok(id)
    }

    fn flatten_region(&mut self, region: &RegionBuilder, owner: &StateId) -> BuildResult<StateId> {
        let region_id = StateId::qualify(owner, &region.id);
        let mut members = Vec::new();
        for member in &region.members {
            let member_id = self.flatten(member, Some(&region_id))?;
            members.push(member_id);
        }
        self.nodes.push(RawNode {
            id: region_id.clone(),
            parent: Some(owner.clone()),
            context: Some(region_id.clone()),
            label: None,
            entry: None,
            exit: None,
            kind: RawNodeKind::Region {
                members,
                initial_raw: region.initial_raw.clone(),
            },
            transitions: Vec::new(),
        });
        Ok(region_id)
    }
}

// ------------------------------------------------------------------------------------------------
// Resolution: turn raw string references into StateIds, build final nodes
// ------------------------------------------------------------------------------------------------

struct Resolver<'a> {
    top_level_names: &'a HashSet<String>,
}

impl<'a> Resolver<'a> {
    fn resolve_ref(&self, raw: &str, context: Option<&StateId>) -> StateId {
        resolve_name(raw, context, self.top_level_names)
    }

    fn resolve(
        &mut self,
        raw: RawNode,
        join_combinations: &mut HashMap<StateId, Vec<JoinCombination>>,
    ) -> BuildResult<(StateNode, Vec<Arc<Transition>>)> {
        let RawNode {
            id,
            parent,
            context,
            label,
            entry,
            exit,
            kind,
            transitions,
        } = raw;

        let meta = NodeMeta {
            id: id.clone(),
            label,
            parent: parent.clone(),
            entry,
            exit,
        };

        let resolved_transitions: Vec<Arc<Transition>> = transitions
            .into_iter()
            .map(|t| {
                let target = self.resolve_ref(&t.target_raw, context.as_ref());
                Arc::new(Transition {
                    label: t.label,
                    source: id.clone(),
                    target,
                    event: t.event,
                    guard: t.guard,
                    action: t.action,
                })
            })
            .collect();

        let node = match kind {
            RawNodeKind::Atomic { is_final } => StateNode::Atomic(AtomicState { meta, is_final }),
            RawNodeKind::Composite {
                substates,
                initial_raw,
            } => {
                let initial_raw = initial_raw.ok_or_else(|| BuildError::InvalidCompositeInitial(id.clone()))?;
                let initial = self.resolve_ref(&initial_raw, Some(&id));
                if substates.is_empty() {
                    return Err(BuildError::EmptyComposite(id));
                }
                StateNode::Composite(CompositeState {
                    meta,
                    substates,
                    initial,
                })
            }
            RawNodeKind::Parallel { regions } => {
                if regions.is_empty() {
                    return Err(BuildError::EmptyParallel(id));
                }
                StateNode::Parallel(ParallelState { meta, regions })
            }
            RawNodeKind::Region {
                members,
                initial_raw,
            } => {
                let initial_raw = initial_raw.ok_or_else(|| BuildError::InvalidRegionInitial(id.clone()))?;
                let initial = self.resolve_ref(&initial_raw, Some(&id));
                if members.is_empty() {
                    return Err(BuildError::EmptyRegion(id));
                }
                return Ok((
                    StateNode::Region(Region {
                        id,
                        owner: parent.expect("region always has an owner"),
                        members,
                        initial,
                    }),
                    resolved_transitions,
                ));
            }
            RawNodeKind::Initial => StateNode::Pseudo(Pseudostate {
                meta,
                config: PseudostateConfig::Initial,
            }),
            RawNodeKind::Choice {
                branches,
                default_raw,
            } => {
                let resolved_branches = branches
                    .into_iter()
                    .map(|(guard, target, action)| crate::model::ChoiceBranch {
                        guard,
                        target: self.resolve_ref(&target, context.as_ref()),
                        action,
                    })
                    .collect::<Vec<_>>();
                let default = default_raw.map(|t| self.resolve_ref(&t, context.as_ref()));
                if resolved_branches.is_empty() && default.is_none() {
                    return Err(BuildError::ChoiceHasNoBranches(id));
                }
                StateNode::Pseudo(Pseudostate {
                    meta,
                    config: PseudostateConfig::Choice {
                        branches: resolved_branches,
                        default,
                    },
                })
            }
            RawNodeKind::Junction {
                default_raw,
                branches,
            } => {
                let resolved_branches = branches
                    .into_iter()
                    .map(|(guard, target)| crate::model::JunctionBranch {
                        guard,
                        target: self.resolve_ref(&target, context.as_ref()),
                    })
                    .collect::<Vec<_>>();
                let default = default_raw.map(|t| self.resolve_ref(&t, context.as_ref()));
                if resolved_branches.is_empty() && default.is_none() {
                    return Err(BuildError::JunctionHasNoTarget(id));
                }
                StateNode::Pseudo(Pseudostate {
                    meta,
                    config: PseudostateConfig::Junction {
                        default,
                        branches: resolved_branches,
                    },
                })
            }
            RawNodeKind::Fork { targets_raw } => {
                if targets_raw.is_empty() {
                    return Err(BuildError::EmptyFork(id));
                }
                let targets = targets_raw
                    .into_iter()
                    .map(|t| self.resolve_ref(&t, context.as_ref()))
                    .collect();
                StateNode::Pseudo(Pseudostate {
                    meta,
                    config: PseudostateConfig::Fork { targets },
                })
            }
            RawNodeKind::Join {
                combinations_raw,
                target_raw,
            } => {
                if combinations_raw.is_empty() {
                    return Err(BuildError::EmptyJoin(id));
                }
                let target = target_raw.ok_or_else(|| BuildError::EmptyJoin(id.clone()))?;
                let target = self.resolve_ref(&target, context.as_ref());
                let combinations: Vec<JoinCombination> = combinations_raw
                    .into_iter()
                    .map(|combo| {
                        combo
                            .into_iter()
                            .map(|s| self.resolve_ref(&s, context.as_ref()))
                            .collect::<BTreeSet<_>>()
                    })
                    .collect();
                join_combinations.insert(id.clone(), combinations.clone());
                StateNode::Pseudo(Pseudostate {
                    meta,
                    config: PseudostateConfig::Join { combinations, target },
                })
            }
            RawNodeKind::ShallowHistory { default_raw } => StateNode::Pseudo(Pseudostate {
                meta,
                config: PseudostateConfig::ShallowHistory {
                    default: default_raw.map(|t| self.resolve_ref(&t, context.as_ref())),
                },
            }),
            RawNodeKind::DeepHistory { default_raw } => StateNode::Pseudo(Pseudostate {
                meta,
                config: PseudostateConfig::DeepHistory {
                    default: default_raw.map(|t| self.resolve_ref(&t, context.as_ref())),
                },
            }),
            RawNodeKind::Terminate => StateNode::Pseudo(Pseudostate {
                meta,
                config: PseudostateConfig::Terminate,
            }),
        };

        Ok((node, resolved_transitions))
    }
}

// ------------------------------------------------------------------------------------------------
// Build-time validation (spec.md §4.1)
// ------------------------------------------------------------------------------------------------

fn validate(definition: &Definition) -> BuildResult<()> {
    for (id, node) in &definition.states {
        if let Some(parent) = node.parent() {
            if !definition.states.contains_key(parent) {
                return Err(BuildError::UnknownParent(parent.clone()));
            }
        }
        match &**node {
            StateNode::Composite(c) => {
                if !definition.states.contains_key(&c.initial) {
                    return Err(BuildError::InvalidCompositeInitial(id.clone()));
                }
            }
            StateNode::Region(r) => {
                if !definition.states.contains_key(&r.initial) {
                    return Err(BuildError::InvalidRegionInitial(id.clone()));
                }
            }
            StateNode::Pseudo(p) => match &p.config {
                PseudostateConfig::Join { combinations, target } => {
                    if !definition.states.contains_key(target) {
                        return Err(BuildError::UnknownTransitionTarget {
                            source: id.clone(),
                            target: target.clone(),
                        });
                    }
                    for combo in combinations {
                        for src in combo {
                            if !definition.states.contains_key(src) {
                                return Err(BuildError::UnknownJoinSource(id.clone(), src.clone()));
                            }
                        }
                    }
                }
                PseudostateConfig::Fork { targets } => {
                    for target in targets {
                        if !definition.states.contains_key(target) {
                            return Err(BuildError::UnknownTransitionTarget {
                                source: id.clone(),
                                target: target.clone(),
                            });
                        }
                    }
                }
                PseudostateConfig::Choice { branches, default } => {
                    for branch in branches {
                        if !definition.states.contains_key(&branch.target) {
                            return Err(BuildError::UnknownTransitionTarget {
                                source: id.clone(),
                                target: branch.target.clone(),
                            });
                        }
                    }
                    if let Some(d) = default {
                        if !definition.states.contains_key(d) {
                            return Err(BuildError::UnknownTransitionTarget {
                                source: id.clone(),
                                target: d.clone(),
                            });
                        }
                    }
                }
                PseudostateConfig::Junction { default, branches } => {
                    for branch in branches {
                        if !definition.states.contains_key(&branch.target) {
                            return Err(BuildError::UnknownTransitionTarget {
                                source: id.clone(),
                                target: branch.target.clone(),
                            });
                        }
                    }
                    if let Some(d) = default {
                        if !definition.states.contains_key(d) {
                            return Err(BuildError::UnknownTransitionTarget {
                                source: id.clone(),
                                target: d.clone(),
                            });
                        }
                    }
                }
                _ => {}
            },
            _ => {}
        }
    }

    for (source, transitions) in &definition.transitions_by_source {
        if !definition.states.contains_key(source) {
            return Err(BuildError::UnknownTransitionSource(source.clone()));
        }
        let mut seen_events: HashMap<&str, usize> = HashMap::new();
        for transition in transitions {
            if !definition.states.contains_key(&transition.target) {
                return Err(BuildError::UnknownTransitionTarget {
                    source: source.clone(),
                    target: transition.target.clone(),
                });
            }
            if transition.guard.is_none() {
                let count = seen_events.entry(transition.event.as_str()).or_insert(0);
                *count += 1;
                if *count > 1 {
                    return Err(BuildError::AmbiguousTransition {
                        state: source.clone(),
                        event: transition.event.clone(),
                    });
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_a_simple_three_state_traffic_light() {
        let def = StateMachineBuilder::new()
            .label("traffic_light")
            .initial("red")
            .state(
                StateBuilder::atomic("red")
                    .transition(TransitionBuilder::new().on_event("next").to("green")),
            )
            .state(
                StateBuilder::atomic("green")
                    .transition(TransitionBuilder::new().on_event("next").to("yellow")),
            )
            .state(
                StateBuilder::atomic("yellow")
                    .transition(TransitionBuilder::new().on_event("next").to("red")),
            )
            .build()
            .expect("valid machine");

        assert_eq!(def.initial_state(), &StateId::new("red"));
        assert!(def.has_state(&StateId::new("green")));
        assert_eq!(def.transitions_from(&StateId::new("red")).len(), 1);
    }

    #[test]
    fn rejects_missing_initial_state() {
        let result = StateMachineBuilder::new()
            .state(&mut StateBuilder::atomic("only"))
            .build();
        assert!(matches!(result, Err(BuildError::MissingInitialState)));
    }

    #[test]
    fn rejects_dangling_transition_target() {
        let result = StateMachineBuilder::new()
            .initial("a")
            .state(StateBuilder::atomic("a").transition(TransitionBuilder::new().on_event("go").to("nowhere")))
            .build();
        assert!(matches!(result, Err(BuildError::UnknownTransitionTarget { .. })));
    }

    #[test]
    fn resolves_nested_composite_children_with_qualified_ids() {
        let def = StateMachineBuilder::new()
            .initial("outer")
            .state(
                StateBuilder::composite("outer").initial("inner").child(
                    &mut StateBuilder::atomic("inner"),
                ),
            )
            .build()
            .expect("valid machine");

        assert!(def.has_state(&StateId::new("outer.inner")));
        let outer = def.get(&StateId::new("outer")).unwrap();
        assert_eq!(outer.as_composite().unwrap().initial, StateId::new("outer.inner"));
    }

    #[test]
    fn top_level_name_wins_over_qualification_in_transition_target() {
        let def = StateMachineBuilder::new()
            .initial("outer")
            .state(
                StateBuilder::composite("outer")
                    .initial("inner")
                    .child(
                        StateBuilder::atomic("inner")
                            .transition(TransitionBuilder::new().on_event("go").to("done")),
                    ),
            )
            .state(&mut StateBuilder::final_state("done"))
            .build()
            .expect("valid machine");

        let inner = def.get(&StateId::new("outer.inner")).unwrap();
        let transitions = def.transitions_from(inner.id());
        assert_eq!(transitions[0].target, StateId::new("done"));
    }

    #[test]
    fn builds_parallel_with_regions() {
        let def = StateMachineBuilder::new()
            .initial("p")
            .state(
                StateBuilder::parallel("p")
                    .region(
                        RegionBuilder::new("r1")
                            .initial("a")
                            .member(&mut StateBuilder::atomic("a")),
                    )
                    .region(
                        RegionBuilder::new("r2")
                            .initial("b")
                            .member(&mut StateBuilder::atomic("b")),
                    ),
            )
            .build()
            .expect("valid machine");

        assert!(def.has_state(&StateId::new("p.r1")));
        assert!(def.has_state(&StateId::new("p.r1.a")));
    }

    #[test]
    fn builds_join_with_source_combinations() {
        let def = StateMachineBuilder::new()
            .initial("f")
            .state(StateBuilder::fork("f").fork_target("x").fork_target("y"))
            .state(
                StateBuilder::atomic("x")
                    .transition(TransitionBuilder::new().on_event("x_ok").to("j")),
            )
            .state(
                StateBuilder::atomic("y")
                    .transition(TransitionBuilder::new().on_event("y_ok").to("j")),
            )
            .state(
                StateBuilder::join("j")
                    .join_combination(&["x", "y"])
                    .join_target("end"),
            )
            .state(&mut StateBuilder::final_state("end"))
            .build()
            .expect("valid machine");

        let combos = def.join_combinations(&StateId::new("j"));
        assert_eq!(combos.len(), 1);
        assert!(combos[0].contains(&StateId::new("x")));
    }

    #[test]
    fn rejects_ambiguous_unguarded_transitions() {
        let result = StateMachineBuilder::new()
            .initial("a")
            .state(
                StateBuilder::atomic("a")
                    .transition(TransitionBuilder::new().on_event("go").to("b"))
                    .transition(TransitionBuilder::new().on_event("go").to("c")),
            )
            .state(&mut StateBuilder::atomic("b"))
            .state(&mut StateBuilder::atomic("c"))
            .build();
        assert!(matches!(result, Err(BuildError::AmbiguousTransition { .. })));
    }
}
